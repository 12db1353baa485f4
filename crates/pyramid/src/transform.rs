//! Per-laser homogeneous transforms between DAC space and structure space.
//!
//! Each laser's 12-bit square is laid onto the plane of the surface it
//! faces. The square is centred on the foot of the perpendicular from the
//! laser mount onto that plane and its half-width follows from the beam
//! angle. The two 4x4 matrices are fitted by least squares from four
//! DAC/structure correspondences:
//!
//! ```text
//! DAC (2048, 2048) -> center
//! DAC (   0, 2048) -> center + hw * v1
//! DAC (2048, 4095) -> center + hw * v2
//! DAC (4095, 2048) -> center - hw * (2047 / 2048) * v1
//! ```

use crate::error::GeometryError;
use crate::geometry::{GeometryConfig, GeometryModel, NUM_LASERS};
use crate::lstsq::least_squares;
use nalgebra::{DMatrix, Matrix4, Point2, Point3, Vector3, Vector4};

const DAC_MID: f64 = 2048.0;
const DAC_MAX: f64 = 4095.0;

/// Points in a plane give a rank 3 homogeneous system.
const CALIBRATION_RANK: usize = 3;

#[derive(Debug, Clone)]
pub struct LaserTransform {
    /// DAC `[x, y, 0, 1]` to structure `[X, Y, Z, 1]`.
    pub forward: Matrix4<f64>,
    /// Structure `[X, Y, Z, 1]` to DAC `[x, y, _, _]`.
    pub inverse: Matrix4<f64>,
    pub mount: Point3<f64>,
    pub center: Point3<f64>,
    pub half_width: f64,
    pub v1: Vector3<f64>,
    pub v2: Vector3<f64>,
}

impl LaserTransform {
    fn fit(
        laser: usize,
        mount: Point3<f64>,
        plane_point: Point3<f64>,
        normal: Vector3<f64>,
        half_angle: f64,
    ) -> Result<Self, GeometryError> {
        let center = mount - normal * (mount - plane_point).dot(&normal);
        let half_width = (center - mount).norm() * half_angle.tan();

        let v1 = Vector3::new(-normal.y, normal.x, 0.0)
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| {
                GeometryError::InvalidConfig(format!("surface facing laser {laser} is horizontal"))
            })?;
        let v2 = normal.cross(&v1);

        let dac = [
            (DAC_MID, DAC_MID),
            (0.0, DAC_MID),
            (DAC_MID, DAC_MAX),
            (DAC_MAX, DAC_MID),
        ];
        let structure = [
            center,
            center + v1 * half_width,
            center + v2 * half_width,
            center - v1 * (half_width * (DAC_MAX - DAC_MID) / DAC_MID),
        ];

        let a = DMatrix::from_fn(dac.len(), 4, |row, col| match col {
            0 => dac[row].0,
            1 => dac[row].1,
            2 => 0.0,
            _ => 1.0,
        });
        let b = DMatrix::from_fn(structure.len(), 4, |row, col| match col {
            3 => 1.0,
            c => structure[row][c],
        });

        let calibration = |source| GeometryError::Calibration { laser, source };
        let forward = least_squares(&a, &b, CALIBRATION_RANK).map_err(calibration)?;
        let inverse = least_squares(&b, &a, CALIBRATION_RANK).map_err(calibration)?;

        Ok(Self {
            forward: to_matrix4(&forward.transpose()),
            inverse: to_matrix4(&inverse.transpose()),
            mount,
            center,
            half_width,
            v1,
            v2,
        })
    }

    pub fn to_structure(&self, x: f64, y: f64) -> Point3<f64> {
        let p = self.forward * Vector4::new(x, y, 0.0, 1.0);
        Point3::new(p.x, p.y, p.z)
    }

    pub fn to_laser(&self, p: &Point3<f64>) -> (f64, f64) {
        let d = self.inverse * p.to_homogeneous();
        (d.x, d.y)
    }
}

fn to_matrix4(m: &DMatrix<f64>) -> Matrix4<f64> {
    Matrix4::from_iterator(m.iter().copied())
}

/// Usable DAC rectangle inside the projection band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl LaserBounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }
}

/// Geometry plus the fitted transform of every laser. Built once at startup
/// and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    geometry: GeometryModel,
    lasers: Vec<LaserTransform>,
    coordinate_bounds: [Point2<f64>; 4],
    laser_bounds: LaserBounds,
}

impl CoordinateTransformer {
    pub fn from_config(config: GeometryConfig) -> Result<Self, GeometryError> {
        Self::new(GeometryModel::new(config)?)
    }

    pub fn new(geometry: GeometryModel) -> Result<Self, GeometryError> {
        let half_angle = geometry.config().laser_half_angle;

        let lasers = geometry
            .lasers()
            .iter()
            .zip(geometry.surfaces())
            .enumerate()
            .map(|(i, (mount, surface))| {
                let transform =
                    LaserTransform::fit(i, *mount, surface.corners[0], surface.normal, half_angle)?;
                tracing::info!(
                    laser = i,
                    center = ?transform.center,
                    half_width = transform.half_width,
                    "Calibrated laser transform"
                );
                Ok(transform)
            })
            .collect::<Result<Vec<_>, GeometryError>>()?;

        // The pyramid is symmetric, so the outline of surface 0 seen from
        // laser 0 is the outline for every laser.
        let coordinate_bounds = geometry.surfaces()[0].corners.map(|corner| {
            let (x, y) = lasers[0].to_laser(&corner);
            Point2::new(x, y)
        });
        let laser_bounds = interior_bounds(&coordinate_bounds);

        tracing::info!(
            min_x = laser_bounds.min_x,
            max_x = laser_bounds.max_x,
            min_y = laser_bounds.min_y,
            max_y = laser_bounds.max_y,
            "Computed laser bounds"
        );

        Ok(Self {
            geometry,
            lasers,
            coordinate_bounds,
            laser_bounds,
        })
    }

    pub fn geometry(&self) -> &GeometryModel {
        &self.geometry
    }

    pub fn num_lasers(&self) -> usize {
        NUM_LASERS
    }

    pub fn laser(&self, laser: usize) -> Result<&LaserTransform, GeometryError> {
        self.lasers
            .get(laser)
            .ok_or(GeometryError::UnknownLaser(laser))
    }

    pub fn laser_center(&self, laser: usize) -> Result<Point3<f64>, GeometryError> {
        Ok(self.laser(laser)?.center)
    }

    pub fn laser_to_structure(
        &self,
        laser: usize,
        x: f64,
        y: f64,
    ) -> Result<Point3<f64>, GeometryError> {
        Ok(self.laser(laser)?.to_structure(x, y))
    }

    pub fn structure_to_laser(
        &self,
        laser: usize,
        p: &Point3<f64>,
    ) -> Result<(f64, f64), GeometryError> {
        Ok(self.laser(laser)?.to_laser(p))
    }

    /// Corners of the projection band in DAC space, in surface corner order.
    pub fn coordinate_bounds(&self) -> [Point2<f64>; 4] {
        self.coordinate_bounds
    }

    pub fn laser_bounds(&self) -> LaserBounds {
        self.laser_bounds
    }
}

/// The band is a trapezoid in DAC space. The rectangle kept is the one
/// between its two inner x values.
fn interior_bounds(corners: &[Point2<f64>; 4]) -> LaserBounds {
    let mut xs = corners.map(|p| p.x);
    xs.sort_by(f64::total_cmp);

    let (min_y, max_y) = corners
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.y), hi.max(p.y))
        });

    LaserBounds {
        min_x: xs[1],
        max_x: xs[2],
        min_y,
        max_y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::from_config(GeometryConfig::default()).unwrap()
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_zero_beam_width_fails_calibration() {
        // Every correspondence collapses onto the laser centre.
        let err = LaserTransform::fit(
            1,
            Point3::origin(),
            Point3::new(5.0, 0.0, 0.0),
            Vector3::x(),
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::Calibration { laser: 1, .. }));
    }

    #[test]
    fn test_calibration_points_map_exactly() {
        let t = transformer();
        for laser in 0..t.num_lasers() {
            let lt = t.laser(laser).unwrap();
            let c = t.laser_to_structure(laser, 2048.0, 2048.0).unwrap();
            assert!((c - lt.center).norm() < 1e-9);

            let edge = t.laser_to_structure(laser, 0.0, 2048.0).unwrap();
            assert!((edge - (lt.center + lt.v1 * lt.half_width)).norm() < 1e-9);
        }

        let lt = t.laser(0).unwrap();
        assert!(close(lt.half_width, 34.1078, 1e-3));
        assert!(close(lt.center.z, t.geometry().band().1, 1e-6));
    }

    #[test]
    fn test_inverse_consistency() {
        let t = transformer();
        for laser in 0..t.num_lasers() {
            for &(x, y) in &[
                (0.0, 0.0),
                (2048.0, 2048.0),
                (1500.0, 1600.0),
                (4095.0, 4095.0),
                (100.0, 3900.0),
            ] {
                let p = t.laser_to_structure(laser, x, y).unwrap();
                let (bx, by) = t.structure_to_laser(laser, &p).unwrap();
                assert!(close(bx, x, 1e-3), "laser {laser}: x {x} -> {bx}");
                assert!(close(by, y, 1e-3), "laser {laser}: y {y} -> {by}");
            }
        }
    }

    #[test]
    fn test_structure_points_land_on_surface_plane() {
        let t = transformer();
        for (laser, surface) in t.geometry().surfaces().iter().enumerate() {
            let p = t.laser_to_structure(laser, 700.0, 3100.0).unwrap();
            let offset = (p - surface.corners[0]).dot(&surface.normal);
            assert!(offset.abs() < 1e-9);
        }
    }

    #[test]
    fn test_laser_bounds() {
        let t = transformer();
        let bounds = t.laser_bounds();
        assert!(close(bounds.min_x, 1462.56, 0.05));
        assert!(close(bounds.max_x, 2633.44, 0.05));
        assert!(close(bounds.min_y, 1541.24, 0.05));
        assert!(close(bounds.max_y, 2048.0, 0.05));

        assert!(bounds.width() > 0.0 && bounds.height() > 0.0);
        for v in [bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y] {
            assert!(v > 0.0 && v < 4095.0);
        }

        let corners = t.coordinate_bounds();
        assert!(close(corners[0].x, 1169.84, 0.05));
        assert!(close(corners[3].x, 2926.16, 0.05));
    }

    #[test]
    fn test_surface_centers_map_to_same_dac_point() {
        let t = transformer();
        for (laser, surface) in t.geometry().surfaces().iter().enumerate() {
            let (x, y) = t.structure_to_laser(laser, &surface.center()).unwrap();
            assert!(close(x, 2048.0, 1e-6));
            assert!(close(y, 1794.62, 0.01));
        }
    }

    #[test]
    fn test_unknown_laser() {
        let t = transformer();
        assert!(matches!(
            t.laser_to_structure(3, 0.0, 0.0),
            Err(GeometryError::UnknownLaser(3))
        ));
        assert!(t.laser_center(7).is_err());
    }
}
