//! Wand orientation and ray casting onto the projection surfaces.

use crate::geometry::GeometryModel;
use crate::transform::CoordinateTransformer;
use nalgebra::{Point3, UnitQuaternion, Vector3};

/// Rays more parallel to a surface than this are not cast onto it.
pub const MIN_RAY_DENOM: f64 = 0.01;

/// Direction the wand points in its rest pose.
pub fn wand_vector() -> Vector3<f64> {
    Vector3::new(0.0, -1.0, 0.0)
}

/// Yaw/pitch correction applied on top of the raw wand pose, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationOffset {
    pub yaw: f64,
    pub pitch: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    raw: UnitQuaternion<f64>,
    offset: CalibrationOffset,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::new(UnitQuaternion::identity())
    }
}

impl Orientation {
    pub fn new(raw: UnitQuaternion<f64>) -> Self {
        Self {
            raw,
            offset: CalibrationOffset::default(),
        }
    }

    pub fn raw(&self) -> &UnitQuaternion<f64> {
        &self.raw
    }

    /// Replaces the sensor pose, keeping the calibration.
    pub fn set_raw(&mut self, raw: UnitQuaternion<f64>) {
        self.raw = raw;
    }

    pub fn offset(&self) -> CalibrationOffset {
        self.offset
    }

    pub fn raw_direction(&self) -> Vector3<f64> {
        self.raw * wand_vector()
    }

    /// Calibrated pointing direction, unit length.
    pub fn direction(&self) -> Vector3<f64> {
        let (yaw, pitch) = yaw_pitch(&self.raw_direction());
        from_yaw_pitch(yaw + self.offset.yaw, pitch + self.offset.pitch)
    }

    /// Re-zeroes the offset so the current pose points along `target`.
    pub fn calibrate(&mut self, target: &Vector3<f64>) {
        let (target_yaw, target_pitch) = yaw_pitch(target);
        let (yaw, pitch) = yaw_pitch(&self.raw_direction());
        self.offset = CalibrationOffset {
            yaw: target_yaw - yaw,
            pitch: target_pitch - pitch,
        };
    }
}

fn yaw_pitch(v: &Vector3<f64>) -> (f64, f64) {
    let n = v.norm();
    let z = if n > 0.0 { v.z / n } else { 0.0 };
    (v.y.atan2(v.x), z.clamp(-1.0, 1.0).asin())
}

fn from_yaw_pitch(yaw: f64, pitch: f64) -> Vector3<f64> {
    Vector3::new(
        pitch.cos() * yaw.cos(),
        pitch.cos() * yaw.sin(),
        pitch.sin(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub surface: usize,
    pub point: Point3<f64>,
}

/// First surface, in surface order, hit by the ray from `origin` along
/// `direction`. Downward rays never hit.
pub fn cast_ray(
    geometry: &GeometryModel,
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
) -> Option<SurfaceHit> {
    let dir = direction.try_normalize(f64::EPSILON)?;
    if dir.z < 0.0 {
        return None;
    }

    geometry
        .surfaces()
        .iter()
        .enumerate()
        .find_map(|(i, surface)| {
            let denom = dir.dot(&surface.normal);
            if denom < MIN_RAY_DENOM {
                return None;
            }

            let t = (surface.corners[0] - *origin).dot(&surface.normal) / denom;
            let point = *origin + dir * t;
            surface
                .contains(&point)
                .then_some(SurfaceHit { surface: i, point })
        })
}

impl CoordinateTransformer {
    pub fn cast_wand(&self, orientation: &Orientation) -> Option<SurfaceHit> {
        let geometry = self.geometry();
        cast_ray(geometry, &geometry.eye_position(), &orientation.direction())
    }

    /// Laser and DAC position of the wand's dot, if it lands on a surface.
    /// Surface `i` is drawn by laser `i`.
    pub fn project_wand(&self, orientation: &Orientation) -> Option<(usize, f64, f64)> {
        let hit = self.cast_wand(orientation)?;
        let (x, y) = self.structure_to_laser(hit.surface, &hit.point).ok()?;
        Some((hit.surface, x, y))
    }

    /// Makes the wand's current pose point at the structure's visual center.
    pub fn calibrate_wand(&self, orientation: &mut Orientation) {
        let geometry = self.geometry();
        let target = geometry.center_target() - geometry.eye_position();
        orientation.calibrate(&target);
        tracing::debug!(offset = ?orientation.offset(), "Calibrated wand");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryConfig;

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::from_config(GeometryConfig::default()).unwrap()
    }

    fn pointing_at(dir: &Vector3<f64>) -> Orientation {
        let raw = UnitQuaternion::rotation_between(&wand_vector(), dir).unwrap();
        Orientation::new(raw)
    }

    #[test]
    fn test_rest_pose_points_along_wand_vector() {
        let o = Orientation::default();
        assert!((o.direction() - wand_vector()).norm() < 1e-12);
    }

    #[test]
    fn test_ray_hits_each_surface_center() {
        let t = transformer();
        let eye = t.geometry().eye_position();
        for (i, surface) in t.geometry().surfaces().iter().enumerate() {
            let center = surface.center();
            let hit = t.cast_wand(&pointing_at(&(center - eye))).unwrap();
            assert_eq!(hit.surface, i);
            assert!((hit.point - center).norm() < 1e-6);
        }
    }

    #[test]
    fn test_downward_and_vertical_rays_miss() {
        let t = transformer();
        let g = t.geometry();
        let eye = g.eye_position();
        assert!(cast_ray(g, &eye, &Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cast_ray(g, &eye, &Vector3::new(0.1, 0.2, -0.5)).is_none());
        assert!(cast_ray(g, &eye, &Vector3::new(0.0, 0.0, 1.0)).is_none());
        assert!(cast_ray(g, &eye, &Vector3::zeros()).is_none());
    }

    #[test]
    fn test_calibration_points_wand_at_center_target() {
        let t = transformer();
        let raw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 30f64.to_radians());
        let mut o = Orientation::new(raw);
        assert!(t.cast_wand(&o).is_none());

        t.calibrate_wand(&mut o);
        let g = t.geometry();
        let expected = (g.center_target() - g.eye_position()).normalize();
        assert!((o.direction() - expected).norm() < 1e-9);

        let hit = t.cast_wand(&o).unwrap();
        assert_eq!(hit.surface, 0);
        assert!((hit.point - g.center_target()).norm() < 1e-6);

        let (laser, x, y) = t.project_wand(&o).unwrap();
        assert_eq!(laser, 0);
        assert!((x - 2048.0).abs() < 1e-3);
        assert!((y - 1794.62).abs() < 0.01);
    }

    #[test]
    fn test_calibration_survives_pose_updates() {
        let t = transformer();
        let mut o = Orientation::new(UnitQuaternion::identity());
        t.calibrate_wand(&mut o);
        let offset = o.offset();

        // Turning the wand 90 degrees to the right moves the dot by the same yaw.
        let before = o.direction();
        o.set_raw(UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            -std::f64::consts::FRAC_PI_2,
        ));
        assert_eq!(o.offset(), offset);

        let after = o.direction();
        assert!((after.z - before.z).abs() < 1e-9);
        let yaw_delta = after.y.atan2(after.x) - before.y.atan2(before.x);
        let wrapped = (yaw_delta + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU)
            - std::f64::consts::PI;
        assert!((wrapped + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }
}
