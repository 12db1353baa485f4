//! Static model of the tetrahedron, its projection surfaces and laser mounts.

use crate::error::GeometryError;
use nalgebra::{Point3, Vector3};

/// One laser per side of the pyramid.
pub const NUM_LASERS: usize = 3;

/// Physical constants the model is derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryConfig {
    /// Edge length of the tetrahedron.
    pub side_length: f64,
    /// Eye height of the person holding the wand, same units as `side_length`.
    pub human_height: f64,
    /// Half of the scanner's beam angle, in radians.
    pub laser_half_angle: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            side_length: 39.0,
            human_height: 5.0,
            laser_half_angle: 55f64.to_radians(),
        }
    }
}

impl GeometryConfig {
    pub fn validate(&self) -> Result<(), GeometryError> {
        if !(self.side_length.is_finite() && self.side_length > 0.0) {
            return Err(GeometryError::InvalidConfig(format!(
                "side_length must be positive, got {}",
                self.side_length
            )));
        }

        if !(self.human_height.is_finite() && self.human_height >= 0.0) {
            return Err(GeometryError::InvalidConfig(format!(
                "human_height must be non-negative, got {}",
                self.human_height
            )));
        }

        let right_angle = std::f64::consts::FRAC_PI_2;
        if !(self.laser_half_angle > 0.0 && self.laser_half_angle < right_angle) {
            return Err(GeometryError::InvalidConfig(format!(
                "laser_half_angle must be in (0, pi/2), got {}",
                self.laser_half_angle
            )));
        }

        Ok(())
    }
}

pub type Edge = (Point3<f64>, Point3<f64>);

/// Quadrilateral band on one face that a single laser illuminates.
#[derive(Debug, Clone)]
pub struct Surface {
    /// `[a_bottom, a_top, b_top, b_bottom]` along the two bounding edges.
    pub corners: [Point3<f64>; 4],
    /// Unit normal with a non-negative z component.
    pub normal: Vector3<f64>,
}

impl Surface {
    fn new(corners: [Point3<f64>; 4]) -> Self {
        let mut normal = (corners[1] - corners[0]).cross(&(corners[2] - corners[0]));
        if normal.z < 0.0 {
            normal = -normal;
        }

        Self {
            corners,
            normal: normal.normalize(),
        }
    }

    pub fn center(&self) -> Point3<f64> {
        let sum = self
            .corners
            .iter()
            .fold(Vector3::zeros(), |acc, c| acc + c.coords);
        Point3::from(sum / 4.0)
    }

    /// Point-in-quad test for a point already on the surface plane, done as
    /// two triangles `(0, 1, 2)` and `(2, 3, 0)`.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        let [a, b, c, d] = &self.corners;
        point_in_triangle(a, b, c, p) || point_in_triangle(c, d, a, p)
    }
}

fn same_side(p1: &Point3<f64>, p2: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> bool {
    let ab = b - a;
    ab.cross(&(p1 - a)).dot(&ab.cross(&(p2 - a))) >= 0.0
}

fn point_in_triangle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, p: &Point3<f64>) -> bool {
    same_side(p, a, b, c) && same_side(p, b, a, c) && same_side(p, c, a, b)
}

/// Point on a non-horizontal edge at height `z`.
fn edge_point_at_height(edge: &Edge, z: f64) -> Point3<f64> {
    let (a, b) = edge;
    let t = (z - a.z) / (b.z - a.z);
    Point3::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y), z)
}

/// The pyramid as built. Immutable after construction.
#[derive(Debug, Clone)]
pub struct GeometryModel {
    config: GeometryConfig,
    vertices: [Point3<f64>; 4],
    edges: [Edge; 6],
    surfaces: [Surface; NUM_LASERS],
    lasers: [Point3<f64>; NUM_LASERS],
    tetra_height: f64,
    band_bottom: f64,
    band_top: f64,
}

impl GeometryModel {
    pub fn new(config: GeometryConfig) -> Result<Self, GeometryError> {
        config.validate()?;

        let s = config.side_length;
        let triangle_height = (s * s - (s / 2.0) * (s / 2.0)).sqrt();
        let tetra_height = s * (2.0f64 / 3.0).sqrt();
        let band_bottom = tetra_height / 4.0;
        let band_top = tetra_height / 2.0;

        let vertices = [
            Point3::new(-s / 2.0, -triangle_height / 3.0, 0.0),
            Point3::new(s / 2.0, -triangle_height / 3.0, 0.0),
            Point3::new(0.0, triangle_height * 2.0 / 3.0, 0.0),
            Point3::new(0.0, 0.0, tetra_height),
        ];

        let edges = [
            (vertices[0], vertices[1]),
            (vertices[0], vertices[2]),
            (vertices[1], vertices[2]),
            (vertices[1], vertices[3]),
            (vertices[0], vertices[3]),
            (vertices[2], vertices[3]),
        ];

        // Each surface spans two of the sloped edges; the third sloped edge
        // carries the laser that faces it.
        let band = |a: usize, b: usize| {
            Surface::new([
                edge_point_at_height(&edges[a], band_bottom),
                edge_point_at_height(&edges[a], band_top),
                edge_point_at_height(&edges[b], band_top),
                edge_point_at_height(&edges[b], band_bottom),
            ])
        };
        let surfaces = [band(4, 5), band(3, 5), band(3, 4)];

        let lasers = [
            edge_point_at_height(&edges[3], band_bottom),
            edge_point_at_height(&edges[4], band_bottom),
            edge_point_at_height(&edges[5], band_bottom),
        ];

        tracing::debug!(
            side_length = s,
            tetra_height,
            band_bottom,
            band_top,
            "Built pyramid geometry"
        );

        Ok(Self {
            config,
            vertices,
            edges,
            surfaces,
            lasers,
            tetra_height,
            band_bottom,
            band_top,
        })
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    pub fn edges(&self) -> &[Edge; 6] {
        &self.edges
    }

    pub fn surfaces(&self) -> &[Surface; NUM_LASERS] {
        &self.surfaces
    }

    /// Mounting point of each laser; laser `i` faces surface `i`.
    pub fn lasers(&self) -> &[Point3<f64>; NUM_LASERS] {
        &self.lasers
    }

    pub fn tetra_height(&self) -> f64 {
        self.tetra_height
    }

    /// Lower and upper z of the projection band.
    pub fn band(&self) -> (f64, f64) {
        (self.band_bottom, self.band_top)
    }

    /// Where the wand ray starts.
    pub fn eye_position(&self) -> Point3<f64> {
        Point3::new(0.0, 0.0, self.config.human_height)
    }

    /// Visual center of the structure: on the line from the midpoint of the
    /// base edge (0, 2) to the apex, halfway up the projection band.
    pub fn center_target(&self) -> Point3<f64> {
        let base_mid = Point3::from((self.vertices[0].coords + self.vertices[2].coords) / 2.0);
        let center_line = (base_mid, Point3::new(0.0, 0.0, self.tetra_height));
        let z = self.band_bottom + (self.band_top - self.band_bottom) / 2.0;
        edge_point_at_height(&center_line, z)
    }
}
