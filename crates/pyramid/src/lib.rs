//! Geometry of the sierpinski pyramid installation.
//!
//! Laser scanners address a flat 12-bit square ("DAC space"). The pyramid
//! lives in a shared 3D "structure space" with the base triangle on z = 0 and
//! the apex on +z. This crate builds the static model once at startup, fits a
//! homogeneous transform per laser between the two spaces, and casts wand
//! rays onto the projection surfaces.

pub mod error;
pub mod geometry;
pub mod lstsq;
pub mod transform;
pub mod wand;

pub use error::GeometryError;
pub use geometry::{GeometryConfig, GeometryModel, Surface, NUM_LASERS};
pub use transform::{CoordinateTransformer, LaserBounds, LaserTransform};
pub use wand::{CalibrationOffset, Orientation, SurfaceHit};

pub use nalgebra::{Point2, Point3, Quaternion, UnitQuaternion, Vector3};
