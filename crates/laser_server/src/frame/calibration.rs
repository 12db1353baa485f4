//! Green outline of the usable projection band.

use super::{interpolate_path, FrameSource, RawPoint};
use crate::context::FrameContext;
use pyramid::Point2;

/// Largest DAC step between consecutive outline points.
const OUTLINE_STEP: f64 = 20.0;
const GREEN: [f64; 3] = [0.0, 255.0, 0.0];

pub struct Calibration {
    path: Vec<(f64, f64)>,
    index: usize,
}

impl Calibration {
    pub fn new(outline: &[Point2<f64>; 4]) -> Self {
        let mut corners: Vec<(f64, f64)> = outline
            .iter()
            .map(|p| (p.x.trunc(), p.y.trunc()))
            .collect();
        corners.push(corners[0]);

        Self {
            path: interpolate_path(&corners, OUTLINE_STEP),
            index: 0,
        }
    }
}

impl FrameSource for Calibration {
    fn produce_tick(&mut self, _ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint> {
        let (x, y) = self.path[self.index];
        self.index = (self.index + 1) % self.path.len();
        (0..num_lasers)
            .map(|i| RawPoint::new(i as u8, x, y, GREEN))
            .collect()
    }
}
