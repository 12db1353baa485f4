//! Audio envelope traced across the band as a horizontal waveform.

use super::{hsv_to_rgb, FrameSource, RawPoint};
use crate::context::FrameContext;
use pyramid::LaserBounds;

const SAMPLES: usize = 256;
/// DAC units per unit of envelope.
const ENVELOPE_GAIN: f64 = 300.0;
/// Vertical distance from the baseline at which the hue wraps once.
const HUE_SPAN: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    /// Load a fresh envelope, beam off at the end of the trace.
    Refresh,
    /// Beam off back at the start of the trace.
    Rewind,
    Trace(usize),
}

pub struct AudioVisualization {
    xs: Vec<f64>,
    ys: Vec<f64>,
    base_y: f64,
    step: Step,
}

impl AudioVisualization {
    pub fn new(bounds: &LaserBounds) -> Self {
        let base_y = (bounds.min_y + bounds.max_y) / 2.0;
        let dx = bounds.width() / (SAMPLES - 1) as f64;
        Self {
            xs: (0..SAMPLES).map(|i| bounds.min_x + i as f64 * dx).collect(),
            ys: vec![base_y; SAMPLES],
            base_y,
            step: Step::Refresh,
        }
    }

    fn refresh(&mut self, ctx: &FrameContext) {
        let envelope = &ctx.audio.envelope;
        for (i, y) in self.ys.iter_mut().enumerate() {
            *y = match envelope.get(i) {
                Some(&v) => self.base_y + v as f64 * ENVELOPE_GAIN,
                None => self.base_y,
            };
        }
    }

    fn colour(&self, y: f64) -> [f64; 3] {
        if (0.0..4095.0).contains(&y) {
            hsv_to_rgb((y.trunc() - self.base_y).abs() / HUE_SPAN, 1.0, 1.0)
        } else {
            [0.0; 3]
        }
    }
}

impl FrameSource for AudioVisualization {
    fn produce_tick(&mut self, ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint> {
        let (x, y, rgb) = match self.step {
            Step::Refresh => {
                self.refresh(ctx);
                self.step = Step::Rewind;
                (self.xs[SAMPLES - 1], self.ys[SAMPLES - 1], [0.0; 3])
            }
            Step::Rewind => {
                self.step = Step::Trace(1);
                (self.xs[0], self.ys[0], [0.0; 3])
            }
            Step::Trace(i) => {
                self.step = if i + 1 == SAMPLES {
                    Step::Refresh
                } else {
                    Step::Trace(i + 1)
                };
                (self.xs[i], self.ys[i], self.colour(self.ys[i]))
            }
        };

        (0..num_lasers)
            .map(|laser| RawPoint::new(laser as u8, x, y, rgb))
            .collect()
    }
}
