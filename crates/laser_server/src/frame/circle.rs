//! Circles centred on the usable band: a breathing rainbow ring and a
//! drum-reactive ring whose radius follows the audio amplitude.

use super::{hsv_to_rgb, FrameSource, RawPoint, NOMINAL_TICK_RATE};
use crate::context::FrameContext;
use pyramid::LaserBounds;
use std::f64::consts::TAU;

const CIRCLE_POINTS: usize = 90;
/// Breathing speed of the rainbow circle, degrees of phase per second.
const BREATH_DEG_PER_SEC: f64 = 100.0;

/// Rainbow-coloured circle whose radius slowly breathes.
pub struct RainbowCircle {
    center: (f64, f64),
    max_radius: f64,
    phase_deg: f64,
    index: usize,
}

impl RainbowCircle {
    pub fn new(bounds: &LaserBounds) -> Self {
        Self {
            center: bounds.center(),
            max_radius: bounds.width().min(bounds.height()) / 2.0,
            phase_deg: 0.0,
            index: 0,
        }
    }

    fn radius(&self) -> f64 {
        self.max_radius * (0.6 + 0.4 * self.phase_deg.to_radians().sin())
    }
}

impl FrameSource for RainbowCircle {
    fn produce_tick(&mut self, _ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint> {
        let phi = TAU * self.index as f64 / (CIRCLE_POINTS - 1) as f64;
        let radius = self.radius();
        let x = radius * phi.sin() + self.center.0;
        let y = radius * phi.cos() + self.center.1;
        let rgb = [
            (phi.cos() + 1.0) * 127.5,
            ((phi + TAU / 3.0).cos() + 1.0) * 127.5,
            ((phi - TAU / 3.0).cos() + 1.0) * 127.5,
        ];

        self.index = (self.index + 1) % CIRCLE_POINTS;
        self.phase_deg = (self.phase_deg + BREATH_DEG_PER_SEC / NOMINAL_TICK_RATE) % 360.0;

        (0..num_lasers)
            .map(|i| RawPoint::new(i as u8, x, y, rgb))
            .collect()
    }
}

const DRUM_STEP_DEG: u32 = 8;
const BASE_AMPLITUDE: f64 = 100.0;
const AMPLITUDE_GAIN: f64 = 300.0;
const RADIUS_PAD: f64 = 50.0;

/// Circle whose size follows the audio amplitude, with a hue that rotates a
/// little every revolution.
pub struct Drums {
    center: (f64, f64),
    rotation: f64,
    amplitude: f64,
    angle_deg: u32,
}

impl Drums {
    pub fn new(bounds: &LaserBounds) -> Self {
        let center = bounds.center();
        Self {
            center: (center.0.floor(), center.1.floor()),
            rotation: 0.0,
            amplitude: BASE_AMPLITUDE,
            angle_deg: 0,
        }
    }
}

impl FrameSource for Drums {
    fn produce_tick(&mut self, ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint> {
        // Size and hue only change between revolutions.
        if self.angle_deg == 0 {
            self.rotation += 0.2;
            self.amplitude = BASE_AMPLITUDE + ctx.audio.amplitude as f64 * AMPLITUDE_GAIN;
        }

        let d = (self.angle_deg as f64).to_radians();
        let radius = RADIUS_PAD + self.amplitude;
        let x = radius * d.sin() + self.center.0;
        let y = radius * d.cos() + self.center.1;
        let hue = ((self.rotation + self.angle_deg as f64) as u32 % 360) as f64 / 360.0;
        let rgb = hsv_to_rgb(hue, 1.0, 1.0);

        self.angle_deg = (self.angle_deg + DRUM_STEP_DEG) % 360;

        (0..num_lasers)
            .map(|i| RawPoint::new(i as u8, x, y, rgb))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AudioLevels;
    use crate::frame::tests::test_env;

    fn distance(p: &laserpkt::LaserPoint, c: (f64, f64)) -> f64 {
        (p.x as f64 - c.0).hypot(p.y as f64 - c.1)
    }

    #[test]
    fn test_rainbow_circle_stays_in_bounds() {
        let env = test_env();
        let mut source = RainbowCircle::new(&env.bounds);
        let ctx = FrameContext::default();
        for _ in 0..5 * CIRCLE_POINTS {
            for p in source.next_tick(&ctx, 3) {
                assert!(p.x as f64 >= env.bounds.min_x.floor());
                assert!(p.x as f64 <= env.bounds.max_x);
                assert!(p.y as f64 >= env.bounds.min_y.floor());
                assert!(p.y as f64 <= env.bounds.max_y);
            }
        }
    }

    #[test]
    fn test_drums_radius_follows_amplitude() {
        let env = test_env();
        let mut quiet = Drums::new(&env.bounds);
        let mut loud = Drums::new(&env.bounds);
        let center = quiet.center;

        let silent = FrameContext::default();
        let mut noisy = FrameContext::default();
        noisy.audio = AudioLevels {
            amplitude: 1.0,
            ..AudioLevels::default()
        };

        let q = quiet.next_tick(&silent, 3)[0];
        let l = loud.next_tick(&noisy, 3)[0];
        assert!((distance(&q, center) - 150.0).abs() < 1.5);
        assert!((distance(&l, center) - 450.0).abs() < 1.5);

        // Amplitude is latched for the whole revolution.
        for _ in 1..(360 / DRUM_STEP_DEG) {
            let p = loud.next_tick(&silent, 3)[0];
            assert!((distance(&p, center) - 450.0).abs() < 1.5);
        }
        let p = loud.next_tick(&silent, 3)[0];
        assert!((distance(&p, center) - 150.0).abs() < 1.5);
    }
}
