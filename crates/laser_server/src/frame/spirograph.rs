//! Slowly drifting random spirographs, one per laser.

use super::{hsv_to_rgb, ticks, FrameSource, RawPoint};
use crate::context::FrameContext;
use pyramid::LaserBounds;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SCALE: f64 = 1.5;
const DRIFT: f64 = 0.01;
const HUE_DRIFT: f64 = 0.00001;
/// Seconds between switching from drawn curves to dotted points and back.
const MODE_PERIOD_SECS: f64 = 30.0;

/// A parameter that bounces between two limits by a fixed step.
#[derive(Debug, Clone, Copy)]
struct Oscillation {
    step: f64,
    lower: f64,
    upper: f64,
}

impl Oscillation {
    fn apply(&mut self, value: &mut f64) {
        *value += self.step;
        if *value < self.lower || *value > self.upper {
            self.step = -self.step;
        }
    }
}

/// Hypotrochoid-style curve.
#[derive(Debug, Clone)]
struct Curve {
    r1: f64,
    r2: f64,
    a: f64,
    t: f64,
    t_step: f64,
    r2_drift: Oscillation,
    a_drift: Oscillation,
    x: f64,
    y: f64,
}

impl Curve {
    fn random(rng: &mut StdRng) -> Self {
        Self {
            r1: rng.gen_range(100.0..110.0),
            r2: rng.gen_range(40.0..80.0),
            a: rng.gen_range(0.3..0.9),
            t: 0.0,
            t_step: rng.gen_range(0.15..0.25),
            r2_drift: Oscillation {
                step: 0.000_000_02,
                lower: 40.0,
                upper: 80.0,
            },
            a_drift: Oscillation {
                step: 0.000_000_002,
                lower: 0.3,
                upper: 0.9,
            },
            x: 0.0,
            y: 0.0,
        }
    }

    fn advance(&mut self, offset: (f64, f64)) -> (f64, f64) {
        self.t += self.t_step;
        self.r2_drift.apply(&mut self.r2);
        self.a_drift.apply(&mut self.a);

        let (s1, c1) = self.t.sin_cos();
        let (s2, c2) = (self.t * self.r1 / self.r2).sin_cos();
        let x = self.r1 * s1 + self.a * self.r2 * (-s1 + c2 * s1 - c1 * s2);
        let y = -self.r1 * c1 + self.a * self.r2 * (c1 - c1 * c2 - s1 * s2);

        self.x = x * SCALE + offset.0;
        self.y = y * SCALE + offset.1;
        (self.x, self.y)
    }
}

#[derive(Debug, Clone)]
struct Lane {
    curve: Curve,
    offset: (f64, f64),
    dir: (f64, f64),
    hue: f64,
}

pub struct Spirograph {
    rng: StdRng,
    bounds: LaserBounds,
    lanes: Vec<Lane>,
    iteration: u64,
    point_mode: bool,
    ticks_until_toggle: u64,
}

impl Spirograph {
    pub fn new(bounds: &LaserBounds, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            bounds: *bounds,
            lanes: Vec::new(),
            iteration: 0,
            point_mode: false,
            ticks_until_toggle: ticks(MODE_PERIOD_SECS),
        }
    }

    fn new_lane(&mut self) -> Lane {
        let center = self.bounds.center();
        let mut sign = || if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let dir = (DRIFT * sign(), DRIFT * sign());
        Lane {
            curve: Curve::random(&mut self.rng),
            offset: (center.0.floor(), center.1.floor()),
            dir,
            hue: self.rng.gen_range(0.0..0.9),
        }
    }

    fn ensure_lanes(&mut self, num_lasers: usize) {
        while self.lanes.len() < num_lasers {
            let lane = self.new_lane();
            self.lanes.push(lane);
        }
    }
}

impl FrameSource for Spirograph {
    fn produce_tick(&mut self, _ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint> {
        self.ensure_lanes(num_lasers);

        self.ticks_until_toggle -= 1;
        if self.ticks_until_toggle == 0 {
            self.point_mode = !self.point_mode;
            self.ticks_until_toggle = ticks(MODE_PERIOD_SECS);
        }
        self.iteration += 1;

        let bounds = self.bounds;
        let mut out = Vec::with_capacity(num_lasers);
        for (i, lane) in self.lanes.iter_mut().take(num_lasers).enumerate() {
            let id = i as u8;
            let rgb = hsv_to_rgb(lane.hue, 1.0, 1.0);

            // Point mode draws each vertex as a lone dot: move dark, light
            // it, then move dark to the next one.
            let point = if !self.point_mode {
                let (x, y) = lane.curve.advance(lane.offset);
                RawPoint::new(id, x, y, rgb)
            } else {
                match self.iteration % 3 {
                    0 => RawPoint::dark(id, lane.curve.x, lane.curve.y),
                    1 => RawPoint::new(id, lane.curve.x, lane.curve.y, rgb),
                    _ => {
                        let (x, y) = lane.curve.advance(lane.offset);
                        RawPoint::dark(id, x, y)
                    }
                }
            };
            out.push(point);

            lane.hue += HUE_DRIFT;
            if lane.hue > 1.0 {
                lane.hue = 0.0;
            }

            lane.offset.0 += lane.dir.0;
            lane.offset.1 += lane.dir.1;
            let (x, y) = (lane.curve.x, lane.curve.y);
            if (x > bounds.max_x && lane.dir.0 > 0.0) || (x < bounds.min_x && lane.dir.0 < 0.0) {
                lane.dir.0 = -lane.dir.0;
            }
            if (y > bounds.max_y && lane.dir.1 > 0.0) || (y < bounds.min_y && lane.dir.1 < 0.0) {
                lane.dir.1 = -lane.dir.1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::test_env;

    #[test]
    fn test_same_seed_same_drawing() {
        let env = test_env();
        let mut a = Spirograph::new(&env.bounds, 42);
        let mut b = Spirograph::new(&env.bounds, 42);
        let mut c = Spirograph::new(&env.bounds, 43);
        let ctx = FrameContext::default();

        let mut differs = false;
        for _ in 0..500 {
            let pa = a.next_tick(&ctx, 3);
            assert_eq!(pa, b.next_tick(&ctx, 3));
            differs |= pa != c.next_tick(&ctx, 3);
        }
        assert!(differs);
    }

    #[test]
    fn test_curve_parameters_in_range() {
        let env = test_env();
        let mut source = Spirograph::new(&env.bounds, 1);
        source.ensure_lanes(3);
        for lane in &source.lanes {
            assert!((100.0..110.0).contains(&lane.curve.r1));
            assert!((40.0..80.0).contains(&lane.curve.r2));
            assert!((0.3..0.9).contains(&lane.curve.a));
            assert!((0.15..0.25).contains(&lane.curve.t_step));
            assert_eq!(lane.dir.0.abs(), DRIFT);
        }
    }

    #[test]
    fn test_point_mode_blinks_dots() {
        let env = test_env();
        let mut source = Spirograph::new(&env.bounds, 5);
        source.point_mode = true;
        source.ticks_until_toggle = u64::MAX;
        let ctx = FrameContext::default();

        // Iterations 1, 2, 3: lit, advance dark, hold dark.
        let lit = source.next_tick(&ctx, 1)[0];
        let moved = source.next_tick(&ctx, 1)[0];
        let held = source.next_tick(&ctx, 1)[0];
        assert!(!lit.is_blank());
        assert!(moved.is_blank());
        assert!(held.is_blank());
        assert_eq!((moved.x, moved.y), (held.x, held.y));
    }

    #[test]
    fn test_curve_drawn_near_band() {
        let env = test_env();
        let mut source = Spirograph::new(&env.bounds, 9);
        let ctx = FrameContext::default();
        let (cx, cy) = env.bounds.center();
        for _ in 0..1000 {
            let p = source.next_tick(&ctx, 3)[2];
            // r1 + a * 2 * r2, scaled.
            assert!((p.x as f64 - cx).abs() < 400.0);
            assert!((p.y as f64 - cy).abs() < 400.0);
        }
    }
}
