//! Frame sources: infinite per-tick point generators, one point per laser
//! per tick.

mod audio;
mod calibration;
mod circle;
mod spirograph;
mod wand_drawing;

pub use audio::AudioVisualization;
pub use calibration::Calibration;
pub use circle::{Drums, RainbowCircle};
pub use spirograph::Spirograph;
pub use wand_drawing::WandDrawing;

use crate::context::FrameContext;
use laserpkt::LaserPoint;
use pyramid::{CoordinateTransformer, LaserBounds, Point2};
use std::panic::{self, AssertUnwindSafe};

/// Ticks per second at the default point rate. Time-based behaviour is
/// expressed in ticks against this rate.
pub const NOMINAL_TICK_RATE: f64 = 6590.0;

/// Number of ticks that last `secs` seconds at the nominal rate.
pub fn ticks(secs: f64) -> u64 {
    (secs * NOMINAL_TICK_RATE).round().max(1.0) as u64
}

/// Unclamped output of a generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub laser_id: u8,
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl RawPoint {
    pub fn new(laser_id: u8, x: f64, y: f64, [r, g, b]: [f64; 3]) -> Self {
        Self {
            laser_id,
            x,
            y,
            r,
            g,
            b,
        }
    }

    /// Beam off at `(x, y)`.
    pub fn dark(laser_id: u8, x: f64, y: f64) -> Self {
        Self::new(laser_id, x, y, [0.0; 3])
    }

    pub fn clamp(&self) -> LaserPoint {
        LaserPoint::clamped(self.laser_id, self.x, self.y, self.r, self.g, self.b)
    }
}

impl From<LaserPoint> for RawPoint {
    fn from(p: LaserPoint) -> Self {
        Self::new(
            p.laser_id,
            p.x as f64,
            p.y as f64,
            [p.r as f64, p.g as f64, p.b as f64],
        )
    }
}

/// One point per laser, indexed by laser id. Points for lasers beyond
/// `num_lasers` are dropped, missing lasers get a blank point, and a later
/// point for the same laser replaces an earlier one.
pub fn normalize(raw: impl IntoIterator<Item = RawPoint>, num_lasers: usize) -> Vec<LaserPoint> {
    let mut out: Vec<LaserPoint> = (0..num_lasers)
        .map(|i| LaserPoint::blank(i as u8))
        .collect();
    for p in raw {
        if let Some(slot) = out.get_mut(p.laser_id as usize) {
            *slot = p.clamp();
        }
    }
    out
}

pub trait FrameSource: Send {
    /// Advances by one tick.
    fn produce_tick(&mut self, ctx: &FrameContext, num_lasers: usize) -> Vec<RawPoint>;

    /// Advances by one tick and returns exactly `num_lasers` valid points.
    fn next_tick(&mut self, ctx: &FrameContext, num_lasers: usize) -> Vec<LaserPoint> {
        normalize(self.produce_tick(ctx, num_lasers), num_lasers)
    }
}

/// Runs one tick, catching a panic inside the source.
pub fn guarded_tick(
    source: &mut dyn FrameSource,
    ctx: &FrameContext,
    num_lasers: usize,
) -> Option<Vec<LaserPoint>> {
    panic::catch_unwind(AssertUnwindSafe(|| source.next_tick(ctx, num_lasers))).ok()
}

/// Hue in `[0, 1)` (wrapping), saturation and value in `[0, 1]`, to RGB
/// channels in `[0, 255]`.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [f64; 3] {
    let h = h.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [r * 255.0, g * 255.0, b * 255.0]
}

/// Resamples a polyline so consecutive points are at most `step` apart.
/// Every input vertex is kept.
pub fn interpolate_path(vertices: &[(f64, f64)], step: f64) -> Vec<(f64, f64)> {
    let Some(&last) = vertices.last() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for pair in vertices.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        let n = ((x1 - x0).hypot(y1 - y0) / step).ceil().max(1.0) as usize;
        out.extend((0..n).map(|k| {
            let t = k as f64 / n as f64;
            (x0 + t * (x1 - x0), y0 + t * (y1 - y0))
        }));
    }
    out.push(last);
    out
}

/// What generators need to know about the installation.
#[derive(Debug, Clone, Copy)]
pub struct SourceEnv {
    pub bounds: LaserBounds,
    pub outline: [Point2<f64>; 4],
    pub seed: u64,
}

impl SourceEnv {
    pub fn new(transformer: &CoordinateTransformer, seed: u64) -> Self {
        Self {
            bounds: transformer.laser_bounds(),
            outline: transformer.coordinate_bounds(),
            seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Mode {
    #[default]
    Off,
    Calibration,
    AudioVisualization,
    RainbowCircle,
    Spirograph,
    Drums,
    WandDrawing,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::Off,
        Mode::Calibration,
        Mode::AudioVisualization,
        Mode::RainbowCircle,
        Mode::Spirograph,
        Mode::Drums,
        Mode::WandDrawing,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Calibration => "calibration",
            Mode::AudioVisualization => "audio-visualization",
            Mode::RainbowCircle => "rainbow-circle",
            Mode::Spirograph => "spirograph",
            Mode::Drums => "drums",
            Mode::WandDrawing => "wand-drawing",
        }
    }

    /// The mode after this one when cycling, skipping `Off`.
    pub fn cycle_next(self) -> Self {
        let next = Self::from_id((self.id() + 1) % Self::ALL.len() as u8).unwrap_or_default();
        if next == Mode::Off {
            Mode::Calibration
        } else {
            next
        }
    }

    pub fn build(self, env: &SourceEnv) -> Option<Box<dyn FrameSource>> {
        let source: Box<dyn FrameSource> = match self {
            Mode::Off => return None,
            Mode::Calibration => Box::new(Calibration::new(&env.outline)),
            Mode::AudioVisualization => Box::new(AudioVisualization::new(&env.bounds)),
            Mode::RainbowCircle => Box::new(RainbowCircle::new(&env.bounds)),
            Mode::Spirograph => Box::new(Spirograph::new(&env.bounds, env.seed)),
            Mode::Drums => Box::new(Drums::new(&env.bounds)),
            Mode::WandDrawing => Box::new(WandDrawing::new()),
        };
        Some(source)
    }
}

/// Result of one tick through the mode table.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub points: Vec<LaserPoint>,
    /// The source panicked and was rebuilt; `points` is the blanked
    /// previous frame.
    pub recovered: bool,
}

/// Pause before retrying a source that panicked twice in a row.
pub const PANIC_BACKOFF_SECS: f64 = 1.0;

/// One source instance per mode. Only the selected mode advances, so the
/// others resume where they left off.
pub struct ModeTable {
    env: SourceEnv,
    mode: Mode,
    sources: Vec<Option<Box<dyn FrameSource>>>,
    last_frame: Vec<LaserPoint>,
    /// Consecutive panics of the selected source.
    panic_streak: u32,
    /// Ticks left before a repeatedly panicking source is tried again.
    backoff: u64,
}

impl ModeTable {
    pub fn new(env: SourceEnv, mode: Mode) -> Self {
        let sources = Mode::ALL.iter().map(|m| m.build(&env)).collect();
        Self {
            env,
            mode,
            sources,
            last_frame: Vec::new(),
            panic_streak: 0,
            backoff: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn select(&mut self, mode: Mode) {
        if mode != self.mode {
            tracing::info!(from = self.mode.name(), to = mode.name(), "Switching mode");
            self.mode = mode;
            self.panic_streak = 0;
            self.backoff = 0;
        }
    }

    /// Replaces the instance for `mode` with a fresh one.
    pub fn reset(&mut self, mode: Mode) {
        if let Some(slot) = self.sources.get_mut(mode.id() as usize) {
            *slot = mode.build(&self.env);
        }
    }

    /// Advances the selected source. `None` while the mode is `Off`.
    ///
    /// A source that panics again right after being rebuilt is left alone
    /// for [`PANIC_BACKOFF_SECS`] worth of ticks, during which the blanked
    /// last frame is repeated.
    pub fn tick(&mut self, ctx: &FrameContext, num_lasers: usize) -> Option<Tick> {
        let mode = self.mode;
        let source = self.sources.get_mut(mode.id() as usize)?.as_mut()?;

        if self.backoff > 0 {
            self.backoff -= 1;
            return Some(self.blanked_last_frame(num_lasers, false));
        }

        match guarded_tick(&mut **source, ctx, num_lasers) {
            Some(points) => {
                self.panic_streak = 0;
                self.last_frame.clone_from(&points);
                Some(Tick {
                    points,
                    recovered: false,
                })
            }
            None => {
                self.panic_streak += 1;
                if self.panic_streak == 1 {
                    tracing::error!(mode = mode.name(), "Frame source panicked, rebuilding");
                } else {
                    self.backoff = ticks(PANIC_BACKOFF_SECS);
                    tracing::warn!(
                        mode = mode.name(),
                        streak = self.panic_streak,
                        backoff_secs = PANIC_BACKOFF_SECS,
                        "Frame source keeps panicking, backing off"
                    );
                }
                self.reset(mode);
                Some(self.blanked_last_frame(num_lasers, true))
            }
        }
    }

    fn blanked_last_frame(&self, num_lasers: usize, recovered: bool) -> Tick {
        let blanked = self.last_frame.iter().map(|p| RawPoint::from(p.blanked()));
        Tick {
            points: normalize(blanked, num_lasers),
            recovered,
        }
    }
}
