//! Replays the recent path of every wand's dot, one wand after another.

use super::{ticks, FrameSource, RawPoint};
use crate::context::FrameContext;
use laserpkt::LaserPoint;
use std::collections::{BTreeMap, VecDeque};

/// Seconds of history kept per wand.
const PATH_SECS: f64 = 3.0;
/// Seconds between samples of the wand positions.
const SAMPLE_SECS: f64 = 0.1;

pub struct WandDrawing {
    paths: BTreeMap<u32, VecDeque<LaserPoint>>,
    max_path_len: usize,
    sample_every: u64,
    ticks_until_sample: u64,
    current_path: usize,
    path_index: usize,
    /// Beam-off point emitted on the tick after a path's last point.
    pending_blank: Option<LaserPoint>,
}

impl Default for WandDrawing {
    fn default() -> Self {
        Self::new()
    }
}

impl WandDrawing {
    pub fn new() -> Self {
        Self {
            paths: BTreeMap::new(),
            max_path_len: (PATH_SECS / SAMPLE_SECS).round() as usize,
            sample_every: ticks(SAMPLE_SECS),
            ticks_until_sample: 0,
            current_path: 0,
            path_index: 0,
            pending_blank: None,
        }
    }

    fn sample(&mut self, ctx: &FrameContext) {
        self.paths
            .retain(|id, _| ctx.wands.iter().any(|w| w.wand_id == *id));

        for wand in &ctx.wands {
            let path = self.paths.entry(wand.wand_id).or_default();
            if let Some(point) = wand.point {
                path.push_back(point);
            }
            while path.len() > self.max_path_len {
                path.pop_front();
            }
        }
    }
}

impl FrameSource for WandDrawing {
    fn produce_tick(&mut self, ctx: &FrameContext, _num_lasers: usize) -> Vec<RawPoint> {
        if self.ticks_until_sample == 0 {
            self.sample(ctx);
            self.ticks_until_sample = self.sample_every;
        }
        self.ticks_until_sample -= 1;

        if let Some(blank) = self.pending_blank.take() {
            return vec![blank.into()];
        }

        let paths: Vec<&VecDeque<LaserPoint>> =
            self.paths.values().filter(|p| !p.is_empty()).collect();
        if paths.is_empty() {
            return Vec::new();
        }

        self.current_path %= paths.len();
        let path = paths[self.current_path];
        self.path_index %= path.len();

        let point = path[self.path_index];
        // Jump to the start of a path with the beam off.
        let out = if self.path_index == 0 {
            point.blanked()
        } else {
            point
        };

        if self.path_index == path.len() - 1 {
            self.pending_blank = Some(point.blanked());
        }

        self.path_index = (self.path_index + 1) % path.len();
        if self.path_index == 0 {
            self.current_path = (self.current_path + 1) % paths.len();
        }

        vec![out.into()]
    }
}
