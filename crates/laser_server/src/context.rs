//! Shared inputs every frame source reads on each tick.

use laserpkt::LaserPoint;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct AudioLevels {
    /// Recent loudness in `[0, 1]`.
    pub amplitude: f32,
    /// Latest envelope window, roughly in `[-1, 1]`.
    pub envelope: Arc<[f32]>,
}

impl Default for AudioLevels {
    fn default() -> Self {
        Self {
            amplitude: 0.0,
            envelope: Arc::from(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WandSample {
    pub wand_id: u32,
    /// Where the wand's dot lands, if it points at a surface.
    pub point: Option<LaserPoint>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    pub audio: AudioLevels,
    pub wands: Vec<WandSample>,
}

/// Write side of the frame context. Producers publish through it and the
/// scheduler thread snapshots the latest value once per batch.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    tx: Arc<watch::Sender<FrameContext>>,
}

impl Default for ContextHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FrameContext::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<FrameContext> {
        self.tx.subscribe()
    }

    pub fn set_audio(&self, audio: AudioLevels) {
        self.tx.send_modify(|ctx| ctx.audio = audio);
    }

    pub fn set_wands(&self, wands: Vec<WandSample>) {
        self.tx.send_modify(|ctx| ctx.wands = wands);
    }

    pub fn snapshot(&self) -> FrameContext {
        self.tx.borrow().clone()
    }
}
