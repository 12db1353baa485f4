//! Packs frame ticks into per-laser datagrams and releases them at a fixed
//! cadence.
//!
//! Generation and transmission are decoupled: a whole batch of ticks is
//! generated as soon as the previous batch has left, then the thread sleeps
//! until the send interval has elapsed. Each target moves through
//!
//! ```text
//! Idle -> Filling(seq) -> ReadyToSend(seq) -> Idle
//! ```
//!
//! and owns its own sequence counter, which wraps after 254.

use crate::context::FrameContext;
use crate::frame::{Mode, ModeTable};
use crate::metrics::ServerMetrics;
use bytes::Bytes;
use laserpkt::{LaserPoint, PacketBuilder, Sequence};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Idle,
    Filling(Sequence),
    ReadyToSend(Sequence),
}

#[derive(Debug)]
struct Target {
    addr: SocketAddr,
    state: TargetState,
    next_sequence: Sequence,
    builder: Option<PacketBuilder>,
    ready: Option<Bytes>,
}

/// A datagram due for one laser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub laser: usize,
    pub addr: SocketAddr,
    pub datagram: Bytes,
}

#[derive(Debug)]
pub struct PacketScheduler {
    targets: Vec<Target>,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl PacketScheduler {
    pub fn new(addrs: Vec<SocketAddr>, interval: Duration) -> Self {
        let targets = addrs
            .into_iter()
            .map(|addr| Target {
                addr,
                state: TargetState::Idle,
                next_sequence: Sequence::default(),
                builder: None,
                ready: None,
            })
            .collect();

        Self {
            targets,
            interval,
            last_sent: None,
        }
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn state(&self, laser: usize) -> Option<TargetState> {
        self.targets.get(laser).map(|t| t.state)
    }

    pub fn has_ready(&self) -> bool {
        self.targets
            .iter()
            .any(|t| matches!(t.state, TargetState::ReadyToSend(_)))
    }

    /// Starts a packet for every idle target and pulls ticks until all of
    /// them are full. `tick` returns one point per laser; a missing point is
    /// sent blank.
    pub fn fill(&mut self, mut tick: impl FnMut() -> Vec<LaserPoint>) {
        for target in &mut self.targets {
            if target.state == TargetState::Idle {
                let seq = target.next_sequence;
                target.next_sequence = seq.next();
                target.builder = Some(PacketBuilder::new(seq));
                target.state = TargetState::Filling(seq);
            }
        }

        while self
            .targets
            .iter()
            .any(|t| matches!(t.state, TargetState::Filling(_)))
        {
            let frame = tick();
            for (laser, target) in self.targets.iter_mut().enumerate() {
                if !matches!(target.state, TargetState::Filling(_)) {
                    continue;
                }
                let Some(builder) = target.builder.as_mut() else {
                    continue;
                };

                let point = frame
                    .get(laser)
                    .copied()
                    .unwrap_or_else(|| LaserPoint::blank(laser as u8));
                builder.push(&point);

                if builder.is_full() {
                    let seq = builder.sequence();
                    target.ready = target.builder.take().map(PacketBuilder::finish);
                    target.state = TargetState::ReadyToSend(seq);
                }
            }
        }
    }

    /// When the next batch may leave. `None` before the first send.
    pub fn next_due(&self) -> Option<Instant> {
        self.last_sent.map(|t| t + self.interval)
    }

    /// Drains every ready target if the send interval has elapsed.
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<Outgoing> {
        if self.next_due().is_some_and(|due| now < due) {
            return Vec::new();
        }

        let mut out = Vec::new();
        for (laser, target) in self.targets.iter_mut().enumerate() {
            if let TargetState::ReadyToSend(_) = target.state {
                if let Some(datagram) = target.ready.take() {
                    out.push(Outgoing {
                        laser,
                        addr: target.addr,
                        datagram,
                    });
                }
                target.state = TargetState::Idle;
            }
        }

        if !out.is_empty() {
            self.last_sent = Some(now);
        }
        out
    }

    /// Drops any packet in progress. Sequence counters keep running.
    pub fn clear(&mut self) {
        for target in &mut self.targets {
            target.state = TargetState::Idle;
            target.builder = None;
            target.ready = None;
        }
    }
}

/// Idle poll period while the mode is `Off`.
const OFF_POLL: Duration = Duration::from_millis(20);

/// Transmit loop running on its own OS thread.
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn spawn(
        scheduler: PacketScheduler,
        table: ModeTable,
        context: watch::Receiver<FrameContext>,
        mode: watch::Receiver<Mode>,
        metrics: Arc<ServerMetrics>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        let running = Arc::new(AtomicBool::new(true));

        let worker = TransmitLoop {
            socket,
            scheduler,
            table,
            context,
            mode,
            metrics,
            running: running.clone(),
        };
        let thread = thread::Builder::new()
            .name("laser-transmit".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Transmit thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct TransmitLoop {
    socket: UdpSocket,
    scheduler: PacketScheduler,
    table: ModeTable,
    context: watch::Receiver<FrameContext>,
    mode: watch::Receiver<Mode>,
    metrics: Arc<ServerMetrics>,
    running: Arc<AtomicBool>,
}

impl TransmitLoop {
    fn run(mut self) {
        let num_lasers = self.scheduler.num_targets();
        tracing::info!(
            targets = ?self.scheduler.targets.iter().map(|t| t.addr).collect::<Vec<_>>(),
            interval_us = self.scheduler.interval.as_micros() as u64,
            mode = self.table.mode().name(),
            "Transmit loop started"
        );

        while self.running.load(Ordering::Relaxed) {
            let mode = *self.mode.borrow();
            self.table.select(mode);
            if mode == Mode::Off {
                self.scheduler.clear();
                thread::sleep(OFF_POLL);
                continue;
            }

            if !self.scheduler.has_ready() {
                self.fill_batch(num_lasers);
            }

            let now = Instant::now();
            if let Some(due) = self.scheduler.next_due() {
                if due > now {
                    thread::sleep(due - now);
                }
            }

            for out in self.scheduler.poll_transmit(Instant::now()) {
                let laser = out.laser.to_string();
                match self.socket.send_to(&out.datagram, out.addr) {
                    Ok(_) => {
                        self.metrics
                            .packets_sent_total
                            .with_label_values(&[&laser])
                            .inc();
                        self.metrics
                            .points_sent_total
                            .with_label_values(&[&laser])
                            .inc_by(((out.datagram.len() - 1) / laserpkt::POINT_BYTES) as u64);
                    }
                    Err(e) => {
                        self.metrics
                            .send_errors_total
                            .with_label_values(&[&laser])
                            .inc();
                        tracing::warn!(error = %e, laser = out.laser, addr = %out.addr, "Failed to send datagram");
                    }
                }
            }
        }

        tracing::info!("Transmit loop stopped");
    }

    fn fill_batch(&mut self, num_lasers: usize) {
        let started = Instant::now();
        // Stale by at most one batch.
        let ctx = self.context.borrow().clone();
        let table = &mut self.table;
        let metrics = &self.metrics;

        self.scheduler.fill(|| match table.tick(&ctx, num_lasers) {
            Some(tick) => {
                if tick.recovered {
                    metrics.generator_panics_total.inc();
                }
                tick.points
            }
            None => Vec::new(),
        });

        self.metrics
            .batch_fill_seconds
            .observe(started.elapsed().as_secs_f64());
    }
}
