//! Wand telemetry over UDP and per-wand state.
//!
//! Each datagram is a run of little-endian `i16` words:
//!
//! ```text
//! 0    : sequence number
//! 1    : plugged in (1 = yes)
//! 2    : charged (1 = yes)
//! 3    : battery, raw 12-bit ADC
//! 4    : button (1 = pressed)
//! 5..9 : orientation quaternion w, x, y, z as (v - 16384) / 16384
//! 9..n-2: microphone samples
//! n-2..n : trailer, not audio
//! ```

use crate::context::{AudioLevels, ContextHandle, WandSample};
use crate::frame::hsv_to_rgb;
use crate::metrics::ServerMetrics;
use laserpkt::LaserPoint;
use pyramid::{CoordinateTransformer, Orientation, Quaternion, UnitQuaternion, Vector3};
use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const HEADER_WORDS: usize = 9;
/// Words after the microphone samples that carry no audio.
const TRAILER_WORDS: usize = 2;
const QUATERNION_ZERO: f64 = 16384.0;
const BATTERY_FULL_SCALE: f64 = 4095.0;
const BATTERY_REFERENCE_VOLTS: f64 = 3.7;

/// Sequence numbers this far behind the last one are treated as duplicates.
const STALE_WINDOW: i32 = 20;
/// Holding the button this long re-centres the wand.
const CALIBRATION_HOLD: Duration = Duration::from_secs(2);
/// Wands silent for this long are dropped.
const WAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Tip speed, in wand lengths per second, that counts as a swing.
const SWING_SPEED: f64 = 6.0;
const SWING_HISTORY: usize = 5;
const MIN_SWING_WINDOW: Duration = Duration::from_millis(10);
const IMPACT_KEEPOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("datagram has odd length {0}")]
    OddLength(usize),
    #[error("datagram has {0} words, need at least 9")]
    TooShort(usize),
    #[error("orientation quaternion has zero length")]
    DegenerateQuaternion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WandTelemetry {
    pub sequence: i16,
    pub plugged_in: bool,
    pub charged: bool,
    pub battery_raw: i16,
    pub button: bool,
    pub orientation: UnitQuaternion<f64>,
    pub audio: Vec<i16>,
}

impl WandTelemetry {
    pub fn parse(datagram: &[u8]) -> Result<Self, TelemetryError> {
        if datagram.len() % 2 != 0 {
            return Err(TelemetryError::OddLength(datagram.len()));
        }
        let words: Vec<i16> = datagram
            .chunks_exact(2)
            .map(|w| i16::from_le_bytes([w[0], w[1]]))
            .collect();
        if words.len() < HEADER_WORDS {
            return Err(TelemetryError::TooShort(words.len()));
        }

        let component = |i: usize| (words[i] as f64 - QUATERNION_ZERO) / QUATERNION_ZERO;
        let q = Quaternion::new(component(5), component(6), component(7), component(8));
        let orientation =
            UnitQuaternion::try_new(q, f64::EPSILON).ok_or(TelemetryError::DegenerateQuaternion)?;

        Ok(Self {
            sequence: words[0],
            plugged_in: words[1] == 1,
            charged: words[2] == 1,
            battery_raw: words[3],
            button: words[4] == 1,
            orientation,
            audio: audio_samples(&words[HEADER_WORDS..]).to_vec(),
        })
    }

    pub fn battery_volts(&self) -> f64 {
        self.battery_raw as f64 / BATTERY_FULL_SCALE * BATTERY_REFERENCE_VOLTS
    }

    /// Encodes a datagram in the same format. Used by simulators and tests.
    pub fn encode(&self) -> Vec<u8> {
        let q = self.orientation.quaternion();
        let quat = |v: f64| (v * QUATERNION_ZERO + QUATERNION_ZERO).round() as i16;
        let header = [
            self.sequence,
            self.plugged_in as i16,
            self.charged as i16,
            self.battery_raw,
            self.button as i16,
            quat(q.w),
            quat(q.i),
            quat(q.j),
            quat(q.k),
        ];
        header
            .iter()
            .chain(&self.audio)
            .chain(&[0i16; TRAILER_WORDS])
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }
}

/// What an update changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WandUpdate {
    /// A swing stopped or the button went down.
    pub impact: bool,
    /// The button has been held long enough to re-centre the wand.
    pub calibrated: bool,
    /// Plugged-in or charged flag flipped.
    pub power_changed: bool,
}

#[derive(Debug)]
pub struct Wand {
    id: u32,
    orientation: Orientation,
    sequence: i16,
    plugged_in: bool,
    charged: bool,
    battery_volts: f64,
    button: bool,
    button_down_at: Option<Instant>,
    last_update: Instant,
    tips: VecDeque<(Vector3<f64>, Instant)>,
    prev_speed: f64,
    last_impact: Option<Instant>,
    last_angle: u16,
}

impl Wand {
    pub fn new(id: u32, now: Instant) -> Self {
        Self {
            id,
            orientation: Orientation::default(),
            sequence: 0,
            plugged_in: false,
            charged: false,
            battery_volts: 0.0,
            button: false,
            button_down_at: None,
            last_update: now,
            tips: VecDeque::with_capacity(SWING_HISTORY + 1),
            prev_speed: 0.0,
            last_impact: None,
            last_angle: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn orientation(&self) -> &Orientation {
        &self.orientation
    }

    pub fn battery_volts(&self) -> f64 {
        self.battery_volts
    }

    pub fn plugged_in(&self) -> bool {
        self.plugged_in
    }

    pub fn charged(&self) -> bool {
        self.charged
    }

    /// Returns false for a duplicate or slightly late datagram. The sequence
    /// is remembered either way.
    pub fn accept_sequence(&mut self, sequence: i16) -> bool {
        let diff = sequence as i32 - self.sequence as i32;
        self.sequence = sequence;
        !(diff > -STALE_WINDOW && diff <= 0)
    }

    pub fn update(
        &mut self,
        telemetry: &WandTelemetry,
        now: Instant,
        transformer: &CoordinateTransformer,
    ) -> WandUpdate {
        let mut update = WandUpdate {
            power_changed: (self.plugged_in, self.charged)
                != (telemetry.plugged_in, telemetry.charged),
            ..WandUpdate::default()
        };

        self.last_update = now;
        self.sequence = telemetry.sequence;
        self.plugged_in = telemetry.plugged_in;
        self.charged = telemetry.charged;
        self.battery_volts = telemetry.battery_volts();
        self.orientation.set_raw(telemetry.orientation);

        if telemetry.button && !self.button {
            update.impact = true;
            self.button_down_at = Some(now);
        }
        if !telemetry.button {
            self.button_down_at = None;
        }
        self.button = telemetry.button;

        if self
            .button_down_at
            .is_some_and(|t| now.duration_since(t) > CALIBRATION_HOLD)
        {
            transformer.calibrate_wand(&mut self.orientation);
            update.calibrated = true;
        }

        let keepout_over = self
            .last_impact
            .map_or(true, |t| now.duration_since(t) > IMPACT_KEEPOUT);
        if self.swing_stopped(now) && keepout_over {
            update.impact = true;
            self.last_impact = Some(now);
        }

        update
    }

    /// True when the tip was moving fast and has just slowed down.
    fn swing_stopped(&mut self, now: Instant) -> bool {
        if self.tips.len() > SWING_HISTORY {
            self.tips.pop_front();
        }
        self.tips.push_back((self.orientation.raw_direction(), now));

        let (Some((first, t0)), Some((last, t1))) = (self.tips.front(), self.tips.back()) else {
            return false;
        };
        let dt = t1.duration_since(*t0);
        if dt < MIN_SWING_WINDOW {
            return false;
        }

        let speed = (last - first).norm() / dt.as_secs_f64();
        let stopped = self.prev_speed > SWING_SPEED && speed < SWING_SPEED;
        self.prev_speed = speed;
        stopped
    }

    /// Twist about the pointing axis, whole degrees in `[0, 360)`.
    pub fn rotation_angle(&mut self) -> u16 {
        let q = self.orientation.raw();
        let v0 = q * Vector3::y();
        let v1 = q * Vector3::x();

        let horizontal = (v1.x * v1.x + v1.y * v1.y).sqrt();
        if horizontal < 1e-9 {
            return self.last_angle;
        }
        let v2 = Vector3::new(-v1.x * v1.z, -v1.y * v1.z, horizontal * horizontal) / horizontal;
        let v3 = v1.cross(&v2);

        let d1 = v0.dot(&v2).clamp(-1.0, 1.0).acos();
        let d2 = v0.dot(&v3).clamp(-1.0, 1.0).acos();
        if !(d1.is_finite() && d2.is_finite()) {
            return self.last_angle;
        }

        let phi1 = d1.to_degrees() as u16;
        let phi2 = d2.to_degrees() as u16;
        self.last_angle = if phi2 < 90 { phi1 } else { (360 - phi1) % 360 };
        self.last_angle
    }

    pub fn colour(&mut self) -> [f64; 3] {
        hsv_to_rgb(self.rotation_angle() as f64 / 360.0, 1.0, 1.0)
    }

    /// Where the wand's dot lands, coloured by its twist.
    pub fn laser_point(&mut self, transformer: &CoordinateTransformer) -> Option<LaserPoint> {
        let (laser, x, y) = transformer.project_wand(&self.orientation)?;
        let [r, g, b] = self.colour();
        Some(LaserPoint::clamped(laser as u8, x, y, r, g, b))
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_update) > WAND_TIMEOUT
    }
}

/// Microphone samples between the header and the trailer.
fn audio_samples(extra: &[i16]) -> &[i16] {
    if extra.len() > TRAILER_WORDS {
        &extra[..extra.len() - TRAILER_WORDS]
    } else {
        &[]
    }
}

/// Loudness and envelope of one block of microphone samples.
pub fn audio_levels(samples: &[i16]) -> Option<AudioLevels> {
    if samples.is_empty() {
        return None;
    }
    let envelope: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    let rms = (envelope.iter().map(|v| v * v).sum::<f32>() / envelope.len() as f32).sqrt();
    Some(AudioLevels {
        amplitude: rms.min(1.0),
        envelope: Arc::from(envelope),
    })
}

const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 4096;

/// Receives wand telemetry on a dedicated thread and publishes wand dots and
/// microphone levels to the frame context.
pub struct WandListener {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl WandListener {
    pub fn spawn(
        addr: SocketAddr,
        transformer: Arc<CoordinateTransformer>,
        context: ContextHandle,
        metrics: Arc<ServerMetrics>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let worker = ListenLoop {
            socket,
            transformer,
            context,
            metrics,
            running: running.clone(),
            wands: HashMap::new(),
            next_id: 0,
        };
        let thread = thread::Builder::new()
            .name("wand-listener".into())
            .spawn(move || worker.run())?;

        tracing::info!(addr = %local_addr, "Wand listener started");
        Ok(Self {
            running,
            local_addr,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Wand listener thread panicked");
            }
        }
    }
}

impl Drop for WandListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ListenLoop {
    socket: UdpSocket,
    transformer: Arc<CoordinateTransformer>,
    context: ContextHandle,
    metrics: Arc<ServerMetrics>,
    running: Arc<AtomicBool>,
    wands: HashMap<SocketAddr, Wand>,
    next_id: u32,
}

impl ListenLoop {
    fn run(mut self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => self.handle(&buf[..n], from),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Wand socket receive failed");
                    thread::sleep(RECV_TIMEOUT);
                }
            }
            self.prune(Instant::now());
        }
    }

    fn handle(&mut self, datagram: &[u8], from: SocketAddr) {
        if datagram.is_empty() {
            return;
        }
        let telemetry = match WandTelemetry::parse(datagram) {
            Ok(t) => t,
            Err(e) => {
                self.metrics.wand_packets_rejected_total.inc();
                tracing::debug!(error = %e, from = %from, "Dropping wand datagram");
                return;
            }
        };

        let now = Instant::now();
        let next_id = &mut self.next_id;
        let wand = self.wands.entry(from).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            tracing::info!(wand_id = id, addr = %from, "Found new wand");
            Wand::new(id, now)
        });

        if !wand.accept_sequence(telemetry.sequence) {
            self.metrics.wand_packets_rejected_total.inc();
            return;
        }

        let update = wand.update(&telemetry, now, &self.transformer);
        if update.calibrated {
            tracing::debug!(wand_id = wand.id(), "Wand re-centred");
        }
        if update.impact {
            tracing::debug!(wand_id = wand.id(), "Wand impact");
        }
        if update.power_changed {
            tracing::info!(
                wand_id = wand.id(),
                plugged_in = wand.plugged_in(),
                charged = wand.charged(),
                battery_volts = wand.battery_volts(),
                "Wand power state changed"
            );
        }

        self.metrics.wand_packets_total.inc();
        if let Some(levels) = audio_levels(&telemetry.audio) {
            self.context.set_audio(levels);
        }
        self.publish();
    }

    fn prune(&mut self, now: Instant) {
        let before = self.wands.len();
        self.wands.retain(|addr, wand| {
            let keep = !wand.is_stale(now);
            if !keep {
                tracing::info!(wand_id = wand.id(), addr = %addr, "Wand timed out");
            }
            keep
        });
        if self.wands.len() != before {
            self.publish();
        }
    }

    fn publish(&mut self) {
        let transformer = &self.transformer;
        let mut samples: Vec<WandSample> = self
            .wands
            .values_mut()
            .map(|wand| WandSample {
                wand_id: wand.id(),
                point: wand.laser_point(transformer),
            })
            .collect();
        samples.sort_by_key(|s| s.wand_id);

        self.metrics.active_wands.set(samples.len() as i64);
        self.context.set_wands(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramid::GeometryConfig;

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::from_config(GeometryConfig::default()).unwrap()
    }

    fn telemetry(sequence: i16, button: bool, orientation: UnitQuaternion<f64>) -> WandTelemetry {
        WandTelemetry {
            sequence,
            plugged_in: false,
            charged: true,
            battery_raw: 4095,
            button,
            orientation,
            audio: Vec::new(),
        }
    }

    #[test]
    fn test_parse_header() {
        let mut words: Vec<i16> = vec![12, 1, 0, 2048, 1, 32767, 16384, 16384, 16384];
        words.extend([100, -100, 7, 7]);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let t = WandTelemetry::parse(&bytes).unwrap();
        assert_eq!(t.sequence, 12);
        assert!(t.plugged_in);
        assert!(!t.charged);
        assert!(t.button);
        assert!((t.battery_volts() - 2048.0 / 4095.0 * 3.7).abs() < 1e-12);
        assert!(t.orientation.angle() < 1e-3);
        assert_eq!(t.audio, vec![100, -100]);
    }

    #[test]
    fn test_trailer_is_not_audio() {
        let header = [1i16, 0, 0, 0, 0, 32767, 16384, 16384, 16384];
        let datagram = |extra: &[i16]| -> Vec<u8> {
            header
                .iter()
                .chain(extra)
                .flat_map(|w| w.to_le_bytes())
                .collect()
        };

        assert!(WandTelemetry::parse(&datagram(&[])).unwrap().audio.is_empty());
        assert!(WandTelemetry::parse(&datagram(&[300, 300])).unwrap().audio.is_empty());
        let t = WandTelemetry::parse(&datagram(&[16384, -16384, 32767, 32767])).unwrap();
        assert_eq!(t.audio, vec![16384, -16384]);
        let levels = audio_levels(&t.audio).unwrap();
        assert!((levels.amplitude - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(
            WandTelemetry::parse(&[0; 17]),
            Err(TelemetryError::OddLength(17))
        );
        assert_eq!(
            WandTelemetry::parse(&[0; 16]),
            Err(TelemetryError::TooShort(8))
        );

        // All quaternion words at the zero point.
        let words = [0i16, 0, 0, 0, 0, 16384, 16384, 16384, 16384];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(
            WandTelemetry::parse(&bytes),
            Err(TelemetryError::DegenerateQuaternion)
        );
    }

    #[test]
    fn test_encode_parse_round_trip() {
        let q = UnitQuaternion::from_euler_angles(0.1, -0.4, 1.2);
        let mut sent = telemetry(99, true, q);
        sent.audio = vec![5, -6, 7];
        let parsed = WandTelemetry::parse(&sent.encode()).unwrap();
        assert_eq!(parsed.audio, sent.audio);
        assert_eq!(parsed.sequence, 99);
        assert!(parsed.button);
        assert!(parsed.orientation.angle_to(&q) < 1e-3);
    }

    #[test]
    fn test_duplicate_and_late_sequences_are_ignored() {
        let mut wand = Wand::new(0, Instant::now());
        assert!(wand.accept_sequence(5));
        assert!(!wand.accept_sequence(5));
        assert!(!wand.accept_sequence(1));
        assert!(wand.accept_sequence(2));
        // Far behind means the wand restarted.
        assert!(wand.accept_sequence(-30));
    }

    #[test]
    fn test_hold_to_calibrate() {
        let t = transformer();
        let t0 = Instant::now();
        let pose = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        let mut wand = Wand::new(0, t0);

        let first = wand.update(&telemetry(1, true, pose), t0, &t);
        assert!(first.impact);
        assert!(!first.calibrated);

        let early = wand.update(&telemetry(2, true, pose), t0 + Duration::from_secs(1), &t);
        assert!(!early.calibrated);
        assert!(wand.laser_point(&t).is_none());

        let held = wand.update(&telemetry(3, true, pose), t0 + Duration::from_millis(2100), &t);
        assert!(held.calibrated);

        let g = t.geometry();
        let target = (g.center_target() - g.eye_position()).normalize();
        assert!((wand.orientation().direction() - target).norm() < 1e-9);

        let point = wand.laser_point(&t).unwrap();
        assert_eq!(point.laser_id, 0);
        assert!((2047..=2048).contains(&point.x));
        assert_eq!(point.y, 1794);
        assert!(!point.is_blank());

        // Releasing and pressing again restarts the hold timer.
        wand.update(&telemetry(4, false, pose), t0 + Duration::from_millis(2200), &t);
        let repress = wand.update(&telemetry(5, true, pose), t0 + Duration::from_millis(2300), &t);
        assert!(!repress.calibrated);
    }

    #[test]
    fn test_swing_then_stop_is_impact() {
        let t = transformer();
        let t0 = Instant::now();
        let mut wand = Wand::new(0, t0);
        let at = |ms: u64| t0 + Duration::from_millis(ms);
        let yaw = |a: f64| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), a);

        // Fast swing: half a radian every 20 ms.
        let mut impacts = 0;
        for i in 0..6 {
            let u = wand.update(&telemetry(i + 1, false, yaw(i as f64 * 0.5)), at(i as u64 * 20), &t);
            impacts += u.impact as u32;
        }
        assert_eq!(impacts, 0);

        // Then hold still.
        let mut stopped = false;
        for i in 6..14 {
            let u = wand.update(&telemetry(i + 1, false, yaw(2.5)), at(i as u64 * 20), &t);
            stopped |= u.impact;
        }
        assert!(stopped);
    }

    #[test]
    fn test_rotation_angle_tracks_twist() {
        let mut wand = Wand::new(0, Instant::now());
        assert!((270..=271).contains(&wand.rotation_angle()));

        // A quarter twist about the wand's long axis.
        let twisted = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 90f64.to_radians());
        wand.orientation.set_raw(twisted);
        assert_eq!(wand.rotation_angle(), 0);

        // Straight down the twist axis is undefined; the last angle is kept.
        let vertical = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 90f64.to_radians());
        wand.orientation.set_raw(vertical);
        assert_eq!(wand.rotation_angle(), 0);
    }

    #[test]
    fn test_power_state_changes_are_reported() {
        let t = transformer();
        let t0 = Instant::now();
        let pose = UnitQuaternion::identity();
        let mut wand = Wand::new(0, t0);

        // Fresh wands start unplugged and uncharged.
        let first = wand.update(&telemetry(1, false, pose), t0, &t);
        assert!(first.power_changed);
        assert!(wand.charged());
        assert!(!wand.plugged_in());

        let same = wand.update(&telemetry(2, false, pose), t0, &t);
        assert!(!same.power_changed);

        let mut plugged = telemetry(3, false, pose);
        plugged.plugged_in = true;
        assert!(wand.update(&plugged, t0, &t).power_changed);
        assert!(wand.plugged_in());
        assert!((wand.battery_volts() - 3.7).abs() < 1e-12);
    }

    #[test]
    fn test_stale_after_timeout() {
        let t0 = Instant::now();
        let wand = Wand::new(0, t0);
        assert!(!wand.is_stale(t0 + Duration::from_secs(5)));
        assert!(wand.is_stale(t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_audio_levels() {
        assert!(audio_levels(&[]).is_none());
        let levels = audio_levels(&[16384, -16384]).unwrap();
        assert!((levels.amplitude - 0.5).abs() < 1e-6);
        assert_eq!(levels.envelope.len(), 2);
    }
}
