//! End-to-end runs over loopback UDP.

use laser_server::context::ContextHandle;
use laser_server::frame::{Mode, ModeTable, SourceEnv};
use laser_server::metrics::ServerMetrics;
use laser_server::scheduler::{PacketScheduler, SchedulerHandle};
use laser_server::wand::{WandListener, WandTelemetry};
use laserpkt::{Continuity, PolylineReceiver, PACKET_BYTES};
use pyramid::{CoordinateTransformer, GeometryConfig, UnitQuaternion};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn transformer() -> Arc<CoordinateTransformer> {
    Arc::new(CoordinateTransformer::from_config(GeometryConfig::default()).unwrap())
}

fn bind_targets(n: usize) -> (Vec<UdpSocket>, Vec<SocketAddr>) {
    let sockets: Vec<UdpSocket> = (0..n)
        .map(|_| {
            let s = UdpSocket::bind("127.0.0.1:0").unwrap();
            s.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
            s
        })
        .collect();
    let addrs = sockets.iter().map(|s| s.local_addr().unwrap()).collect();
    (sockets, addrs)
}

fn spawn_scheduler(
    addrs: Vec<SocketAddr>,
    mode: Mode,
) -> (SchedulerHandle, watch::Sender<Mode>, Arc<ServerMetrics>) {
    let transformer = transformer();
    let context = ContextHandle::new();
    let metrics = Arc::new(ServerMetrics::new().unwrap());
    let (mode_tx, mode_rx) = watch::channel(mode);

    let table = ModeTable::new(SourceEnv::new(&transformer, 1), mode);
    let scheduler = PacketScheduler::new(addrs, Duration::from_millis(5));
    let handle =
        SchedulerHandle::spawn(scheduler, table, context.subscribe(), mode_rx, metrics.clone())
            .unwrap();
    (handle, mode_tx, metrics)
}

#[test]
fn test_streams_consecutive_packets_to_every_laser() {
    let (sockets, addrs) = bind_targets(3);
    let (handle, _mode_tx, metrics) = spawn_scheduler(addrs, Mode::Calibration);

    let mut buf = [0u8; 2048];
    for (laser, socket) in sockets.iter().enumerate() {
        let mut receiver = PolylineReceiver::new(laser as u8, 1000);
        for i in 0..5 {
            let n = socket.recv(&mut buf).unwrap();
            assert_eq!(n, PACKET_BYTES);
            let continuity = receiver.ingest(&buf[..n]).unwrap();
            if i > 0 {
                assert_eq!(continuity, Continuity::Continuous);
            }
        }
        assert_eq!(receiver.stats().discontinuities, 0);
        // The calibration outline is green.
        assert!(receiver.points().any(|p| p.g > 0 && p.r == 0));
        assert!(receiver.points().all(|p| p.laser_id == laser as u8));
    }

    handle.stop();
    let sent = metrics.packets_sent_total.with_label_values(&["0"]).get();
    assert!(sent >= 5);
}

#[test]
fn test_off_mode_goes_quiet() {
    let (sockets, addrs) = bind_targets(1);
    let (handle, mode_tx, _metrics) = spawn_scheduler(addrs, Mode::RainbowCircle);

    let mut buf = [0u8; 2048];
    assert_eq!(sockets[0].recv(&mut buf).unwrap(), PACKET_BYTES);

    mode_tx.send(Mode::Off).unwrap();
    // Drain whatever was in flight when the mode changed.
    std::thread::sleep(Duration::from_millis(100));
    sockets[0].set_nonblocking(true).unwrap();
    while sockets[0].recv(&mut buf).is_ok() {}
    sockets[0].set_nonblocking(false).unwrap();

    sockets[0]
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    assert!(sockets[0].recv(&mut buf).is_err());

    handle.stop();
}

#[test]
fn test_wand_datagram_reaches_frame_context() {
    let context = ContextHandle::new();
    let metrics = Arc::new(ServerMetrics::new().unwrap());
    let listener = WandListener::spawn(
        "127.0.0.1:0".parse().unwrap(),
        transformer(),
        context.clone(),
        metrics.clone(),
    )
    .unwrap();

    let telemetry = WandTelemetry {
        sequence: 1,
        plugged_in: true,
        charged: false,
        battery_raw: 3000,
        button: false,
        orientation: UnitQuaternion::identity(),
        audio: vec![16384, -16384, 16384, -16384],
    };
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&telemetry.encode(), listener.local_addr())
        .unwrap();
    // Odd-length junk is counted and dropped.
    sender.send_to(&[1, 2, 3], listener.local_addr()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut snapshot = context.snapshot();
    while (snapshot.wands.is_empty() || metrics.wand_packets_rejected_total.get() == 0)
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
        snapshot = context.snapshot();
    }

    assert_eq!(snapshot.wands.len(), 1);
    assert_eq!(snapshot.wands[0].wand_id, 0);
    assert!((snapshot.audio.amplitude - 0.5).abs() < 1e-6);
    assert_eq!(metrics.wand_packets_total.get(), 1);
    assert_eq!(metrics.wand_packets_rejected_total.get(), 1);
    assert_eq!(metrics.active_wands.get(), 1);

    listener.stop();
}
