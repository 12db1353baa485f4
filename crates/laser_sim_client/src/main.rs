//! Stands in for the projectors: listens on one UDP port per laser, rebuilds
//! each laser's polyline and reports where it lands on the pyramid.

mod metrics;

use crate::metrics::ClientMetrics;
use anyhow::{anyhow, bail, Context};
use laserpkt::{Continuity, LaserPoint, PolylineReceiver};
use pyramid::{CoordinateTransformer, GeometryConfig, Point3, NUM_LASERS};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Debug)]
struct Config {
    listen_ip: IpAddr,
    base_port: u16,
    num_lasers: usize,
    buffer_points: usize,
    report_interval: Duration,
    metrics_listen_addr: SocketAddr,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str, default: &str| var(key).unwrap_or_else(|| default.into());

        let num_lasers: usize = get("SIM_NUM_LASERS", "3").parse()?;
        if num_lasers == 0 || num_lasers > NUM_LASERS {
            bail!("SIM_NUM_LASERS must be between 1 and {NUM_LASERS}");
        }
        let base_port: u16 = get("SIM_LISTEN_BASE_PORT", "8090").parse()?;
        if base_port.checked_add(num_lasers as u16 - 1).is_none() {
            bail!("SIM_LISTEN_BASE_PORT leaves no room for {num_lasers} ports");
        }
        let buffer_points: usize = get("SIM_BUFFER_POINTS", "1700").parse()?;
        if buffer_points == 0 {
            bail!("SIM_BUFFER_POINTS must be positive");
        }
        let report_ms: u64 = get("SIM_REPORT_INTERVAL_MS", "1000").parse()?;
        if report_ms == 0 {
            bail!("SIM_REPORT_INTERVAL_MS must be positive");
        }

        Ok(Self {
            listen_ip: get("SIM_LISTEN_IP", "127.0.0.1")
                .parse()
                .map_err(|e| anyhow!("SIM_LISTEN_IP: {e}"))?,
            base_port,
            num_lasers,
            buffer_points,
            report_interval: Duration::from_millis(report_ms),
            metrics_listen_addr: get("SIM_METRICS_LISTEN_ADDR", "0.0.0.0:9191")
                .parse()
                .map_err(|e| anyhow!("SIM_METRICS_LISTEN_ADDR: {e}"))?,
        })
    }

    fn laser_addr(&self, laser: usize) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.base_port + laser as u16)
    }
}

/// What one laser is currently drawing, in structure space.
#[derive(Debug, Clone, PartialEq)]
struct PolylineSummary {
    lit: usize,
    blank: usize,
    /// Lit points that land on the laser's own face.
    on_surface: usize,
    centroid: Option<Point3<f64>>,
}

fn summarize<'a>(
    transformer: &CoordinateTransformer,
    laser: usize,
    points: impl IntoIterator<Item = &'a LaserPoint>,
) -> anyhow::Result<PolylineSummary> {
    let surface = transformer
        .geometry()
        .surfaces()
        .get(laser)
        .ok_or_else(|| anyhow!("no surface for laser {laser}"))?;

    let mut summary = PolylineSummary {
        lit: 0,
        blank: 0,
        on_surface: 0,
        centroid: None,
    };
    let mut sum = Point3::origin().coords;
    for p in points {
        if p.is_blank() {
            summary.blank += 1;
            continue;
        }
        let s = transformer.laser_to_structure(laser, p.x as f64, p.y as f64)?;
        summary.lit += 1;
        summary.on_surface += surface.contains(&s) as usize;
        sum += s.coords;
    }
    if summary.lit > 0 {
        summary.centroid = Some(Point3::from(sum / summary.lit as f64));
    }
    Ok(summary)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cfg = Config::from_env()?;
    tracing::info!(config = ?cfg, "Starting simulated laser client");

    let transformer = Arc::new(
        CoordinateTransformer::from_config(GeometryConfig::default())
            .context("failed to calibrate laser transforms")?,
    );
    let metrics = Arc::new(ClientMetrics::new().context("failed to register metrics")?);

    // Start metrics server
    let router = metrics.router();
    let metrics_listener = tokio::net::TcpListener::bind(cfg.metrics_listen_addr).await?;
    tracing::info!(addr = %cfg.metrics_listen_addr, "Metrics server started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, router.into_make_service()).await {
            tracing::error!(error = %e, "Metrics server exited with an error");
        }
    });

    for laser in 0..cfg.num_lasers {
        let addr = cfg.laser_addr(laser);
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind laser {laser} on {addr}"))?;
        tracing::info!(laser, addr = %addr, "Listening for laser stream");

        let receiver = PolylineReceiver::new(laser as u8, cfg.buffer_points);
        let transformer = transformer.clone();
        let metrics = metrics.clone();
        let report_interval = cfg.report_interval;
        tokio::spawn(async move {
            if let Err(e) =
                run_laser(socket, receiver, transformer, metrics, report_interval).await
            {
                tracing::error!(error = %e, laser, "Laser receiver exited with an error");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received.");
    Ok(())
}

async fn run_laser(
    socket: UdpSocket,
    mut receiver: PolylineReceiver,
    transformer: Arc<CoordinateTransformer>,
    metrics: Arc<ClientMetrics>,
    report_interval: Duration,
) -> anyhow::Result<()> {
    let laser = receiver.laser_id() as usize;
    let label = laser.to_string();
    let mut buf = vec![0u8; 2048];
    let mut report = tokio::time::interval(report_interval);

    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                let (n, from) = res?;
                let points_before = receiver.stats().points;
                match receiver.ingest(&buf[..n]) {
                    Ok(continuity) => {
                        metrics.packets_received_total.with_label_values(&[&label]).inc();
                        metrics
                            .points_received_total
                            .with_label_values(&[&label])
                            .inc_by(receiver.stats().points - points_before);
                        if let Continuity::Gap { expected, got } = continuity {
                            metrics.discontinuities_total.with_label_values(&[&label]).inc();
                            tracing::debug!(laser, expected = expected.0, got = got.0, "Sequence gap, polyline restarted");
                        }
                    }
                    Err(e) => {
                        metrics.decode_errors_total.with_label_values(&[&label]).inc();
                        tracing::warn!(error = %e, laser, from = %from, "Dropping datagram");
                    }
                }
            }
            _ = report.tick() => {
                let stats = receiver.stats();
                metrics.polyline_points.with_label_values(&[&label]).set(receiver.len() as i64);

                let summary = summarize(&transformer, laser, receiver.points())?;
                tracing::info!(
                    laser,
                    packets = stats.packets,
                    discontinuities = stats.discontinuities,
                    decode_errors = stats.decode_errors,
                    lit = summary.lit,
                    blank = summary.blank,
                    on_surface = summary.on_surface,
                    centroid = ?summary.centroid.map(|c| [c.x, c.y, c.z]),
                    "Laser stream report"
                );
            }
        }
    }
}
