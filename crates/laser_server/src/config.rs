use crate::frame::Mode;
use anyhow::bail;
use clap::Parser;
use laserpkt::POINTS_PER_PACKET;
use pyramid::{GeometryConfig, NUM_LASERS};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port every hardware projector listens on.
const HARDWARE_PORT: u16 = 8090;

/// `laser_server` - streams generated animations to the pyramid's lasers.
///
/// Runs one frame source at a time, packs its points into fixed-size UDP
/// datagrams per laser and sends them at a fixed cadence. Wand telemetry is
/// received on a separate UDP port and projected onto the structure.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// UDP destination of each laser, in laser order.
    #[arg(
        long,
        env = "LASER_TARGETS",
        value_delimiter = ',',
        default_value = "127.0.0.1:8090,127.0.0.1:8091,127.0.0.1:8092"
    )]
    pub targets: Vec<SocketAddr>,

    /// Address the projectors on the installation network, `10.0.0.{10+i}:8090`,
    /// instead of `--targets`.
    #[arg(long, env = "LASER_HARDWARE", default_value_t = false)]
    pub hardware: bool,

    /// Points per second sent to each laser. Sets the packet cadence.
    #[arg(long, env = "LASER_POINTS_PER_SECOND", default_value_t = 6590)]
    pub points_per_second: u32,

    /// Frame source running at startup.
    #[arg(long, env = "LASER_INITIAL_MODE", value_enum, default_value_t = Mode::Spirograph)]
    pub initial_mode: Mode,

    /// When set, step through every mode, holding each for this many seconds.
    #[arg(long, env = "LASER_MODE_CYCLE_SECS")]
    pub mode_cycle_secs: Option<u64>,

    /// Seed for randomised frame sources.
    #[arg(long, env = "LASER_SEED", default_value_t = 0)]
    pub seed: u64,

    /// UDP address wand telemetry arrives on.
    #[arg(long, env = "WAND_LISTEN_ADDR", default_value = "0.0.0.0:5005")]
    pub wand_listen_addr: SocketAddr,

    /// The listen address for the Prometheus metrics server.
    #[arg(long, env = "METRICS_LISTEN_ADDR", default_value = "0.0.0.0:9190")]
    pub metrics_listen_addr: SocketAddr,

    /// Edge length of the tetrahedron.
    #[arg(long, env = "PYRAMID_SIDE_LENGTH", default_value_t = 39.0)]
    pub side_length: f64,

    /// Eye height of the wand operator.
    #[arg(long, env = "PYRAMID_HUMAN_HEIGHT", default_value_t = 5.0)]
    pub human_height: f64,

    /// Half of each scanner's beam angle, in degrees.
    #[arg(long, env = "PYRAMID_LASER_HALF_ANGLE_DEG", default_value_t = 55.0)]
    pub laser_half_angle_deg: f64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.points_per_second == 0 {
            bail!("LASER_POINTS_PER_SECOND must be positive");
        }
        if !self.hardware && (self.targets.is_empty() || self.targets.len() > NUM_LASERS) {
            bail!(
                "LASER_TARGETS must list between 1 and {NUM_LASERS} addresses, got {}",
                self.targets.len()
            );
        }
        if self.mode_cycle_secs == Some(0) {
            bail!("LASER_MODE_CYCLE_SECS must be positive");
        }
        Ok(())
    }

    pub fn resolved_targets(&self) -> Vec<SocketAddr> {
        if self.hardware {
            (0..NUM_LASERS as u8)
                .map(|i| SocketAddr::from((Ipv4Addr::new(10, 0, 0, 10 + i), HARDWARE_PORT)))
                .collect()
        } else {
            self.targets.clone()
        }
    }

    /// Time between packets to one laser.
    pub fn packet_interval(&self) -> Duration {
        Duration::from_secs_f64(POINTS_PER_PACKET as f64 / self.points_per_second.max(1) as f64)
    }

    pub fn geometry(&self) -> GeometryConfig {
        GeometryConfig {
            side_length: self.side_length,
            human_height: self.human_height,
            laser_half_angle: self.laser_half_angle_deg.to_radians(),
        }
    }
}
