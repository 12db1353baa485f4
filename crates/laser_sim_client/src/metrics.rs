use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct ClientMetrics {
    pub registry: Registry,
    pub packets_received_total: IntCounterVec,
    pub points_received_total: IntCounterVec,
    pub discontinuities_total: IntCounterVec,
    pub decode_errors_total: IntCounterVec,
    pub polyline_points: IntGaugeVec,
}

impl ClientMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("laser_sim".into()), None)?;

        macro_rules! reg {
            ($m:expr) => {{
                let m = $m;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            packets_received_total: reg!(IntCounterVec::new(
                Opts::new("packets_received_total", "Datagrams accepted per laser"),
                &["laser"]
            )?),
            points_received_total: reg!(IntCounterVec::new(
                Opts::new("points_received_total", "Points decoded per laser"),
                &["laser"]
            )?),
            discontinuities_total: reg!(IntCounterVec::new(
                Opts::new(
                    "discontinuities_total",
                    "Sequence gaps that restarted a polyline"
                ),
                &["laser"]
            )?),
            decode_errors_total: reg!(IntCounterVec::new(
                Opts::new("decode_errors_total", "Datagrams that failed to decode"),
                &["laser"]
            )?),
            polyline_points: reg!(IntGaugeVec::new(
                Opts::new("polyline_points", "Points currently buffered per laser"),
                &["laser"]
            )?),
            registry,
        })
    }

    pub fn router(&self) -> Router {
        let reg = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let reg = reg.clone();
                async move {
                    let mf = reg.gather();
                    let mut buf = Vec::new();
                    match TextEncoder::new().encode(&mf, &mut buf) {
                        Ok(()) => String::from_utf8_lossy(&buf).into_owned().into_response(),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                    }
                }
            }),
        )
    }
}
