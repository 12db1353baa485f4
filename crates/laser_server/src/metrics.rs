use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct ServerMetrics {
    pub registry: Registry,
    pub packets_sent_total: IntCounterVec,
    pub points_sent_total: IntCounterVec,
    pub send_errors_total: IntCounterVec,
    pub generator_panics_total: IntCounter,
    pub batch_fill_seconds: Histogram,
    pub wand_packets_total: IntCounter,
    pub wand_packets_rejected_total: IntCounter,
    pub active_wands: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("laser".into()), None)?;

        macro_rules! reg {
            ($m:expr) => {{
                let m = $m;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            packets_sent_total: reg!(IntCounterVec::new(
                Opts::new("packets_sent_total", "Datagrams sent per laser"),
                &["laser"]
            )?),
            points_sent_total: reg!(IntCounterVec::new(
                Opts::new("points_sent_total", "Points sent per laser"),
                &["laser"]
            )?),
            send_errors_total: reg!(IntCounterVec::new(
                Opts::new("send_errors_total", "Failed datagram sends per laser"),
                &["laser"]
            )?),
            generator_panics_total: reg!(IntCounter::new(
                "generator_panics_total",
                "Frame source panics caught by the scheduler"
            )?),
            batch_fill_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new("batch_fill_seconds", "Time spent generating one batch")
                    .buckets(prometheus::exponential_buckets(0.0001, 2.0, 12)?)
            )?),
            wand_packets_total: reg!(IntCounter::new(
                "wand_packets_total",
                "Wand telemetry datagrams accepted"
            )?),
            wand_packets_rejected_total: reg!(IntCounter::new(
                "wand_packets_rejected_total",
                "Wand telemetry datagrams that were malformed or stale"
            )?),
            active_wands: reg!(IntGauge::new("active_wands", "Wands heard from recently")?),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered_with_prefix() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.packets_sent_total.with_label_values(&["0"]).inc();
        metrics.active_wands.set(2);

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|mf| mf.get_name().to_string())
            .collect();
        assert!(names.contains(&"laser_packets_sent_total".to_string()));
        assert!(names.contains(&"laser_active_wands".to_string()));
    }
}
