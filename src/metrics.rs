use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram, IntCounterVec,
    IntGauge, TextEncoder,
};
use serde::Deserialize;

lazy_static! {
    pub static ref PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iptv_curator_probes_total",
        "Stream probes by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref PROBE_LATENCY: Histogram = register_histogram!(
        "iptv_curator_probe_latency_seconds",
        "Latency of successful stream probes",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
    pub static ref CHANNELS_LOADED: IntGauge = register_int_gauge!(
        "iptv_curator_channels_loaded",
        "Channels in the current merged set"
    )
    .unwrap();
}

pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_monitoring_enabled")]
    pub enabled: bool,
}

fn default_monitoring_enabled() -> bool {
    true
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitoring_enabled(),
        }
    }
}
