//! Operational metrics of the controller itself, scraped from `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, Encoder, GaugeVec,
    Histogram, IntCounterVec, TextEncoder,
};

/// Successful expansions per claim.
pub static SCALE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "volume_autoscaler_scale_events_total",
        "Successful volume expansions",
        &["namespace", "volume"]
    )
    .expect("metric can be registered")
});

/// Last observed usage percent per claim.
pub static USAGE_PERCENT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "volume_autoscaler_usage_percent",
        "Observed volume usage in percent of capacity",
        &["namespace", "volume"]
    )
    .expect("metric can be registered")
});

/// Failed or degraded polls by reason.
pub static POLL_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "volume_autoscaler_poll_errors_total",
        "Poll cycles that failed or degraded",
        &["reason"]
    )
    .expect("metric can be registered")
});

pub static RECONCILE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "volume_autoscaler_reconcile_duration_seconds",
        "Duration of one poll cycle",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be registered")
});

pub fn record_scale_event(namespace: &str, volume: &str) {
    SCALE_EVENTS_TOTAL.with_label_values(&[namespace, volume]).inc();
}

pub fn record_usage(namespace: &str, volume: &str, percent: f64) {
    USAGE_PERCENT.with_label_values(&[namespace, volume]).set(percent);
}

/// Drops the usage gauge of a claim that is no longer managed.
pub fn forget_usage(namespace: &str, volume: &str) {
    // absent label sets are fine
    let _ = USAGE_PERCENT.remove_label_values(&[namespace, volume]);
}

pub fn record_poll_error(reason: &str) {
    POLL_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

/// Renders the default registry in the text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
