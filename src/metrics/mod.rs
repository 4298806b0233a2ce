//! Prometheus metrics for evaluation and finalize behavior.
//!
//! Call [`init_metrics`] once at startup; recording helpers are no-ops when
//! metrics were never initialized, so library use in tests needs no setup.

use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global registry for all convgrade metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Turn evaluations by terminal outcome ("complete", "failed", "blocked").
pub static EVALUATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Claims lost to a concurrent evaluation task.
pub static CLAIMS_LOST: OnceLock<CounterVec> = OnceLock::new();

/// Turns recovered inline by the finalize guard.
pub static GUARD_RECOVERIES: OnceLock<CounterVec> = OnceLock::new();

/// Finalize wall-clock latency in seconds.
pub static FINALIZE_SECONDS: OnceLock<Histogram> = OnceLock::new();

/// Initializes all metrics and registers them with the registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` on duplicate registration.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let evaluations = CounterVec::new(
        Opts::new("convgrade_evaluations_total", "Turn evaluations by outcome"),
        &["outcome"],
    )?;
    let claims_lost = CounterVec::new(
        Opts::new("convgrade_claims_lost_total", "Evaluation claims lost"),
        &["path"],
    )?;
    let recoveries = CounterVec::new(
        Opts::new(
            "convgrade_guard_recoveries_total",
            "Turns re-run inline by the finalize guard",
        ),
        &["result"],
    )?;
    let finalize_seconds = Histogram::with_opts(
        HistogramOpts::new("convgrade_finalize_seconds", "Finalize latency")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 60.0]),
    )?;

    registry.register(Box::new(evaluations.clone()))?;
    registry.register(Box::new(claims_lost.clone()))?;
    registry.register(Box::new(recoveries.clone()))?;
    registry.register(Box::new(finalize_seconds.clone()))?;

    let _ = EVALUATIONS_TOTAL.set(evaluations);
    let _ = CLAIMS_LOST.set(claims_lost);
    let _ = GUARD_RECOVERIES.set(recoveries);
    let _ = FINALIZE_SECONDS.set(finalize_seconds);
    let _ = REGISTRY.set(registry);
    Ok(())
}

/// Records a terminal evaluation outcome.
pub fn record_evaluation(outcome: &str) {
    if let Some(counter) = EVALUATIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Records a lost claim ("background" or "inline").
pub fn record_claim_lost(path: &str) {
    if let Some(counter) = CLAIMS_LOST.get() {
        counter.with_label_values(&[path]).inc();
    }
}

/// Records a guard recovery result ("scored" or "unscored").
pub fn record_guard_recovery(result: &str) {
    if let Some(counter) = GUARD_RECOVERIES.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Records finalize latency.
pub fn record_finalize_seconds(seconds: f64) {
    if let Some(histogram) = FINALIZE_SECONDS.get() {
        histogram.observe(seconds);
    }
}

/// Exports all metrics in the Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
