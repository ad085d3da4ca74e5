//! # Metrics
//!
//! Prometheus metrics for monitoring the bootstrapper.
//!
//! ## Metrics Exposed
//!
//! - `rt_bootstrapper_reconciliations_total` - Reconciliations by scenario
//! - `rt_bootstrapper_reconciliation_errors_total` - Failed reconciliations by scenario
//! - `rt_bootstrapper_reconciliation_duration_seconds` - Duration of reconciliations
//! - `rt_bootstrapper_secret_patches_total` - Credential secret patches by outcome
//! - `rt_bootstrapper_predicate_decisions_total` - Event predicate verdicts
//! - `rt_bootstrapper_ca_bundle_updates_total` - Trust bundle updates by outcome
//! - `rt_bootstrapper_conflict_retries_total` - Optimistic-concurrency retries
//! - `rt_bootstrapper_admission_requests_total` - Admission requests by outcome

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_reconciliations_total",
            "Total number of reconciliations by scenario",
        ),
        &["scenario"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_reconciliation_errors_total",
            "Total number of failed reconciliations by scenario",
        ),
        &["scenario"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "rt_bootstrapper_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_PATCHES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_secret_patches_total",
            "Total number of credential secret patches by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create SECRET_PATCHES_TOTAL metric - this should never happen")
});

static PREDICATE_DECISIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_predicate_decisions_total",
            "Total number of event predicate decisions by predicate and verdict",
        ),
        &["predicate", "verdict"],
    )
    .expect("Failed to create PREDICATE_DECISIONS_TOTAL metric - this should never happen")
});

static CA_BUNDLE_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_ca_bundle_updates_total",
            "Total number of CA bundle updates by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create CA_BUNDLE_UPDATES_TOTAL metric - this should never happen")
});

static CONFLICT_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rt_bootstrapper_conflict_retries_total",
        "Total number of retries after an optimistic-concurrency conflict",
    )
    .expect("Failed to create CONFLICT_RETRIES_TOTAL metric - this should never happen")
});

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rt_bootstrapper_admission_requests_total",
            "Total number of pod admission requests by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    register(Box::new(RECONCILIATION_DURATION.clone()))?;
    register(Box::new(SECRET_PATCHES_TOTAL.clone()))?;
    register(Box::new(PREDICATE_DECISIONS_TOTAL.clone()))?;
    register(Box::new(CA_BUNDLE_UPDATES_TOTAL.clone()))?;
    register(Box::new(CONFLICT_RETRIES_TOTAL.clone()))?;
    register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;

    Ok(())
}

/// Encode the registry in the Prometheus text format.
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn increment_reconciliations(scenario: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[scenario]).inc();
}

pub fn increment_reconciliation_errors(scenario: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[scenario])
        .inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// `outcome` is one of `applied`, `skipped`, `failed`
pub fn increment_secret_patches(outcome: &str) {
    SECRET_PATCHES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_predicate_decision(predicate: &str, accepted: bool) {
    let verdict = if accepted { "accept" } else { "reject" };
    PREDICATE_DECISIONS_TOTAL
        .with_label_values(&[predicate, verdict])
        .inc();
}

/// `outcome` is one of `patched`, `unchanged`, `failed`
pub fn increment_ca_bundle_updates(outcome: &str) {
    CA_BUNDLE_UPDATES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_conflict_retries() {
    CONFLICT_RETRIES_TOTAL.inc();
}

pub fn increment_admission_requests(outcome: &str) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}
