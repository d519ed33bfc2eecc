//! Prometheus metrics for the judge worker.

use std::sync::LazyLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Judging duration histogram (per run, summed over cases)
pub static RUN_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "judge_run_duration_seconds",
        "Wall time consumed by judged submissions",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);

    HistogramVec::new(opts, &["verdict"]).expect("Failed to create histogram")
});

/// Verdict counter by short code
pub static VERDICT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("judge_verdict_total", "Total verdicts by type");
    IntCounterVec::new(opts, &["verdict"]).expect("Failed to create counter")
});

/// Runs that reached a terminal state
pub static RUNS_JUDGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_runs_total", "Total judging runs completed")
        .expect("Failed to create counter")
});

/// Runs that failed before reaching a verdict
pub static RUNS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_runs_failed_total", "Total judging runs that errored")
        .expect("Failed to create counter")
});

/// Currently active judging runs
pub static ACTIVE_RUNS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_active_runs", "Currently active judging runs")
        .expect("Failed to create gauge")
});

/// Submissions rejected because the admission queue was full
pub static ADMISSIONS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "judge_admissions_rejected_total",
        "Submissions deferred because the admission queue was saturated",
    )
    .expect("Failed to create counter")
});

/// Initialize and register all metrics
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(RUN_DURATION.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(VERDICT_TOTAL.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(RUNS_JUDGED.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(RUNS_FAILED.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(ACTIVE_RUNS.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(ADMISSIONS_REJECTED.clone()))
        .expect("Failed to register metric");
}

/// Record a terminal verdict and its cost
pub fn record_verdict(verdict: &str, duration_ms: u64) {
    VERDICT_TOTAL.with_label_values(&[verdict]).inc();
    RUN_DURATION
        .with_label_values(&[verdict])
        .observe(duration_ms as f64 / 1000.0);
}

/// HTTP server for the Prometheus metrics endpoint
pub struct MetricsServer;

impl MetricsServer {
    /// Run the metrics server
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
