use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    sessions: Counter<u64>,
    session_duration_ms: Histogram<f64>,
    evaluation_attempts: Histogram<u64>,
    research_steps: Histogram<u64>,
    judge_fallbacks: Counter<u64>,
    degraded_searches: Counter<u64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("webresearch.loop");
        ResearchMetrics {
            sessions: meter
                .u64_counter("research_sessions_total")
                .with_description("Research sessions by terminal status")
                .init(),
            session_duration_ms: meter
                .f64_histogram("research_session_duration_ms")
                .with_description("Wall-clock duration of research sessions in milliseconds")
                .init(),
            evaluation_attempts: meter
                .u64_histogram("research_evaluation_attempts")
                .with_description("Judge calls made per completed session")
                .init(),
            research_steps: meter
                .u64_histogram("research_steps")
                .with_description("Research steps gathered per session")
                .init(),
            judge_fallbacks: meter
                .u64_counter("research_judge_fallbacks_total")
                .with_description("Judge payloads replaced by the fail-open verdict")
                .init(),
            degraded_searches: meter
                .u64_counter("research_degraded_searches_total")
                .with_description("Searches that failed or timed out and degraded to no results")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("WEBRESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "WEBRESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export research metrics."
        );
    }
}

/// Record a finished session (no-op if no provider installed).
pub fn record_session(status: &str, duration_ms: u64, attempts: u32, steps: usize) {
    let metrics = handles();
    let attrs = session_attributes(status);

    metrics.sessions.add(1, &attrs);
    metrics.session_duration_ms.record(duration_ms as f64, &attrs);
    metrics.research_steps.record(steps as u64, &attrs);
    if attempts > 0 {
        metrics.evaluation_attempts.record(u64::from(attempts), &attrs);
    }
}

/// Per-session instruments share one low-cardinality attribute set; counts
/// such as steps are recorded as values, never as attributes.
fn session_attributes(status: &str) -> [KeyValue; 1] {
    [KeyValue::new("status", status.to_string())]
}

pub fn record_judge_fallback() {
    handles().judge_fallbacks.add(1, &[]);
}

/// `phase` is `initial` or `extra`.
pub fn record_degraded_search(phase: &'static str, reason: &'static str) {
    handles().degraded_searches.add(
        1,
        &[
            KeyValue::new("phase", phase),
            KeyValue::new("reason", reason),
        ],
    );
}
