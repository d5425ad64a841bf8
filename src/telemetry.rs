//! Telemetry and structured logging for the export worker.

use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::job::{ExportJob, JobStatus};
use crate::scheduler::RunReport;

const TRACER_NAME: &str = "attempt-export-worker";

/// Exports slower than this are logged as warnings.
const SLOW_EXPORT_MS: i64 = 60_000;

/// Records the outcome of one executed export job.
///
/// Emits an `attempt_export_job` span with the job's id, attempt, status,
/// failure count, duration and last error.
pub fn record_job_telemetry(job: &ExportJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("attempt_export_job");

    span.set_attribute(KeyValue::new("job_id", job.id.to_string()));
    span.set_attribute(KeyValue::new("attempt_id", job.subject_id));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("attempts_made", job.attempts_made as i64));

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));
        info!(
            job_id = %job.id,
            attempt_id = job.subject_id,
            duration_ms,
            status = %job.status,
            "Attempt export job completed"
        );
        if duration_ms > SLOW_EXPORT_MS {
            warn!(
                job_id = %job.id,
                duration_ms,
                "Attempt export exceeded {}ms",
                SLOW_EXPORT_MS
            );
        }
    }

    if matches!(job.status, JobStatus::Waiting | JobStatus::Error) {
        if let Some(error) = &job.last_error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
    }

    span.end();
}

/// Records the counters of one scheduler run as a `scheduler_run` span.
pub fn record_scheduler_run(report: &RunReport) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("scheduler_run");

    span.set_attribute(KeyValue::new("requeued_stale", report.requeued_stale as i64));
    span.set_attribute(KeyValue::new("claimed", report.claimed as i64));
    span.set_attribute(KeyValue::new("processed", report.processed as i64));
    span.set_attribute(KeyValue::new("retried", report.retried as i64));
    span.set_attribute(KeyValue::new("failed", report.failed as i64));
    span.end();
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`); `json` selects the JSON
/// formatter instead of the human readable one.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Reads `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4317`) and
/// `OTEL_SERVICE_NAME` (default `attempt-export-worker`).
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    let provider = tracer
        .provider()
        .ok_or("OTLP pipeline did not yield a tracer provider")?;
    global::set_tracer_provider(provider);

    info!(endpoint = %endpoint, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_record_processed_job() {
        let mut job = ExportJob::new(42);
        job.claim(Utc::now()).unwrap();
        job.mark_processed().unwrap();

        // No provider is installed, so this goes to the no-op tracer.
        record_job_telemetry(&job);
    }

    #[test]
    fn test_record_failed_job_and_run() {
        let mut job = ExportJob::new(43);
        job.claim(Utc::now()).unwrap();
        job.record_failure("converter crashed".into(), 1).unwrap();
        assert_eq!(job.status, JobStatus::Error);

        record_job_telemetry(&job);
        record_scheduler_run(&RunReport {
            claimed: 1,
            failed: 1,
            ..RunReport::default()
        });
    }
}
