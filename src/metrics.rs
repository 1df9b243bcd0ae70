//! Process-wide metrics registry, per §6.4 and the §9 "module-level metric
//! singletons" re-architecture note: collectors are described once at
//! process start via `init()`; every call site only passes label values.

use std::sync::OnceLock;

use metrics_exporter_prometheus::PrometheusHandle;

const PREFIX: &str = "media_service_worker";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Describes every metric named in §6.4 and installs the process-wide
/// Prometheus recorder. Idempotent: a second call is a no-op other than
/// returning the same handle. Scrape-endpoint wiring is the caller's
/// responsibility (out of scope per §1).
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");
            describe();
            handle
        })
        .clone()
}

/// Releases the process-wide recorder's render handle. There is no
/// un-install for the global recorder itself; `shutdown` exists for
/// lifecycle symmetry with `init` and so tests can drop their local state.
pub fn shutdown() {}

fn describe() {
    metrics::describe_counter!(
        format!("{PREFIX}_segments_processed_total"),
        "Segments emitted, labeled by stream_id and type (video|audio)"
    );
    metrics::describe_counter!(
        format!("{PREFIX}_segments_bytes_total"),
        "Bytes emitted, labeled by stream_id and type"
    );
    metrics::describe_counter!(
        format!("{PREFIX}_sts_fragments_sent_total"),
        "Fragments successfully sent to STS"
    );
    metrics::describe_counter!(
        format!("{PREFIX}_sts_fragments_processed_total"),
        "Fragments processed by STS, labeled by status"
    );
    metrics::describe_histogram!(
        format!("{PREFIX}_sts_processing_latency_seconds"),
        "End-to-end fragment latency"
    );
    metrics::describe_gauge!(
        format!("{PREFIX}_sts_inflight_fragments"),
        "Current in-flight fragment count"
    );
    metrics::describe_gauge!(format!("{PREFIX}_circuit_breaker_state"), "0=closed 1=half_open 2=open");
    metrics::describe_counter!(format!("{PREFIX}_circuit_breaker_failures_total"), "Breaker failures counted");
    metrics::describe_counter!(format!("{PREFIX}_circuit_breaker_fallbacks_total"), "Breaker-denied sends");
    metrics::describe_gauge!(format!("{PREFIX}_av_sync_delta_ms"), "Current A/V delta");
    metrics::describe_counter!(format!("{PREFIX}_av_sync_corrections_total"), "Slew corrections applied");
    metrics::describe_gauge!(format!("{PREFIX}_av_buffer_video_size"), "Sync video buffer depth");
    metrics::describe_gauge!(format!("{PREFIX}_av_buffer_audio_size"), "Sync audio buffer depth");
    metrics::describe_counter!(format!("{PREFIX}_errors_total"), "Errors by error_type");
    metrics::describe_gauge!(format!("{PREFIX}_pipeline_state"), "0=stopped 1=running 2=error, by pipeline");
    metrics::describe_counter!(format!("{PREFIX}_backpressure_events_total"), "Backpressure signals received, by action");
}

pub fn segments_processed(stream_id: &str, kind: &'static str) {
    metrics::counter!(format!("{PREFIX}_segments_processed_total"), "stream_id" => stream_id.to_string(), "type" => kind).increment(1);
}

pub fn segments_bytes(stream_id: &str, kind: &'static str, bytes: u64) {
    metrics::counter!(format!("{PREFIX}_segments_bytes_total"), "stream_id" => stream_id.to_string(), "type" => kind).increment(bytes);
}

pub fn sts_fragment_sent(stream_id: &str) {
    metrics::counter!(format!("{PREFIX}_sts_fragments_sent_total"), "stream_id" => stream_id.to_string()).increment(1);
}

pub fn sts_fragment_processed(stream_id: &str, status: &'static str) {
    metrics::counter!(format!("{PREFIX}_sts_fragments_processed_total"), "stream_id" => stream_id.to_string(), "status" => status)
        .increment(1);
}

pub fn sts_processing_latency(stream_id: &str, seconds: f64) {
    metrics::histogram!(format!("{PREFIX}_sts_processing_latency_seconds"), "stream_id" => stream_id.to_string())
        .record(seconds);
}

pub fn sts_inflight(stream_id: &str, count: usize) {
    metrics::gauge!(format!("{PREFIX}_sts_inflight_fragments"), "stream_id" => stream_id.to_string()).set(count as f64);
}

pub fn circuit_breaker_state(stream_id: &str, value: u8) {
    metrics::gauge!(format!("{PREFIX}_circuit_breaker_state"), "stream_id" => stream_id.to_string()).set(value as f64);
}

pub fn circuit_breaker_failure(stream_id: &str) {
    metrics::counter!(format!("{PREFIX}_circuit_breaker_failures_total"), "stream_id" => stream_id.to_string()).increment(1);
}

pub fn circuit_breaker_fallback(stream_id: &str) {
    metrics::counter!(format!("{PREFIX}_circuit_breaker_fallbacks_total"), "stream_id" => stream_id.to_string()).increment(1);
}

pub fn av_sync_delta_ms(stream_id: &str, delta_ms: f64) {
    metrics::gauge!(format!("{PREFIX}_av_sync_delta_ms"), "stream_id" => stream_id.to_string()).set(delta_ms);
}

pub fn av_sync_correction(stream_id: &str) {
    metrics::counter!(format!("{PREFIX}_av_sync_corrections_total"), "stream_id" => stream_id.to_string()).increment(1);
}

pub fn av_buffer_sizes(stream_id: &str, video: usize, audio: usize) {
    metrics::gauge!(format!("{PREFIX}_av_buffer_video_size"), "stream_id" => stream_id.to_string()).set(video as f64);
    metrics::gauge!(format!("{PREFIX}_av_buffer_audio_size"), "stream_id" => stream_id.to_string()).set(audio as f64);
}

pub fn error(stream_id: &str, error_type: &'static str) {
    metrics::counter!(format!("{PREFIX}_errors_total"), "stream_id" => stream_id.to_string(), "error_type" => error_type)
        .increment(1);
}

pub fn pipeline_state(stream_id: &str, pipeline: &'static str, value: u8) {
    metrics::gauge!(format!("{PREFIX}_pipeline_state"), "stream_id" => stream_id.to_string(), "pipeline" => pipeline)
        .set(value as f64);
}

pub fn backpressure_event(stream_id: &str, action: &'static str) {
    metrics::counter!(format!("{PREFIX}_backpressure_events_total"), "stream_id" => stream_id.to_string(), "action" => action)
        .increment(1);
}
