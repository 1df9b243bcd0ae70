use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum LoggerFormat {
    Pretty,
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub format: LoggerFormat,
    #[serde(default = "default_stdio_level")]
    pub stdio_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_file_level")]
    pub file_level: String,
}

fn default_stdio_level() -> String {
    "info".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

/// Configuration for the STS `stream:init` session, per §6.2's
/// `config` payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StsStreamConfig {
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_voice_profile")]
    pub voice_profile: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default = "default_chunk_duration_ms")]
    pub chunk_duration_ms: u64,
}

fn default_source_language() -> String {
    "en".to_string()
}
fn default_target_language() -> String {
    "zh".to_string()
}
fn default_voice_profile() -> String {
    "default".to_string()
}
fn default_format() -> String {
    "m4a".to_string()
}
fn default_sample_rate_hz() -> u32 {
    48_000
}
fn default_channels() -> u8 {
    2
}
fn default_chunk_duration_ms() -> u64 {
    6_000
}

impl Default for StsStreamConfig {
    fn default() -> Self {
        Self {
            source_language: default_source_language(),
            target_language: default_target_language(),
            voice_profile: default_voice_profile(),
            format: default_format(),
            sample_rate_hz: default_sample_rate_hz(),
            channels: default_channels(),
            chunk_duration_ms: default_chunk_duration_ms(),
        }
    }
}

/// VAD parameters, per §4.3's table. All fields optional at deserialization
/// time; defaults sit in the middle of each documented range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_silence_threshold_db")]
    pub silence_threshold_db: f64,
    #[serde(default = "default_silence_duration")]
    pub silence_duration: Duration,
    #[serde(default = "default_min_segment_duration")]
    pub min_segment_duration: Duration,
    #[serde(default = "default_max_segment_duration")]
    pub max_segment_duration: Duration,
    #[serde(default = "default_level_interval")]
    pub level_interval: Duration,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
}

fn default_silence_threshold_db() -> f64 {
    -40.0
}
fn default_silence_duration() -> Duration {
    Duration::from_millis(500)
}
fn default_min_segment_duration() -> Duration {
    Duration::from_secs(1)
}
fn default_max_segment_duration() -> Duration {
    Duration::from_secs(30)
}
fn default_level_interval() -> Duration {
    Duration::from_millis(100)
}
fn default_memory_limit_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            silence_threshold_db: default_silence_threshold_db(),
            silence_duration: default_silence_duration(),
            min_segment_duration: default_min_segment_duration(),
            max_segment_duration: default_max_segment_duration(),
            level_interval: default_level_interval(),
            memory_limit_bytes: default_memory_limit_bytes(),
        }
    }
}

/// Circuit breaker thresholds (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

/// A/V sync constants (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvSyncConfig {
    #[serde(default = "default_av_offset")]
    pub av_offset: Duration,
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: Duration,
    #[serde(default = "default_slew_rate")]
    pub slew_rate: Duration,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

fn default_av_offset() -> Duration {
    Duration::from_secs(6)
}
fn default_drift_threshold() -> Duration {
    Duration::from_millis(120)
}
fn default_slew_rate() -> Duration {
    Duration::from_millis(10)
}
fn default_max_buffer_size() -> usize {
    10
}

impl Default for AvSyncConfig {
    fn default() -> Self {
        Self {
            av_offset: default_av_offset(),
            drift_threshold: default_drift_threshold(),
            slew_rate: default_slew_rate(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

/// Timeouts that are strict per §5 ("Suspension points").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_sts_init_timeout")]
    pub sts_init: Duration,
    #[serde(default = "default_fragment_timeout")]
    pub fragment: Duration,
    #[serde(default = "default_backpressure_pause_cap")]
    pub backpressure_pause_cap: Duration,
    #[serde(default = "default_reconnect_cap")]
    pub reconnect_cap: Duration,
}

fn default_sts_init_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_fragment_timeout() -> Duration {
    Duration::from_secs(8)
}
fn default_backpressure_pause_cap() -> Duration {
    Duration::from_secs(30)
}
fn default_reconnect_cap() -> Duration {
    Duration::from_secs(30)
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            sts_init: default_sts_init_timeout(),
            fragment: default_fragment_timeout(),
            backpressure_pause_cap: default_backpressure_pause_cap(),
            reconnect_cap: default_reconnect_cap(),
        }
    }
}

/// Full configuration for one Worker Runner instance (§10.3). Deserializable
/// from whatever format the orchestrator provides; the crate owns no file
/// format of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub stream_id: String,
    pub input_url: String,
    pub output_url: String,
    pub sts_url: String,

    #[serde(default = "default_segment_target_duration")]
    pub segment_target_duration: Duration,
    #[serde(default = "default_min_partial_segment_duration")]
    pub min_partial_segment_duration: Duration,

    #[serde(default)]
    pub sts_stream: StsStreamConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub av_sync: AvSyncConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_true")]
    pub send_fragment_ack: bool,

    #[serde(default)]
    pub segment_dir: Option<PathBuf>,
}

fn default_segment_target_duration() -> Duration {
    Duration::from_secs(30)
}
fn default_min_partial_segment_duration() -> Duration {
    Duration::from_secs(1)
}
fn default_max_inflight() -> usize {
    3
}
fn default_queue_capacity() -> usize {
    10
}
