//! Wire payloads for the STS Socket.IO-style event protocol (§6.2). Each
//! event is a flat JSON envelope `{event, data}` over a `tokio-tungstenite`
//! WebSocket; there is no engine.io/socket.io framing layer since §6.2
//! specifies only an event name and a payload shape per event.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::StsStreamConfig;
use crate::error::StsErrorCode;
use crate::types::AudioSegment;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "stream:init")]
    StreamInit {
        stream_id: String,
        worker_id: String,
        config: StsStreamConfig,
    },
    #[serde(rename = "fragment:data")]
    FragmentData(FragmentDataPayload),
    #[serde(rename = "fragment:ack")]
    FragmentAck { fragment_id: String, status: String },
    #[serde(rename = "stream:end")]
    StreamEnd { stream_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "stream:ready")]
    StreamReady {
        session_id: String,
        #[serde(default = "default_max_inflight")]
        max_inflight: usize,
    },
    #[serde(rename = "fragment:ack")]
    FragmentAck {
        fragment_id: String,
        status: String,
        queue_position: Option<u32>,
        estimated_completion_ms: Option<u64>,
    },
    #[serde(rename = "fragment:processed")]
    FragmentProcessed(FragmentProcessedPayload),
    #[serde(rename = "backpressure")]
    Backpressure(BackpressurePayload),
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

fn default_max_inflight() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioData {
    pub format: String,
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub duration_ms: u64,
    pub data_base64: String,
}

impl AudioData {
    pub fn from_bytes(data: &[u8], duration_ms: u64, sample_rate_hz: u32, channels: u8) -> Self {
        Self {
            format: "m4a".to_string(),
            sample_rate_hz,
            channels,
            duration_ms,
            data_base64: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data_base64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub pts_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_pts_ns: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentDataPayload {
    pub fragment_id: String,
    pub stream_id: String,
    pub sequence_number: u64,
    pub timestamp: u64,
    pub audio: AudioData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FragmentMetadata>,
}

impl FragmentDataPayload {
    pub fn from_segment(segment: &AudioSegment, sequence_number: u64, unix_ms: u64) -> Self {
        Self {
            fragment_id: segment.fragment_id.to_string(),
            stream_id: segment.stream_id.as_str().to_string(),
            sequence_number,
            timestamp: unix_ms,
            audio: AudioData::from_bytes(&segment.payload, segment.duration.as_millis() as u64, 48_000, 2),
            metadata: Some(FragmentMetadata {
                pts_ns: segment.start_pts.as_nanos() as u64,
                source_pts_ns: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    #[serde(default)]
    pub asr_ms: u64,
    #[serde(default)]
    pub translation_ms: u64,
    #[serde(default)]
    pub tts_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl ProcessingError {
    pub fn error_code(&self) -> StsErrorCode {
        StsErrorCode(self.code.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentProcessedPayload {
    pub fragment_id: String,
    pub stream_id: String,
    pub sequence_number: u64,
    pub status: FragmentStatus,
    #[serde(default)]
    pub dubbed_audio: Option<AudioData>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub stage_timings: Option<StageTimings>,
    #[serde(default)]
    pub error: Option<ProcessingError>,
}

impl FragmentProcessedPayload {
    pub fn is_success(&self) -> bool {
        self.status == FragmentStatus::Success && self.dubbed_audio.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureAction {
    None,
    SlowDown,
    Pause,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressurePayload {
    pub stream_id: String,
    pub severity: BackpressureSeverity,
    #[serde(default)]
    pub current_inflight: u32,
    #[serde(default)]
    pub queue_depth: u32,
    pub action: BackpressureAction,
    #[serde(default)]
    pub recommended_delay_ms: u64,
}
