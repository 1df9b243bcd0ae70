use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, URL-safe identifier for one live stream. Immutable for the
/// worker's life.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Result<Self, crate::error::WorkerError> {
        let id = id.into();
        static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let re = PATTERN.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
        if !re.is_match(&id) {
            return Err(crate::error::WorkerError::InvalidStreamId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity and immutable configuration of one live stream, per spec §3.
#[derive(Debug, Clone)]
pub struct StreamIdentity {
    pub stream_id: StreamId,
    pub input_url: String,
    pub output_url: String,
    pub sts_url: String,
    pub source_language: String,
    pub target_language: String,
    pub voice_profile: String,
    pub segment_target_duration: Duration,
}

/// A 0-based, monotone per-stream counter identifying the Nth segment
/// window.
pub type BatchNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionTrigger {
    Duration,
    Silence,
    MaxDuration,
    MemoryLimit,
    Eos,
}

impl EmissionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            EmissionTrigger::Duration => "duration",
            EmissionTrigger::Silence => "silence",
            EmissionTrigger::MaxDuration => "max_duration",
            EmissionTrigger::MemoryLimit => "memory_limit",
            EmissionTrigger::Eos => "eos",
        }
    }
}

/// One video access-unit window, produced by the Segment Buffer.
#[derive(Debug, Clone)]
pub struct VideoSegment {
    pub fragment_id: Uuid,
    pub stream_id: StreamId,
    pub batch_number: BatchNumber,
    pub start_pts: Duration,
    pub duration: Duration,
    pub payload: bytes::Bytes,
    pub file_path: Option<PathBuf>,
    pub size_bytes: usize,
}

/// One audio segment: the source-language original, and optionally its
/// dubbed counterpart once the STS round trip completes.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub fragment_id: Uuid,
    pub stream_id: StreamId,
    pub batch_number: BatchNumber,
    pub start_pts: Duration,
    pub duration: Duration,
    pub trigger: EmissionTrigger,
    pub payload: bytes::Bytes,
    pub file_path: Option<PathBuf>,
    pub size_bytes: usize,
    pub is_dubbed: bool,
    pub dubbed_payload: Option<bytes::Bytes>,
    pub dubbed_file_path: Option<PathBuf>,
}

impl AudioSegment {
    /// Builds a fallback audio segment that reuses the original payload in
    /// place of a dubbed one, with a derived fragment id (`<original>_fallback`).
    pub fn as_fallback(&self) -> AudioSegment {
        let mut fallback = self.clone();
        fallback.is_dubbed = false;
        fallback.dubbed_payload = None;
        fallback.dubbed_file_path = None;
        fallback
    }
}

/// A decoded `(video, audio)` pair ready for the Output Pipeline, carrying
/// the output PTS after offset/drift correction is applied.
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub batch_number: BatchNumber,
    pub video: VideoSegment,
    pub audio: AudioSegment,
    pub output_pts: Duration,
}

/// A frame-level payload delivered by the Ingest Pipeline, before it has
/// been accumulated into a segment.
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub data: bytes::Bytes,
    pub pts: Duration,
    pub duration: Duration,
}

/// End-of-stream marker threaded through the same channels as data, so
/// consumers see EOS in order relative to the frames that preceded it.
#[derive(Debug, Clone)]
pub enum StreamEvent<T> {
    Data(T),
    Eos,
}

/// A periodic RMS level sample emitted by the Ingest Pipeline alongside raw
/// audio, driving the VAD's silence/speech boundary detection (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct LevelMessage {
    pub rms_db: f64,
    pub timestamp: Duration,
}
