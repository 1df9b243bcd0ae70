use thiserror::Error;

/// Ingest Pipeline failures (§4.1, §7).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid input URL: {0}")]
    InvalidUrl(String),

    #[error("required demuxer or codec module missing: {0}")]
    MissingCodec(String),

    #[error("demuxer reported a transient error: {0}")]
    Transient(String),

    #[error("subprocess exited unexpectedly: {0}")]
    ProcessExited(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// `true` for `IngestTransient` per the §7 taxonomy; `false` for
    /// `IngestFatal`.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Transient(_) | IngestError::ProcessExited(_))
    }
}

/// STS Client failures (§4.5, §6.2).
#[derive(Error, Debug)]
pub enum StsError {
    #[error("not connected to STS")]
    NotConnected,

    #[error("stream is not ready (stream:ready not yet observed)")]
    StreamNotReady,

    #[error("timed out waiting for stream:ready after {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("segment file does not exist on disk: {0}")]
    MissingSegmentFile(std::path::PathBuf),

    #[error("reconnect attempts exhausted ({0} attempts)")]
    ReconnectExhausted(u32),
}

/// Error code carried by STS `fragment:processed` / `error` payloads
/// (§6.2, §7). Retryability classification lives here so the Circuit
/// Breaker and callers share one source of truth.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StsErrorCode(pub String);

impl StsErrorCode {
    const NON_RETRYABLE: &'static [&'static str] = &[
        "INVALID_CONFIG",
        "INVALID_SEQUENCE",
        "STREAM_NOT_FOUND",
        "FRAGMENT_TOO_LARGE",
    ];

    /// Unknown/unclassified codes are treated as retryable, per §4.6.
    pub fn is_retryable(&self) -> bool {
        !Self::NON_RETRYABLE.contains(&self.0.as_str())
    }
}

/// Fragment Tracker failures.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("in-flight cap of {max_inflight} reached")]
    AtCapacity { max_inflight: usize },

    #[error("fragment {0} was already tracked")]
    DuplicateFragment(uuid::Uuid),
}

/// Segment Writer failures (§4.4).
#[derive(Error, Debug)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("muxer process produced an empty file: {0}")]
    EmptyOutput(std::path::PathBuf),

    #[error("muxer process exited with status {0}")]
    MuxerFailed(std::process::ExitStatus),
}

/// Output Pipeline failures (§4.9).
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("invalid output URL: {0}")]
    InvalidUrl(String),

    #[error("audio/video duration mismatch of {0:?} could not be corrected by atempo")]
    AtempoOutOfRange(std::time::Duration),

    #[error("publishing subprocess exited unexpectedly: {0}")]
    ProcessExited(String),

    #[error("restart budget exhausted after {0} consecutive restarts")]
    RestartBudgetExhausted(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// PipelineMalfunction per §7: conditions that indicate the pipeline
/// itself is misbehaving, not a transient upstream hiccup. Fatal.
#[derive(Error, Debug)]
pub enum MalfunctionError {
    #[error("{0} consecutive invalid RMS samples received")]
    InvalidRmsStreak(u32),

    #[error("no level messages received for {0:?}")]
    LevelMessageTimeout(std::time::Duration),

    #[error("output publisher crashed {0} times in a row")]
    PublisherCrashLoop(u32),
}

/// Top-level error aggregate for the Worker Runner's public API. Each
/// variant corresponds to one row of the §7 error taxonomy.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid stream id: {0:?} (must match [A-Za-z0-9_-]+)")]
    InvalidStreamId(String),

    #[error("ingest pipeline error: {0}")]
    Ingest(#[from] IngestError),

    #[error("STS client error: {0}")]
    Sts(#[from] StsError),

    #[error("fragment tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("segment writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("output pipeline error: {0}")]
    Output(#[from] OutputError),

    #[error("pipeline malfunction: {0}")]
    Malfunction(#[from] MalfunctionError),

    #[error("startup failed: {0}")]
    StartupFailure(String),

    #[error("worker is not running")]
    NotRunning,
}
