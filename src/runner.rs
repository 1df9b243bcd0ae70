//! Worker Runner (§4.10): composes every component for one stream, owns the
//! cooperative run loop, and exposes the `start`/`stop`/`cleanup` lifecycle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backpressure::{self, BackpressureHandler};
use crate::breaker::{BreakerState, CircuitBreaker, SendOutcome};
use crate::config::WorkerConfig;
use crate::error::{StsErrorCode, WorkerError};
use crate::ingest::{IngestConfig, IngestExitReason, IngestPipeline, IngestReceivers};
use crate::metrics;
use crate::output::{OutputConfig, OutputPipeline};
use crate::segment_buffer::SegmentBuffer;
use crate::sts::protocol::{BackpressureAction, BackpressureSeverity, FragmentStatus, ServerEvent};
use crate::sts::{ReconnectPolicy, StsClient};
use crate::sync::AvSyncManager;
use crate::tracker::FragmentTracker;
use crate::types::{AudioSegment, BatchNumber, StreamEvent, StreamId, SyncPair, VideoSegment};
use crate::vad::VadAudioSegmenter;
use crate::writer::SegmentWriter;

const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Backoff schedule for restarting the Ingest Pipeline after an
/// `IngestTransient` failure (§4.1, §7): up to 3 restarts, at 1s, 2s, 4s.
const INGEST_RESTART_BACKOFF: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Composes every component for one stream and owns its cooperative run
/// loop task. `start`/`stop`/`cleanup` are all idempotent.
pub struct WorkerRunner {
    stream_id: StreamId,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
    loop_handle: Option<JoinHandle<()>>,
}

impl WorkerRunner {
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        let stream_id = StreamId::new(config.stream_id.clone())?;
        Ok(Self {
            stream_id,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            loop_handle: None,
        })
    }

    /// Connects STS, initializes the session, builds and starts ingest and
    /// output, then spawns the run loop. Any failure aborts startup and is
    /// reported to the caller; nothing partially-started is left running.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        if self.loop_handle.is_some() {
            return Ok(());
        }

        let segment_dir = self
            .config
            .segment_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("dubbing-worker"));

        let mut sts = StsClient::new(self.config.sts_url.clone(), self.stream_id.as_str(), ReconnectPolicy::default());
        sts.connect()
            .await
            .map_err(|err| WorkerError::StartupFailure(err.to_string()))?;
        sts.init_stream(self.config.sts_stream.clone(), self.config.timeouts.sts_init)
            .await
            .map_err(|err| WorkerError::StartupFailure(err.to_string()))?;

        let (ingest, ingest_rx) = IngestPipeline::build(
            self.stream_id.as_str(),
            IngestConfig {
                input_url: self.config.input_url.clone(),
                queue_capacity: self.config.queue_capacity,
            },
        )
        .map_err(|err| WorkerError::StartupFailure(err.to_string()))?;

        let output = OutputPipeline::build(
            self.stream_id.as_str(),
            OutputConfig {
                output_url: self.config.output_url.clone(),
                queue_capacity: self.config.queue_capacity,
            },
        )
        .map_err(|err| WorkerError::StartupFailure(err.to_string()))?;

        metrics::pipeline_state(self.stream_id.as_str(), "ingest", 1);
        metrics::pipeline_state(self.stream_id.as_str(), "output", 1);

        self.shutdown.store(false, Ordering::SeqCst);
        let state = RunState {
            stream_id: self.stream_id.clone(),
            config: self.config.clone(),
            sts,
            ingest,
            ingest_rx,
            output,
            writer: SegmentWriter::new(segment_dir),
            tracker: FragmentTracker::new(self.config.max_inflight),
            breaker: CircuitBreaker::new(self.config.circuit_breaker.failure_threshold, self.config.circuit_breaker.cooldown),
            backpressure: BackpressureHandler::new(self.config.timeouts.backpressure_pause_cap),
            sync: AvSyncManager::new(self.config.av_sync.clone()),
            video_buffer: SegmentBuffer::new(self.config.segment_target_duration, self.config.min_partial_segment_duration),
            audio_buffer: SegmentBuffer::new(self.config.segment_target_duration, self.config.min_partial_segment_duration),
            vad: self.config.vad.enabled.then(|| VadAudioSegmenter::new(self.config.vad.clone())),
            video_eos: false,
            audio_eos: false,
            original_audio: HashMap::new(),
            last_level_wall: None,
            ingest_restart_count: 0,
            ingest_restart_at: None,
            pending_sends: VecDeque::new(),
            send_resume_at: None,
            shutdown: self.shutdown.clone(),
        };

        self.loop_handle = Some(tokio::spawn(run_loop(state)));
        Ok(())
    }

    /// Cooperatively stops the run loop and waits for it to drain, flush,
    /// and tear down every pipeline.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
        metrics::pipeline_state(self.stream_id.as_str(), "ingest", 0);
        metrics::pipeline_state(self.stream_id.as_str(), "output", 0);
        Ok(())
    }

    /// Idempotent resource release; safe to call after `stop` or without a
    /// prior `start`.
    pub fn cleanup(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for WorkerRunner {
    fn drop(&mut self) {
        self.cleanup();
    }
}

struct RunState {
    stream_id: StreamId,
    config: WorkerConfig,
    sts: StsClient,
    ingest: IngestPipeline,
    ingest_rx: IngestReceivers,
    output: OutputPipeline,
    writer: SegmentWriter,
    tracker: FragmentTracker,
    breaker: CircuitBreaker,
    backpressure: BackpressureHandler,
    sync: AvSyncManager,
    video_buffer: SegmentBuffer,
    audio_buffer: SegmentBuffer,
    vad: Option<VadAudioSegmenter>,
    video_eos: bool,
    audio_eos: bool,
    /// Side table of the original (un-dubbed) audio per batch number, kept
    /// around so a late sync flush can fall back to it without needing a
    /// live in-flight tracker record (§4.8 `flush_with_fallback`).
    original_audio: HashMap<BatchNumber, AudioSegment>,
    /// Wall-clock watchdog baseline for the VAD level-message stream,
    /// independent of the ingest-side PTS domain so a stalled input is
    /// still caught even though stream time itself has stopped advancing.
    last_level_wall: Option<std::time::Instant>,
    /// Number of ingest restarts attempted so far after `IngestTransient`
    /// failures (§4.1, §7), bounded by `INGEST_RESTART_BACKOFF`.
    ingest_restart_count: usize,
    /// When the next scheduled ingest restart should fire, checked
    /// non-blockingly on each tick rather than slept through.
    ingest_restart_at: Option<std::time::Instant>,
    /// Audio segments awaiting a backpressure-gated send to STS, in
    /// emission order. A segment stays at the front of the queue while
    /// backpressure holds sends, rather than blocking the tick (§4.7).
    pending_sends: VecDeque<AudioSegment>,
    /// When the next pending send may be attempted, checked
    /// non-blockingly on each tick instead of `.await`ed inside it.
    send_resume_at: Option<Instant>,
    shutdown: Arc<AtomicBool>,
}

async fn run_loop(mut state: RunState) {
    let stream_id = state.stream_id.clone();
    let _span = tracing::info_span!("worker_runner", stream_id = %stream_id).entered();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        ticker.tick().await;
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = tick(&mut state).await {
            tracing::error!(error = %err, "worker runner fatal error, stopping");
            metrics::error(stream_id.as_str(), "malfunction");
            break;
        }
        if state.video_eos
            && state.audio_eos
            && state.tracker.inflight_count() == 0
            && state.ingest_restart_at.is_none()
            && state.pending_sends.is_empty()
            && state.send_resume_at.is_none()
        {
            break;
        }
    }

    flush_and_stop(&mut state).await;
}

async fn tick(state: &mut RunState) -> Result<(), WorkerError> {
    drain_video(state)?;
    drain_audio(state)?;
    drain_level(state)?;
    drain_sts_events(state).await;
    drain_pending_sends(state).await;
    reap_expired_fragments(state).await;
    maybe_restart_ingest(state);

    for pair in state.sync.get_ready_pairs() {
        publish(state, pair);
    }

    metrics::sts_inflight(state.stream_id.as_str(), state.tracker.inflight_count());
    metrics::circuit_breaker_state(state.stream_id.as_str(), state.breaker.state().as_gauge_value());
    metrics::av_buffer_sizes(state.stream_id.as_str(), state.sync.video_buffer_size(), state.sync.audio_buffer_size());
    metrics::av_sync_delta_ms(state.stream_id.as_str(), state.sync.sync_delta_ms());
    Ok(())
}

/// Reacts to the Ingest Pipeline stopping: a transient failure is retried
/// with backoff up to `INGEST_RESTART_BACKOFF`'s length; a fatal error or
/// clean EOS is left alone so `run_loop`'s exit condition can observe it
/// (§4.1, §7). The wait between restarts is tracked as a deadline rather
/// than slept through, so the shared tick keeps draining everything else.
fn maybe_restart_ingest(state: &mut RunState) {
    if let Some(restart_at) = state.ingest_restart_at {
        if std::time::Instant::now() < restart_at {
            return;
        }
        state.ingest_restart_at = None;
        match IngestPipeline::build(
            state.stream_id.as_str(),
            IngestConfig {
                input_url: state.config.input_url.clone(),
                queue_capacity: state.config.queue_capacity,
            },
        ) {
            Ok((ingest, ingest_rx)) => {
                state.ingest = ingest;
                state.ingest_rx = ingest_rx;
                state.video_eos = false;
                state.audio_eos = false;
                tracing::info!(attempt = state.ingest_restart_count, "ingest pipeline restarted");
            }
            Err(err) => {
                tracing::error!(error = %err, "ingest pipeline restart failed, stopping worker");
                metrics::error(state.stream_id.as_str(), "ingest");
            }
        }
        return;
    }

    if !(state.video_eos && state.audio_eos) {
        return;
    }
    let Some(reason) = state.ingest.take_exit_reason() else {
        return;
    };
    match reason {
        IngestExitReason::Eos => {}
        IngestExitReason::Fatal => {
            tracing::error!("ingest reported a fatal error, stopping worker");
            metrics::error(state.stream_id.as_str(), "ingest");
        }
        IngestExitReason::Transient if state.ingest_restart_count < INGEST_RESTART_BACKOFF.len() => {
            let delay = INGEST_RESTART_BACKOFF[state.ingest_restart_count];
            state.ingest_restart_count += 1;
            state.ingest_restart_at = Some(std::time::Instant::now() + delay);
            tracing::warn!(?delay, attempt = state.ingest_restart_count, "ingest reported a transient failure, scheduling restart");
        }
        IngestExitReason::Transient => {
            tracing::error!("ingest restart budget exhausted, stopping worker");
            metrics::error(state.stream_id.as_str(), "ingest");
        }
    }
}

fn drain_video(state: &mut RunState) -> Result<(), WorkerError> {
    while let Ok(event) = state.ingest_rx.video.try_recv() {
        match event {
            StreamEvent::Data(frame) => {
                if let Some(emission) = state.video_buffer.push(frame) {
                    let segment = VideoSegment {
                        fragment_id: Uuid::new_v4(),
                        stream_id: state.stream_id.clone(),
                        batch_number: emission.batch_number,
                        start_pts: emission.start_pts,
                        duration: emission.duration,
                        payload: emission.payload,
                        file_path: None,
                        size_bytes: 0,
                    };
                    match state.writer.write_video_muxed(segment) {
                        Ok(segment) => {
                            metrics::segments_processed(state.stream_id.as_str(), "video");
                            metrics::segments_bytes(state.stream_id.as_str(), "video", segment.size_bytes as u64);
                            if let Some(pair) = state.sync.push_video(segment) {
                                publish(state, pair);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to mux video segment, dropping");
                            metrics::error(state.stream_id.as_str(), "writer");
                        }
                    }
                }
            }
            StreamEvent::Eos => state.video_eos = true,
        }
    }
    Ok(())
}

fn drain_audio(state: &mut RunState) -> Result<(), WorkerError> {
    let mut emissions = Vec::new();
    while let Ok(event) = state.ingest_rx.audio.try_recv() {
        match event {
            StreamEvent::Data(frame) => {
                let emitted = if let Some(vad) = state.vad.as_mut() {
                    vad.on_audio_buffer(&frame.data, frame.pts, frame.duration)
                        .map(|e| (e.batch_number, e.start_pts, e.duration, e.payload))
                } else {
                    state
                        .audio_buffer
                        .push(frame)
                        .map(|e| (e.batch_number, e.start_pts, e.duration, e.payload))
                };
                if let Some(emission) = emitted {
                    emissions.push(emission);
                }
            }
            StreamEvent::Eos => state.audio_eos = true,
        }
    }
    for (batch_number, start_pts, duration, payload) in emissions {
        handle_audio_emission(state, batch_number, start_pts, duration, payload)?;
    }
    Ok(())
}

const LEVEL_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

fn drain_level(state: &mut RunState) -> Result<(), WorkerError> {
    let mut received = false;
    while let Ok(level) = state.ingest_rx.level.try_recv() {
        received = true;
        if let Some(vad) = state.vad.as_mut() {
            match vad.on_level_message(level.rms_db, level.timestamp) {
                Ok(_) => {}
                Err(malfunction) => return Err(WorkerError::Malfunction(malfunction)),
            }
        }
    }
    if state.vad.is_none() {
        return Ok(());
    }
    if received {
        state.last_level_wall = Some(std::time::Instant::now());
        return Ok(());
    }
    if let Some(last) = state.last_level_wall {
        if last.elapsed() > LEVEL_MESSAGE_TIMEOUT {
            return Err(WorkerError::Malfunction(crate::error::MalfunctionError::LevelMessageTimeout(
                LEVEL_MESSAGE_TIMEOUT,
            )));
        }
    }
    Ok(())
}

fn handle_audio_emission(
    state: &mut RunState,
    batch_number: BatchNumber,
    start_pts: Duration,
    duration: Duration,
    payload: Bytes,
) -> Result<(), WorkerError> {
    let segment = AudioSegment {
        fragment_id: Uuid::new_v4(),
        stream_id: state.stream_id.clone(),
        batch_number,
        start_pts,
        duration,
        trigger: crate::types::EmissionTrigger::Duration,
        payload,
        file_path: None,
        size_bytes: 0,
        is_dubbed: false,
        dubbed_payload: None,
        dubbed_file_path: None,
    };
    let segment = state.writer.write(segment).map_err(WorkerError::Writer)?;
    metrics::segments_processed(state.stream_id.as_str(), "audio");
    metrics::segments_bytes(state.stream_id.as_str(), "audio", segment.size_bytes as u64);
    state.original_audio.insert(batch_number, segment.clone());

    state.pending_sends.push_back(segment);
    Ok(())
}

/// Drains `pending_sends` in order, holding at the front of the queue
/// whatever is still waiting out backpressure instead of blocking the tick
/// (§4.7, §8 Scenario D). `send_resume_at` is a plain deadline checked here
/// each tick, the same non-blocking pattern `maybe_restart_ingest` uses for
/// ingest restarts, so a clearing signal processed earlier this tick (or a
/// future one) in `drain_sts_events` is picked up on the very next poll
/// rather than after a full `backpressure_pause_cap` sleep.
async fn drain_pending_sends(state: &mut RunState) {
    loop {
        if let Some(resume_at) = state.send_resume_at {
            if Instant::now() < resume_at {
                return;
            }
            state.send_resume_at = None;
        }
        let Some(segment) = state.pending_sends.pop_front() else {
            return;
        };
        match state.backpressure.wait_duration() {
            None => {
                metrics::backpressure_event(state.stream_id.as_str(), "pause_expired");
                fallback(state, segment);
            }
            Some(delay) if delay > Duration::ZERO => {
                state.send_resume_at = Some(Instant::now() + delay);
                state.pending_sends.push_front(segment);
                return;
            }
            Some(_) => send_to_sts_or_fallback(state, segment).await,
        }
    }
}

/// Dispatches one fragment to STS through the breaker, or falls back to the
/// original audio immediately (§4.6, §4.10). Backpressure has already
/// cleared by the time this is called.
async fn send_to_sts_or_fallback(state: &mut RunState, segment: AudioSegment) {
    if !state.breaker.should_allow_request() {
        metrics::circuit_breaker_fallback(state.stream_id.as_str());
        fallback(state, segment);
        return;
    }

    match state.sts.send_fragment(&segment).await {
        Ok(fragment_id) => {
            let Ok(fragment_id) = Uuid::parse_str(&fragment_id) else {
                tracing::warn!(fragment_id, "STS returned a non-UUID fragment id");
                fallback(state, segment);
                return;
            };
            metrics::sts_fragment_sent(state.stream_id.as_str());
            let sequence_number = segment.batch_number;
            if let Err(err) = state.tracker.track(fragment_id, segment.clone(), sequence_number) {
                tracing::warn!(error = %err, "fragment tracker at capacity, falling back");
                fallback(state, segment);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "STS send failed, falling back");
            state.breaker.handle_response(SendOutcome::Failure(true));
            metrics::circuit_breaker_failure(state.stream_id.as_str());
            fallback(state, segment);
        }
    }
}

fn fallback(state: &mut RunState, segment: AudioSegment) {
    let fallback = segment.as_fallback();
    if let Some(pair) = state.sync.push_audio(fallback) {
        publish(state, pair);
    }
}

async fn drain_sts_events(state: &mut RunState) {
    loop {
        let event = match state.sts.events().try_recv() {
            Ok(event) => event,
            Err(_) => break,
        };
        handle_sts_event(state, event).await;
    }
}

async fn handle_sts_event(state: &mut RunState, event: ServerEvent) {
    match event {
        ServerEvent::StreamReady { .. } => {}
        ServerEvent::FragmentAck { .. } => {}
        ServerEvent::FragmentProcessed(payload) => {
            let Ok(fragment_id) = Uuid::parse_str(&payload.fragment_id) else {
                tracing::warn!(fragment_id = %payload.fragment_id, "malformed fragment id in fragment:processed");
                return;
            };
            let Some(record) = state.tracker.complete(fragment_id) else {
                tracing::warn!(%fragment_id, "fragment:processed for unknown/already-completed fragment");
                return;
            };
            metrics::sts_processing_latency(state.stream_id.as_str(), record.elapsed().as_secs_f64());
            metrics::sts_fragment_processed(
                state.stream_id.as_str(),
                match payload.status {
                    FragmentStatus::Success => "success",
                    FragmentStatus::Partial => "partial",
                    FragmentStatus::Failed => "failed",
                },
            );

            if state.config.send_fragment_ack {
                let status = if payload.is_success() { "received" } else { "received_failed" };
                state.sts.ack_fragment(&payload.fragment_id, status).await;
            }

            if payload.is_success() {
                let Some(audio_data) = &payload.dubbed_audio else {
                    fallback(state, record.segment);
                    return;
                };
                match audio_data.decode() {
                    Ok(bytes) => {
                        state.breaker.handle_response(SendOutcome::Success);
                        match state.writer.write_dubbed(record.segment, Bytes::from(bytes)) {
                            Ok(dubbed) => {
                                state.original_audio.remove(&dubbed.batch_number);
                                if let Some(pair) = state.sync.push_audio(dubbed) {
                                    publish(state, pair);
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to persist dubbed audio, falling back");
                                metrics::error(state.stream_id.as_str(), "writer");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to decode dubbed audio, falling back");
                        fallback(state, record.segment);
                    }
                }
            } else {
                if let Some(err) = &payload.error {
                    state.breaker.handle_error_code(&err.error_code());
                    if err.error_code().is_retryable() {
                        metrics::circuit_breaker_failure(state.stream_id.as_str());
                    }
                }
                fallback(state, record.segment);
            }
        }
        ServerEvent::Backpressure(payload) => {
            let severity = match payload.severity {
                BackpressureSeverity::Low => backpressure::Severity::Low,
                BackpressureSeverity::Medium => backpressure::Severity::Medium,
                BackpressureSeverity::High => backpressure::Severity::High,
            };
            let action = match payload.action {
                BackpressureAction::None => backpressure::Action::None,
                BackpressureAction::SlowDown => backpressure::Action::SlowDown,
                BackpressureAction::Pause => backpressure::Action::Pause,
            };
            metrics::backpressure_event(
                state.stream_id.as_str(),
                match payload.action {
                    BackpressureAction::None => "none",
                    BackpressureAction::SlowDown => "slow_down",
                    BackpressureAction::Pause => "pause",
                },
            );
            state
                .backpressure
                .on_signal(severity, action, Some(Duration::from_millis(payload.recommended_delay_ms)));
        }
        ServerEvent::Error { code, message, retryable: _ } => {
            tracing::warn!(code, message, "STS reported an error");
            state.breaker.handle_error_code(&StsErrorCode(code));
            metrics::error(state.stream_id.as_str(), "sts");
        }
    }
}

async fn reap_expired_fragments(state: &mut RunState) {
    for fragment_id in state.tracker.expired(state.config.timeouts.fragment) {
        if let Some(record) = state.tracker.complete(fragment_id) {
            tracing::warn!(%fragment_id, "fragment timed out, treating as retryable failure");
            state.breaker.handle_response(SendOutcome::Failure(true));
            metrics::circuit_breaker_failure(state.stream_id.as_str());
            metrics::error(state.stream_id.as_str(), "fragment_timeout");
            fallback(state, record.segment);
        }
    }
}

fn publish(state: &mut RunState, pair: SyncPair) {
    if state.breaker.state() == BreakerState::Open {
        tracing::debug!(batch_number = pair.batch_number, "publishing pair while breaker open");
    }
    if let Err(err) = state.output.push(pair) {
        tracing::warn!(error = %err, "failed to enqueue pair for output");
        metrics::error(state.stream_id.as_str(), "output");
    }
}

/// End-of-stream: flush every pure state machine, drain in-flight
/// fragments to fallback, publish whatever's left, then tear pipelines
/// down (§4.10).
async fn flush_and_stop(state: &mut RunState) {
    if let Some(emission) = state.video_buffer.flush() {
        let segment = VideoSegment {
            fragment_id: Uuid::new_v4(),
            stream_id: state.stream_id.clone(),
            batch_number: emission.batch_number,
            start_pts: emission.start_pts,
            duration: emission.duration,
            payload: emission.payload,
            file_path: None,
            size_bytes: 0,
        };
        if let Ok(segment) = state.writer.write_video_muxed(segment) {
            if let Some(pair) = state.sync.push_video(segment) {
                publish(state, pair);
            }
        }
    }

    let audio_flush = if let Some(vad) = state.vad.as_mut() {
        vad.flush()
    } else {
        state.audio_buffer.flush()
    };
    if let Some(emission) = audio_flush {
        let _ = handle_audio_emission(state, emission.batch_number, emission.start_pts, emission.duration, emission.payload);
    }

    // Stream is ending: fall back any fragment still waiting on
    // backpressure rather than dispatch it to STS.
    while let Some(segment) = state.pending_sends.pop_front() {
        fallback(state, segment);
    }

    for record in state.tracker.clear() {
        fallback(state, record.segment);
    }

    let original_audio = std::mem::take(&mut state.original_audio);
    let stream_id = state.stream_id.clone();
    let pairs = state.sync.flush_with_fallback(|video| {
        original_audio
            .get(&video.batch_number)
            .cloned()
            .unwrap_or_else(|| empty_fallback_audio(&stream_id, video))
    });
    for pair in pairs {
        publish(state, pair);
    }

    state.output.finish();
    state.ingest.stop();
    state.output.stop();
    let _ = state.sts.end_stream().await;
    state.sts.disconnect().await;
}

fn empty_fallback_audio(stream_id: &StreamId, video: &VideoSegment) -> AudioSegment {
    AudioSegment {
        fragment_id: Uuid::new_v4(),
        stream_id: stream_id.clone(),
        batch_number: video.batch_number,
        start_pts: video.start_pts,
        duration: video.duration,
        trigger: crate::types::EmissionTrigger::Eos,
        payload: Bytes::new(),
        file_path: None,
        size_bytes: 0,
        is_dubbed: false,
        dubbed_payload: None,
        dubbed_file_path: None,
    }
}
