//! Integration-level coverage for the Testable Properties scenarios
//! (spec §8 A-F), driven against the pure state machines directly: no
//! subprocess, socket, or filesystem I/O is involved, so these exercise
//! exactly the decision logic the scenarios describe.

use std::time::Duration;

use bytes::Bytes;
use dubbing_worker::backpressure::{Action, BackpressureHandler, Severity};
use dubbing_worker::breaker::{BreakerState, CircuitBreaker, SendOutcome};
use dubbing_worker::config::AvSyncConfig;
use dubbing_worker::segment_buffer::SegmentBuffer;
use dubbing_worker::sync::AvSyncManager;
use dubbing_worker::types::{AudioSegment, BatchNumber, EmissionTrigger, FramePayload, StreamId, VideoSegment};
use uuid::Uuid;

fn stream_id() -> StreamId {
    StreamId::new("scenario-stream").unwrap()
}

fn video_frame(pts_ms: u64, duration_ms: u64, byte: u8) -> FramePayload {
    FramePayload {
        data: Bytes::from(vec![byte; 4]),
        pts: Duration::from_millis(pts_ms),
        duration: Duration::from_millis(duration_ms),
    }
}

fn video_segment(batch_number: BatchNumber, start_ms: u64) -> VideoSegment {
    VideoSegment {
        fragment_id: Uuid::new_v4(),
        stream_id: stream_id(),
        batch_number,
        start_pts: Duration::from_millis(start_ms),
        duration: Duration::from_secs(30),
        payload: Bytes::from_static(b"video"),
        file_path: None,
        size_bytes: 5,
    }
}

fn dubbed_audio(batch_number: BatchNumber, start_ms: u64) -> AudioSegment {
    AudioSegment {
        fragment_id: Uuid::new_v4(),
        stream_id: stream_id(),
        batch_number,
        start_pts: Duration::from_millis(start_ms),
        duration: Duration::from_secs(30),
        trigger: EmissionTrigger::Duration,
        payload: Bytes::from_static(b"orig"),
        file_path: None,
        size_bytes: 4,
        is_dubbed: true,
        dubbed_payload: Some(Bytes::from_static(b"dubbed")),
        dubbed_file_path: None,
    }
}

fn original_audio(batch_number: BatchNumber, start_ms: u64) -> AudioSegment {
    let mut seg = dubbed_audio(batch_number, start_ms);
    seg.is_dubbed = false;
    seg.dubbed_payload = None;
    seg
}

fn sync_config() -> AvSyncConfig {
    AvSyncConfig {
        av_offset: Duration::from_secs(6),
        drift_threshold: Duration::from_millis(120),
        slew_rate: Duration::from_millis(10),
        max_buffer_size: 16,
    }
}

/// Scenario A: 60s stream, 30s segment target, no failures. Two segments
/// are produced and both pair cleanly with dubbed audio.
#[test]
fn scenario_a_happy_path_two_segments() {
    let mut video_buf = SegmentBuffer::new(Duration::from_secs(30), Duration::from_secs(1));
    let mut emissions = Vec::new();
    for i in 0..30 {
        if let Some(emission) = video_buf.push(video_frame(i * 1_000, 1_000, i as u8)) {
            emissions.push(emission);
        }
    }
    for i in 30..60 {
        if let Some(emission) = video_buf.push(video_frame(i * 1_000, 1_000, i as u8)) {
            emissions.push(emission);
        }
    }
    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[0].batch_number, 0);
    assert_eq!(emissions[1].batch_number, 1);

    let mut sync = AvSyncManager::new(sync_config());
    let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));
    let mut pairs = Vec::new();
    for emission in &emissions {
        let video = video_segment(emission.batch_number, emission.start_pts.as_millis() as u64);
        let audio = dubbed_audio(emission.batch_number, emission.start_pts.as_millis() as u64);
        breaker.handle_response(SendOutcome::Success);
        assert!(sync.push_video(video).is_none());
        pairs.push(sync.push_audio(audio).unwrap());
    }
    assert_eq!(pairs.len(), 2);
    assert!(pairs.iter().all(|p| p.audio.is_dubbed));
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(sync.corrections_total(), 0);
}

/// Scenario B: STS returns a retryable TIMEOUT failure for the first
/// fragment only. Segment 1 falls back to original audio; segment 2 is
/// dubbed normally.
#[test]
fn scenario_b_single_transient_failure_falls_back_once() {
    let mut sync = AvSyncManager::new(sync_config());
    let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));

    // Fragment 1: STS times out (retryable). Breaker counts one failure,
    // worker pairs with fallback original audio.
    breaker.handle_response(SendOutcome::Failure(true));
    sync.push_video(video_segment(0, 0));
    let pair1 = sync.push_audio(original_audio(0, 0)).unwrap();

    // Fragment 2: STS succeeds.
    breaker.handle_response(SendOutcome::Success);
    sync.push_video(video_segment(1, 30_000));
    let pair2 = sync.push_audio(dubbed_audio(1, 30_000)).unwrap();

    assert_eq!(breaker.fallback_count(), 0);
    assert!(!pair1.audio.is_dubbed);
    assert!(pair2.audio.is_dubbed);
    assert_eq!(breaker.state(), BreakerState::Closed);
}

/// Scenario C: 5 consecutive retryable TIMEOUTs open the breaker;
/// subsequent sends (6..10) are denied outright and counted as fallbacks.
/// After cooldown elapses, the next send attempt transitions to
/// half_open, and a success closes it with the failure count reset.
#[test]
fn scenario_c_breaker_opens_then_recovers_after_cooldown() {
    let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));
    for _ in 0..5 {
        breaker.handle_response(SendOutcome::Failure(true));
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    for _ in 0..5 {
        assert!(!breaker.should_allow_request());
    }
    assert_eq!(breaker.fallback_count(), 5);

    let mut recovered = CircuitBreaker::new(5, Duration::from_millis(0));
    for _ in 0..5 {
        recovered.handle_response(SendOutcome::Failure(true));
    }
    assert!(recovered.should_allow_request());
    assert_eq!(recovered.state(), BreakerState::HalfOpen);
    recovered.handle_response(SendOutcome::Success);
    assert_eq!(recovered.state(), BreakerState::Closed);
}

/// Scenario D: a high-severity pause backpressure signal blocks sends
/// until either a clearing signal arrives or the pause cap (here 0, for a
/// deterministic test) elapses, at which point the caller is told to fall
/// back rather than wait indefinitely.
#[test]
fn scenario_d_pause_beyond_cap_signals_fallback() {
    let mut handler = BackpressureHandler::new(Duration::from_millis(0));
    handler.on_signal(Severity::High, Action::Pause, None);
    assert!(handler.is_active());
    std::thread::sleep(Duration::from_millis(2));
    assert_eq!(handler.wait_duration(), None);
    assert!(!handler.is_active());
}

/// Scenario D (continued): a low-severity "none" signal within the pause
/// window clears backpressure and sends proceed immediately.
#[test]
fn scenario_d_clearing_signal_resumes_sends() {
    let mut handler = BackpressureHandler::new(Duration::from_secs(30));
    handler.on_signal(Severity::High, Action::Pause, None);
    assert!(handler.is_active());
    handler.on_signal(Severity::Low, Action::None, None);
    assert!(!handler.is_active());
    assert_eq!(handler.wait_duration(), Some(Duration::ZERO));
}

/// Scenario E: a 200ms drift introduced on the second pair is corrected
/// by exactly one slew step (10ms by default), applied starting with the
/// *third* pair rather than jumped into the pair that triggered it (§4.8).
#[test]
fn scenario_e_drift_correction_applies_single_slew_step() {
    let mut sync = AvSyncManager::new(sync_config());

    sync.push_video(video_segment(0, 0));
    sync.push_audio(dubbed_audio(0, 0));
    assert_eq!(sync.corrections_total(), 0);

    sync.push_video(video_segment(1, 30_000));
    let pair2 = sync.push_audio(dubbed_audio(1, 30_000 - 200)).unwrap();
    assert_eq!(sync.corrections_total(), 1);
    assert_eq!(pair2.output_pts, Duration::from_secs(6) + Duration::from_millis(30_000));

    sync.push_video(video_segment(2, 60_000));
    let pair3 = sync.push_audio(dubbed_audio(2, 60_000)).unwrap();
    assert_eq!(sync.corrections_total(), 1);
    assert_eq!(pair3.output_pts, Duration::from_secs(6) + Duration::from_millis(60_000 + 10));
}

/// Scenario F: at end-of-stream, 4 buffered video segments with dubbed
/// audio available for batches 0 and 2 flush into 4 pairs in batch order,
/// batches 1 and 3 using the fallback original.
#[test]
fn scenario_f_end_of_stream_flush_mixes_dubbed_and_fallback() {
    let mut sync = AvSyncManager::new(sync_config());

    for batch in 0..4 {
        sync.push_video(video_segment(batch, batch * 30_000));
    }
    sync.push_audio(dubbed_audio(0, 0));
    sync.push_audio(dubbed_audio(2, 60_000));

    let originals = [original_audio(1, 30_000), original_audio(3, 90_000)];
    let pairs = sync.flush_with_fallback(|video| {
        originals
            .iter()
            .find(|a| a.batch_number == video.batch_number)
            .cloned()
            .unwrap_or_else(|| original_audio(video.batch_number, video.start_pts.as_millis() as u64))
    });

    assert_eq!(pairs.len(), 4);
    for (i, pair) in pairs.iter().enumerate() {
        assert_eq!(pair.batch_number, i as BatchNumber);
    }
    assert!(pairs[0].audio.is_dubbed);
    assert!(!pairs[1].audio.is_dubbed);
    assert!(pairs[2].audio.is_dubbed);
    assert!(!pairs[3].audio.is_dubbed);
}
