//! A/V Sync Manager (§4.8): buffers video, pairs each video segment with
//! its corresponding audio (dubbed or fallback) by batch number, applies a
//! fixed PTS offset and slew-based drift correction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::AvSyncConfig;
use crate::types::{AudioSegment, BatchNumber, SyncPair, VideoSegment};

fn signed_nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}

pub struct AvSyncManager {
    av_offset: Duration,
    drift_threshold: Duration,
    slew_rate: Duration,
    max_buffer_size: usize,

    video_buffer: VecDeque<VideoSegment>,
    audio_buffer: HashMap<BatchNumber, AudioSegment>,

    offset_adjustment_ns: i64,
    last_delta_ns: Option<i64>,
    pairs_created: u64,
    corrections: u64,
}

impl AvSyncManager {
    pub fn new(config: AvSyncConfig) -> Self {
        Self {
            av_offset: config.av_offset,
            drift_threshold: config.drift_threshold,
            slew_rate: config.slew_rate,
            max_buffer_size: config.max_buffer_size,
            video_buffer: VecDeque::new(),
            audio_buffer: HashMap::new(),
            offset_adjustment_ns: 0,
            last_delta_ns: None,
            pairs_created: 0,
            corrections: 0,
        }
    }

    pub fn video_buffer_size(&self) -> usize {
        self.video_buffer.len()
    }

    pub fn audio_buffer_size(&self) -> usize {
        self.audio_buffer.len()
    }

    pub fn sync_delta_ms(&self) -> f64 {
        self.last_delta_ns.unwrap_or(0) as f64 / 1_000_000.0
    }

    pub fn corrections_total(&self) -> u64 {
        self.corrections
    }

    /// Pairs `video` with a buffered audio segment for the same batch
    /// number, or buffers it (dropping the oldest with a warning if the
    /// buffer is at capacity).
    pub fn push_video(&mut self, video: VideoSegment) -> Option<SyncPair> {
        if let Some(audio) = self.audio_buffer.remove(&video.batch_number) {
            return Some(self.create_pair(video, audio));
        }
        if self.video_buffer.len() >= self.max_buffer_size {
            if let Some(dropped) = self.video_buffer.pop_front() {
                tracing::warn!(batch_number = dropped.batch_number, "dropping oldest buffered video segment, sync buffer at capacity");
            }
        }
        self.video_buffer.push_back(video);
        None
    }

    /// Symmetric with `push_video`.
    pub fn push_audio(&mut self, audio: AudioSegment) -> Option<SyncPair> {
        if let Some(pos) = self
            .video_buffer
            .iter()
            .position(|v| v.batch_number == audio.batch_number)
        {
            let video = self.video_buffer.remove(pos).expect("position just found");
            return Some(self.create_pair(video, audio));
        }
        if self.audio_buffer.len() >= self.max_buffer_size {
            if let Some(&oldest) = self.audio_buffer.keys().min() {
                tracing::warn!(batch_number = oldest, "dropping oldest buffered audio segment, sync buffer at capacity");
                self.audio_buffer.remove(&oldest);
            }
        }
        self.audio_buffer.insert(audio.batch_number, audio);
        None
    }

    /// Bulk-pairs everything currently pairable. Idempotent: a second call
    /// with no new pushes returns an empty vec.
    pub fn get_ready_pairs(&mut self) -> Vec<SyncPair> {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < self.video_buffer.len() {
            let batch_number = self.video_buffer[i].batch_number;
            if let Some(audio) = self.audio_buffer.remove(&batch_number) {
                let video = self.video_buffer.remove(i).expect("index in bounds");
                pairs.push(self.create_pair(video, audio));
            } else {
                i += 1;
            }
        }
        pairs
    }

    /// At stream end (or while the breaker is open): pair every buffered
    /// video with either a buffered dubbed audio or an on-demand fallback
    /// built by `fetch_original`.
    pub fn flush_with_fallback(
        &mut self,
        mut fetch_original: impl FnMut(&VideoSegment) -> AudioSegment,
    ) -> Vec<SyncPair> {
        let mut pairs = Vec::new();
        while let Some(video) = self.video_buffer.pop_front() {
            let audio = self
                .audio_buffer
                .remove(&video.batch_number)
                .unwrap_or_else(|| fetch_original(&video));
            pairs.push(self.create_pair(video, audio));
        }
        pairs
    }

    /// Clears buffers and drift state. Does not reset the configured PTS
    /// offset.
    pub fn reset(&mut self) {
        self.video_buffer.clear();
        self.audio_buffer.clear();
        self.offset_adjustment_ns = 0;
        self.last_delta_ns = None;
        self.pairs_created = 0;
        self.corrections = 0;
    }

    fn current_offset_ns(&self) -> i64 {
        signed_nanos(self.av_offset) + self.offset_adjustment_ns
    }

    fn create_pair(&mut self, video: VideoSegment, audio: AudioSegment) -> SyncPair {
        let delta_ns = signed_nanos(video.start_pts) - signed_nanos(audio.start_pts);

        // This pair's PTS uses the offset as it stood before this delta is
        // folded in; any correction triggered by this pair's own drift lands
        // on the *next* pair (§4.8), not this one.
        let output_pts_ns = signed_nanos(video.start_pts) + self.current_offset_ns();

        // First pair uses the configured base offset as-is (Open Question 4).
        if self.pairs_created > 0 {
            let needs_correction = delta_ns.unsigned_abs() as u128 > self.drift_threshold.as_nanos();
            if needs_correction {
                let slew_ns = signed_nanos(self.slew_rate);
                let amount = delta_ns.clamp(-slew_ns, slew_ns);
                self.offset_adjustment_ns += amount;
                self.corrections += 1;
            }
        }
        self.last_delta_ns = Some(delta_ns);
        self.pairs_created += 1;

        let batch_number = video.batch_number;
        SyncPair {
            batch_number,
            video,
            audio,
            output_pts: Duration::from_nanos(output_pts_ns.max(0) as u64),
        }
    }

    /// Applies an explicit slew correction, clamped to `[-slew_rate,
    /// +slew_rate]`.
    pub fn apply_slew_correction(&mut self, amount: i64) {
        let slew_ns = signed_nanos(self.slew_rate);
        let clamped = amount.clamp(-slew_ns, slew_ns);
        self.offset_adjustment_ns += clamped;
        self.corrections += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmissionTrigger, StreamId};
    use bytes::Bytes;

    fn video(batch: BatchNumber, pts_ms: u64) -> VideoSegment {
        VideoSegment {
            fragment_id: uuid::Uuid::new_v4(),
            stream_id: StreamId::new("s").unwrap(),
            batch_number: batch,
            start_pts: Duration::from_millis(pts_ms),
            duration: Duration::from_secs(1),
            payload: Bytes::new(),
            file_path: None,
            size_bytes: 0,
        }
    }

    fn audio(batch: BatchNumber, pts_ms: u64) -> AudioSegment {
        AudioSegment {
            fragment_id: uuid::Uuid::new_v4(),
            stream_id: StreamId::new("s").unwrap(),
            batch_number: batch,
            start_pts: Duration::from_millis(pts_ms),
            duration: Duration::from_secs(1),
            trigger: EmissionTrigger::Duration,
            payload: Bytes::new(),
            file_path: None,
            size_bytes: 0,
            is_dubbed: true,
            dubbed_payload: None,
            dubbed_file_path: None,
        }
    }

    fn config() -> AvSyncConfig {
        AvSyncConfig {
            av_offset: Duration::from_secs(6),
            drift_threshold: Duration::from_millis(120),
            slew_rate: Duration::from_millis(10),
            max_buffer_size: 10,
        }
    }

    #[test]
    fn pairing_is_commutative() {
        let mut m1 = AvSyncManager::new(config());
        assert!(m1.push_video(video(0, 0)).is_none());
        let p1 = m1.push_audio(audio(0, 0)).unwrap();

        let mut m2 = AvSyncManager::new(config());
        assert!(m2.push_audio(audio(0, 0)).is_none());
        let p2 = m2.push_video(video(0, 0)).unwrap();

        assert_eq!(p1.batch_number, p2.batch_number);
        assert_eq!(p1.output_pts, p2.output_pts);
    }

    #[test]
    fn first_pair_uses_base_offset_unmodified() {
        let mut mgr = AvSyncManager::new(config());
        mgr.push_video(video(0, 500));
        let pair = mgr.push_audio(audio(0, 500)).unwrap();
        assert_eq!(pair.output_pts, Duration::from_millis(6_500));
        assert_eq!(mgr.corrections_total(), 0);
    }

    #[test]
    fn drift_beyond_threshold_applies_single_slew_step_to_next_pair() {
        let mut mgr = AvSyncManager::new(config());
        // Pair 1: establish baseline, no drift.
        mgr.push_video(video(0, 0));
        mgr.push_audio(audio(0, 0));

        // Pair 2: introduce a 200ms drift. The correction this triggers is
        // recorded, but pair 2's own PTS still uses the pre-correction
        // offset (§4.8: the correction lands on the *next* pair).
        mgr.push_video(video(1, 1_000));
        let pair2 = mgr.push_audio(audio(1, 800)).unwrap();
        assert_eq!(mgr.corrections_total(), 1);
        assert_eq!(pair2.output_pts, Duration::from_secs(6) + Duration::from_millis(1_000));

        // Pair 3: no new drift, but the offset now carries the single
        // slew step (10ms) from pair 2's correction.
        mgr.push_video(video(2, 2_000));
        let pair3 = mgr.push_audio(audio(2, 2_000)).unwrap();
        assert_eq!(mgr.corrections_total(), 1);
        assert_eq!(pair3.output_pts, Duration::from_secs(6) + Duration::from_millis(2_000 + 10));
    }

    #[test]
    fn flush_with_fallback_pairs_every_buffered_video() {
        let mut mgr = AvSyncManager::new(config());
        mgr.push_video(video(0, 0));
        mgr.push_video(video(1, 1_000));
        mgr.push_audio(audio(0, 0)); // pairs immediately, leaving batch 1 unpaired.

        let pairs = mgr.flush_with_fallback(|v| {
            audio(v.batch_number, v.start_pts.as_millis() as u64).as_fallback()
        });
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].batch_number, 1);
        assert!(!pairs[0].audio.is_dubbed);
    }

    #[test]
    fn buffer_capacity_drops_oldest_video() {
        let mut mgr = AvSyncManager::new(AvSyncConfig {
            max_buffer_size: 2,
            ..config()
        });
        mgr.push_video(video(0, 0));
        mgr.push_video(video(1, 100));
        mgr.push_video(video(2, 200));
        assert_eq!(mgr.video_buffer_size(), 2);
    }
}
