//! VAD Audio Segmenter (§4.3): silence-boundary segmentation, an
//! alternative audio path to the duration-based `SegmentBuffer`.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::config::VadConfig;
use crate::error::MalfunctionError;
use crate::types::{BatchNumber, EmissionTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    InSilence,
}

#[derive(Debug, Clone)]
pub struct Emission {
    pub batch_number: BatchNumber,
    pub start_pts: Duration,
    pub duration: Duration,
    pub payload: Bytes,
    pub trigger: EmissionTrigger,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VadStats {
    pub silence_detections: u64,
    pub forced_emissions: u64,
    pub min_duration_violations: u64,
    pub memory_limit_emissions: u64,
}

pub struct VadAudioSegmenter {
    config: VadConfig,
    state: State,
    accumulator: BytesMut,
    start_pts: Duration,
    duration: Duration,
    silence_start: Option<Duration>,
    last_level_time: Option<Duration>,
    consecutive_invalid_rms: u32,
    level_message_count: u64,
    next_batch_number: BatchNumber,
    stats: VadStats,
}

impl VadAudioSegmenter {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: State::Accumulating,
            accumulator: BytesMut::new(),
            start_pts: Duration::ZERO,
            duration: Duration::ZERO,
            silence_start: None,
            last_level_time: None,
            consecutive_invalid_rms: 0,
            level_message_count: 0,
            next_batch_number: 0,
            stats: VadStats::default(),
        }
    }

    pub fn stats(&self) -> VadStats {
        self.stats
    }

    /// Accumulates one audio buffer; may force an emission on memory or max
    /// duration limits.
    pub fn on_audio_buffer(&mut self, data: &[u8], pts: Duration, duration: Duration) -> Option<Emission> {
        if self.accumulator.is_empty() {
            self.start_pts = pts;
        }
        self.accumulator.extend_from_slice(data);
        self.duration += duration;

        if self.accumulator.len() >= self.config.memory_limit_bytes {
            self.stats.memory_limit_emissions += 1;
            return Some(self.emit(EmissionTrigger::MemoryLimit));
        }
        if self.duration >= self.config.max_segment_duration {
            self.stats.forced_emissions += 1;
            return Some(self.emit(EmissionTrigger::MaxDuration));
        }
        None
    }

    /// Processes one RMS level sample; may trigger a silence-boundary
    /// emission. Returns `Err` on pipeline malfunction (10 consecutive
    /// invalid samples).
    pub fn on_level_message(
        &mut self,
        rms_db: f64,
        timestamp: Duration,
    ) -> Result<Option<Emission>, MalfunctionError> {
        self.last_level_time = Some(timestamp);

        if !(-100.0..=0.0).contains(&rms_db) {
            self.consecutive_invalid_rms += 1;
            if self.consecutive_invalid_rms >= 10 {
                return Err(MalfunctionError::InvalidRmsStreak(self.consecutive_invalid_rms));
            }
            return Ok(None);
        }
        self.consecutive_invalid_rms = 0;
        self.level_message_count += 1;

        let is_silence = rms_db < self.config.silence_threshold_db;
        if is_silence {
            Ok(self.handle_silence(timestamp))
        } else {
            self.handle_speech();
            Ok(None)
        }
    }

    /// Watchdog for a stalled level-message stream; call periodically from
    /// the ingest run loop.
    pub fn check_level_timeout(&self, now: Duration) -> Result<(), MalfunctionError> {
        const TIMEOUT: Duration = Duration::from_secs(5);
        if let Some(last) = self.last_level_time {
            if now.saturating_sub(last) > TIMEOUT {
                return Err(MalfunctionError::LevelMessageTimeout(TIMEOUT));
            }
        }
        Ok(())
    }

    fn handle_silence(&mut self, timestamp: Duration) -> Option<Emission> {
        match self.state {
            State::Accumulating => {
                self.state = State::InSilence;
                self.silence_start = Some(timestamp);
                None
            }
            State::InSilence => {
                let silence_start = self.silence_start?;
                let silence_duration = timestamp.saturating_sub(silence_start);
                if silence_duration >= self.config.silence_duration {
                    if self.duration >= self.config.min_segment_duration {
                        self.stats.silence_detections += 1;
                        Some(self.emit(EmissionTrigger::Silence))
                    } else {
                        self.stats.min_duration_violations += 1;
                        None
                    }
                } else {
                    None
                }
            }
        }
    }

    fn handle_speech(&mut self) {
        if self.state == State::InSilence {
            self.state = State::Accumulating;
            self.silence_start = None;
        }
    }

    fn emit(&mut self, trigger: EmissionTrigger) -> Emission {
        let batch_number = self.next_batch_number;
        self.next_batch_number += 1;
        let emission = Emission {
            batch_number,
            start_pts: self.start_pts,
            duration: self.duration,
            payload: self.accumulator.split().freeze(),
            trigger,
        };
        self.reset_accumulator();
        emission
    }

    fn reset_accumulator(&mut self) {
        self.accumulator.clear();
        self.start_pts = Duration::ZERO;
        self.duration = Duration::ZERO;
        self.state = State::Accumulating;
        self.silence_start = None;
    }

    /// Flushes remaining audio on end-of-stream; emits if accumulated
    /// duration meets the minimum, otherwise discards.
    pub fn flush(&mut self) -> Option<Emission> {
        if self.accumulator.is_empty() {
            return None;
        }
        if self.duration >= self.config.min_segment_duration {
            Some(self.emit(EmissionTrigger::Eos))
        } else {
            self.reset_accumulator();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VadConfig {
        VadConfig {
            enabled: true,
            silence_threshold_db: -40.0,
            silence_duration: Duration::from_millis(500),
            min_segment_duration: Duration::from_secs(1),
            max_segment_duration: Duration::from_secs(10),
            level_interval: Duration::from_millis(100),
            memory_limit_bytes: 1024,
        }
    }

    #[test]
    fn ten_consecutive_invalid_rms_is_fatal() {
        let mut vad = VadAudioSegmenter::new(config());
        for i in 0..9 {
            assert!(vad
                .on_level_message(5.0, Duration::from_millis(i * 100))
                .unwrap()
                .is_none());
        }
        let err = vad.on_level_message(5.0, Duration::from_millis(900)).unwrap_err();
        assert!(matches!(err, MalfunctionError::InvalidRmsStreak(10)));
    }

    #[test]
    fn silence_boundary_respects_min_duration() {
        let mut vad = VadAudioSegmenter::new(config());
        vad.on_audio_buffer(&[0u8; 16], Duration::ZERO, Duration::from_millis(600));
        vad.on_level_message(-50.0, Duration::from_millis(600)).unwrap();
        let emitted = vad
            .on_level_message(-50.0, Duration::from_millis(1_200))
            .unwrap();
        assert!(emitted.is_none(), "below min_segment_duration must not emit");
        assert_eq!(vad.stats().min_duration_violations, 1);
    }

    #[test]
    fn silence_boundary_emits_once_min_duration_satisfied() {
        let mut vad = VadAudioSegmenter::new(config());
        vad.on_audio_buffer(&[0u8; 16], Duration::ZERO, Duration::from_millis(1_500));
        vad.on_level_message(-50.0, Duration::from_millis(1_500)).unwrap();
        let emitted = vad
            .on_level_message(-50.0, Duration::from_millis(2_100))
            .unwrap();
        assert!(emitted.is_some());
        assert_eq!(vad.stats().silence_detections, 1);
    }

    #[test]
    fn max_duration_forces_emission_regardless_of_silence() {
        let mut vad = VadAudioSegmenter::new(config());
        let emitted = vad.on_audio_buffer(&[0u8; 4], Duration::ZERO, Duration::from_secs(11));
        assert!(emitted.is_some());
        assert_eq!(vad.stats().forced_emissions, 1);
    }
}
