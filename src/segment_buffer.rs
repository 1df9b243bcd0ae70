//! Segment Buffer (§4.2): accumulates demuxed frames into target-duration
//! segments with sequential batch numbers, one instance per track.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::types::{BatchNumber, EmissionTrigger, FramePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Accumulating,
}

/// Output of one emission: a contiguous concatenation of demuxed frames in
/// original order, its start PTS, accumulated duration, and batch number.
#[derive(Debug, Clone)]
pub struct Emission {
    pub batch_number: BatchNumber,
    pub start_pts: Duration,
    pub duration: Duration,
    pub payload: Bytes,
    pub trigger: EmissionTrigger,
}

pub struct SegmentBuffer {
    target_duration: Duration,
    min_partial_duration: Duration,
    state: State,
    accumulator: BytesMut,
    start_pts: Duration,
    duration: Duration,
    next_batch_number: BatchNumber,
}

impl SegmentBuffer {
    pub fn new(target_duration: Duration, min_partial_duration: Duration) -> Self {
        Self {
            target_duration,
            min_partial_duration,
            state: State::Idle,
            accumulator: BytesMut::new(),
            start_pts: Duration::ZERO,
            duration: Duration::ZERO,
            next_batch_number: 0,
        }
    }

    /// Feeds one frame; returns an `Emission` when the accumulated duration
    /// reaches the target.
    pub fn push(&mut self, frame: FramePayload) -> Option<Emission> {
        if self.state == State::Idle {
            self.state = State::Accumulating;
            self.start_pts = frame.pts;
        }
        self.accumulator.extend_from_slice(&frame.data);
        self.duration += frame.duration;

        if self.duration >= self.target_duration {
            return Some(self.emit(EmissionTrigger::Duration));
        }
        None
    }

    /// End-of-stream flush: residual shorter than `min_partial_duration` is
    /// discarded; between min and target it is emitted as a partial
    /// segment.
    pub fn flush(&mut self) -> Option<Emission> {
        if self.state == State::Idle || self.accumulator.is_empty() {
            return None;
        }
        if self.duration >= self.min_partial_duration {
            Some(self.emit(EmissionTrigger::Eos))
        } else {
            self.reset();
            None
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
        self.reset();
        emission
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.accumulator.clear();
        self.start_pts = Duration::ZERO;
        self.duration = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &[u8], pts_ms: u64, duration_ms: u64) -> FramePayload {
        FramePayload {
            data: Bytes::copy_from_slice(data),
            pts: Duration::from_millis(pts_ms),
            duration: Duration::from_millis(duration_ms),
        }
    }

    #[test]
    fn emits_on_target_duration_with_sequential_batch_numbers() {
        let mut buf = SegmentBuffer::new(Duration::from_millis(100), Duration::from_millis(10));
        assert!(buf.push(frame(b"a", 0, 60)).is_none());
        let emission = buf.push(frame(b"b", 60, 60)).unwrap();
        assert_eq!(emission.batch_number, 0);
        assert_eq!(emission.payload.as_ref(), b"ab");
        assert_eq!(emission.start_pts, Duration::from_millis(0));

        assert!(buf.push(frame(b"c", 120, 60)).is_none());
        let emission2 = buf.push(frame(b"d", 180, 60)).unwrap();
        assert_eq!(emission2.batch_number, 1);
    }

    #[test]
    fn flush_discards_residual_below_min_partial() {
        let mut buf = SegmentBuffer::new(Duration::from_secs(30), Duration::from_secs(1));
        buf.push(frame(b"x", 0, 500));
        assert!(buf.flush().is_none());
    }

    #[test]
    fn flush_emits_partial_segment_between_min_and_target() {
        let mut buf = SegmentBuffer::new(Duration::from_secs(30), Duration::from_secs(1));
        buf.push(frame(b"x", 0, 2_000));
        let emission = buf.flush().unwrap();
        assert_eq!(emission.trigger, EmissionTrigger::Eos);
        assert_eq!(emission.duration, Duration::from_millis(2_000));
    }
}
