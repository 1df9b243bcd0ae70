//! Fragment Tracker (§4.6): in-flight fragment bookkeeping with a cap and
//! per-fragment timeout scheduling left to the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::TrackerError;
use crate::types::AudioSegment;

#[derive(Debug, Clone)]
pub struct InFlightRecord {
    pub fragment_id: Uuid,
    pub segment: AudioSegment,
    pub sent_at: Instant,
    pub sequence_number: u64,
}

impl InFlightRecord {
    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

pub struct FragmentTracker {
    max_inflight: usize,
    inflight: HashMap<Uuid, InFlightRecord>,
}

impl FragmentTracker {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            max_inflight,
            inflight: HashMap::new(),
        }
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.inflight.len() >= self.max_inflight
    }

    /// Inserts a new in-flight record. The caller is responsible for
    /// scheduling the fragment's timeout task.
    pub fn track(
        &mut self,
        fragment_id: Uuid,
        segment: AudioSegment,
        sequence_number: u64,
    ) -> Result<(), TrackerError> {
        if self.is_at_capacity() {
            return Err(TrackerError::AtCapacity {
                max_inflight: self.max_inflight,
            });
        }
        if self.inflight.contains_key(&fragment_id) {
            return Err(TrackerError::DuplicateFragment(fragment_id));
        }
        self.inflight.insert(
            fragment_id,
            InFlightRecord {
                fragment_id,
                segment,
                sent_at: Instant::now(),
                sequence_number,
            },
        );
        Ok(())
    }

    /// Removes and returns the record for `fragment_id`. An unknown id
    /// returns `None`; callers should log this at `warn` level (§4.6).
    pub fn complete(&mut self, fragment_id: Uuid) -> Option<InFlightRecord> {
        self.inflight.remove(&fragment_id)
    }

    /// Cancels all pending timeouts by dropping every in-flight record
    /// (used at stream end).
    pub fn clear(&mut self) -> Vec<InFlightRecord> {
        self.inflight.drain().map(|(_, record)| record).collect()
    }

    /// Fragment ids whose in-flight duration has reached `timeout`. The
    /// caller is expected to `complete` each one and treat it as a
    /// retryable failure (§4.10).
    pub fn expired(&self, timeout: Duration) -> Vec<Uuid> {
        self.inflight
            .values()
            .filter(|record| record.elapsed() >= timeout)
            .map(|record| record.fragment_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmissionTrigger, StreamId};
    use bytes::Bytes;
    use std::time::Duration as StdDuration;

    fn segment() -> AudioSegment {
        AudioSegment {
            fragment_id: Uuid::new_v4(),
            stream_id: StreamId::new("s1").unwrap(),
            batch_number: 0,
            start_pts: StdDuration::ZERO,
            duration: StdDuration::from_secs(1),
            trigger: EmissionTrigger::Duration,
            payload: Bytes::new(),
            file_path: None,
            size_bytes: 0,
            is_dubbed: false,
            dubbed_payload: None,
            dubbed_file_path: None,
        }
    }

    #[test]
    fn never_exceeds_max_inflight() {
        let mut tracker = FragmentTracker::new(2);
        tracker.track(Uuid::new_v4(), segment(), 0).unwrap();
        tracker.track(Uuid::new_v4(), segment(), 1).unwrap();
        let err = tracker.track(Uuid::new_v4(), segment(), 2).unwrap_err();
        assert!(matches!(err, TrackerError::AtCapacity { max_inflight: 2 }));
    }

    #[test]
    fn completing_unknown_fragment_returns_none() {
        let mut tracker = FragmentTracker::new(3);
        assert!(tracker.complete(Uuid::new_v4()).is_none());
    }

    #[test]
    fn clear_drains_all_inflight() {
        let mut tracker = FragmentTracker::new(3);
        tracker.track(Uuid::new_v4(), segment(), 0).unwrap();
        tracker.track(Uuid::new_v4(), segment(), 1).unwrap();
        assert_eq!(tracker.clear().len(), 2);
        assert_eq!(tracker.inflight_count(), 0);
    }

    #[test]
    fn expired_excludes_fresh_fragments() {
        let mut tracker = FragmentTracker::new(3);
        let id = Uuid::new_v4();
        tracker.track(id, segment(), 0).unwrap();
        assert!(tracker.expired(StdDuration::from_secs(8)).is_empty());
        assert_eq!(tracker.expired(StdDuration::from_secs(0)), vec![id]);
    }
}
