//! Circuit Breaker (§4.6): fails fast when the STS link is unhealthy,
//! classifying STS error codes into retryable and non-retryable per the
//! table in §4.6, and driving fallback-to-original-audio decisions.

use std::time::{Duration, Instant};

use crate::error::StsErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    /// Numeric gauge value for `circuit_breaker_state` (§6.4).
    pub fn as_gauge_value(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }
}

pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    failure_threshold: u32,
    cooldown: Duration,
    last_failure_at: Option<Instant>,
    fallback_count: u64,
}

/// Outcome of a send attempt, fed back via `handle_response`.
#[derive(Debug, Clone, Copy)]
pub enum SendOutcome {
    Success,
    Failure(bool),
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            failure_threshold,
            cooldown,
            last_failure_at: None,
            fallback_count: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallback_count
    }

    /// Transitions `open` -> `half_open` once the cooldown has elapsed,
    /// then reports whether a request may proceed. A denied request in the
    /// `open` state increments the fallback counter.
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    self.fallback_count += 1;
                    false
                }
            }
        }
    }

    /// Records the outcome of a send that was allowed through. `Failure`
    /// carries whether the underlying error code is retryable; per
    /// testable property 5, non-retryable failures never increment the
    /// failure counter or change `closed` state.
    pub fn handle_response(&mut self, outcome: SendOutcome) {
        match (self.state, outcome) {
            (_, SendOutcome::Success) => {
                self.failure_count = 0;
                self.state = BreakerState::Closed;
            }
            (BreakerState::Closed, SendOutcome::Failure(retryable)) => {
                if retryable {
                    self.failure_count += 1;
                    if self.failure_count >= self.failure_threshold {
                        self.state = BreakerState::Open;
                        self.last_failure_at = Some(Instant::now());
                    }
                }
                // non-retryable: closed, counter untouched.
            }
            (BreakerState::HalfOpen, SendOutcome::Failure(_)) => {
                self.state = BreakerState::Open;
                self.last_failure_at = Some(Instant::now());
            }
            (BreakerState::Open, SendOutcome::Failure(_)) => {
                self.last_failure_at = Some(Instant::now());
            }
        }
    }

    pub fn handle_error_code(&mut self, code: &StsErrorCode) {
        self.handle_response(SendOutcome::Failure(code.is_retryable()));
    }

    /// Runs `send_func` if the breaker allows it; returns `None` if the
    /// caller should fall back to original audio without attempting a send.
    pub fn execute_with_fallback<T>(&mut self, send_func: impl FnOnce() -> (T, SendOutcome)) -> Option<T> {
        if !self.should_allow_request() {
            return None;
        }
        let (result, outcome) = send_func();
        self.handle_response(outcome);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_failure_never_counts() {
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..20 {
            breaker.handle_response(SendOutcome::Failure(false));
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_threshold_retryable_failures() {
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..4 {
            breaker.handle_response(SendOutcome::Failure(true));
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.handle_response(SendOutcome::Failure(true));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn denied_requests_while_open_increment_fallback_counter() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.handle_response(SendOutcome::Failure(true));
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.should_allow_request());
        assert!(!breaker.should_allow_request());
        assert_eq!(breaker.fallback_count(), 2);
    }

    #[test]
    fn half_open_success_closes_and_resets_counter() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.handle_response(SendOutcome::Failure(true));
        assert!(breaker.should_allow_request());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.handle_response(SendOutcome::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.handle_response(SendOutcome::Failure(true));
        assert!(breaker.should_allow_request());
        breaker.handle_response(SendOutcome::Failure(true));
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
