//! Backpressure Handler (§4.7): translates inbound STS backpressure
//! payloads into a per-worker send-side delay.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    SlowDown,
    Pause,
}

const DEFAULT_SLOW_DOWN_DELAY: Duration = Duration::from_millis(500);

pub struct BackpressureHandler {
    pause_cap: Duration,
    active: bool,
    severity: Severity,
    action: Action,
    paused_since: Option<Instant>,
    pending_delay: Option<Duration>,
}

impl BackpressureHandler {
    pub fn new(pause_cap: Duration) -> Self {
        Self {
            pause_cap,
            active: false,
            severity: Severity::None,
            action: Action::None,
            paused_since: None,
            pending_delay: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Applies a signal from the STS `backpressure` event.
    pub fn on_signal(&mut self, severity: Severity, action: Action, recommended_delay: Option<Duration>) {
        self.severity = severity;
        self.action = action;
        match action {
            Action::Pause => {
                self.active = true;
                if self.paused_since.is_none() {
                    self.paused_since = Some(Instant::now());
                }
            }
            Action::SlowDown => {
                self.active = true;
                self.paused_since = None;
                self.pending_delay = Some(recommended_delay.unwrap_or(DEFAULT_SLOW_DOWN_DELAY));
            }
            Action::None => {
                self.clear();
            }
        }
        if severity == Severity::Low && action == Action::None {
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.active = false;
        self.paused_since = None;
        self.pending_delay = None;
    }

    /// Computes how long the caller should wait before the next send.
    /// Returns `None` if the pause cap has been exceeded — in which case
    /// the worker falls back to original audio for the segment in hand
    /// (§4.7, §8 Scenario D).
    pub fn wait_duration(&mut self) -> Option<Duration> {
        if let Some(since) = self.paused_since {
            let elapsed = since.elapsed();
            if elapsed >= self.pause_cap {
                self.clear();
                return None;
            }
            return Some(self.pause_cap - elapsed);
        }
        if let Some(delay) = self.pending_delay.take() {
            return Some(delay);
        }
        Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_action_clears_active_state() {
        let mut handler = BackpressureHandler::new(Duration::from_secs(30));
        handler.on_signal(Severity::High, Action::Pause, None);
        assert!(handler.is_active());
        handler.on_signal(Severity::Low, Action::None, None);
        assert!(!handler.is_active());
    }

    #[test]
    fn slow_down_uses_recommended_or_default_delay() {
        let mut handler = BackpressureHandler::new(Duration::from_secs(30));
        handler.on_signal(Severity::Medium, Action::SlowDown, None);
        assert_eq!(handler.wait_duration(), Some(DEFAULT_SLOW_DOWN_DELAY));

        handler.on_signal(Severity::Medium, Action::SlowDown, Some(Duration::from_millis(250)));
        assert_eq!(handler.wait_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn pause_beyond_cap_returns_none() {
        let mut handler = BackpressureHandler::new(Duration::from_millis(0));
        handler.on_signal(Severity::High, Action::Pause, None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(handler.wait_duration(), None);
        assert!(!handler.is_active());
    }
}
