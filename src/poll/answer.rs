//! Per-attempt answers and per-session outcomes.
//!
//! A [`PollAnswer`] is the verdict of a single check; a [`PollOutcome`] is
//! the end result of a whole poll session.

use std::fmt;
use std::time::Duration;

/// Action the poller takes after receiving an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollAction {
    /// Stop polling because the state in question has been resolved.
    Resolve,
    /// Stop polling without a resolution.
    Abort,
    /// Keep polling.
    Continue,
}

/// Answer returned by a check for one poll attempt.
///
/// Content is conventionally present only on [`PollAnswer::Resolve`].
/// A check may return [`PollAnswer::Abort`] with content to tell the caller
/// why the state will never resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAnswer<T> {
    Continue,
    Resolve(Option<T>),
    Abort(Option<T>),
}

impl<T> PollAnswer<T> {
    /// Resolve with a value.
    pub fn resolve(value: T) -> Self {
        PollAnswer::Resolve(Some(value))
    }

    /// Abort with a value describing why polling stopped.
    pub fn abort(value: T) -> Self {
        PollAnswer::Abort(Some(value))
    }

    pub fn action(&self) -> PollAction {
        match self {
            PollAnswer::Continue => PollAction::Continue,
            PollAnswer::Resolve(_) => PollAction::Resolve,
            PollAnswer::Abort(_) => PollAction::Abort,
        }
    }

    pub fn content(&self) -> Option<&T> {
        match self {
            PollAnswer::Continue => None,
            PollAnswer::Resolve(content) | PollAnswer::Abort(content) => content.as_ref(),
        }
    }

    pub fn into_content(self) -> Option<T> {
        match self {
            PollAnswer::Continue => None,
            PollAnswer::Resolve(content) | PollAnswer::Abort(content) => content,
        }
    }
}

/// Reason a poll session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// State was resolved to the check's satisfaction.
    Resolved,
    /// State was not resolved, but polling had to stop anyway.
    Aborted,
    /// The interval sequence ran out before resolution or abortion.
    Timeout,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Resolved => "RESOLVED",
            StopReason::Aborted => "ABORTED",
            StopReason::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// End result of a poll session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome<T> {
    /// Why polling stopped.
    pub reason: StopReason,
    /// Content carried by the final answer.
    pub content: Option<T>,
    /// Wall-clock duration of the session. Not exact.
    pub elapsed: Duration,
    /// Number of times the check was invoked.
    pub attempts: u32,
}

impl<T> PollOutcome<T> {
    pub fn is_resolved(&self) -> bool {
        self.reason == StopReason::Resolved
    }

    pub fn is_timeout(&self) -> bool {
        self.reason == StopReason::Timeout
    }

    /// Content if the session resolved, `None` otherwise.
    pub fn resolved_content(self) -> Option<T> {
        match self.reason {
            StopReason::Resolved => self.content,
            _ => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for PollOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PollOutcome{{reason={}, content={:?}, elapsed={:?}, attempts={}}}",
            self.reason, self.content, self.elapsed, self.attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_actions() {
        assert_eq!(PollAnswer::<u8>::Continue.action(), PollAction::Continue);
        assert_eq!(PollAnswer::resolve(1u8).action(), PollAction::Resolve);
        assert_eq!(PollAnswer::<u8>::Resolve(None).action(), PollAction::Resolve);
        assert_eq!(PollAnswer::abort(2u8).action(), PollAction::Abort);
    }

    #[test]
    fn test_answer_content() {
        assert_eq!(PollAnswer::<&str>::Continue.content(), None);
        assert_eq!(PollAnswer::resolve("ok").content(), Some(&"ok"));
        assert_eq!(PollAnswer::abort("gone").into_content(), Some("gone"));
        assert_eq!(PollAnswer::<&str>::Abort(None).into_content(), None);
    }

    #[test]
    fn test_resolved_content_only_on_resolution() {
        let resolved = PollOutcome {
            reason: StopReason::Resolved,
            content: Some(7),
            elapsed: Duration::ZERO,
            attempts: 1,
        };
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolved_content(), Some(7));

        let aborted = PollOutcome {
            reason: StopReason::Aborted,
            content: Some(7),
            elapsed: Duration::ZERO,
            attempts: 1,
        };
        assert_eq!(aborted.resolved_content(), None);
    }

    #[test]
    fn test_outcome_display() {
        let outcome = PollOutcome::<i64> {
            reason: StopReason::Timeout,
            content: None,
            elapsed: Duration::from_millis(30),
            attempts: 3,
        };
        let rendered = outcome.to_string();
        assert!(rendered.contains("reason=TIMEOUT"));
        assert!(rendered.contains("attempts=3"));
    }
}
