//! Interval sequences that bound a poll session.

use std::fmt;
use std::time::Duration;

/// Ordered, single-use sequence of durations to wait between poll checks.
///
/// The number of elements is the maximum number of times the check is
/// invoked. Each element is the wait that follows a CONTINUE answer on the
/// attempt that consumed it. A repetition is consumed by one poll session
/// and cannot be restarted; build a new one for the next session.
///
/// Variable spacing (backoff and the like) is expressed by supplying a
/// different sequence to [`PollRepetition::from_intervals`]; the poller
/// does not change.
pub struct PollRepetition {
    intervals: Box<dyn Iterator<Item = Duration> + Send>,
}

impl PollRepetition {
    /// Repeats `interval` exactly `times` times.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn fixed(interval: Duration, times: u32) -> Self {
        assert!(
            !interval.is_zero(),
            "expect positive interval, not {interval:?}"
        );
        Self {
            intervals: Box::new(std::iter::repeat(interval).take(times as usize)),
        }
    }

    /// Replays an arbitrary ordered sequence of durations.
    ///
    /// The sequence is consumed lazily, so it may be infinite.
    pub fn from_intervals<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
        I::IntoIter: Send + 'static,
    {
        Self {
            intervals: Box::new(intervals.into_iter()),
        }
    }

    /// A sequence with no elements. Polling with it never invokes the check.
    pub fn empty() -> Self {
        Self::from_intervals(std::iter::empty())
    }
}

impl Iterator for PollRepetition {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.intervals.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.intervals.size_hint()
    }
}

impl fmt::Debug for PollRepetition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollRepetition")
            .field("remaining", &self.intervals.size_hint())
            .finish()
    }
}
