//! Generic polling state machine.
//!
//! Polling is the act of repeatedly querying some state at defined
//! intervals. A [`Poller`] invokes its [`PollCheck`] until the check
//! resolves, aborts, or the [`PollRepetition`] runs out of intervals.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use containment::poll::{PollAnswer, Poller};
//!
//! let mut poller = Poller::new(|attempt: u32| async move {
//!     if attempt >= 2 {
//!         PollAnswer::resolve("ready")
//!     } else {
//!         PollAnswer::Continue
//!     }
//! });
//! let outcome = poller.poll_fixed(Duration::from_millis(100), 10).await?;
//! assert!(outcome.is_resolved());
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::answer::{PollAnswer, PollOutcome, StopReason};
use super::repetition::PollRepetition;
use super::sleeper::{Sleeper, SystemSleeper};
use crate::error::PollError;

/// Evaluation function invoked once per poll attempt.
///
/// Any `FnMut(u32) -> impl Future<Output = PollAnswer<T>>` closure is a
/// check; implement the trait directly when the check carries state or
/// collaborators.
#[async_trait]
pub trait PollCheck<T>: Send {
    /// Decides whether polling continues, resolves or aborts.
    ///
    /// `attempts_so_far` is the number of checks made before this one.
    async fn check(&mut self, attempts_so_far: u32) -> PollAnswer<T>;
}

#[async_trait]
impl<T, F, Fut> PollCheck<T> for F
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = PollAnswer<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn check(&mut self, attempts_so_far: u32) -> PollAnswer<T> {
        (self)(attempts_so_far).await
    }
}

/// Check that resolves with `()` as soon as a condition holds.
pub struct ConditionCheck<F> {
    condition: F,
}

impl<F> ConditionCheck<F>
where
    F: FnMut() -> bool + Send,
{
    pub fn new(condition: F) -> Self {
        Self { condition }
    }
}

#[async_trait]
impl<F> PollCheck<()> for ConditionCheck<F>
where
    F: FnMut() -> bool + Send,
{
    async fn check(&mut self, _attempts_so_far: u32) -> PollAnswer<()> {
        if (self.condition)() {
            PollAnswer::Resolve(None)
        } else {
            PollAnswer::Continue
        }
    }
}

/// Drives a [`PollCheck`] through a [`PollRepetition`].
///
/// The first check happens immediately. Every CONTINUE answer is followed
/// by exactly one sleep, for the interval consumed by that attempt, so the
/// attempt budget and the sleep budget are the same sequence.
pub struct Poller<C, S = SystemSleeper> {
    check: C,
    sleeper: S,
}

impl<C> Poller<C, SystemSleeper> {
    /// Creates a poller that waits with the tokio timer.
    pub fn new(check: C) -> Self {
        Self::with_sleeper(check, SystemSleeper)
    }
}

impl<F> Poller<ConditionCheck<F>, SystemSleeper>
where
    F: FnMut() -> bool + Send,
{
    /// Creates a poller that resolves once `condition` returns true.
    pub fn checking(condition: F) -> Self {
        Self::new(ConditionCheck::new(condition))
    }
}

impl<C, S> Poller<C, S>
where
    S: Sleeper,
{
    /// Creates a poller with an alternate sleeper, e.g. one that does not
    /// actually wait.
    pub fn with_sleeper(check: C, sleeper: S) -> Self {
        Self { check, sleeper }
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Polls at a fixed interval, at most `max_attempts` times.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub async fn poll_fixed<T>(
        &mut self,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<PollOutcome<T>, PollError>
    where
        C: PollCheck<T>,
    {
        self.poll(PollRepetition::fixed(interval, max_attempts))
            .await
    }

    /// Polls until the check stops polling or `repetition` is exhausted.
    ///
    /// An empty repetition yields [`StopReason::Timeout`] with zero attempts
    /// and the check is never invoked.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Interrupted`] if the sleeper is interrupted.
    pub async fn poll<T>(
        &mut self,
        mut repetition: PollRepetition,
    ) -> Result<PollOutcome<T>, PollError>
    where
        C: PollCheck<T>,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        let (reason, content) = loop {
            let Some(interval) = repetition.next() else {
                break (StopReason::Timeout, None);
            };
            let answer = self.check.check(attempts).await;
            attempts = attempts.saturating_add(1);
            match answer {
                PollAnswer::Continue => self.sleeper.sleep(interval).await?,
                PollAnswer::Resolve(content) => break (StopReason::Resolved, content),
                PollAnswer::Abort(content) => break (StopReason::Aborted, content),
            }
        };

        let elapsed = start.elapsed();
        tracing::debug!(
            reason = %reason,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Polling stopped"
        );

        Ok(PollOutcome {
            reason,
            content,
            elapsed,
            attempts,
        })
    }
}
