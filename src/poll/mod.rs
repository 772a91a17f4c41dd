//! Polling for the completion of long-running operations.
//!
//! A [`Poller`] repeatedly invokes a caller-supplied [`PollCheck`], pausing
//! between attempts with a [`Sleeper`], until the check resolves or aborts
//! or the [`PollRepetition`] is exhausted.
//!
//! # Stop reasons
//!
//! ```text
//! check → RESOLVE  ⇒ RESOLVED
//! check → ABORT    ⇒ ABORTED
//! check → CONTINUE ⇒ sleep, next interval ... intervals exhausted ⇒ TIMEOUT
//! ```
//!
//! Exhausting the intervals is a normal outcome, not an error; callers
//! decide what a timeout means for them.

pub mod answer;
pub mod poller;
pub mod repetition;
pub mod sleeper;

pub use answer::{PollAction, PollAnswer, PollOutcome, StopReason};
pub use poller::{ConditionCheck, PollCheck, Poller};
pub use repetition::PollRepetition;
pub use sleeper::{
    Interrupter, InterruptibleSleeper, NoopSleeper, RecordingSleeper, Sleeper, SystemSleeper,
};
