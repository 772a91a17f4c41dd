//! Waiting strategies used by the poller between attempts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::PollError;

/// Suspends the calling task for a given duration.
///
/// The poller only ever suspends inside [`Sleeper::sleep`]. Implementations
/// report an interrupted wait with [`PollError::Interrupted`], which aborts
/// the poll session and propagates to the caller.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration) -> Result<(), PollError>;
}

/// Default sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSleeper;

#[async_trait]
impl Sleeper for SystemSleeper {
    async fn sleep(&self, duration: Duration) -> Result<(), PollError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Sleeper that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) -> Result<(), PollError> {
        Ok(())
    }
}

/// Sleeper that records every requested duration without waiting.
///
/// Clones share the same record, so a clone can be handed to a poller while
/// another is kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far, in call order.
    pub fn durations(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sleeps requested so far.
    pub fn count(&self) -> usize {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) -> Result<(), PollError> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        Ok(())
    }
}

/// Handle that interrupts an [`InterruptibleSleeper`].
#[derive(Debug, Clone)]
pub struct Interrupter {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupter {
    /// Interrupts the current sleep, if any, and every later one.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Tokio-timer sleeper whose waits can be interrupted from another task
/// or thread through an [`Interrupter`].
///
/// Once interrupted, every sleep fails with [`PollError::Interrupted`].
#[derive(Debug, Clone)]
pub struct InterruptibleSleeper {
    rx: watch::Receiver<bool>,
}

impl InterruptibleSleeper {
    /// Creates a sleeper and the handle that interrupts it.
    pub fn new() -> (Self, Interrupter) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, Interrupter { tx: Arc::new(tx) })
    }
}

#[async_trait]
impl Sleeper for InterruptibleSleeper {
    async fn sleep(&self, duration: Duration) -> Result<(), PollError> {
        let mut rx = self.rx.clone();
        // Resolves to false if every Interrupter was dropped.
        let interrupted = async move {
            loop {
                if *rx.borrow_and_update() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::select! {
            true = interrupted => Err(PollError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
