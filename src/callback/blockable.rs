//! Callback that turns a push-style event stream into a bounded wait.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Event sink handed to an asynchronous producer.
///
/// The producer calls [`on_start`](ResultCallback::on_start) once, then any
/// number of [`on_next`](ResultCallback::on_next) and
/// [`on_error`](ResultCallback::on_error), and finally
/// [`on_complete`](ResultCallback::on_complete). [`close`](ResultCallback::close)
/// is the terminal signal sent when the producer is released without
/// completing normally; the two are interchangeable.
pub trait ResultCallback<T, E>: Send + Sync {
    fn on_start(&self);

    fn on_next(&self, item: T);

    fn on_error(&self, error: E);

    fn on_complete(&self);

    fn close(&self);
}

struct Accumulated<T, E> {
    items: Vec<T>,
    errors: Vec<E>,
    completed: bool,
}

/// Callback that accumulates items and errors and lets consumers block
/// until the producer signals completion.
///
/// Share it with the producer through an `Arc`. Completion is a one-shot
/// signal: the first `on_complete` or `close` releases every waiter and
/// later signals are no-ops. Items and errors recorded before completion
/// are visible to any waiter that observes it. Events arriving after
/// completion are discarded.
pub struct BlockableCallback<T, E> {
    started: AtomicBool,
    state: Mutex<Accumulated<T, E>>,
    completion: Condvar,
    completion_notify: Notify,
}

impl<T, E> Default for BlockableCallback<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> BlockableCallback<T, E> {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            state: Mutex::new(Accumulated {
                items: Vec::new(),
                errors: Vec::new(),
                completed: false,
            }),
            completion: Condvar::new(),
            completion_notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Accumulated<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    fn record_start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn record_item(&self, item: T) {
        let mut state = self.lock();
        if state.completed {
            tracing::trace!("Discarding item received after completion");
            return;
        }
        state.items.push(item);
    }

    fn record_error(&self, error: E) {
        let mut state = self.lock();
        if state.completed {
            tracing::trace!("Discarding error received after completion");
            return;
        }
        state.errors.push(error);
    }

    fn signal_completion(&self) {
        {
            let mut state = self.lock();
            if state.completed {
                return;
            }
            state.completed = true;
        }
        self.completion.notify_all();
        self.completion_notify.notify_waiters();
    }

    /// Waits for completion, suspending the current task.
    ///
    /// Returns true iff completion was observed before `timeout` elapsed.
    /// Dropping the returned future abandons the wait.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let completion = async {
            loop {
                // Registered before the flag is read so a signal in between is not lost.
                let notified = self.completion_notify.notified();
                if self.is_completed() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, completion).await.is_ok()
    }

    /// Waits for completion, blocking the current thread.
    ///
    /// Returns true iff completion was observed before `timeout` elapsed.
    /// Do not call this from an async context; use [`wait`](Self::wait).
    pub fn wait_blocking(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .completion
            .wait_timeout_while(state, timeout, |s| !s.completed)
            .unwrap_or_else(PoisonError::into_inner);
        state.completed
    }

    /// Waits for completion, or fails with the error built by `error_factory`
    /// if `timeout` elapses first.
    pub async fn complete_or_else<X, F>(&self, timeout: Duration, error_factory: F) -> Result<(), X>
    where
        F: FnOnce() -> X,
    {
        if self.wait(timeout).await {
            Ok(())
        } else {
            Err(error_factory())
        }
    }

    /// Blocking form of [`complete_or_else`](Self::complete_or_else).
    pub fn complete_or_else_blocking<X, F>(&self, timeout: Duration, error_factory: F) -> Result<(), X>
    where
        F: FnOnce() -> X,
    {
        if self.wait_blocking(timeout) {
            Ok(())
        } else {
            Err(error_factory())
        }
    }
}

impl<T: Clone, E> BlockableCallback<T, E> {
    /// True iff no error was recorded and at least one item satisfies
    /// `predicate`.
    ///
    /// The predicate runs against a snapshot taken under the lock and
    /// released before the scan, so it may call back into this callback.
    pub fn check_succeeded<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        let items = {
            let state = self.lock();
            if !state.errors.is_empty() {
                return false;
            }
            state.items.clone()
        };
        items.iter().any(predicate)
    }
}

impl<T: Clone, E: Clone> BlockableCallback<T, E> {
    /// Snapshot of the items received so far.
    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    /// Snapshot of the errors received so far.
    pub fn errors(&self) -> Vec<E> {
        self.lock().errors.clone()
    }
}

impl<T: fmt::Debug, E: fmt::Display> BlockableCallback<T, E> {
    /// Human-readable report of everything received, for failure diagnostics.
    pub fn summarize(&self) -> String {
        let state = self.lock();
        let items = if state.items.is_empty() {
            "(no response items received)".to_string()
        } else {
            state
                .items
                .iter()
                .map(|item| format!("{item:?}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let errors = if state.errors.is_empty() {
            "(no exceptions thrown)".to_string()
        } else {
            state
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!("CallbackSummary:\n\n{items}\n\n{errors}\n")
    }
}

impl<T: Send, E: Send> ResultCallback<T, E> for BlockableCallback<T, E> {
    fn on_start(&self) {
        self.record_start();
    }

    fn on_next(&self, item: T) {
        self.record_item(item);
    }

    fn on_error(&self, error: E) {
        self.record_error(error);
    }

    fn on_complete(&self) {
        self.signal_completion();
    }

    fn close(&self) {
        self.signal_completion();
    }
}

impl<T, E> fmt::Debug for BlockableCallback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BlockableCallback")
            .field("started", &self.is_started())
            .field("completed", &state.completed)
            .field("items", &state.items.len())
            .field("errors", &state.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    type StringCallback = BlockableCallback<String, String>;

    #[derive(Debug, PartialEq)]
    struct BuildTimeout;

    #[test]
    fn test_completion_from_another_thread() {
        let callback = Arc::new(StringCallback::new());
        let producer = Arc::clone(&callback);

        let handle = thread::spawn(move || {
            producer.on_start();
            producer.on_next("a".to_string());
            producer.on_next("b".to_string());
            producer.on_complete();
        });

        assert!(callback.wait_blocking(Duration::from_secs(1)));
        assert!(callback.is_started());
        assert!(callback.check_succeeded(|x| x == "b"));
        assert_eq!(callback.items(), vec!["a".to_string(), "b".to_string()]);
        handle.join().unwrap();
    }

    #[test]
    fn test_error_fails_check() {
        let callback = StringCallback::new();
        callback.on_next("Successfully built".to_string());
        callback.on_error("boom".to_string());
        callback.on_complete();

        assert!(callback.wait_blocking(Duration::from_millis(10)));
        assert!(!callback.check_succeeded(|_| true));
    }

    #[test]
    fn test_no_matching_item_fails_check() {
        let callback = StringCallback::new();
        callback.on_next("a".to_string());
        callback.on_complete();

        assert!(!callback.check_succeeded(|x| x == "z"));
    }

    #[test]
    fn test_no_items_fails_check() {
        let callback = StringCallback::new();
        callback.on_complete();
        assert!(!callback.check_succeeded(|_| true));
    }

    #[test]
    fn test_wait_times_out_without_completion() {
        let callback = StringCallback::new();
        assert!(!callback.wait_blocking(Duration::from_millis(10)));
        assert_eq!(
            callback.complete_or_else_blocking(Duration::from_millis(10), || BuildTimeout),
            Err(BuildTimeout)
        );
    }

    #[test]
    fn test_complete_or_else_ok_when_completed() {
        let callback = StringCallback::new();
        callback.close();
        assert_eq!(
            callback.complete_or_else_blocking(Duration::from_millis(10), || BuildTimeout),
            Ok(())
        );
    }

    #[test]
    fn test_completion_is_idempotent() {
        let callback = StringCallback::new();
        callback.on_next("kept".to_string());
        callback.on_complete();
        callback.close();
        callback.on_complete();
        callback.on_next("late".to_string());
        callback.on_error("late".to_string());

        assert!(callback.is_completed());
        assert_eq!(callback.items(), vec!["kept".to_string()]);
        assert_eq!(callback.error_count(), 0);
    }

    #[test]
    fn test_multiple_blocking_waiters_all_released() {
        let callback = Arc::new(StringCallback::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let callback = Arc::clone(&callback);
                thread::spawn(move || callback.wait_blocking(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        callback.close();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[tokio::test]
    async fn test_async_wait_released_by_producer_task() {
        let callback = Arc::new(StringCallback::new());
        let producer = Arc::clone(&callback);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.on_next("x".to_string());
            producer.on_complete();
        });

        assert!(callback.wait(Duration::from_secs(1)).await);
        assert_eq!(callback.item_count(), 1);
    }

    #[tokio::test]
    async fn test_async_wait_times_out() {
        let callback = StringCallback::new();
        assert!(!callback.wait(Duration::from_millis(10)).await);
        assert_eq!(
            callback
                .complete_or_else(Duration::from_millis(10), || BuildTimeout)
                .await,
            Err(BuildTimeout)
        );
    }

    #[tokio::test]
    async fn test_async_wait_returns_immediately_when_already_completed() {
        let callback = StringCallback::new();
        callback.on_complete();
        assert!(callback.wait(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_multiple_async_waiters_all_released() {
        let callback = Arc::new(StringCallback::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let callback = Arc::clone(&callback);
                tokio::spawn(async move { callback.wait(Duration::from_secs(5)).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        callback.on_complete();

        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }

    #[test]
    fn test_check_predicate_may_read_callback() {
        let callback = StringCallback::new();
        callback.on_start();
        callback.on_next("a".to_string());
        callback.on_next("b".to_string());

        let succeeded = callback.check_succeeded(|item| {
            callback.items().len() == 2 && !callback.summarize().is_empty() && item == "b"
        });

        assert!(succeeded);
    }

    #[test]
    fn test_summarize_empty() {
        let callback = StringCallback::new();
        assert_eq!(
            callback.summarize(),
            "CallbackSummary:\n\n(no response items received)\n\n(no exceptions thrown)\n"
        );
    }

    #[test]
    fn test_summarize_lists_items_and_errors() {
        let callback = StringCallback::new();
        callback.on_next("step 1".to_string());
        callback.on_next("step 2".to_string());
        callback.on_error("no space left on device".to_string());

        let summary = callback.summarize();
        assert!(summary.starts_with("CallbackSummary:"));
        assert!(summary.contains("\"step 1\"\n\"step 2\""));
        assert!(summary.contains("no space left on device"));
    }

    #[test]
    fn test_debug_does_not_dump_items() {
        let callback = StringCallback::new();
        callback.on_next("secret".to_string());
        let rendered = format!("{callback:?}");
        assert!(rendered.contains("items: 1"));
        assert!(!rendered.contains("secret"));
    }
}
