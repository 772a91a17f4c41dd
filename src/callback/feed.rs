//! Adapts pull-style progress streams into push-style callback events.

use std::marker::PhantomData;

use futures::{Stream, StreamExt};

use super::blockable::ResultCallback;

/// Calls `close` on the sink when dropped, so waiters are released even if
/// the feeding future is cancelled or panics.
struct CloseOnDrop<'a, T, E, C>
where
    C: ResultCallback<T, E> + ?Sized,
{
    sink: &'a C,
    _events: PhantomData<fn(T, E)>,
}

impl<T, E, C> Drop for CloseOnDrop<'_, T, E, C>
where
    C: ResultCallback<T, E> + ?Sized,
{
    fn drop(&mut self) {
        self.sink.close();
    }
}

/// Drives `stream` to its end, forwarding every element to `sink`.
///
/// Emits `on_start` first, then `on_next` for each `Ok` element and
/// `on_error` for each `Err` element, and `on_complete` once the stream
/// ends. Errors do not stop the stream.
pub async fn feed<S, T, E, C>(stream: S, sink: &C)
where
    S: Stream<Item = Result<T, E>>,
    C: ResultCallback<T, E> + ?Sized,
{
    let _guard = CloseOnDrop {
        sink,
        _events: PhantomData,
    };
    sink.on_start();

    let mut stream = std::pin::pin!(stream);
    let mut items = 0usize;
    let mut errors = 0usize;
    while let Some(event) = stream.next().await {
        match event {
            Ok(item) => {
                items += 1;
                sink.on_next(item);
            }
            Err(e) => {
                errors += 1;
                sink.on_error(e);
            }
        }
    }

    tracing::trace!(items, errors, "Progress stream ended");
    sink.on_complete();
}
