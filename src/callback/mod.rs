//! Bridge from push-style asynchronous operations to bounded waits.
//!
//! Docker builds and pulls report progress as a stream of events. The
//! producer side pushes those events into a [`ResultCallback`]; the consumer
//! holds the same [`BlockableCallback`] and waits on it with a timeout, then
//! decides success from what accumulated.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use containment::callback::{feed, BlockableCallback};
//!
//! let callback = Arc::new(BlockableCallback::<String, String>::new());
//! let sink = Arc::clone(&callback);
//! tokio::spawn(async move { feed(progress_stream, sink.as_ref()).await });
//!
//! callback
//!     .complete_or_else(Duration::from_secs(60), || "build timeout exceeded")
//!     .await?;
//! if !callback.check_succeeded(|line| line.starts_with("Successfully built")) {
//!     eprintln!("{}", callback.summarize());
//! }
//! ```

pub mod blockable;
pub mod feed;

pub use blockable::{BlockableCallback, ResultCallback};
pub use feed::feed;
