//! Generic parallel map framework
//!
//! Applies a function to every element of an input using a bounded number of
//! worker threads, fanning results into a single output channel. Results come
//! back in completion order, not input order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   Source        │    │   Dispatcher     │    │   Workers (W)   │
//! │                 │───▶│                  │───▶│                 │───▶ MapResults
//! │ • Channel       │    │ • Relay (cap W)  │    │ • transform()   │
//! │ • Vec / slice   │    │ • Batching       │    │ • Emit results  │
//! │                 │    │ • Completion     │◀───│ • Signal done   │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! ## Worker Count Resolution
//! A [`Parallelism`] above zero is the worker count. Zero or below defers to a
//! [`ConcurrencyLimit`], read again on every call:
//!
//! ```rust
//! use fanmap::parallel::{AdjustableConcurrency, Parallelism};
//!
//! let limit = AdjustableConcurrency::new(4);
//! assert_eq!(Parallelism::new(2).resolve(&limit), 2);
//! assert_eq!(Parallelism::AUTO.resolve(&limit), 4);
//!
//! limit.set(8);
//! assert_eq!(Parallelism::AUTO.resolve(&limit), 8);
//! ```
//!
//! ## Streaming
//! ```rust
//! use crossbeam::channel;
//! use fanmap::parallel::{ParallelExecutor, Parallelism};
//!
//! let (tx, rx) = channel::unbounded();
//! std::thread::spawn(move || {
//!     for i in 1..=5 {
//!         tx.send(i).unwrap();
//!     }
//! });
//!
//! let executor = ParallelExecutor::new(Parallelism::new(2));
//! let sum: i32 = executor.stream_map(|x| x * x, rx).unwrap().sum();
//! assert_eq!(sum, 55);
//! ```
//!
//! ## Batched
//! ```rust
//! use fanmap::parallel::batch_map;
//!
//! let mut lengths: Vec<usize> = batch_map(|s: &str| s.len(), vec!["a", "bb", "ccc"])
//!     .unwrap()
//!     .collect();
//! lengths.sort();
//! assert_eq!(lengths, vec![1, 2, 3]);
//! ```
//!
//! # Failure Policy
//! A panicking transformation is fatal to the whole invocation. The first panic
//! halts the pool: the dispatcher stops pulling from the source, the other
//! workers stop claiming work, and the panic is re-raised on the thread
//! consuming the results at its next receive, without waiting for an open
//! source to close. A transformation that must survive per-item failures
//! should return a `Result` as its output type.

pub mod batch;
pub mod core;
mod pool;
pub mod results;
pub mod workers;

pub use batch::{BatchPlan, BatchRanges};
pub use self::core::{DEFAULT_THREAD_NAME, ParallelExecutor};
pub use results::MapResults;
pub use workers::{AdjustableConcurrency, ConcurrencyLimit, Parallelism, SystemConcurrency};

use anyhow::Result;

/// Stream map with one worker per available CPU
pub fn stream_map<T, R, F, I>(transform: F, source: I) -> Result<MapResults<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
{
    ParallelExecutor::default().stream_map(transform, source)
}

/// Batch map with one worker per available CPU
pub fn batch_map<T, R, F>(transform: F, items: Vec<T>) -> Result<MapResults<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    ParallelExecutor::default().batch_map(transform, items)
}
