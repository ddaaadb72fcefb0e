//! # fanmap - Bounded Parallel Map for Rust
//!
//! Applies a function to every element of a stream or an in-memory sequence
//! on a bounded pool of worker threads, delivering results through a single
//! output channel in completion order.
//!
//! ## Features
//!
//! - **Streaming**: map over a channel that may keep growing until its senders drop
//! - **Batched**: map over a `Vec` split into roughly `2 × workers` contiguous batches
//! - **Scoped**: batch map over borrowed slices without `'static` bounds
//! - **Adjustable**: worker counts re-resolved per call from an injectable concurrency limit
//! - **Backpressure**: bounded relay and output channels throttle producers end to end
//!
//! ## Quick Start
//!
//! ```rust
//! use fanmap::{ParallelExecutor, Parallelism};
//!
//! let executor = ParallelExecutor::new(Parallelism::new(4));
//! let mut squares: Vec<u64> = executor
//!     .batch_map(|x: u64| x * x, (1..=5).collect())
//!     .unwrap()
//!     .collect();
//! squares.sort();
//! assert_eq!(squares, vec![1, 4, 9, 16, 25]);
//! ```

pub mod config;
pub mod parallel;

pub use config::ParallelConfig;
pub use parallel::{
    AdjustableConcurrency, BatchPlan, ConcurrencyLimit, MapResults, ParallelExecutor, Parallelism,
    SystemConcurrency, batch_map, stream_map,
};

/// Result type alias for fanmap operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
