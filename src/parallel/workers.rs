use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of the host's current default concurrency
///
/// Implementations are queried on every executor invocation, never cached,
/// so a policy change between two calls is picked up by the second one.
pub trait ConcurrencyLimit: Send + Sync {
    /// Number of logical execution units currently available (at least 1)
    fn current(&self) -> usize;
}

/// Reads the CPU count available to this process via `num_cpus::get()`
///
/// Honours CPU affinity masks and cgroup quotas where the platform exposes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConcurrency;

impl ConcurrencyLimit for SystemConcurrency {
    fn current(&self) -> usize {
        num_cpus::get()
    }
}

/// Process-adjustable concurrency limit shared between clones
///
/// Every clone observes `set` calls made through any other clone, which makes
/// this the injectable stand-in for a runtime-wide "max procs" setting.
#[derive(Debug, Clone)]
pub struct AdjustableConcurrency {
    limit: Arc<AtomicUsize>,
}

impl AdjustableConcurrency {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "concurrency limit must be at least 1");
        Self {
            limit: Arc::new(AtomicUsize::new(limit)),
        }
    }

    /// Start from whatever the system currently reports
    pub fn from_system() -> Self {
        Self::new(SystemConcurrency.current())
    }

    /// Replace the limit and return the previous one. Passing 0 only queries.
    pub fn set(&self, limit: usize) -> usize {
        if limit == 0 {
            return self.get();
        }
        self.limit.swap(limit, Ordering::AcqRel)
    }

    pub fn get(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }
}

impl Default for AdjustableConcurrency {
    fn default() -> Self {
        Self::from_system()
    }
}

impl ConcurrencyLimit for AdjustableConcurrency {
    fn current(&self) -> usize {
        self.get()
    }
}

impl<L: ConcurrencyLimit + ?Sized> ConcurrencyLimit for &L {
    fn current(&self) -> usize {
        (**self).current()
    }
}

impl<L: ConcurrencyLimit + ?Sized> ConcurrencyLimit for Arc<L> {
    fn current(&self) -> usize {
        (**self).current()
    }
}

/// Requested degree of parallelism
///
/// Positive values are used verbatim as the worker count. Zero and negative
/// values defer to the ambient [`ConcurrencyLimit`], re-read on every
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parallelism(i64);

impl Parallelism {
    /// Defer to the host's current default concurrency
    pub const AUTO: Self = Self(0);

    pub const fn new(workers: i64) -> Self {
        Self(workers)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_auto(self) -> bool {
        self.0 <= 0
    }

    /// Resolve the effective worker count against `limit`
    ///
    /// # Panics
    /// If `limit` reports zero workers.
    pub fn resolve<L: ConcurrencyLimit + ?Sized>(self, limit: &L) -> usize {
        let workers = if self.0 > 0 {
            usize::try_from(self.0).unwrap_or(usize::MAX)
        } else {
            limit.current()
        };
        assert!(workers > 0, "concurrency limit reported zero workers");
        workers
    }

    /// Resolve against the system CPU count
    pub fn num_workers(self) -> usize {
        self.resolve(&SystemConcurrency)
    }
}

impl From<i64> for Parallelism {
    fn from(workers: i64) -> Self {
        Self(workers)
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            write!(f, "auto")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_parallelism_is_used_verbatim() {
        let limit = AdjustableConcurrency::new(3);
        assert_eq!(Parallelism::new(7).resolve(&limit), 7);
        assert_eq!(Parallelism::new(1).resolve(&limit), 1);
    }

    #[test]
    fn test_non_positive_parallelism_defers_to_limit() {
        let limit = AdjustableConcurrency::new(6);
        assert_eq!(Parallelism::AUTO.resolve(&limit), 6);
        assert_eq!(Parallelism::new(-4).resolve(&limit), 6);
    }

    #[test]
    fn test_resolution_tracks_limit_changes() {
        let limit = AdjustableConcurrency::new(2);
        let shared = limit.clone();

        assert_eq!(Parallelism::AUTO.resolve(&limit), 2);
        assert_eq!(shared.set(5), 2);
        assert_eq!(Parallelism::AUTO.resolve(&limit), 5);

        // Querying leaves the limit alone
        assert_eq!(shared.set(0), 5);
        assert_eq!(Parallelism::AUTO.resolve(&limit), 5);
    }

    #[test]
    fn test_system_concurrency_is_positive() {
        assert!(SystemConcurrency.current() >= 1);
        assert!(Parallelism::AUTO.num_workers() >= 1);
        assert_eq!(Parallelism::new(3).num_workers(), 3);
    }

    #[test]
    fn test_limit_through_arc() {
        let limit: Arc<dyn ConcurrencyLimit> = Arc::new(AdjustableConcurrency::new(4));
        assert_eq!(Parallelism::AUTO.resolve(&limit), 4);
    }

    struct ZeroLimit;

    impl ConcurrencyLimit for ZeroLimit {
        fn current(&self) -> usize {
            0
        }
    }

    #[test]
    #[should_panic(expected = "zero workers")]
    fn test_zero_limit_is_a_contract_violation() {
        Parallelism::AUTO.resolve(&ZeroLimit);
    }

    #[test]
    fn test_display() {
        assert_eq!(Parallelism::AUTO.to_string(), "auto");
        assert_eq!(Parallelism::new(-1).to_string(), "auto");
        assert_eq!(Parallelism::new(8).to_string(), "8");
    }
}
