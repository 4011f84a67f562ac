//! Single-flight registry.
//!
//! The first caller for a key runs the work; callers arriving while it runs
//! block until it finishes and receive a clone of the same outcome. The key is
//! removed when the work ends, whether it succeeded, failed or panicked.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::domain::errors::{CacheError, CacheResult};

struct Flight<T> {
    outcome: Mutex<Option<CacheResult<T>>>,
    ready: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, outcome: CacheResult<T>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
    }
}

impl<T: Clone> Flight<T> {
    fn wait(&self) -> CacheResult<T> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Tracks which keys are being produced right now.
pub struct InFlightRegistry<K, T> {
    flights: Mutex<HashMap<K, Arc<Flight<T>>>>,
}

impl<K, T> Default for InFlightRegistry<K, T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> InFlightRegistry<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key` unless it is already running, in which case this
    /// waits for the running one and returns its outcome.
    ///
    /// # Errors
    /// Returns the error of the work, or `GenerationFailure` if the running
    /// work panicked.
    pub fn run<F>(&self, key: K, work: F) -> CacheResult<T>
    where
        F: FnOnce() -> CacheResult<T>,
    {
        let (flight, is_owner) = self.join(&key);
        if !is_owner {
            trace!(key = ?key, "Joining in-flight generation");
            return flight.wait();
        }

        let mut guard = FlightGuard {
            registry: self,
            key: Some(key),
            flight,
            outcome: None,
        };
        let outcome = work();
        guard.outcome = Some(outcome.clone());
        drop(guard);
        outcome
    }

    /// Number of keys currently running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    /// Claims `key` or subscribes to the existing claim, atomically.
    fn join(&self, key: &K) -> (Arc<Flight<T>>, bool) {
        let mut flights = self.flights.lock();
        if let Some(existing) = flights.get(key) {
            return (Arc::clone(existing), false);
        }

        let flight = Arc::new(Flight::new());
        flights.insert(key.clone(), Arc::clone(&flight));
        (flight, true)
    }
}

/// Releases a claim when the owner finishes or unwinds.
struct FlightGuard<'a, K: Eq + Hash, T> {
    registry: &'a InFlightRegistry<K, T>,
    key: Option<K>,
    flight: Arc<Flight<T>>,
    outcome: Option<CacheResult<T>>,
}

impl<K: Eq + Hash, T> Drop for FlightGuard<'_, K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.flights.lock().remove(&key);
        }
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(CacheError::generation("generation was abandoned")));
        self.flight.publish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_single_caller_runs_work() {
        let registry: InFlightRegistry<&str, u32> = InFlightRegistry::new();
        assert_eq!(registry.run("k", || Ok(7)).unwrap(), 7);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_concurrent_callers_share_one_run() {
        let registry: InFlightRegistry<&str, u32> = InFlightRegistry::new();
        let runs = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.run("k", || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(200));
                            Ok(42)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(42))));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_failure_is_shared_then_cleared() {
        let registry: InFlightRegistry<&str, u32> = InFlightRegistry::new();
        let barrier = Barrier::new(4);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.run("k", || {
                            std::thread::sleep(Duration::from_millis(200));
                            Err(CacheError::generation("boom"))
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(CacheError::GenerationFailure(_))))
        );
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.run("k", || Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_panicking_work_releases_key() {
        let registry: InFlightRegistry<&str, u32> = InFlightRegistry::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.run("k", || panic!("resizer exploded"))
        }));

        assert!(outcome.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_distinct_keys_run_independently() {
        let registry: InFlightRegistry<&str, &str> = InFlightRegistry::new();
        let inner = registry.run("outer", || {
            assert_eq!(registry.len(), 1);
            registry.run("inner", || Ok("inner"))
        });
        assert_eq!(inner.unwrap(), "inner");
        assert_eq!(registry.len(), 0);
    }
}
