//! Single-flight load deduplication
//!
//! Guarantees at most one in-flight load per key within one `FlightGroup`:
//! the first caller for a key becomes the owner and runs the load; every
//! concurrent caller for the same key joins the flight and receives the
//! identical (value, error) outcome. Once a flight completes it is
//! deregistered, so a strictly-later call for the same key loads afresh.
//! The group coalesces in-flight work only, it caches nothing.
//!
//! # Design
//!
//! Each flight is a one-shot broadcast cell built on `tokio::sync::watch`:
//! the owner publishes the outcome exactly once, joiners await the channel
//! rather than any lock, so flights for unrelated keys never contend. The
//! key-to-flight table is a `DashMap`; its per-entry locking covers only the
//! check-and-register step, never the load itself.
//!
//! The owner holds its table entry through a drop guard, so a flight whose
//! future is dropped mid-load (a disconnecting client, an aborted task) is
//! deregistered rather than left behind. Joiners that find the channel
//! closed without a published outcome discard the dead entry and race to
//! own a fresh flight.

use std::future::Future;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::Result;

/// Shared outcome of one deduplicated load
type Outcome<T> = Result<T>;

/// Deduplicates concurrent loads per key
pub struct FlightGroup<T: Clone> {
    /// In-flight calls; the receiver side is what joiners wait on
    calls: DashMap<String, watch::Receiver<Option<Outcome<T>>>>,
}

impl<T: Clone> Default for FlightGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FlightGroup<T> {
    /// Create an empty flight group
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Run `work` for `key`, coalescing with any in-flight call
    ///
    /// The owner executes `work` outside any lock, publishes the outcome,
    /// and deregisters the flight; joiners block until the outcome is
    /// published and return it unchanged. A joiner whose owner vanished
    /// without publishing retries as a fresh owner.
    pub async fn work<F, Fut>(&self, key: &str, work: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let tx = loop {
            match self.calls.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => {
                    // Join the in-flight call and wait off-lock.
                    let rx = entry.get().clone();
                    drop(entry);
                    if let Some(outcome) = Self::join(rx).await {
                        return outcome;
                    }
                    // The owner was dropped before publishing. Discard the
                    // dead entry if it is still registered, then race to
                    // own the retry.
                    self.calls.remove_if(key, |_, rx| rx.has_changed().is_err());
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    break tx;
                }
            }
        };

        // Deregisters the flight on every exit path, including this future
        // being dropped mid-load.
        let _guard = FlightGuard {
            calls: &self.calls,
            key,
        };

        let outcome = work().await;

        // Publish before the guard deregisters so every joiner observes the
        // result.
        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    /// Wait for an owner's published outcome; `None` if the owner was
    /// dropped without publishing
    async fn join(mut rx: watch::Receiver<Option<Outcome<T>>>) -> Option<Outcome<T>> {
        let value = rx.wait_for(Option::is_some).await.ok()?;
        value.as_ref().cloned()
    }

    /// Number of currently in-flight calls
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

/// Deregisters the owner's flight when it ends, however it ends
///
/// Drops before the owner's `watch` sender, so joiners can only observe a
/// closed channel once the dead entry is already gone from the table.
struct FlightGuard<'a, T: Clone> {
    calls: &'a DashMap<String, watch::Receiver<Option<Outcome<T>>>>,
    key: &'a str,
}

impl<T: Clone> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.calls.remove(self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_call_runs_work() {
        let flights: FlightGroup<String> = FlightGroup::new();
        let result = flights
            .work("key", || async { Ok("value".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "value");
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_coalesce_to_one_load() {
        let flights: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let flights = Arc::clone(&flights);
            let loads = Arc::clone(&loads);
            tasks.push(tokio::spawn(async move {
                flights
                    .work("key", || async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "value");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_shared_by_all_waiters() {
        let flights: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let loads = Arc::clone(&loads);
            tasks.push(tokio::spawn(async move {
                flights
                    .work("key", || async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(Error::SourceMiss("key".to_string()))
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                Err(Error::SourceMiss("key".to_string()))
            );
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_flight_deregisters() {
        let flights: FlightGroup<u32> = FlightGroup::new();
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = flights
                .work("key", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(result.unwrap(), 7);
        }
        // Sequential calls each trigger a fresh load: no caching here.
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_aborted_owner_does_not_poison_key() {
        let flights: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());

        let owner = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .work("key", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("never".to_string())
                    })
                    .await
            })
        };

        // Let the owner register its flight, then drop it mid-load.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flights.in_flight(), 1);
        owner.abort();
        assert!(owner.await.unwrap_err().is_cancelled());
        assert_eq!(flights.in_flight(), 0);

        // A fresh call must run a fresh load, not inherit the dead flight.
        let loads = AtomicUsize::new(0);
        let result = flights
            .work("key", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            })
            .await;
        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_joiner_of_aborted_owner_retries_as_owner() {
        let flights: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());

        let owner = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .work("key", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("never".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let joiner_loads = Arc::new(AtomicUsize::new(0));
        let joiner = {
            let flights = Arc::clone(&flights);
            let joiner_loads = Arc::clone(&joiner_loads);
            tokio::spawn(async move {
                flights
                    .work("key", || async {
                        joiner_loads.fetch_add(1, Ordering::SeqCst);
                        Ok("rescued".to_string())
                    })
                    .await
            })
        };

        // The joiner is waiting on the owner's flight when it vanishes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        owner.abort();
        assert!(owner.await.unwrap_err().is_cancelled());

        assert_eq!(joiner.await.unwrap().unwrap(), "rescued");
        assert_eq!(joiner_loads.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let flights: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());

        let slow = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .work("slow", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok("slow".to_string())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = flights.work("fast", || async { Ok("fast".to_string()) }).await;
        assert_eq!(fast.unwrap(), "fast");
        // The slow flight is still in the table while fast completed.
        assert_eq!(flights.in_flight(), 1);

        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }
}
