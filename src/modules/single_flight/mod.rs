//! In-flight request registry.
//!
//! The first caller for a key becomes the leader and runs the work on its own
//! task; later callers for the same key wait on the leader's result instead of
//! starting a second chain. The entry is removed when the work settles, so the
//! next caller after that starts fresh (usually hitting the cache).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::challenges::core::FetchError;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Whether a caller ran the work or joined someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Waiter,
}

pub struct SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<Mutex<HashMap<String, SharedResult<T>>>>,
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight_len())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Run `work` for `key` unless a flight for `key` is already running.
    ///
    /// `work` is only invoked by the leader. Every caller receives a clone of
    /// the same result, error included.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T, FetchError>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (flight, role) = {
            let mut map = match self.in_flight.lock() {
                Ok(map) => map,
                Err(_) => {
                    return (
                        Err(FetchError::Internal("in-flight registry poisoned".into())),
                        FlightRole::Leader,
                    );
                }
            };

            if let Some(existing) = map.get(key) {
                log::debug!("singleflight wait: key={}", key);
                (existing.clone(), FlightRole::Waiter)
            } else {
                log::debug!("singleflight lead: key={}", key);
                let flight = self.spawn_flight(key.to_string(), work());
                map.insert(key.to_string(), flight.clone());
                (flight, FlightRole::Leader)
            }
        };

        (flight.await, role)
    }

    fn spawn_flight<Fut>(&self, key: String, work: Fut) -> SharedResult<T>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let guard = FlightGuard {
            registry: self.in_flight.clone(),
            key,
        };
        let handle = tokio::spawn(async move {
            // Dropped when the work settles or unwinds.
            let _guard = guard;
            work.await
        });

        async move {
            handle
                .await
                .unwrap_or_else(|err| Err(FetchError::Internal(format!("flight task failed: {err}"))))
        }
        .boxed()
        .shared()
    }
}

/// Clears a flight's registry entry once its task ends, panics included.
struct FlightGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    registry: Arc<Mutex<HashMap<String, SharedResult<T>>>>,
    key: String,
}

impl<T> Drop for FlightGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Blocks until the leader's insert has released the lock.
        let mut map = match self.registry.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(&self.key);
        log::debug!("singleflight complete: key={}", self.key);
    }
}
