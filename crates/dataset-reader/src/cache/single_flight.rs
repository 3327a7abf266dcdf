//! Keyed single-flight execution.
//!
//! At most one computation runs per key. Callers arriving while it runs
//! await the same shared result. The computation is spawned onto the
//! runtime, so dropping any caller (the first one included) never cancels
//! it, and its slot is released when it finishes, fails or times out.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use multidim_common::{MultidimError, MultidimResult};

type SharedResult<V> = Shared<BoxFuture<'static, MultidimResult<V>>>;

struct Flight<V> {
    id: u64,
    future: SharedResult<V>,
}

type FlightMap<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

fn lock<V>(flights: &Mutex<HashMap<String, Flight<V>>>) -> MutexGuard<'_, HashMap<String, Flight<V>>> {
    flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-key deduplication of concurrent computations.
pub struct SingleFlight<V> {
    flights: FlightMap<V>,
    next_id: AtomicU64,
    timeout: Option<Duration>,
    leaders: AtomicU64,
    joined: AtomicU64,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a group with no time bound on computations.
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout: None,
            leaders: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Bound every computation by `timeout`; overruns fail with `UpstreamTimeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Run `f` for `key` unless a computation for `key` is already in flight,
    /// in which case wait for that one instead.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> MultidimResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MultidimResult<V>> + Send + 'static,
    {
        let shared = {
            let mut flights = lock(&self.flights);

            if let Some(flight) = flights.get(key) {
                self.joined.fetch_add(1, Ordering::Relaxed);
                flight.future.clone()
            } else {
                self.leaders.fetch_add(1, Ordering::Relaxed);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = self.launch(key.to_string(), id, f());
                flights.insert(
                    key.to_string(),
                    Flight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        shared.await
    }

    fn launch<Fut>(&self, key: String, id: u64, fut: Fut) -> SharedResult<V>
    where
        Fut: Future<Output = MultidimResult<V>> + Send + 'static,
    {
        let flights = Arc::clone(&self.flights);
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(MultidimError::UpstreamTimeout(limit.as_secs())),
                },
                None => fut.await,
            };

            // A newer flight may already own the key; only remove our own.
            let mut flights = lock(&flights);
            if flights.get(&key).map(|f| f.id == id).unwrap_or(false) {
                flights.remove(&key);
            }

            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(MultidimError::Internal(format!(
                    "metadata computation aborted: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    /// Computations started so far.
    pub fn leaders(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    /// Callers that waited on another caller's computation.
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
