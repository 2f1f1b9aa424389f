//! Lazy, single-flight materialization cache.
//!
//! Entries are keyed by `(identity, coordinate, params hash)` and die only by
//! [`MaterializationCache::collapse`] or [`MaterializationCache::invalidate`].
//!
//! Concurrent callers for one key share a single computation. Slots are
//! claimed under the store's read lock, then the in-flight map, then the entry
//! map, the same order `unregister` takes them in. A finishing computation
//! publishes its entry and retires its in-flight slot under the in-flight lock,
//! so a new caller either sees the finished entry or joins the running future.
//!
//! Each computation runs as its own task. Callers only await its result, so a
//! cancelled caller never strands the slot.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use ringcore_types::{
    Canonicalizer, Coordinate, CoordinateSignature, CoreError, Identity, JsonCanonicalizer,
    Materialized, Params, ParamsHash, Value,
};
use serde::Serialize;
use tokio::{task, time};
use tracing::{debug, info, warn};

use crate::kernel::CollapseSignal;
use crate::store::{EntryCensus, ExpressionStore, Substrate};

pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedEvaluation = Shared<BoxFuture<'static, Result<Arc<Value>, CoreError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub identity: Identity,
    pub coordinate: Coordinate,
    pub params: ParamsHash,
}

impl CacheKey {
    /// 64-bit fingerprint folded into a coordinate's neighbor signature.
    #[must_use]
    pub fn digest(&self) -> u64 {
        self.identity.value().rotate_left(29) ^ self.params.short()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub identity: Identity,
    pub coordinate: Coordinate,
    pub params_hash: ParamsHash,
    pub value: Arc<Value>,
    pub computed_at: DateTime<Utc>,
}

/// How an evaluation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    /// This caller ran the computation.
    Miss,
    /// This caller waited on another caller's computation.
    Joined,
    /// Rank outside the substrate's signature; nothing was computed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub value: Materialized,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<CacheKey>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joined: u64,
    pub skipped: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    skipped: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct CacheState {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, SharedEvaluation>>,
    counters: Counters,
}

impl CacheState {
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, SharedEvaluation>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Slot {
    Hit(Arc<Value>),
    Lead(SharedEvaluation),
    Join(SharedEvaluation),
}

/// Cheap to clone; clones share entries, in-flight work and counters.
#[derive(Clone)]
pub struct MaterializationCache {
    store: Arc<ExpressionStore>,
    canonicalizer: Arc<dyn Canonicalizer>,
    timeout: Duration,
    state: Arc<CacheState>,
}

impl MaterializationCache {
    #[must_use]
    pub fn new(store: Arc<ExpressionStore>, timeout: Duration) -> Self {
        Self::with_canonicalizer(store, timeout, Arc::new(JsonCanonicalizer))
    }

    #[must_use]
    pub fn with_canonicalizer(
        store: Arc<ExpressionStore>,
        timeout: Duration,
        canonicalizer: Arc<dyn Canonicalizer>,
    ) -> Self {
        Self {
            store,
            canonicalizer,
            timeout,
            state: Arc::new(CacheState::default()),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn key_for(&self, identity: Identity, coordinate: Coordinate, params: &Params) -> CacheKey {
        CacheKey {
            identity,
            coordinate,
            params: self.canonicalizer.hash(params),
        }
    }

    /// Materialize `identity` at `coordinate`.
    ///
    /// Returns `Materialized::Empty` when the rank is outside the substrate's
    /// signature. Failed and timed-out computations leave no entry behind.
    pub async fn evaluate(
        &self,
        identity: Identity,
        coordinate: Coordinate,
        params: &Params,
    ) -> Result<Evaluation, CoreError> {
        let key = self.key_for(identity, coordinate, params);
        let claimed = self.store.with_substrate(identity, |substrate| {
            substrate
                .signature()
                .contains(coordinate.rank())
                .then(|| self.claim(key, substrate, params))
        })?;
        let Some(slot) = claimed else {
            Counters::bump(&self.state.counters.skipped);
            debug!(%identity, %coordinate, "rank outside signature");
            return Ok(Evaluation {
                value: Materialized::Empty,
                outcome: Outcome::Skipped,
                key: None,
            });
        };

        let (shared, outcome) = match slot {
            Slot::Hit(value) => {
                Counters::bump(&self.state.counters.hits);
                debug!(%identity, %coordinate, "cache hit");
                return Ok(Evaluation {
                    value: Materialized::Value(Value::clone(&value)),
                    outcome: Outcome::Hit,
                    key: Some(key),
                });
            }
            Slot::Lead(shared) => {
                Counters::bump(&self.state.counters.misses);
                debug!(%identity, %coordinate, "cache miss");
                (shared, Outcome::Miss)
            }
            Slot::Join(shared) => {
                Counters::bump(&self.state.counters.joined);
                debug!(%identity, %coordinate, "joined in-flight evaluation");
                (shared, Outcome::Joined)
            }
        };

        let value = shared.await?;
        Ok(Evaluation {
            value: Materialized::Value(Value::clone(&value)),
            outcome,
            key: Some(key),
        })
    }

    fn claim(&self, key: CacheKey, substrate: &Arc<Substrate>, params: &Params) -> Slot {
        let mut in_flight = self.state.in_flight();
        if let Some(entry) = self.state.entries().get(&key) {
            return Slot::Hit(Arc::clone(&entry.value));
        }
        if let Some(shared) = in_flight.get(&key) {
            return Slot::Join(shared.clone());
        }

        // The task cannot retire the slot before it is inserted: that also
        // needs the in-flight lock held here.
        let handle = task::spawn(self.computation(key, Arc::clone(substrate), params.clone()));
        let identity = key.identity;
        let shared = async move {
            handle.await.unwrap_or_else(|join_error| {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(join_error) => join_error.to_string(),
                };
                Err(CoreError::ComputeError { identity, message })
            })
        }
        .boxed()
        .shared();
        in_flight.insert(key, shared.clone());
        Slot::Lead(shared)
    }

    fn computation(
        &self,
        key: CacheKey,
        substrate: Arc<Substrate>,
        params: Params,
    ) -> impl Future<Output = Result<Arc<Value>, CoreError>> + Send + 'static {
        let state = Arc::clone(&self.state);
        let timeout = self.timeout;
        async move {
            let result = run_compute(substrate, params, timeout).await;

            let mut in_flight = state.in_flight();
            match &result {
                Ok(value) => {
                    state.entries().insert(
                        key,
                        CacheEntry {
                            identity: key.identity,
                            coordinate: key.coordinate,
                            params_hash: key.params,
                            value: Arc::clone(value),
                            computed_at: Utc::now(),
                        },
                    );
                }
                Err(CoreError::ComputeTimeout { .. }) => {
                    Counters::bump(&state.counters.timeouts);
                }
                Err(_) => Counters::bump(&state.counters.failures),
            }
            in_flight.remove(&key);
            result
        }
    }

    /// Remove every completed entry on `ring`. In-flight work is not awaited.
    pub fn collapse(&self, ring: i64) -> usize {
        let mut entries = self.state.entries();
        let before = entries.len();
        entries.retain(|key, _| key.coordinate.ring() != ring);
        let removed = before - entries.len();
        info!(ring, removed, "collapsed ring");
        removed
    }

    /// Remove every entry for `identity` across all rings.
    pub fn invalidate(&self, identity: Identity) -> usize {
        let mut entries = self.state.entries();
        let before = entries.len();
        entries.retain(|key, _| key.identity != identity);
        let removed = before - entries.len();
        info!(%identity, removed, "invalidated substrate entries");
        removed
    }

    /// XOR of the digests of every completed entry at `coordinate`, or `None`
    /// when nothing is materialized there.
    #[must_use]
    pub fn fingerprint(&self, coordinate: Coordinate) -> Option<CoordinateSignature> {
        self.state
            .entries()
            .keys()
            .filter(|key| key.coordinate == coordinate)
            .fold(None, |signature: Option<CoordinateSignature>, key| {
                Some(signature.unwrap_or_default().absorb(key.digest()))
            })
    }

    /// Distinct coordinates holding a completed entry for `identity`.
    #[must_use]
    pub fn coordinates_for(&self, identity: Identity) -> Vec<Coordinate> {
        let mut coordinates: Vec<Coordinate> = Vec::new();
        for key in self.state.entries().keys() {
            if key.identity == identity && !coordinates.contains(&key.coordinate) {
                coordinates.push(key.coordinate);
            }
        }
        coordinates
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.entries().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.entries().is_empty()
    }

    /// Completed entries plus in-flight evaluations for `identity`.
    #[must_use]
    pub fn live_entries(&self, identity: Identity) -> usize {
        let in_flight = self.state.in_flight();
        let running = in_flight.keys().filter(|k| k.identity == identity).count();
        let stored = self
            .state
            .entries()
            .keys()
            .filter(|k| k.identity == identity)
            .count();
        running + stored
    }

    #[must_use]
    pub fn entries_on_ring(&self, ring: i64) -> usize {
        self.state
            .entries()
            .keys()
            .filter(|k| k.coordinate.ring() == ring)
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let in_flight = self.state.in_flight().len();
        let entries = self.state.entries().len();
        let counters = &self.state.counters;
        CacheStats {
            entries,
            in_flight,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl EntryCensus for MaterializationCache {
    fn live_entries(&self, identity: Identity) -> usize {
        MaterializationCache::live_entries(self, identity)
    }
}

impl CollapseSignal for MaterializationCache {
    fn collapse(&self, ring: i64) -> usize {
        MaterializationCache::collapse(self, ring)
    }
}

async fn run_compute(
    substrate: Arc<Substrate>,
    params: Params,
    timeout: Duration,
) -> Result<Arc<Value>, CoreError> {
    let identity = substrate.identity();
    // The blocking task is detached on timeout; its result is dropped.
    let handle = task::spawn_blocking(move || substrate.compute(&params));

    match time::timeout(timeout, handle).await {
        Ok(Ok(Ok(value))) => Ok(Arc::new(value)),
        Ok(Ok(Err(failure))) => {
            warn!(%identity, error = %failure, "compute failed");
            Err(CoreError::ComputeError {
                identity,
                message: failure.message,
            })
        }
        Ok(Err(join_error)) => {
            let message = match join_error.try_into_panic() {
                Ok(payload) => panic_message(payload.as_ref()),
                Err(join_error) => join_error.to_string(),
            };
            warn!(%identity, %message, "compute panicked");
            Err(CoreError::ComputeError { identity, message })
        }
        Err(_) => {
            warn!(%identity, timeout_ms = timeout.as_millis(), "compute timed out");
            Err(CoreError::ComputeTimeout { identity, timeout })
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
