//! The `Core` facade: one explicitly constructed context owning the kernel,
//! the store, the cache, the lenses and the neighbor overlay.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ringcore_config::CoreConfig;
use ringcore_types::{
    Canonicalizer, ComputeFailure, Coordinate, CoordinateSignature, CoreError, Identity,
    JsonCanonicalizer, Materialized, Params, RankBounds, RankSignature, Value,
};
use tracing::{debug, info};

use crate::cache::{CacheStats, DEFAULT_COMPUTE_TIMEOUT, Evaluation, MaterializationCache, Outcome};
use crate::kernel::StateMachine;
use crate::lens::{ColorLens, ForceLens, FrequencyLens, Lens, LensContext, LensRegistry};
use crate::neighbors::{
    ChangeKind, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_NEIGHBORS, NeighborIndex,
};
use crate::store::ExpressionStore;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSettings {
    pub bounds: RankBounds,
    pub compute_timeout: Duration,
    pub max_neighbors: usize,
    pub channel_capacity: usize,
}

impl CoreSettings {
    pub fn from_config(config: &CoreConfig) -> Result<Self, CoreError> {
        Ok(Self {
            bounds: RankBounds::new(config.kernel.min_rank, config.kernel.max_rank)?,
            compute_timeout: config.evaluation.timeout(),
            max_neighbors: config.neighbors.max_neighbors,
            channel_capacity: config.neighbors.channel_capacity,
        })
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            bounds: RankBounds::default(),
            compute_timeout: DEFAULT_COMPUTE_TIMEOUT,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// ============================================================================
// Core
// ============================================================================

/// Single-process evaluation core.
///
/// Kernel transitions and ring collapses are serialized by the kernel mutex.
/// Evaluations never hold it while computing.
pub struct Core {
    settings: CoreSettings,
    kernel: Mutex<StateMachine>,
    store: Arc<ExpressionStore>,
    cache: MaterializationCache,
    lenses: LensRegistry,
    neighbors: NeighborIndex,
}

impl Core {
    #[must_use]
    pub fn new(settings: CoreSettings) -> Self {
        Self::with_canonicalizer(settings, Arc::new(JsonCanonicalizer))
    }

    #[must_use]
    pub fn with_canonicalizer(settings: CoreSettings, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        let store = Arc::new(ExpressionStore::new(settings.bounds));
        let cache = MaterializationCache::with_canonicalizer(
            Arc::clone(&store),
            settings.compute_timeout,
            canonicalizer,
        );
        Self {
            settings,
            kernel: Mutex::new(StateMachine::new(settings.bounds)),
            store,
            cache,
            lenses: LensRegistry::new(),
            neighbors: NeighborIndex::new(settings.max_neighbors, settings.channel_capacity),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, CoreError> {
        CoreSettings::from_config(config).map(Self::new)
    }

    #[must_use]
    pub fn settings(&self) -> CoreSettings {
        self.settings
    }

    #[must_use]
    pub fn bounds(&self) -> RankBounds {
        self.settings.bounds
    }

    // ------------------------------------------------------------------------
    // Substrates
    // ------------------------------------------------------------------------

    pub fn register_substrate<F>(
        &self,
        name: impl Into<String>,
        compute: F,
        signature: RankSignature,
    ) -> Result<Identity, CoreError>
    where
        F: Fn(&Params) -> Result<Value, ComputeFailure> + Send + Sync + 'static,
    {
        self.store.register(name, compute, signature)
    }

    /// Fails with `InUse` while cached or in-flight entries remain; call
    /// [`Core::invalidate`] first.
    pub fn unregister_substrate(&self, identity: Identity) -> Result<(), CoreError> {
        self.store.unregister(identity, &self.cache).map(|_| ())
    }

    /// Drop every cached entry for `identity` and tell the affected
    /// coordinates' neighbors.
    pub fn invalidate(&self, identity: Identity) -> usize {
        let coordinates = self.cache.coordinates_for(identity);
        let removed = self.cache.invalidate(identity);
        for coordinate in coordinates {
            self.refresh_signature(coordinate);
            self.neighbors.notify(coordinate, ChangeKind::Invalidated);
        }
        removed
    }

    #[must_use]
    pub fn store(&self) -> &ExpressionStore {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Kernel
    // ------------------------------------------------------------------------

    pub fn invoke(&self, rank: u8) -> Result<Coordinate, CoreError> {
        self.kernel().invoke(rank)
    }

    pub fn ascend(&self) -> Result<Coordinate, CoreError> {
        self.kernel().ascend_ring()
    }

    pub fn descend(&self) -> Result<Coordinate, CoreError> {
        self.kernel().descend_ring()
    }

    /// Drop to the lowest rank and collapse the current ring.
    pub fn reset(&self) -> Coordinate {
        let mut kernel = self.kernel();
        kernel.reset(&|ring: i64| self.collapse_ring(ring))
    }

    #[must_use]
    pub fn current(&self) -> Coordinate {
        self.kernel().current()
    }

    /// Collapse `ring` without moving the kernel.
    pub fn collapse(&self, ring: i64) -> usize {
        let _kernel = self.kernel();
        self.collapse_ring(ring)
    }

    fn collapse_ring(&self, ring: i64) -> usize {
        let removed = self.cache.collapse(ring);
        for coordinate in self.neighbors.coordinates_on_ring(ring) {
            self.refresh_signature(coordinate);
            self.neighbors.notify(coordinate, ChangeKind::Collapsed);
        }
        removed
    }

    /// Re-derive `coordinate`'s signature from the entries it holds now. A
    /// coordinate with nothing materialized carries no signature.
    fn refresh_signature(&self, coordinate: Coordinate) -> Option<CoordinateSignature> {
        let signature = self.cache.fingerprint(coordinate);
        match signature {
            Some(signature) => self.neighbors.record(coordinate, signature),
            None => {
                self.neighbors.forget(coordinate);
            }
        }
        signature
    }

    fn kernel(&self) -> MutexGuard<'_, StateMachine> {
        self.kernel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Materialize `identity` at the kernel's current coordinate.
    pub async fn evaluate(&self, identity: Identity, params: &Params) -> Result<Evaluation, CoreError> {
        let coordinate = self.current();
        self.evaluate_at(identity, coordinate, params).await
    }

    pub async fn evaluate_at(
        &self,
        identity: Identity,
        coordinate: Coordinate,
        params: &Params,
    ) -> Result<Evaluation, CoreError> {
        let coordinate = self.settings.bounds.check(coordinate)?;
        let evaluation = self.cache.evaluate(identity, coordinate, params).await?;

        if evaluation.outcome == Outcome::Miss {
            let signature = self.refresh_signature(coordinate);
            let delivered = self.neighbors.notify(coordinate, ChangeKind::Materialized);
            debug!(%coordinate, ?signature, delivered, "materialization announced");
        }
        Ok(evaluation)
    }

    #[must_use]
    pub fn cache(&self) -> &MaterializationCache {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ------------------------------------------------------------------------
    // Lenses
    // ------------------------------------------------------------------------

    pub fn register_lens<L>(&self, name: impl Into<String>, lens: L) -> Result<(), CoreError>
    where
        L: Lens + 'static,
    {
        self.lenses.register(name, lens)
    }

    /// Install `color`, `frequency` and `force`. Names already taken are
    /// reported as `DuplicateName`.
    pub fn install_builtin_lenses(&self) -> Result<(), CoreError> {
        self.lenses.register("color", ColorLens)?;
        self.lenses.register("frequency", FrequencyLens)?;
        self.lenses.register("force", ForceLens)?;
        info!("builtin lenses installed");
        Ok(())
    }

    /// Evaluate at the current coordinate and project the result through
    /// `lens`. An `Empty` materialization passes through untouched.
    pub async fn apply_lens(
        &self,
        lens: &str,
        identity: Identity,
        params: &Params,
        context: LensContext,
    ) -> Result<Materialized, CoreError> {
        if !self.lenses.contains(lens) {
            return Err(CoreError::lens_not_found(lens));
        }
        let coordinate = self.current();
        let evaluation = self.evaluate_at(identity, coordinate, params).await?;
        let Some(value) = evaluation.value.as_value() else {
            return Ok(Materialized::Empty);
        };
        let context = context.at(identity, coordinate);
        self.lenses
            .apply(lens, value, &context)
            .map(Materialized::Value)
    }

    /// Evaluate at the current coordinate and run every lens over the result.
    /// An `Empty` materialization yields no lens results.
    pub async fn apply_all_lenses(
        &self,
        identity: Identity,
        params: &Params,
        context: LensContext,
    ) -> Result<BTreeMap<String, Result<Value, CoreError>>, CoreError> {
        let coordinate = self.current();
        let evaluation = self.evaluate_at(identity, coordinate, params).await?;
        let Some(value) = evaluation.value.as_value() else {
            return Ok(BTreeMap::new());
        };
        Ok(self
            .lenses
            .apply_all(value, &context.at(identity, coordinate)))
    }

    #[must_use]
    pub fn lenses(&self) -> &LensRegistry {
        &self.lenses
    }

    // ------------------------------------------------------------------------
    // Neighbors
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn neighbors(&self) -> &NeighborIndex {
        &self.neighbors
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreSettings::default())
    }
}
