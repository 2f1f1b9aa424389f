//! Registry of substrates: named compute functions with a rank signature.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ringcore_types::{ComputeFailure, CoreError, Identity, Params, RankBounds, RankSignature, Value};
use tracing::info;

/// Caller-supplied computation. Runs on the blocking pool behind a timeout.
pub type ComputeFn = Arc<dyn Fn(&Params) -> Result<Value, ComputeFailure> + Send + Sync>;

/// Counts what still references a substrate, so `unregister` can refuse.
pub trait EntryCensus {
    fn live_entries(&self, identity: Identity) -> usize;
}

/// A registered computation. Immutable once built.
pub struct Substrate {
    identity: Identity,
    name: String,
    compute: ComputeFn,
    signature: RankSignature,
    created_at: DateTime<Utc>,
}

impl Substrate {
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn signature(&self) -> &RankSignature {
        &self.signature
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run the compute function on the current thread.
    pub fn compute(&self, params: &Params) -> Result<Value, ComputeFailure> {
        (self.compute)(params)
    }
}

impl fmt::Debug for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substrate")
            .field("identity", &self.identity)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ExpressionStore {
    bounds: RankBounds,
    substrates: RwLock<HashMap<Identity, Arc<Substrate>>>,
}

impl ExpressionStore {
    #[must_use]
    pub fn new(bounds: RankBounds) -> Self {
        Self {
            bounds,
            substrates: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn bounds(&self) -> RankBounds {
        self.bounds
    }

    pub fn register<F>(
        &self,
        name: impl Into<String>,
        compute: F,
        signature: RankSignature,
    ) -> Result<Identity, CoreError>
    where
        F: Fn(&Params) -> Result<Value, ComputeFailure> + Send + Sync + 'static,
    {
        self.register_shared(name, Arc::new(compute), signature)
    }

    pub fn register_shared(
        &self,
        name: impl Into<String>,
        compute: ComputeFn,
        signature: RankSignature,
    ) -> Result<Identity, CoreError> {
        let name = name.into();
        if signature.is_empty() {
            return Err(CoreError::EmptySignature { name });
        }
        if let Some(rank) = signature.first_outside(self.bounds) {
            return Err(CoreError::InvalidRank {
                rank,
                min: self.bounds.min(),
                max: self.bounds.max(),
            });
        }

        let identity = Identity::derive(&name);
        let mut substrates = self.write();
        if let Some(existing) = substrates.get(&identity) {
            return Err(CoreError::DuplicateIdentity {
                name,
                identity,
                existing: existing.name.clone(),
            });
        }

        info!(%identity, name = %name, ranks = signature.len(), "substrate registered");
        substrates.insert(
            identity,
            Arc::new(Substrate {
                identity,
                name,
                compute,
                signature,
                created_at: Utc::now(),
            }),
        );
        Ok(identity)
    }

    pub fn get(&self, identity: Identity) -> Result<Arc<Substrate>, CoreError> {
        self.read()
            .get(&identity)
            .cloned()
            .ok_or_else(|| CoreError::substrate_not_found(identity))
    }

    /// Run `f` against the substrate while the registry read lock is held, so
    /// `unregister` cannot slip in until `f` returns.
    pub fn with_substrate<T>(
        &self,
        identity: Identity,
        f: impl FnOnce(&Arc<Substrate>) -> T,
    ) -> Result<T, CoreError> {
        let substrates = self.read();
        let substrate = substrates
            .get(&identity)
            .ok_or_else(|| CoreError::substrate_not_found(identity))?;
        Ok(f(substrate))
    }

    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Substrate>> {
        self.read()
            .get(&Identity::derive(name))
            .filter(|s| s.name == name)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.read().contains_key(&identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.read().keys().copied().collect();
        ids.sort_by_key(|id| id.value());
        ids
    }

    /// Remove a substrate that nothing references any more.
    ///
    /// Cached entries are not cleared here; call `invalidate` on the cache
    /// first. The census is consulted while the registry write lock is held.
    pub fn unregister(
        &self,
        identity: Identity,
        census: &dyn EntryCensus,
    ) -> Result<Arc<Substrate>, CoreError> {
        let mut substrates = self.write();
        if !substrates.contains_key(&identity) {
            return Err(CoreError::substrate_not_found(identity));
        }
        let live_entries = census.live_entries(identity);
        if live_entries > 0 {
            return Err(CoreError::InUse {
                identity,
                live_entries,
            });
        }
        let removed = substrates
            .remove(&identity)
            .ok_or_else(|| CoreError::substrate_not_found(identity))?;
        info!(%identity, name = %removed.name, "substrate unregistered");
        Ok(removed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Identity, Arc<Substrate>>> {
        self.substrates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Identity, Arc<Substrate>>> {
        self.substrates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExpressionStore {
    fn default() -> Self {
        Self::new(RankBounds::default())
    }
}
