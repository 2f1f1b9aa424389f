//! Lenses: named, pure transforms applied to a materialized value.
//!
//! A lens never sees the cache and never stores its output. A failing or
//! panicking lens is reported for that lens alone.

mod builtins;

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use ringcore_types::{Coordinate, CoreError, Identity, LensFailure, Value};
use serde_json::Map;
use tracing::{info, warn};

pub use builtins::{ColorLens, ForceLens, FrequencyLens};

use crate::cache::panic_message;

/// Read-only facts a lens may use alongside the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LensContext {
    pub coordinate: Option<Coordinate>,
    pub identity: Option<Identity>,
    /// Caller-supplied knobs, e.g. `min`/`max` for `color`.
    pub attributes: Map<String, Value>,
}

impl LensContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn at(mut self, identity: Identity, coordinate: Coordinate) -> Self {
        self.identity = Some(identity);
        self.coordinate = Some(coordinate);
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }
}

pub trait Lens: Send + Sync {
    fn transform(&self, value: &Value, context: &LensContext) -> Result<Value, LensFailure>;
}

impl<F> Lens for F
where
    F: Fn(&Value, &LensContext) -> Result<Value, LensFailure> + Send + Sync,
{
    fn transform(&self, value: &Value, context: &LensContext) -> Result<Value, LensFailure> {
        self(value, context)
    }
}

#[derive(Default)]
pub struct LensRegistry {
    lenses: RwLock<HashMap<String, Arc<dyn Lens>>>,
}

impl LensRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `color`, `frequency` and `force`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut lenses: HashMap<String, Arc<dyn Lens>> = HashMap::new();
        lenses.insert("color".to_string(), Arc::new(ColorLens));
        lenses.insert("frequency".to_string(), Arc::new(FrequencyLens));
        lenses.insert("force".to_string(), Arc::new(ForceLens));
        Self {
            lenses: RwLock::new(lenses),
        }
    }

    pub fn register<L>(&self, name: impl Into<String>, lens: L) -> Result<(), CoreError>
    where
        L: Lens + 'static,
    {
        let name = name.into();
        let mut lenses = self.lenses.write().unwrap_or_else(PoisonError::into_inner);
        if lenses.contains_key(&name) {
            return Err(CoreError::DuplicateName { name });
        }
        info!(lens = %name, "lens registered");
        lenses.insert(name, Arc::new(lens));
        Ok(())
    }

    pub fn apply(
        &self,
        name: &str,
        value: &Value,
        context: &LensContext,
    ) -> Result<Value, CoreError> {
        let lens = self
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::lens_not_found(name))?;
        run_lens(name, lens.as_ref(), value, context)
    }

    /// Run every registered lens. One lens failing does not stop the others.
    #[must_use]
    pub fn apply_all(
        &self,
        value: &Value,
        context: &LensContext,
    ) -> BTreeMap<String, Result<Value, CoreError>> {
        // Snapshot so lenses run without holding the registry lock.
        let lenses: Vec<(String, Arc<dyn Lens>)> = self
            .read()
            .iter()
            .map(|(name, lens)| (name.clone(), Arc::clone(lens)))
            .collect();

        lenses
            .into_iter()
            .map(|(name, lens)| {
                let result = run_lens(&name, lens.as_ref(), value, context);
                (name, result)
            })
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Lens>>> {
        self.lenses.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_lens(
    name: &str,
    lens: &dyn Lens,
    value: &Value,
    context: &LensContext,
) -> Result<Value, CoreError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| lens.transform(value, context)));
    let message = match outcome {
        Ok(Ok(derived)) => return Ok(derived),
        Ok(Err(failure)) => failure.message,
        Err(payload) => panic_message(payload.as_ref()),
    };
    warn!(lens = %name, %message, "lens failed");
    Err(CoreError::LensError {
        lens: name.to_string(),
        message,
    })
}
