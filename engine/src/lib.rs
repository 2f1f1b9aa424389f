//! Evaluation engine for ringcore.
//!
//! This crate holds everything with state: the kernel state machine, the
//! substrate store, the single-flight materialization cache, the lens registry
//! and the neighbor overlay, tied together by [`Core`].

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod cache;
mod kernel;
mod lens;
mod neighbors;
mod runtime;
mod store;

pub use cache::{
    CacheEntry, CacheKey, CacheStats, DEFAULT_COMPUTE_TIMEOUT, Evaluation, MaterializationCache,
    Outcome,
};
pub use kernel::{CollapseSignal, StateMachine};
pub use lens::{ColorLens, ForceLens, FrequencyLens, Lens, LensContext, LensRegistry};
pub use neighbors::{
    ChangeKind, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_NEIGHBORS, NeighborIndex, NeighborMessage,
    RelationKind,
};
pub use runtime::{Core, CoreSettings};
pub use store::{ComputeFn, EntryCensus, ExpressionStore, Substrate};

pub use ringcore_types as types;
