//! Core domain types for ringcore.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! identities, coordinates, parameters and their canonical hashing, and the error
//! taxonomy shared by every layer.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod coordinate;
mod error;
mod ids;
mod params;

pub use coordinate::{
    Coordinate, CoordinateSignature, DEFAULT_MAX_RANK, DEFAULT_MIN_RANK, RankBounds,
    RankSignature,
};
pub use error::{ComputeFailure, CoreError, LensFailure, Missing};
pub use ids::{Identity, IdentityParseError, ParamsHash};
pub use params::{Canonicalizer, JsonCanonicalizer, Materialized, Params};

/// Payload type produced by substrates and lenses.
pub use serde_json::Value;
