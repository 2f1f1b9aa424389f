use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::{Coordinate, Identity};

/// What a `NotFound` failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Substrate,
    Lens,
    CacheEntry,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Missing::Substrate => "substrate",
            Missing::Lens => "lens",
            Missing::CacheEntry => "cache entry",
        })
    }
}

/// Every failure the core can report.
///
/// `Clone`: every caller joining a shared in-flight evaluation receives the
/// error the leading caller saw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("rank {rank} is outside [{min}, {max}]")]
    InvalidRank { rank: u8, min: u8, max: u8 },

    #[error("{operation} not allowed at {coordinate}: {reason}")]
    PreconditionFailed {
        operation: &'static str,
        coordinate: Coordinate,
        reason: String,
    },

    #[error("identity {identity} for '{name}' is already taken by '{existing}'")]
    DuplicateIdentity {
        name: String,
        identity: Identity,
        existing: String,
    },

    #[error("name already registered: {name}")]
    DuplicateName { name: String },

    #[error("substrate '{name}' declares no ranks")]
    EmptySignature { name: String },

    #[error("{what} not found: {key}")]
    NotFound { what: Missing, key: String },

    #[error("substrate {identity} still referenced by {live_entries} cache entries")]
    InUse {
        identity: Identity,
        live_entries: usize,
    },

    #[error("lens '{lens}' failed: {message}")]
    LensError { lens: String, message: String },

    #[error("compute for {identity} exceeded {}ms", .timeout.as_millis())]
    ComputeTimeout {
        identity: Identity,
        timeout: Duration,
    },

    #[error("compute for {identity} failed: {message}")]
    ComputeError { identity: Identity, message: String },

    #[error("{coordinate} would have {requested} neighbors (max {max})")]
    TooManyNeighbors {
        coordinate: Coordinate,
        requested: usize,
        max: usize,
    },
}

impl CoreError {
    pub fn substrate_not_found(identity: Identity) -> Self {
        CoreError::NotFound {
            what: Missing::Substrate,
            key: identity.to_hex(),
        }
    }

    pub fn lens_not_found(name: &str) -> Self {
        CoreError::NotFound {
            what: Missing::Lens,
            key: name.to_string(),
        }
    }

    /// Stable machine-readable code for boundary responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidRank { .. } => "InvalidRank",
            CoreError::PreconditionFailed { .. } => "PreconditionFailed",
            CoreError::DuplicateIdentity { .. } => "DuplicateIdentity",
            CoreError::DuplicateName { .. } => "DuplicateName",
            CoreError::EmptySignature { .. } => "EmptySignature",
            CoreError::NotFound { .. } => "NotFound",
            CoreError::InUse { .. } => "InUse",
            CoreError::LensError { .. } => "LensError",
            CoreError::ComputeTimeout { .. } => "ComputeTimeout",
            CoreError::ComputeError { .. } => "ComputeError",
            CoreError::TooManyNeighbors { .. } => "TooManyNeighbors",
        }
    }
}

/// Failure raised by a substrate's compute function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComputeFailure {
    pub message: String,
}

impl ComputeFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised by a lens transform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LensFailure {
    pub message: String,
}

impl LensFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
