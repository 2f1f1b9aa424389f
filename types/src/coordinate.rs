//! Coordinates in the ring/rank address space.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const DEFAULT_MIN_RANK: u8 = 1;
pub const DEFAULT_MAX_RANK: u8 = 7;

/// Inclusive rank range shared by every coordinate of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankBounds {
    min: u8,
    max: u8,
}

impl Default for RankBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_RANK,
            max: DEFAULT_MAX_RANK,
        }
    }
}

impl RankBounds {
    pub fn new(min: u8, max: u8) -> Result<Self, CoreError> {
        if min > max {
            return Err(CoreError::InvalidRank { rank: min, min, max });
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub const fn min(self) -> u8 {
        self.min
    }

    #[must_use]
    pub const fn max(self) -> u8 {
        self.max
    }

    #[must_use]
    pub const fn contains(self, rank: u8) -> bool {
        rank >= self.min && rank <= self.max
    }

    pub fn check_rank(self, rank: u8) -> Result<u8, CoreError> {
        if self.contains(rank) {
            Ok(rank)
        } else {
            Err(CoreError::InvalidRank {
                rank,
                min: self.min,
                max: self.max,
            })
        }
    }

    /// Validate a coordinate that arrived from outside (e.g. deserialized).
    pub fn check(self, coordinate: Coordinate) -> Result<Coordinate, CoreError> {
        self.check_rank(coordinate.rank)?;
        Ok(coordinate)
    }

    /// Lowest rank of `ring`.
    #[must_use]
    pub const fn floor(self, ring: i64) -> Coordinate {
        Coordinate {
            ring,
            rank: self.min,
        }
    }

    /// Highest rank of `ring`.
    #[must_use]
    pub const fn ceiling(self, ring: i64) -> Coordinate {
        Coordinate {
            ring,
            rank: self.max,
        }
    }
}

/// Immutable `(ring, rank)` position.
///
/// Coordinates carry no ordering: ranks are only comparable within a ring and
/// rings are only connected through the kernel's wraparound transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    ring: i64,
    rank: u8,
}

impl Coordinate {
    pub fn new(ring: i64, rank: u8, bounds: RankBounds) -> Result<Self, CoreError> {
        bounds.check_rank(rank)?;
        Ok(Self { ring, rank })
    }

    #[must_use]
    pub const fn ring(self) -> i64 {
        self.ring
    }

    #[must_use]
    pub const fn rank(self) -> u8 {
        self.rank
    }

    /// Same ring, different rank. The rank is validated against `bounds`.
    pub fn with_rank(self, rank: u8, bounds: RankBounds) -> Result<Self, CoreError> {
        Self::new(self.ring, rank, bounds)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ring, self.rank)
    }
}

/// Ranks at which a substrate produces values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankSignature(BTreeSet<u8>);

impl RankSignature {
    #[must_use]
    pub fn new(ranks: impl IntoIterator<Item = u8>) -> Self {
        Self(ranks.into_iter().collect())
    }

    #[must_use]
    pub fn contains(&self, rank: u8) -> bool {
        self.0.contains(&rank)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    /// First rank that falls outside `bounds`, if any.
    #[must_use]
    pub fn first_outside(&self, bounds: RankBounds) -> Option<u8> {
        self.iter().find(|rank| !bounds.contains(*rank))
    }
}

impl FromIterator<u8> for RankSignature {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Order-independent fingerprint of what has been materialized at a
/// coordinate. Neighbors hold this, never the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinateSignature(u64);

impl CoordinateSignature {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Fold one more entry digest in. XOR keeps the result independent of
    /// materialization order.
    #[must_use]
    pub const fn absorb(self, digest: u64) -> Self {
        Self(self.0 ^ digest)
    }
}

impl fmt::Display for CoordinateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
