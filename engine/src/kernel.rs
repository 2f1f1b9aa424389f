//! Kernel state machine over the ring/rank coordinate space.
//!
//! Four transitions exist and no others:
//!
//! ```text
//! invoke(k)      (r, _)        -> (r, k)
//! ascend_ring    (r, max)      -> (r + 1, min)
//! descend_ring   (r, min)      -> (r - 1, max)
//! reset          (r, _)        -> (r, min)      + collapse(r)
//! ```
//!
//! No incremental rank step exists. Every rank change is a direct jump, and
//! the cost of a transition never depends on the path that led to it.

use ringcore_types::{Coordinate, CoreError, RankBounds};
use tracing::debug;

/// Receiver of the cache invalidation that `reset` triggers.
pub trait CollapseSignal {
    /// Drop every completed entry on `ring`. Returns how many were removed.
    fn collapse(&self, ring: i64) -> usize;
}

impl<F> CollapseSignal for F
where
    F: Fn(i64) -> usize,
{
    fn collapse(&self, ring: i64) -> usize {
        self(ring)
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    bounds: RankBounds,
    current: Coordinate,
}

impl StateMachine {
    #[must_use]
    pub fn new(bounds: RankBounds) -> Self {
        Self {
            bounds,
            current: bounds.floor(0),
        }
    }

    #[must_use]
    pub fn current(&self) -> Coordinate {
        self.current
    }

    #[must_use]
    pub fn bounds(&self) -> RankBounds {
        self.bounds
    }

    pub fn invoke(&mut self, rank: u8) -> Result<Coordinate, CoreError> {
        let next = self.current.with_rank(rank, self.bounds)?;
        Ok(self.commit("invoke", next))
    }

    pub fn ascend_ring(&mut self) -> Result<Coordinate, CoreError> {
        const OP: &str = "ascend_ring";
        if self.current.rank() != self.bounds.max() {
            return Err(self.precondition(OP, format!("rank must be {}", self.bounds.max())));
        }
        let Some(ring) = self.current.ring().checked_add(1) else {
            return Err(self.precondition(OP, "ring would overflow".to_string()));
        };
        Ok(self.commit(OP, self.bounds.floor(ring)))
    }

    pub fn descend_ring(&mut self) -> Result<Coordinate, CoreError> {
        const OP: &str = "descend_ring";
        if self.current.rank() != self.bounds.min() {
            return Err(self.precondition(OP, format!("rank must be {}", self.bounds.min())));
        }
        let Some(ring) = self.current.ring().checked_sub(1) else {
            return Err(self.precondition(OP, "ring would underflow".to_string()));
        };
        Ok(self.commit(OP, self.bounds.ceiling(ring)))
    }

    /// Return to the lowest rank of the current ring and collapse that ring.
    pub fn reset(&mut self, signal: &dyn CollapseSignal) -> Coordinate {
        let ring = self.current.ring();
        let next = self.commit("reset", self.bounds.floor(ring));
        let removed = signal.collapse(ring);
        debug!(ring, removed, "reset collapsed ring");
        next
    }

    fn commit(&mut self, operation: &'static str, next: Coordinate) -> Coordinate {
        debug_assert!(
            self.bounds.contains(next.rank()),
            "{operation} produced out-of-range rank {}",
            next.rank()
        );
        debug!(operation, from = %self.current, to = %next, "kernel transition");
        self.current = next;
        next
    }

    fn precondition(&self, operation: &'static str, reason: String) -> CoreError {
        CoreError::PreconditionFailed {
            operation,
            coordinate: self.current,
            reason,
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(RankBounds::default())
    }
}
