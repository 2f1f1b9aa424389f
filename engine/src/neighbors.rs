//! Per-coordinate neighbor overlay.
//!
//! Neighbors exchange signatures, never payloads. Notifications are
//! fire-and-forget over bounded channels: a full or closed channel drops the
//! message. Each neighbor keeps its last recollection of the coordinates it
//! hears about, which is what [`NeighborIndex::reconstruct`] consults.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ringcore_types::{Coordinate, CoordinateSignature, CoreError};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub const DEFAULT_MAX_NEIGHBORS: usize = 8;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Both ends list each other.
    Adjacent,
    /// Only the source lists the target; the target hears about the source.
    Directed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Materialized,
    Collapsed,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborMessage {
    pub source: Coordinate,
    pub signature: Option<CoordinateSignature>,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Copy)]
struct Recollection {
    signature: CoordinateSignature,
    seq: u64,
}

#[derive(Debug, Default)]
struct Slot {
    neighbors: HashMap<Coordinate, RelationKind>,
    /// Coordinates whose `neighbors` contain this one.
    inbound: HashSet<Coordinate>,
    signature: Option<CoordinateSignature>,
    recollections: HashMap<Coordinate, Recollection>,
    subscriber: Option<mpsc::Sender<NeighborMessage>>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.neighbors.is_empty()
            && self.inbound.is_empty()
            && self.signature.is_none()
            && self.recollections.is_empty()
            && self.subscriber.is_none()
    }
}

#[derive(Debug, Default)]
struct Overlay {
    slots: HashMap<Coordinate, Slot>,
    seq: u64,
}

impl Overlay {
    fn degree(&self, coordinate: Coordinate) -> usize {
        self.slots
            .get(&coordinate)
            .map_or(0, |slot| slot.neighbors.len())
    }

    fn has_edge(&self, from: Coordinate, to: Coordinate) -> bool {
        self.slots
            .get(&from)
            .is_some_and(|slot| slot.neighbors.contains_key(&to))
    }

    fn add_edge(&mut self, from: Coordinate, to: Coordinate, kind: RelationKind) {
        self.slots.entry(from).or_default().neighbors.insert(to, kind);
        self.slots.entry(to).or_default().inbound.insert(from);
        if kind == RelationKind::Adjacent {
            self.slots.entry(to).or_default().neighbors.insert(from, kind);
            self.slots.entry(from).or_default().inbound.insert(to);
        }
    }

    fn remove_edge(&mut self, from: Coordinate, to: Coordinate, kind: RelationKind) {
        if let Some(slot) = self.slots.get_mut(&from) {
            slot.neighbors.remove(&to);
        }
        if let Some(slot) = self.slots.get_mut(&to) {
            slot.inbound.remove(&from);
        }
        if kind == RelationKind::Adjacent {
            if let Some(slot) = self.slots.get_mut(&to)
                && slot.neighbors.get(&from) == Some(&RelationKind::Adjacent)
            {
                slot.neighbors.remove(&from);
            }
            if let Some(slot) = self.slots.get_mut(&from) {
                slot.inbound.remove(&to);
            }
        }
        self.prune(from);
        self.prune(to);
    }

    fn prune(&mut self, coordinate: Coordinate) {
        if self.slots.get(&coordinate).is_some_and(Slot::is_vacant) {
            self.slots.remove(&coordinate);
        }
    }

    /// Every adjacent target gains a back edge; none may exceed `max`.
    fn check_back_edges(
        &self,
        coordinate: Coordinate,
        edges: &[(Coordinate, RelationKind)],
        max: usize,
    ) -> Result<(), CoreError> {
        for &(target, kind) in edges {
            if kind != RelationKind::Adjacent || self.has_edge(target, coordinate) {
                continue;
            }
            let requested = self.degree(target) + 1;
            if requested > max {
                return Err(CoreError::TooManyNeighbors {
                    coordinate: target,
                    requested,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Bounded neighbor sets plus best-effort signature recall.
#[derive(Debug)]
pub struct NeighborIndex {
    max_neighbors: usize,
    channel_capacity: usize,
    overlay: Mutex<Overlay>,
}

impl NeighborIndex {
    #[must_use]
    pub fn new(max_neighbors: usize, channel_capacity: usize) -> Self {
        Self {
            max_neighbors,
            channel_capacity: channel_capacity.max(1),
            overlay: Mutex::new(Overlay::default()),
        }
    }

    #[must_use]
    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// Replace `coordinate`'s neighbor set with adjacent edges.
    pub fn set_neighbors(
        &self,
        coordinate: Coordinate,
        neighbors: impl IntoIterator<Item = Coordinate>,
    ) -> Result<(), CoreError> {
        self.set_neighbors_with(
            coordinate,
            neighbors
                .into_iter()
                .map(|neighbor| (neighbor, RelationKind::Adjacent)),
        )
    }

    /// Replace `coordinate`'s neighbor set. Self-loops are ignored and a
    /// repeated neighbor keeps its last relation kind.
    pub fn set_neighbors_with(
        &self,
        coordinate: Coordinate,
        neighbors: impl IntoIterator<Item = (Coordinate, RelationKind)>,
    ) -> Result<(), CoreError> {
        let mut wanted: HashMap<Coordinate, RelationKind> = HashMap::new();
        for (neighbor, kind) in neighbors {
            if neighbor != coordinate {
                wanted.insert(neighbor, kind);
            }
        }
        if wanted.len() > self.max_neighbors {
            return Err(CoreError::TooManyNeighbors {
                coordinate,
                requested: wanted.len(),
                max: self.max_neighbors,
            });
        }

        let mut overlay = self.overlay();
        let edges: Vec<(Coordinate, RelationKind)> = wanted.into_iter().collect();
        overlay.check_back_edges(coordinate, &edges, self.max_neighbors)?;

        let previous: Vec<(Coordinate, RelationKind)> = overlay
            .slots
            .get(&coordinate)
            .map(|slot| slot.neighbors.iter().map(|(c, k)| (*c, *k)).collect())
            .unwrap_or_default();
        for (old, kind) in previous {
            overlay.remove_edge(coordinate, old, kind);
        }
        for &(neighbor, kind) in &edges {
            overlay.add_edge(coordinate, neighbor, kind);
        }
        debug!(%coordinate, count = edges.len(), "neighbor set replaced");
        Ok(())
    }

    /// Add a single edge without touching the rest of the set.
    pub fn link(&self, from: Coordinate, to: Coordinate, kind: RelationKind) -> Result<(), CoreError> {
        if from == to {
            return Ok(());
        }
        let mut overlay = self.overlay();
        if !overlay.has_edge(from, to) {
            let requested = overlay.degree(from) + 1;
            if requested > self.max_neighbors {
                return Err(CoreError::TooManyNeighbors {
                    coordinate: from,
                    requested,
                    max: self.max_neighbors,
                });
            }
        }
        overlay.check_back_edges(from, &[(to, kind)], self.max_neighbors)?;
        overlay.add_edge(from, to, kind);
        Ok(())
    }

    #[must_use]
    pub fn neighbors_of(&self, coordinate: Coordinate) -> Vec<(Coordinate, RelationKind)> {
        self.overlay()
            .slots
            .get(&coordinate)
            .map(|slot| slot.neighbors.iter().map(|(c, k)| (*c, *k)).collect())
            .unwrap_or_default()
    }

    /// Receive notifications addressed to `coordinate`. Replaces any earlier
    /// subscription for it.
    pub fn subscribe(&self, coordinate: Coordinate) -> mpsc::Receiver<NeighborMessage> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.overlay().slots.entry(coordinate).or_default().subscriber = Some(tx);
        rx
    }

    pub fn record(&self, coordinate: Coordinate, signature: CoordinateSignature) {
        self.overlay().slots.entry(coordinate).or_default().signature = Some(signature);
    }

    #[must_use]
    pub fn signature(&self, coordinate: Coordinate) -> Option<CoordinateSignature> {
        self.overlay()
            .slots
            .get(&coordinate)
            .and_then(|slot| slot.signature)
    }

    /// Drop `coordinate`'s own signature. What neighbors remember is kept.
    pub fn forget(&self, coordinate: Coordinate) -> Option<CoordinateSignature> {
        let mut overlay = self.overlay();
        let signature = overlay
            .slots
            .get_mut(&coordinate)
            .and_then(|slot| slot.signature.take());
        overlay.prune(coordinate);
        signature
    }

    /// Coordinates the overlay currently keeps state for.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.overlay().slots.len()
    }

    /// Tell every neighbor of `coordinate` about a change. Returns how many
    /// subscribers accepted the message.
    pub fn notify(&self, coordinate: Coordinate, change: ChangeKind) -> usize {
        let mut overlay = self.overlay();
        let Some(slot) = overlay.slots.get(&coordinate) else {
            return 0;
        };
        let signature = slot.signature;
        let targets: Vec<Coordinate> = slot.neighbors.keys().copied().collect();
        overlay.seq += 1;
        let seq = overlay.seq;

        let message = NeighborMessage {
            source: coordinate,
            signature,
            change,
        };
        let mut delivered = 0;
        for target in targets {
            let slot = overlay.slots.entry(target).or_default();
            if let Some(signature) = signature {
                slot.recollections
                    .insert(coordinate, Recollection { signature, seq });
            }
            let Some(tx) = &slot.subscriber else {
                continue;
            };
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(source = %coordinate, %target, "neighbor channel full; notification dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%target, "neighbor subscriber gone");
                    slot.subscriber = None;
                }
            }
        }
        delivered
    }

    /// Best-effort recovery of `coordinate`'s signature from what its
    /// neighbors last heard. The most recent recollection wins.
    #[must_use]
    pub fn reconstruct(&self, coordinate: Coordinate) -> Option<CoordinateSignature> {
        let overlay = self.overlay();
        let recalled_by = |witness: &Coordinate| {
            overlay
                .slots
                .get(witness)
                .and_then(|slot| slot.recollections.get(&coordinate))
                .copied()
        };

        let known: Vec<Coordinate> = overlay
            .slots
            .get(&coordinate)
            .map(|slot| {
                slot.neighbors
                    .keys()
                    .chain(slot.inbound.iter())
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        let newest = known
            .iter()
            .filter_map(recalled_by)
            .max_by_key(|r| r.seq)
            .or_else(|| {
                // Edges may have been rewired since the last notification.
                overlay
                    .slots
                    .values()
                    .filter_map(|slot| slot.recollections.get(&coordinate).copied())
                    .max_by_key(|r| r.seq)
            });
        newest.map(|r| r.signature)
    }

    /// Coordinates on `ring` that carry a signature or have neighbors.
    #[must_use]
    pub fn coordinates_on_ring(&self, ring: i64) -> Vec<Coordinate> {
        self.overlay()
            .slots
            .iter()
            .filter(|(c, slot)| {
                c.ring() == ring && (slot.signature.is_some() || !slot.neighbors.is_empty())
            })
            .map(|(c, _)| *c)
            .collect()
    }

    fn overlay(&self) -> MutexGuard<'_, Overlay> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NeighborIndex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NEIGHBORS, DEFAULT_CHANNEL_CAPACITY)
    }
}
