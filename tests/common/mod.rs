//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ringcore_engine::{Core, CoreSettings};
use ringcore_types::{
    ComputeFailure, Coordinate, Identity, Params, RankBounds, RankSignature, Value,
};
use serde_json::json;

/// Coordinate under the default `[1, 7]` bounds.
pub fn at(ring: i64, rank: u8) -> Coordinate {
    Coordinate::new(ring, rank, RankBounds::default()).expect("rank within default bounds")
}

pub fn core_with_timeout(timeout: Duration) -> Core {
    Core::new(CoreSettings {
        compute_timeout: timeout,
        ..CoreSettings::default()
    })
}

/// `x * x`; integer input squares exactly.
pub fn square(params: &Params) -> Result<Value, ComputeFailure> {
    if let Some(x) = params.get_i64("x") {
        return x
            .checked_mul(x)
            .map(Value::from)
            .ok_or_else(|| ComputeFailure::new("overflow"));
    }
    let x = params
        .get_f64("x")
        .ok_or_else(|| ComputeFailure::new("missing x"))?;
    Ok(json!(x * x))
}

/// Register a substrate that squares `x`, counts its calls and optionally
/// sleeps first.
pub fn register_counted(
    core: &Core,
    name: &str,
    ranks: impl IntoIterator<Item = u8>,
    delay: Duration,
) -> (Identity, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let identity = core
        .register_substrate(
            name,
            move |params: &Params| {
                counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                square(params)
            },
            RankSignature::new(ranks),
        )
        .expect("register counted substrate");
    (identity, calls)
}

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
