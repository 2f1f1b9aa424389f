//! Substrates the driver registers at startup.

use anyhow::Result;
use ringcore_engine::Core;
use ringcore_types::{ComputeFailure, Params, RankSignature, Value};
use serde_json::json;

/// `x * x`, materialized at ranks 3, 5 and 7. Integers stay integers.
pub fn square(params: &Params) -> Result<Value, ComputeFailure> {
    if let Some(x) = params.get_i64("x") {
        return x
            .checked_mul(x)
            .map(Value::from)
            .ok_or_else(|| ComputeFailure::new(format!("{x} squared overflows")));
    }
    let x = params
        .get_f64("x")
        .ok_or_else(|| ComputeFailure::new("square needs a numeric 'x'"))?;
    Ok(json!(x * x))
}

/// Sum of every numeric parameter; non-numeric values are an error.
pub fn sum(params: &Params) -> Result<Value, ComputeFailure> {
    params
        .as_map()
        .iter()
        .try_fold(0.0, |acc, (key, value)| {
            value
                .as_f64()
                .map(|v| acc + v)
                .ok_or_else(|| ComputeFailure::new(format!("'{key}' is not a number")))
        })
        .map(|total| json!(total))
}

/// Splits a flat index `i` into the ring and rank it lands on with seven
/// ranks per ring.
pub fn ring_index(params: &Params) -> Result<Value, ComputeFailure> {
    let i = params
        .get_i64("i")
        .ok_or_else(|| ComputeFailure::new("ring_index needs an integer 'i'"))?;
    Ok(json!({
        "ring": i.div_euclid(7),
        "rank": i.rem_euclid(7) + 1,
    }))
}

pub fn install(core: &Core) -> Result<()> {
    core.register_substrate("square", square, RankSignature::new([3, 5, 7]))?;
    core.register_substrate("sum", sum, RankSignature::new([1, 2, 3]))?;
    let all_ranks = RankSignature::new(core.bounds().min()..=core.bounds().max());
    core.register_substrate("ring_index", ring_index, all_ranks)?;
    core.install_builtin_lenses()?;
    Ok(())
}
