//! Lens projection and failure isolation.

use ringcore_engine::{Core, LensContext};
use ringcore_types::{
    CoreError, Identity, LensFailure, Materialized, Params, RankSignature, Value,
};
use serde_json::json;

use crate::common::square;

fn core_with_square() -> (Core, Identity) {
    let core = Core::default();
    core.install_builtin_lenses().unwrap();
    let id = core
        .register_substrate("square", square, RankSignature::new([1, 2, 3]))
        .unwrap();
    (core, id)
}

#[tokio::test]
async fn one_failing_lens_does_not_hide_the_others() {
    let (core, id) = core_with_square();
    core.register_lens("strict", |value: &Value, _: &LensContext| -> Result<Value, LensFailure> {
        if value.as_f64() == Some(16.0) {
            Err(LensFailure::new("sixteen is not allowed"))
        } else {
            Ok(value.clone())
        }
    })
    .unwrap();

    let results = core
        .apply_all_lenses(id, &Params::new().with("x", 4), LensContext::new().with("max", 32))
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert!(matches!(
        &results["strict"],
        Err(CoreError::LensError { lens, .. }) if lens == "strict"
    ));
    assert_eq!(results["color"].as_ref().unwrap()["hue"], 120.0);
    assert!(results["frequency"].is_ok());
    assert!(results["force"].is_ok());

    // Raw value is unaffected by the lens failure.
    let raw = core.evaluate(id, &Params::new().with("x", 4)).await.unwrap();
    assert_eq!(raw.value, Materialized::Value(json!(16)));
}

#[tokio::test]
async fn duplicate_lens_name_rejected() {
    let (core, _) = core_with_square();
    let err = core
        .register_lens("color", |v: &Value, _: &LensContext| -> Result<Value, LensFailure> {
            Ok(v.clone())
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateName { name } if name == "color"));
    assert!(matches!(
        core.install_builtin_lenses(),
        Err(CoreError::DuplicateName { .. })
    ));
}

#[tokio::test]
async fn lens_sees_identity_and_coordinate() {
    let (core, id) = core_with_square();
    core.register_lens("where", |_: &Value, ctx: &LensContext| -> Result<Value, LensFailure> {
        let coordinate = ctx
            .coordinate
            .ok_or_else(|| LensFailure::new("no coordinate"))?;
        Ok(json!({
            "identity": ctx.identity.map(|i| i.to_hex()),
            "ring": coordinate.ring(),
            "rank": coordinate.rank(),
        }))
    })
    .unwrap();
    core.invoke(2).unwrap();

    let out = core
        .apply_lens("where", id, &Params::new().with("x", 1), LensContext::new())
        .await
        .unwrap();
    assert_eq!(
        out,
        Materialized::Value(json!({"identity": id.to_hex(), "ring": 0, "rank": 2}))
    );
}

#[tokio::test]
async fn compute_failure_surfaces_before_lens() {
    let (core, id) = core_with_square();
    let err = core
        .apply_lens("color", id, &Params::new(), LensContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ComputeError");
}
