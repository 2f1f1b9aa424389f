//! Evaluation, single-flight and invalidation through the `Core` facade.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ringcore_engine::{Core, Outcome};
use ringcore_types::{CoreError, Identity, Materialized, Params, RankSignature};
use serde_json::json;
use tokio::time;

use crate::common::{at, calls, core_with_timeout, register_counted, square};

#[tokio::test]
async fn square_scenario() {
    let core = Core::default();
    let id = core
        .register_substrate("square", square, RankSignature::new([3]))
        .unwrap();
    assert_eq!(id, Identity::derive("square"));
    let params = Params::new().with("x", 5);

    core.invoke(3).unwrap();
    let eval = core.evaluate(id, &params).await.unwrap();
    assert_eq!(eval.value, Materialized::Value(json!(25)));

    core.invoke(2).unwrap();
    let eval = core.evaluate(id, &params).await.unwrap();
    assert_eq!(eval.value, Materialized::Empty);
}

#[tokio::test]
async fn duplicate_registration_fails() {
    let core = Core::default();
    core.register_substrate("square", square, RankSignature::new([3]))
        .unwrap();
    let err = core
        .register_substrate("square", square, RankSignature::new([4]))
        .unwrap_err();
    match err {
        CoreError::DuplicateIdentity { name, existing, .. } => {
            assert_eq!(name, "square");
            assert_eq!(existing, "square");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn evaluation_is_idempotent() {
    let core = Core::default();
    let (id, counter) = register_counted(&core, "square", [1], Duration::ZERO);
    let params = Params::new().with("x", 7);

    let first = core.evaluate(id, &params).await.unwrap();
    for _ in 0..5 {
        let again = core.evaluate(id, &params).await.unwrap();
        assert_eq!(again.value, first.value);
        assert_eq!(again.outcome, Outcome::Hit);
    }
    assert_eq!(calls(&counter), 1);
}

#[tokio::test]
async fn collapse_is_ring_scoped() {
    let core = Core::default();
    let (id, counter) = register_counted(&core, "square", 1..=7, Duration::ZERO);
    let params = Params::new().with("x", 2);

    for ring in [4, 5, 6] {
        core.evaluate_at(id, at(ring, 2), &params).await.unwrap();
    }
    assert_eq!(core.collapse(5), 1);

    let kept = core.evaluate_at(id, at(4, 2), &params).await.unwrap();
    assert_eq!(kept.outcome, Outcome::Hit);
    let kept = core.evaluate_at(id, at(6, 2), &params).await.unwrap();
    assert_eq!(kept.outcome, Outcome::Hit);
    let gone = core.evaluate_at(id, at(5, 2), &params).await.unwrap();
    assert_eq!(gone.outcome, Outcome::Miss);
    assert_eq!(calls(&counter), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_compute_once() {
    let core = Arc::new(Core::default());
    let (id, counter) = register_counted(&core, "slow", [1], Duration::from_millis(150));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                core.evaluate(id, &Params::new().with("x", 3)).await
            })
        })
        .collect();

    for handle in handles {
        let eval = handle.await.unwrap().unwrap();
        assert_eq!(eval.value, Materialized::Value(json!(9)));
    }
    assert_eq!(calls(&counter), 1);
    let stats = core.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.misses + stats.joined + stats.hits, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_run_in_parallel() {
    let core = Arc::new(Core::default());
    let (id, counter) = register_counted(&core, "slow", [1], Duration::from_millis(200));

    let started = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|x| {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.evaluate(id, &Params::new().with("x", x)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(calls(&counter), 4);
    assert!(started.elapsed() < Duration::from_millis(700));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_writes_nothing() {
    let core = core_with_timeout(Duration::from_millis(40));
    let (id, counter) = register_counted(&core, "sluggish", [1], Duration::from_millis(250));

    let err = core
        .evaluate(id, &Params::new().with("x", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ComputeTimeout { identity, .. } if identity == id));
    assert!(core.cache().is_empty());

    // The next call computes again rather than finding a stale entry.
    let err = core
        .evaluate(id, &Params::new().with("x", 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ComputeTimeout");
    assert_eq!(calls(&counter), 2);
}

#[tokio::test]
async fn unregister_is_blocked_until_invalidate() {
    let core = Core::default();
    let (id, _) = register_counted(&core, "square", 1..=7, Duration::ZERO);
    for rank in [1, 2] {
        core.invoke(rank).unwrap();
        core.evaluate(id, &Params::new().with("x", 1)).await.unwrap();
    }

    let err = core.unregister_substrate(id).unwrap_err();
    assert!(matches!(err, CoreError::InUse { live_entries: 2, .. }));

    assert_eq!(core.invalidate(id), 2);
    core.unregister_substrate(id).unwrap();
    assert!(!core.store().contains(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_leader_still_frees_the_substrate() {
    let core = Core::default();
    let (id, counter) = register_counted(&core, "slow", [1], Duration::from_millis(100));

    let abandoned = time::timeout(
        Duration::from_millis(10),
        core.evaluate(id, &Params::new().with("x", 4)),
    )
    .await;
    assert!(abandoned.is_err());

    time::sleep(Duration::from_millis(300)).await;
    let stats = core.cache_stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.entries, 1);
    assert_eq!(calls(&counter), 1);

    assert_eq!(core.invalidate(id), 1);
    core.unregister_substrate(id).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_entry_survives_collapse_until_the_next_one() {
    let core = Arc::new(Core::default());
    let (id, _) = register_counted(&core, "slow", [1], Duration::from_millis(150));

    let pending = {
        let core = Arc::clone(&core);
        tokio::spawn(async move { core.evaluate(id, &Params::new().with("x", 2)).await })
    };
    time::sleep(Duration::from_millis(30)).await;
    assert_eq!(core.collapse(0), 0);

    let eval = pending.await.unwrap().unwrap();
    assert_eq!(eval.value, Materialized::Value(json!(4)));
    assert_eq!(core.cache().entries_on_ring(0), 1);

    assert_eq!(core.collapse(0), 1);
    assert!(core.cache().is_empty());
}
