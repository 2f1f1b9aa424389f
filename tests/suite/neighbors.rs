//! Neighbor overlay driven by real evaluations.

use std::time::Duration;

use ringcore_engine::{ChangeKind, Core, RelationKind};
use ringcore_types::{CoreError, Params};
use tokio::time::timeout;

use crate::common::{at, register_counted};

#[tokio::test]
async fn ninth_neighbor_is_rejected() {
    let core = Core::default();
    let center = at(0, 4);
    let ring: Vec<_> = (1..=8).map(|r| at(r, 4)).collect();
    core.neighbors().set_neighbors(center, ring.clone()).unwrap();

    let mut crowded = ring;
    crowded.push(at(9, 4));
    let err = core.neighbors().set_neighbors(center, crowded).unwrap_err();
    assert!(matches!(
        err,
        CoreError::TooManyNeighbors { requested: 9, max: 8, .. }
    ));
}

#[tokio::test]
async fn lost_signature_is_reconstructed_from_neighbors() {
    let core = Core::default();
    let (id, _) = register_counted(&core, "square", 1..=7, Duration::ZERO);
    let lost = at(0, 1);
    core.neighbors()
        .set_neighbors_with(
            lost,
            [(at(0, 2), RelationKind::Adjacent), (at(1, 1), RelationKind::Directed)],
        )
        .unwrap();

    core.evaluate_at(id, lost, &Params::new().with("x", 1)).await.unwrap();
    core.evaluate_at(id, lost, &Params::new().with("x", 2)).await.unwrap();
    let last = core.neighbors().signature(lost).expect("signature recorded");

    assert_eq!(core.neighbors().forget(lost), Some(last));
    assert_eq!(core.neighbors().reconstruct(lost), Some(last));
}

#[tokio::test]
async fn reconstruct_without_witnesses_is_none() {
    let core = Core::default();
    let (id, _) = register_counted(&core, "square", [1], Duration::ZERO);
    let isolated = at(3, 1);
    core.evaluate_at(id, isolated, &Params::new().with("x", 1))
        .await
        .unwrap();
    core.neighbors().forget(isolated);
    assert_eq!(core.neighbors().reconstruct(isolated), None);
}

#[tokio::test]
async fn subscribers_hear_materialize_and_invalidate() {
    let core = Core::default();
    let (id, _) = register_counted(&core, "square", [1], Duration::ZERO);
    let source = at(0, 1);
    let listener = at(0, 2);
    core.neighbors().link(source, listener, RelationKind::Directed).unwrap();
    let mut rx = core.neighbors().subscribe(listener);

    core.evaluate_at(id, source, &Params::new().with("x", 5)).await.unwrap();
    let first = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.change, ChangeKind::Materialized);
    assert_eq!(first.source, source);

    assert_eq!(core.invalidate(id), 1);
    let second = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.change, ChangeKind::Invalidated);
}

#[tokio::test]
async fn dropped_receiver_never_blocks_evaluation() {
    let core = Core::default();
    let (id, _) = register_counted(&core, "square", [1], Duration::ZERO);
    core.neighbors().set_neighbors(at(0, 1), [at(0, 2)]).unwrap();
    drop(core.neighbors().subscribe(at(0, 2)));

    for x in 0..3 {
        core.evaluate_at(id, at(0, 1), &Params::new().with("x", x))
            .await
            .unwrap();
    }
    assert_eq!(core.cache().len(), 3);
}
