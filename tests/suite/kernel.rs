//! Kernel transition laws observed through the `Core` facade.

use ringcore_engine::Core;
use ringcore_types::CoreError;

#[test]
fn invoke_sets_rank_for_every_valid_rank() {
    let core = Core::default();
    for rank in 1..=7 {
        let before = core.current();
        let after = core.invoke(rank).expect("valid rank");
        assert_eq!(after.rank(), rank);
        assert_eq!(after.ring(), before.ring());
        assert_eq!(core.current(), after);
    }
}

#[test]
fn invalid_rank_leaves_state_untouched() {
    let core = Core::default();
    core.invoke(5).unwrap();
    for rank in [0, 8, 200] {
        assert!(matches!(
            core.invoke(rank),
            Err(CoreError::InvalidRank { rank: r, min: 1, max: 7 }) if r == rank
        ));
    }
    assert_eq!(core.current().rank(), 5);
}

#[test]
fn ascend_at_rank_three_fails() {
    let core = Core::default();
    core.invoke(3).unwrap();
    let err = core.ascend().unwrap_err();
    assert_eq!(err.code(), "PreconditionFailed");
    assert_eq!(core.current().rank(), 3);
    assert_eq!(core.current().ring(), 0);
}

#[test]
fn descend_undoes_ascend() {
    let core = Core::default();
    for _ in 0..3 {
        let top = core.invoke(7).unwrap();
        let up = core.ascend().unwrap();
        assert_eq!((up.ring(), up.rank()), (top.ring() + 1, 1));
        assert_eq!(core.descend().unwrap(), top);
        core.invoke(7).unwrap();
        core.ascend().unwrap();
    }
    assert_eq!(core.current().ring(), 3);
}

#[test]
fn descending_below_zero_is_allowed() {
    let core = Core::default();
    let down = core.descend().unwrap();
    assert_eq!((down.ring(), down.rank()), (-1, 7));
}

#[test]
fn reset_keeps_ring_and_drops_to_floor() {
    let core = Core::default();
    core.invoke(7).unwrap();
    core.ascend().unwrap();
    core.invoke(6).unwrap();
    let reset = core.reset();
    assert_eq!((reset.ring(), reset.rank()), (1, 1));
}
