//! Parallel batch application: atomic read-modify-writes across workers.

use nebulite::{ErrorCode, GlobalSpace, NoPrint, PAIR_BATCH_SIZE};
use pretty_assertions::assert_eq;

#[test]
fn a_thousand_pairs_increment_exactly() {
    let gs = GlobalSpace::new("nebulite");
    gs.set_printer(Box::new(NoPrint));

    assert_eq!(
        gs.spawn(
            r#"{ "invokes": [ { "topic": "hit", "logicalArg": "1", "exprs": ["global.hits += 1"] } ] }"#,
        ),
        ErrorCode::None
    );
    for _ in 0..1000 {
        assert_eq!(gs.spawn(r#"{ "listens": ["hit"] }"#), ErrorCode::None);
    }

    // frame 1 publishes, frame 2 matches 1000 listeners and applies across
    // ceil(1000 / PAIR_BATCH_SIZE) parallel batches
    gs.tick();
    gs.tick();

    assert!(1000 / PAIR_BATCH_SIZE >= 2, "the scenario must span several batches");
    assert_eq!(gs.global.get("hits", 0.0), 1000.0);
}

#[test]
fn per_listener_writes_do_not_interfere() {
    let gs = GlobalSpace::new("nebulite");
    gs.set_printer(Box::new(NoPrint));

    gs.spawn(
        r#"{ "invokes": [ { "topic": "mark", "logicalArg": "1", "exprs": ["other.marked += 1", "global.total += 1"] } ] }"#,
    );
    for _ in 0..300 {
        gs.spawn(r#"{ "listens": ["mark"], "marked": 0 }"#);
    }

    gs.tick();
    gs.tick();

    for entity in gs.entities().iter().skip(1) {
        assert_eq!(entity.doc().get("marked", 0i64), 1);
    }
    assert_eq!(gs.global.get("total", 0.0), 300.0);
}
