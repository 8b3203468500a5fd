//! Bus semantics: one-frame delay, topic matching, local rules, NaN policy.

use std::sync::atomic::Ordering;

use nebulite::{ErrorCode, GlobalSpace, NoPrint, QueueKind};
use pretty_assertions::assert_eq;

fn engine() -> GlobalSpace {
    let gs = GlobalSpace::new("nebulite");
    gs.set_printer(Box::new(NoPrint));
    gs
}

#[test]
fn broadcast_reaches_listeners_one_frame_later() {
    let gs = engine();
    assert_eq!(gs.spawn(r#"{ "listens": ["tick"], "count": 0 }"#), ErrorCode::None);
    assert_eq!(
        gs.spawn(
            r#"{ "invokes": [ { "topic": "tick", "logicalArg": "1", "exprs": ["other.count += 1"] } ] }"#,
        ),
        ErrorCode::None
    );
    let listener = gs.entities()[0].clone();

    gs.tick();
    assert_eq!(
        listener.doc().get("count", 0i64),
        0,
        "frame 1 only publishes; nothing is visible yet"
    );
    assert_eq!(gs.bus.published_on("tick"), 1);

    // updates land on frames 2..6
    for _ in 0..5 {
        gs.tick();
    }
    assert_eq!(listener.doc().get("count", 0i64), 5);
}

#[test]
fn empty_topic_rules_never_reach_other_entities() {
    let gs = engine();
    assert_eq!(gs.spawn(r#"{ "listens": ["all", ""], "hit": 0 }"#), ErrorCode::None);
    assert_eq!(
        gs.spawn(
            r#"{ "x": 12, "invokes": [ { "topic": "", "logicalArg": "1", "exprs": ["other.hit += 1", "self.me += 1"] } ] }"#,
        ),
        ErrorCode::None
    );
    let bystander = gs.entities()[0].clone();
    let owner = gs.entities()[1].clone();

    for _ in 0..4 {
        gs.tick();
    }
    assert_eq!(bystander.doc().get("hit", 0i64), 0);
    assert_eq!(gs.bus.published_on(""), 0);
    // local rules run with other = self, every frame
    assert_eq!(owner.doc().get("me", 0i64), 4);
    assert_eq!(owner.doc().get("hit", 0i64), 4);
}

#[test]
fn local_rule_applies_only_while_predicate_holds() {
    let gs = engine();
    gs.spawn(
        r#"{ "x": 12, "invokes": [ { "topic": "", "logicalArg": "self.x > 10", "exprs": ["self.x = 0"] } ] }"#,
    );
    let entity = gs.entities()[0].clone();

    gs.tick();
    assert_eq!(entity.doc().get("x", -1.0), 0.0);

    entity.doc().set("x", 5.0);
    gs.tick();
    assert_eq!(entity.doc().get("x", -1.0), 5.0, "predicate is false at x=5");
}

#[test]
fn self_match_is_suppressed_for_broadcast_rules() {
    let gs = engine();
    gs.spawn(
        r#"{
            "listens": ["tick"],
            "count": 0,
            "invokes": [ { "topic": "tick", "logicalArg": "1", "exprs": ["other.count += 1"] } ]
        }"#,
    );
    let entity = gs.entities()[0].clone();
    for _ in 0..3 {
        gs.tick();
    }
    assert_eq!(entity.doc().get("count", 0i64), 0, "an entity never matches its own rule");
}

#[test]
fn nan_predicate_poisons_the_rule_until_reload() {
    let gs = engine();
    gs.spawn(
        r#"{
            "flag": "soon",
            "hits": 0,
            "invokes": [ { "topic": "", "logicalArg": "$(self.flag)", "exprs": ["self.hits += 1"] } ]
        }"#,
    );
    let entity = gs.entities()[0].clone();

    for _ in 0..3 {
        gs.tick();
    }
    assert_eq!(entity.doc().get("hits", 0i64), 0, "NaN predicate stays false");

    entity.doc().set("flag", 1i64);
    gs.tick();
    assert_eq!(entity.doc().get("hits", 0i64), 0, "still poisoned without a reload");

    entity.flags.reload_rules.store(true, Ordering::Relaxed);
    gs.tick();
    assert_eq!(entity.doc().get("hits", 0i64), 1, "reload recompiles and re-enables the rule");
}

#[test]
fn functioncalls_reach_all_three_domains() {
    let gs = engine();
    gs.spawn(r#"{ "listens": ["ping"] }"#);
    gs.spawn(
        r#"{
            "invokes": [ {
                "topic": "ping",
                "logicalArg": "1",
                "exprs": ["other.seen = 1"],
                "functioncalls_global": ["set-global pinged 1"],
                "functioncalls_self": ["set fired 1"],
                "functioncalls_other": ["set noticed 1"]
            } ]
        }"#,
    );
    let listener = gs.entities()[0].clone();
    let owner = gs.entities()[1].clone();

    gs.tick();
    gs.tick();

    assert_eq!(listener.doc().get("seen", 0i64), 1);
    assert_eq!(gs.global.get("pinged", 0i64), 1, "global calls drain through the internal queue");
    assert_eq!(owner.doc().get("fired", 0i64), 1);
    assert_eq!(listener.doc().get("noticed", 0i64), 1);
}

#[test]
fn deleted_entities_leave_at_end_of_frame() {
    let gs = engine();
    gs.spawn(r#"{ "name": "temp" }"#);
    let entity = gs.entities()[0].clone();
    assert_eq!(entity.parse_str("self delete"), ErrorCode::None);
    assert_eq!(gs.entities().len(), 1, "removal waits for the frame boundary");
    gs.tick();
    assert_eq!(gs.entities().len(), 0);
}

#[test]
fn env_deload_clears_scene_and_bus() {
    let gs = engine();
    gs.spawn(r#"{ "invokes": [ { "topic": "t", "logicalArg": "1", "exprs": ["self.a = 1"] } ] }"#);
    gs.tick();
    assert_eq!(gs.bus.published_on("t"), 1);
    gs.resolve_task_queue(QueueKind::Script);
    gs.env_deload();
    assert_eq!(gs.entities().len(), 0);
    assert_eq!(gs.bus.published_on("t"), 0);
}
