//! Command surface behavior: control flow, queues, error taxonomy.

use nebulite::{ErrorCode, GlobalSpace, QueueKind, Renderer, SharedPrint};
use pretty_assertions::assert_eq;

fn engine() -> (GlobalSpace, SharedPrint) {
    let gs = GlobalSpace::new("nebulite");
    let printer = SharedPrint::new();
    gs.set_printer(Box::new(printer.clone()));
    (gs, printer)
}

#[test]
fn for_unrolls_in_order() {
    let (gs, printer) = engine();
    assert_eq!(gs.resolve_task("for v 1 3 echo $v"), ErrorCode::None);
    assert_eq!(printer.output(), "1\n2\n3\n");
}

#[test]
fn for_leaves_the_last_value_in_the_global_doc() {
    let (gs, _printer) = engine();
    assert_eq!(gs.resolve_task("for i 1 3 set-global counter $i"), ErrorCode::None);
    assert_eq!(gs.global.get("counter", 0i64), 3);
}

#[test]
fn if_dispatches_only_on_truth() {
    let (gs, printer) = engine();
    assert_eq!(gs.resolve_task("if 0 echo skipped"), ErrorCode::None);
    assert_eq!(printer.output(), "");
    assert_eq!(gs.resolve_task("if 1 echo ran"), ErrorCode::None);
    assert_eq!(printer.output(), "ran\n");
    assert_eq!(gs.resolve_task("if $(2>1) echo again"), ErrorCode::None);
    assert_eq!(printer.output(), "ran\nagain\n");
}

#[test]
fn assert_zero_is_critical_and_stops_the_queue() {
    let (gs, printer) = engine();
    gs.enqueue(QueueKind::Script, "echo before");
    gs.enqueue(QueueKind::Script, "assert 0");
    gs.enqueue(QueueKind::Script, "echo after");

    let result = gs.resolve_task_queue(QueueKind::Script);
    assert!(result.stopped_at_critical);
    assert_eq!(
        result.codes,
        vec![ErrorCode::None, ErrorCode::CriticalCustomAssert]
    );
    assert_eq!(printer.output(), "before\n", "commands after the critical one never run");
}

#[test]
fn assert_accepts_expressions() {
    let (gs, _printer) = engine();
    gs.global.set("hp", 10.0);
    assert_eq!(gs.resolve_task("assert $(global.hp)"), ErrorCode::None);
    assert_eq!(gs.resolve_task("assert $(global.hp>100)"), ErrorCode::CriticalCustomAssert);
    assert_eq!(gs.resolve_task("assert"), ErrorCode::TooFewArgs);
}

#[test]
fn return_converts_to_error_codes() {
    let (gs, _printer) = engine();
    assert_eq!(gs.resolve_task("return 0"), ErrorCode::None);
    assert_eq!(gs.resolve_task("return 1"), ErrorCode::TooFewArgs);
    assert_eq!(gs.resolve_task("return -4"), ErrorCode::CriticalCustomAssert);
    assert_eq!(gs.resolve_task("return 99"), ErrorCode::CustomError);
}

#[test]
fn eval_expands_then_redispatches() {
    let (gs, printer) = engine();
    gs.global.set("target", 7.0);
    assert_eq!(gs.resolve_task("eval echo $(1 + 1) and $(global.target)"), ErrorCode::None);
    assert_eq!(printer.output(), "2 and 7\n");
}

#[test]
fn eval_set_global_with_expression() {
    let (gs, _printer) = engine();
    gs.global.set("base", 4.0);
    assert_eq!(
        gs.resolve_task("eval set-global doubled $( $(global.base) * 2 )"),
        ErrorCode::None
    );
    assert_eq!(gs.global.get("doubled", 0i64), 8);
}

#[test]
fn wait_pauses_the_script_queue() {
    let (gs, printer) = engine();
    gs.enqueue(QueueKind::Script, "wait 2");
    gs.enqueue(QueueKind::Script, "echo resumed");

    gs.tick();
    assert_eq!(printer.output(), "", "wait is consumed and the queue pauses");
    gs.tick();
    assert_eq!(printer.output(), "", "still waiting");
    gs.tick();
    gs.tick();
    assert_eq!(printer.output(), "resumed\n");
}

#[test]
fn always_queue_repeats_without_popping() {
    let (gs, _printer) = engine();
    gs.enqueue(QueueKind::Always, "eval set-global beats $( $(global.beats) + 1 )");
    gs.tick();
    gs.tick();
    gs.tick();
    assert_eq!(gs.global.get("beats", 0i64), 3);
}

#[test]
fn unknown_command_is_critical_functioncall() {
    let (gs, _printer) = engine();
    assert_eq!(gs.resolve_task("no-such-command"), ErrorCode::CriticalFunctioncallInvalid);
}

#[test]
fn error_command_is_noncritical() {
    let (gs, _printer) = engine();
    gs.enqueue(QueueKind::Script, "error something odd");
    gs.enqueue(QueueKind::Script, "set-global after 1");
    let result = gs.resolve_task_queue(QueueKind::Script);
    assert!(!result.stopped_at_critical);
    assert_eq!(result.codes, vec![ErrorCode::CustomError, ErrorCode::None]);
    assert_eq!(gs.global.get("after", 0i64), 1);
}

#[test]
fn set_and_get_operate_on_the_global_document() {
    let (gs, _printer) = engine();
    assert_eq!(gs.resolve_task("set state.level 3"), ErrorCode::None);
    assert_eq!(gs.global.get("state.level", 0i64), 3);
    assert_eq!(gs.resolve_task("copy state backup"), ErrorCode::None);
    assert_eq!(gs.global.get("backup.level", 0i64), 3);
    assert_eq!(gs.resolve_task("delete-key state"), ErrorCode::None);
    assert_eq!(gs.global.get("state.level", -1i64), -1);
}

#[test]
fn task_load_queues_file_lines_in_order() {
    let dir = std::env::temp_dir().join("nebulite-command-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("script.txt");
    std::fs::write(&path, "echo one # trailing comment\n# full comment line\necho two\n").unwrap();

    let (gs, printer) = engine();
    assert_eq!(
        gs.resolve_task(&format!("task-load {}", path.display())),
        ErrorCode::None
    );
    gs.resolve_task_queue(QueueKind::Script);
    assert_eq!(printer.output(), "one\ntwo\n");

    assert_eq!(
        gs.resolve_task("task-load /definitely/not/here.txt"),
        ErrorCode::CriticalInvalidFile
    );
}

#[test]
fn spawn_applies_reference_overrides() {
    let dir = std::env::temp_dir().join("nebulite-command-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("wolf.jsonc");
    std::fs::write(&path, "{ \"hp\": 10, \"pos\": { \"x\": 0 } } // wolf").unwrap();

    let (gs, _printer) = engine();
    let reference = format!("{}|pos.x=120|self set marked 1", path.display());
    assert_eq!(gs.spawn(&reference), ErrorCode::None);
    let entity = gs.entities()[0].clone();
    assert_eq!(entity.doc().get("hp", 0i64), 10);
    assert_eq!(entity.doc().get("pos.x", 0i64), 120);
    assert_eq!(entity.doc().get("marked", 0i64), 1);
}

#[test]
fn renderer_commands_round_trip_through_the_headless_renderer() {
    let (gs, _printer) = engine();
    assert_eq!(gs.resolve_task("set-fps 30"), ErrorCode::None);
    assert_eq!(gs.resolve_task("set-resolution 640 480 2.0"), ErrorCode::None);
    assert_eq!(gs.resolve_task("show-fps on"), ErrorCode::None);
    assert_eq!(gs.resolve_task("move-cam 10 -5"), ErrorCode::None);
    assert_eq!(gs.resolve_task("move-cam 5 5"), ErrorCode::None);
    let cam = gs.with_renderer(|renderer| renderer.cam());
    assert_eq!(cam, (15.0, 0.0));
    assert_eq!(gs.resolve_task("set-cam 100 100"), ErrorCode::None);
    assert_eq!(gs.with_renderer(|renderer| renderer.cam()), (100.0, 100.0));
    assert_eq!(gs.resolve_task("move-cam"), ErrorCode::TooFewArgs);
}
