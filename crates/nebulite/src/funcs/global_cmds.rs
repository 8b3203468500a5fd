//! The top-level command surface.
//!
//! Every command the engine accepts from the command line, task files, rule
//! functioncalls, and `eval` re-dispatch is registered here over
//! [`GlobalSpace`]. Handlers are stateless function pointers; the global
//! space carries all state.

use super::{
    doc_cmds,
    tree::{Args, FuncTree},
};
use crate::{error::ErrorCode, global::GlobalSpace};

/// Builds the global command tree.
#[must_use]
pub fn build_global_tree(bin_name: &str) -> FuncTree<GlobalSpace> {
    let mut tree = FuncTree::new(bin_name);
    tree.bind_function("help", help, "list available commands");
    tree.bind_function("eval", eval, "eval <cmd...>: expand $() forms and re-dispatch");
    tree.bind_function("exit", exit, "stop the frame loop");
    tree.bind_function("wait", wait, "wait <frames>: pause the script queue");
    tree.bind_function("task-load", task_load, "task-load <file>: queue a task file");
    tree.bind_function("echo", echo, "echo <...>: print the arguments");
    tree.bind_function("error", error, "error <...>: report a custom error");
    tree.bind_function("assert", assert_cmd, "assert <expr>: fail the task queue on zero/NaN");
    tree.bind_function("return", return_cmd, "return <int>: convert to an error code");
    tree.bind_function("if", if_cmd, "if <expr> <cmd...>: conditional dispatch");
    tree.bind_function("for", for_cmd, "for <var> <start> <end> <cmd...>: unrolled repetition");
    tree.bind_function("spawn", spawn, "spawn <ref>: add an entity to the scene");
    tree.bind_function("env-load", env_load, "env-load <file>: load a scene");
    tree.bind_function("env-deload", env_deload, "clear the scene");
    tree.bind_function("set-global", set_global, "set-global <key> <value>: write the global document");
    tree.bind_function("set-seed", set_seed, "set-seed <n>: reseed the random channel");
    tree.bind_function("set-fps", set_fps, "set-fps <n>: change the target frame rate");
    tree.bind_function(
        "set-resolution",
        set_resolution,
        "set-resolution <w> <h> [scale]: resize the viewport",
    );
    tree.bind_function("show-fps", show_fps, "show-fps on|off: toggle the fps overlay");
    tree.bind_function("snapshot", snapshot, "snapshot [path]: capture the scene");
    tree.bind_function("move-cam", move_cam, "move-cam <dx> <dy>: move the camera");
    tree.bind_function("set-cam", set_cam, "set-cam <x> <y> [c]: position the camera");
    tree.bind_function("errorlog", errorlog, "errorlog on|off [file]: mirror diagnostics to a file");
    tree.bind_function("state-save", state_save, "state-save <name>: persist the current state");
    tree.bind_function("state-load", state_load, "state-load <name>: restore a saved state");
    doc_cmds::register(&mut tree);
    tree
}

fn help(gs: &GlobalSpace, _args: &Args<'_>) -> ErrorCode {
    gs.print_line(&gs.tree().help_text());
    ErrorCode::None
}

fn eval(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    // the joined string keeps "eval" as its first token, which parse_str
    // strips as the identifier, so the second token dispatches
    let expanded = gs.expand_expression(&args.tail(0));
    gs.tree().parse_str(gs, &expanded)
}

fn exit(gs: &GlobalSpace, _args: &Args<'_>) -> ErrorCode {
    gs.request_quit();
    ErrorCode::None
}

fn wait(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    match args.argc() {
        0 | 1 => ErrorCode::TooFewArgs,
        2 => {
            let frames = args
                .get(1)
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(0)
                .max(0);
            gs.set_script_wait(frames.unsigned_abs());
            ErrorCode::None
        }
        _ => ErrorCode::TooManyArgs,
    }
}

fn task_load(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let Some(path) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    let Some(text) = crate::resource::load_text(path) else {
        gs.error_line(&format!("task-load: could not open {path:?}"));
        return ErrorCode::CriticalInvalidFile;
    };
    let commands: Vec<String> = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    gs.push_script_front(commands);
    ErrorCode::None
}

fn echo(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    gs.print_line(&args.tail(1));
    ErrorCode::None
}

fn error(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    gs.error_line(&args.tail(1));
    ErrorCode::CustomError
}

fn assert_cmd(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let value = gs.eval_number(args.get(1).unwrap_or("0"));
    if value.is_nan() || value == 0.0 {
        ErrorCode::CriticalCustomAssert
    } else {
        ErrorCode::None
    }
}

fn return_cmd(_gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    args.get(1)
        .and_then(|raw| raw.parse::<i32>().ok())
        .and_then(ErrorCode::from_repr)
        .unwrap_or(ErrorCode::CustomError)
}

fn if_cmd(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    let condition = gs.eval_number(args.get(1).unwrap_or("0"));
    if condition.is_nan() || condition == 0.0 {
        return ErrorCode::None;
    }
    // keep the command name as the stripped identifier token
    gs.tree().parse_str(gs, &format!("if {}", args.tail(2)))
}

fn for_cmd(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 5 {
        return ErrorCode::TooFewArgs;
    }
    let variable = args.get(1).unwrap_or("i");
    let start = gs.eval_number(args.get(2).unwrap_or("0"));
    let end = gs.eval_number(args.get(3).unwrap_or("0"));
    if start.is_nan() || end.is_nan() {
        return ErrorCode::CustomError;
    }
    let body = args.tail(4);
    let needle = format!("${variable}");
    let mut worst = ErrorCode::None;
    let (start, end) = (start as i64, end as i64);
    for index in start..=end {
        let unrolled = body.replace(&needle, &index.to_string());
        let code = gs.tree().parse_str(gs, &format!("for {unrolled}"));
        if code.is_critical() {
            return code;
        }
        if code != ErrorCode::None {
            worst = code;
        }
    }
    worst
}

fn spawn(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    gs.spawn(&args.tail(1))
}

fn env_load(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    match args.argc() {
        0 | 1 => ErrorCode::TooFewArgs,
        2 => gs.env_load(args.get(1).unwrap_or_default()),
        _ => ErrorCode::TooManyArgs,
    }
}

fn env_deload(gs: &GlobalSpace, _args: &Args<'_>) -> ErrorCode {
    gs.env_deload();
    ErrorCode::None
}

fn set_global(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    let Some(key) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    gs.global.set_auto(key, &args.tail(2));
    ErrorCode::None
}

fn set_seed(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    match args.get(1).and_then(|raw| raw.parse::<u64>().ok()) {
        Some(seed) if args.argc() == 2 => {
            gs.set_seed(seed);
            ErrorCode::None
        }
        _ if args.argc() < 2 => ErrorCode::TooFewArgs,
        _ if args.argc() > 2 => ErrorCode::TooManyArgs,
        _ => ErrorCode::CustomError,
    }
}

fn set_fps(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    match args.get(1).and_then(|raw| raw.parse::<u32>().ok()) {
        Some(fps) if args.argc() == 2 => {
            gs.set_fps(fps);
            ErrorCode::None
        }
        _ if args.argc() < 2 => ErrorCode::TooFewArgs,
        _ if args.argc() > 2 => ErrorCode::TooManyArgs,
        _ => ErrorCode::CustomError,
    }
}

fn set_resolution(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 4 {
        return ErrorCode::TooManyArgs;
    }
    let width = args.get(1).and_then(|raw| raw.parse().ok());
    let height = args.get(2).and_then(|raw| raw.parse().ok());
    let scale = args.get(3).map_or(Some(1.0), |raw| raw.parse().ok());
    let (Some(width), Some(height), Some(scale)) = (width, height, scale) else {
        return ErrorCode::CustomError;
    };
    gs.with_renderer(|renderer| renderer.set_resolution(width, height, scale));
    ErrorCode::None
}

fn show_fps(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    let show = match args.get(1) {
        Some("on") | None => true,
        Some("off") => false,
        Some(_) => return ErrorCode::CustomError,
    };
    gs.with_renderer(|renderer| renderer.show_fps(show));
    ErrorCode::None
}

fn snapshot(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let path = args.get(1).unwrap_or("snapshot.json").to_string();
    let entities = gs.entities();
    let ok = gs.with_renderer(|renderer| renderer.snapshot(&entities, &path));
    if ok { ErrorCode::None } else { ErrorCode::SnapshotFailed }
}

fn move_cam(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 3 {
        return ErrorCode::TooManyArgs;
    }
    let dx = gs.eval_number(args.get(1).unwrap_or("0"));
    let dy = gs.eval_number(args.get(2).unwrap_or("0"));
    if dx.is_nan() || dy.is_nan() {
        return ErrorCode::CustomError;
    }
    gs.with_renderer(|renderer| renderer.move_cam(dx, dy));
    ErrorCode::None
}

fn set_cam(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 4 {
        return ErrorCode::TooManyArgs;
    }
    let x = gs.eval_number(args.get(1).unwrap_or("0"));
    let y = gs.eval_number(args.get(2).unwrap_or("0"));
    if x.is_nan() || y.is_nan() {
        return ErrorCode::CustomError;
    }
    let center = args.get(3) == Some("c");
    gs.with_renderer(|renderer| renderer.set_cam(x, y, center));
    ErrorCode::None
}

// TODO: state persistence needs a save-directory layout decision before the
// file scheme can be implemented; see the stateName plumbing in GlobalSpace.
fn state_save(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    gs.set_state_name(args.get(1).unwrap_or_default());
    ErrorCode::CriticalFunctionNotImplemented
}

fn state_load(_gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    ErrorCode::CriticalFunctionNotImplemented
}

fn errorlog(gs: &GlobalSpace, args: &Args<'_>) -> ErrorCode {
    match args.get(1) {
        Some("on") => gs.set_error_log(true, args.get(2)),
        Some("off") => gs.set_error_log(false, None),
        _ => ErrorCode::TooFewArgs,
    }
}
