//! The `nebulite` binary.
//!
//! Arguments form the first script command (`nebulite task-load intro.txt`),
//! which is queued and then drained by the frame loop. With no arguments the
//! engine still runs frames until an `exit` command arrives from a rule or
//! task file.

use std::process::ExitCode;

use nebulite::GlobalSpace;

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
        .ok();

    let mut args = std::env::args();
    let bin_name = args
        .next()
        .map(|raw| {
            std::path::Path::new(&raw)
                .file_name()
                .map_or_else(|| raw.clone(), |name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "nebulite".to_string());

    let gs = GlobalSpace::new(bin_name);
    let command: Vec<String> = args.collect();
    if !command.is_empty() {
        gs.enqueue(nebulite::QueueKind::Script, command.join(" "));
    }

    // run frames until a script asks to exit, or until a headless batch run
    // (no scene, no queued work) has nothing left to do
    loop {
        gs.tick();
        if gs.quit_requested() {
            break;
        }
        if gs.entities().is_empty() && !gs.has_pending_tasks() {
            break;
        }
        gs.pace();
    }

    ExitCode::SUCCESS
}
