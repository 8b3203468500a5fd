//! Process-wide engine state and the frame driver.
//!
//! [`GlobalSpace`] owns the global document, the document cache, the invoke
//! bus, the scene's entities, three task queues, and the top-level command
//! tree. Its `tick()` runs one frame in the fixed phase order the runtime
//! guarantees:
//!
//! 1. publish `time.*` / `random.*` into the global document
//! 2. drain the `always` queue (never cleared)
//! 3. drain the `script` queue, honoring `wait` counters
//! 4. update every entity (local rules, broadcast, listen)
//! 5. `apply_all` matched pairs in parallel batches
//! 6. drain the `internal` queue filled by rule functioncalls
//! 7. `end_frame` on the bus (next-frame rules become visible)
//! 8. render, then purge entities flagged for deletion

use std::{
    collections::VecDeque,
    fs::File,
    io::Write,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    bus::{CommandQueue, InvokeBus},
    document::{Document, DocumentCache, MemberKind},
    entity::Entity,
    error::{ErrorCode, TaskQueueResult},
    expr::{ExprContext, Expression},
    funcs::{self, FuncTree},
    io::{PrintWriter, StdPrint},
    render::{HeadlessRenderer, Renderer},
    resource,
    time::TimeKeeper,
};

/// Which task queue an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// User/script commands; honors `wait` counters; popped as executed.
    Script,
    /// Commands produced by rule functioncalls; drained after `apply_all`.
    Internal,
    /// Repeating commands; executed every frame without popping.
    Always,
}

/// The engine's root object. Owns every subsystem; passed by reference to
/// everything that needs it.
pub struct GlobalSpace {
    bin_name: String,
    state_name: Mutex<String>,
    pub global: Arc<Document>,
    pub cache: Arc<DocumentCache>,
    pub bus: Arc<InvokeBus>,
    entities: Mutex<Vec<Arc<Entity>>>,
    tasks_script: Mutex<VecDeque<String>>,
    tasks_internal: CommandQueue,
    tasks_always: Mutex<VecDeque<String>>,
    tree: Arc<FuncTree<GlobalSpace>>,
    renderer: Mutex<Option<Box<dyn Renderer>>>,
    printer: Mutex<Box<dyn PrintWriter>>,
    script_wait: AtomicU64,
    quit: AtomicBool,
    time: Mutex<TimeKeeper>,
    rng: Mutex<StdRng>,
    error_log: Mutex<Option<File>>,
}

impl GlobalSpace {
    /// Builds the engine with an empty scene. `bin_name` is prefixed onto
    /// queue commands that lack it (argv[0] convention).
    #[must_use]
    pub fn new(bin_name: impl Into<String>) -> Self {
        let bin_name = bin_name.into();
        let global = Arc::new(Document::new());
        let internal: CommandQueue = Arc::new(Mutex::new(VecDeque::new()));
        let bus = Arc::new(InvokeBus::new(Arc::clone(&global), Arc::clone(&internal)));
        Self {
            tree: Arc::new(funcs::build_global_tree(&bin_name)),
            bin_name,
            state_name: Mutex::new(String::new()),
            global,
            cache: Arc::new(DocumentCache::new()),
            bus,
            entities: Mutex::new(Vec::new()),
            tasks_script: Mutex::new(VecDeque::new()),
            tasks_internal: internal,
            tasks_always: Mutex::new(VecDeque::new()),
            renderer: Mutex::new(None),
            printer: Mutex::new(Box::new(StdPrint)),
            script_wait: AtomicU64::new(0),
            quit: AtomicBool::new(false),
            time: Mutex::new(TimeKeeper::new(60)),
            rng: Mutex::new(StdRng::from_entropy()),
            error_log: Mutex::new(None),
        }
    }

    /// The top-level command tree.
    #[must_use]
    pub fn tree(&self) -> &Arc<FuncTree<Self>> {
        &self.tree
    }

    #[must_use]
    pub fn bin_name(&self) -> &str {
        &self.bin_name
    }

    /// Name of the currently loaded state ("" when none).
    #[must_use]
    pub fn state_name(&self) -> String {
        self.state_name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_state_name(&self, name: &str) {
        *self.state_name.lock().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    /// Replaces the output sink (tests use a collecting writer).
    pub fn set_printer(&self, printer: Box<dyn PrintWriter>) {
        *self.printer.lock().unwrap_or_else(PoisonError::into_inner) = printer;
    }

    /// Writes one line of command output.
    pub fn print_line(&self, text: &str) {
        self.printer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .print_line(text);
    }

    /// Reports a diagnostic to stderr and the error log file when enabled.
    pub fn error_line(&self, text: &str) {
        eprintln!("{text}");
        if let Some(file) = self
            .error_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            && let Err(err) = writeln!(file, "{text}")
        {
            log::warn!("error log write failed: {err}");
        }
    }

    /// Enables or disables mirroring diagnostics to a file.
    pub fn set_error_log(&self, enabled: bool, path: Option<&str>) -> ErrorCode {
        let mut slot = self.error_log.lock().unwrap_or_else(PoisonError::into_inner);
        if !enabled {
            *slot = None;
            return ErrorCode::None;
        }
        let path = path.unwrap_or("errors.log");
        match File::create(resource::resolve(path)) {
            Ok(file) => {
                *slot = Some(file);
                ErrorCode::None
            }
            Err(err) => {
                log::warn!("cannot open error log {path:?}: {err}");
                ErrorCode::CriticalInvalidFile
            }
        }
    }

    /// Expression context for standalone evaluation (self = global).
    #[must_use]
    pub fn expr_ctx(&self) -> ExprContext {
        ExprContext {
            self_doc: Arc::clone(&self.global),
            global: Arc::clone(&self.global),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Expands every `$()`/`{}` form in `src` to its evaluated text.
    #[must_use]
    pub fn expand_expression(&self, src: &str) -> String {
        match Expression::compile(src, &self.expr_ctx()) {
            Ok(expr) => expr.eval(&self.global),
            Err(err) => {
                log::warn!("cannot expand {src:?}: {err}");
                src.to_string()
            }
        }
    }

    /// Evaluates `src` as a double (NaN when it is not numeric).
    #[must_use]
    pub fn eval_number(&self, src: &str) -> f64 {
        match Expression::compile(src, &self.expr_ctx()) {
            Ok(expr) => expr.eval_as_double(&self.global),
            Err(err) => {
                log::warn!("cannot evaluate {src:?}: {err}");
                f64::NAN
            }
        }
    }

    /// Constructs an entity from a reference and appends it to the scene.
    pub fn spawn(&self, reference: &str) -> ErrorCode {
        match Entity::from_ref(reference, &self.global, &self.cache) {
            Ok((entity, calls)) => {
                entity.reload_rules_now();
                self.entities
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::clone(&entity));
                for call in calls {
                    let code = entity.parse_str(&call);
                    if code != ErrorCode::None {
                        log::warn!("spawn override {call:?} returned {code}");
                    }
                }
                ErrorCode::None
            }
            Err(err) => {
                self.error_line(&format!("spawn {reference:?} failed: {err}"));
                ErrorCode::CriticalInvalidFile
            }
        }
    }

    /// Loads a scene file: `{ "entities": [<ref or inline object>, ...] }`.
    pub fn env_load(&self, path: &str) -> ErrorCode {
        let Some(text) = resource::load_text(path) else {
            return ErrorCode::CriticalInvalidFile;
        };
        let doc = match Document::from_text(&text) {
            Ok(doc) => doc,
            Err(err) => {
                self.error_line(&format!("env-load {path:?}: {err}"));
                return ErrorCode::CriticalInvalidFile;
            }
        };
        self.env_deload();
        let mut worst = ErrorCode::None;
        for index in 0..doc.member_size("entities") {
            let key = format!("entities[{index}]");
            let reference = match doc.member_check(&key) {
                MemberKind::Object => doc.serialize_key(&key).unwrap_or_default(),
                _ => doc.get(&key, String::new()),
            };
            let code = self.spawn(&reference);
            if code.is_critical() {
                worst = code;
            }
        }
        worst
    }

    /// Clears the scene and every published rule.
    pub fn env_deload(&self) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.bus.clear();
    }

    /// Snapshot of the current scene list.
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Appends a command to a queue.
    pub fn enqueue(&self, queue: QueueKind, command: impl Into<String>) {
        let command = command.into();
        match queue {
            QueueKind::Script => self
                .tasks_script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(command),
            QueueKind::Internal => self
                .tasks_internal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(command),
            QueueKind::Always => self
                .tasks_always
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(command),
        }
    }

    /// Pushes commands to the front of the script queue, preserving order.
    pub fn push_script_front(&self, commands: Vec<String>) {
        let mut queue = self.tasks_script.lock().unwrap_or_else(PoisonError::into_inner);
        for command in commands.into_iter().rev() {
            queue.push_front(command);
        }
    }

    /// Sets the script queue's wait counter (frames to pause).
    pub fn set_script_wait(&self, frames: u64) {
        self.script_wait.store(frames, Ordering::Relaxed);
    }

    /// Runs one command immediately, prefixing the binary name when missing.
    pub fn resolve_task(&self, command: &str) -> ErrorCode {
        let prefixed = self.with_bin_prefix(command);
        self.tree.parse_str(self, &prefixed)
    }

    fn with_bin_prefix(&self, command: &str) -> String {
        let prefix = format!("{} ", self.bin_name);
        if command.starts_with(&prefix) || command == self.bin_name {
            command.to_string()
        } else {
            format!("{}{command}", prefix)
        }
    }

    /// Drains a queue in FIFO order, stopping at the first critical code.
    ///
    /// The `always` queue is executed without popping; the script queue stops
    /// early while its wait counter is nonzero.
    pub fn resolve_task_queue(&self, queue: QueueKind) -> TaskQueueResult {
        let mut result = TaskQueueResult::default();
        match queue {
            QueueKind::Always => {
                let snapshot: Vec<String> = self
                    .tasks_always
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect();
                for command in snapshot {
                    if !result.record(self.resolve_task(&command)) {
                        break;
                    }
                }
            }
            QueueKind::Script => loop {
                if self.script_wait.load(Ordering::Relaxed) != 0 {
                    break;
                }
                let Some(command) = self
                    .tasks_script
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front()
                else {
                    break;
                };
                if !result.record(self.resolve_task(&command)) {
                    break;
                }
            },
            QueueKind::Internal => loop {
                let Some(command) = self
                    .tasks_internal
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front()
                else {
                    break;
                };
                if !result.record(self.resolve_task(&command)) {
                    break;
                }
            },
        }
        if let Some(code) = result.critical() {
            self.error_line(&format!(
                "task queue stopped at critical {code}; results so far: {:?}",
                result.codes
            ));
        }
        result
    }

    /// Gives access to the renderer, constructing the headless one lazily.
    pub fn with_renderer<R>(&self, f: impl FnOnce(&mut dyn Renderer) -> R) -> R {
        let mut slot = self.renderer.lock().unwrap_or_else(PoisonError::into_inner);
        let renderer = slot.get_or_insert_with(|| Box::new(HeadlessRenderer::new()));
        f(renderer.as_mut())
    }

    /// Replaces the rendering collaborator (e.g. a windowed one).
    pub fn set_renderer(&self, renderer: Box<dyn Renderer>) {
        *self.renderer.lock().unwrap_or_else(PoisonError::into_inner) = Some(renderer);
    }

    #[must_use]
    pub fn renderer_exists(&self) -> bool {
        self.renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Changes the target frame rate for pacing and the renderer.
    pub fn set_fps(&self, fps: u32) {
        self.time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_fps(fps);
        self.with_renderer(|renderer| renderer.set_fps(fps));
    }

    /// Reseeds the `random.*` channel for reproducible runs.
    pub fn set_seed(&self, seed: u64) {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
    }

    /// Requests shutdown; observed at the top of the frame loop.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Runs one frame.
    pub fn tick(&self) {
        self.cache.update();
        self.publish_frame_values();

        self.resolve_task_queue(QueueKind::Always);
        let waiting = self.script_wait.load(Ordering::Relaxed);
        if waiting > 0 {
            self.script_wait.store(waiting - 1, Ordering::Relaxed);
        } else {
            self.resolve_task_queue(QueueKind::Script);
        }

        let entities = self.entities();
        for entity in &entities {
            entity.update(&self.bus);
        }
        self.bus.apply_all();
        self.resolve_task_queue(QueueKind::Internal);
        self.bus.end_frame();

        self.render_frame(&entities);
        self.purge_deleted();
    }

    /// Runs frames until `exit` is requested, pacing to the target rate.
    pub fn run(&self) {
        while !self.quit_requested() {
            self.tick();
            self.pace();
        }
    }

    /// Sleeps out the rest of the current frame budget.
    pub fn pace(&self) {
        self.time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pace();
    }

    /// Whether any queue still holds work (including a pending `wait`).
    #[must_use]
    pub fn has_pending_tasks(&self) -> bool {
        self.script_wait.load(Ordering::Relaxed) > 0
            || !self
                .tasks_script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
            || !self
                .tasks_internal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
            || !self
                .tasks_always
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    fn publish_frame_values(&self) {
        {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            time.advance();
            let mut guard = self.global.lock();
            guard.set("time.t", time.t());
            guard.set("time.dt", time.dt());
            guard.set("time.frames", i64::try_from(time.frames()).unwrap_or(i64::MAX));
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = self.global.lock();
        for key in ["random.A", "random.B", "random.C", "random.D"] {
            guard.set(key, rng.r#gen::<f64>());
        }
    }

    fn render_frame(&self, entities: &[Arc<Entity>]) {
        let mut slot = self.renderer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(renderer) = slot.as_mut() else {
            return;
        };
        for entity in entities {
            if entity.flags.recalculate_text.swap(false, Ordering::Relaxed) {
                renderer.rasterize_text(entity);
            }
        }
        renderer.render_frame(entities, &self.global);
    }

    fn purge_deleted(&self) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entity| !entity.flags.delete_from_scene.load(Ordering::Relaxed));
    }
}

impl crate::funcs::HasDoc for GlobalSpace {
    fn target_doc(&self) -> Arc<Document> {
        Arc::clone(&self.global)
    }
}
