//! Hierarchical command dispatch.
//!
//! A [`FuncTree`] maps command names to handlers over some context type `C`
//! (the global space, an entity, ...). Trees nest through categories, chain
//! to an optional parent tree for inherited bindings, and peel leading
//! `--flag[=value]` arguments into bound variables before dispatching the
//! first positional token.
//!
//! Handlers are plain function pointers: a "module" of commands is just a
//! group of registrations, not a type hierarchy.

use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;

use crate::error::ErrorCode;

/// Handler signature: the context and the command's argv (`argv[0]` is the
/// command name itself, mirroring C conventions).
pub type Handler<C> = fn(&C, &Args<'_>) -> ErrorCode;

/// Argument view passed to handlers.
pub struct Args<'a> {
    argv: &'a [String],
}

impl Args<'_> {
    /// Total argument count including the command name.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// The command name (`argv[0]`).
    #[must_use]
    pub fn name(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// Positional argument by index (`1` is the first argument).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.argv.get(index).map(String::as_str)
    }

    /// Arguments from `from` onward, re-joined with single spaces.
    #[must_use]
    pub fn tail(&self, from: usize) -> String {
        self.argv.get(from..).unwrap_or_default().join(" ")
    }

    /// Slice of all arguments.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        self.argv
    }
}

/// Value bound to a `--flag`; the variant fixes how the text is parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

/// Shared slot a flag writes into; the registering code keeps a clone and
/// reads it after `parse_str`.
pub type VarSlot = Arc<Mutex<FlagValue>>;

/// Creates a flag slot with an initial value.
#[must_use]
pub fn var_slot(initial: FlagValue) -> VarSlot {
    Arc::new(Mutex::new(initial))
}

struct FlagSpec {
    long: String,
    short: Option<String>,
    help: String,
    slot: VarSlot,
}

enum TreeEntry<C> {
    Func { handler: Handler<C>, help: String },
    Category(FuncTree<C>),
}

/// A named dispatch table of commands and nested categories.
pub struct FuncTree<C> {
    name: String,
    entries: AHashMap<String, TreeEntry<C>>,
    flags: Vec<FlagSpec>,
    parent: Option<Arc<FuncTree<C>>>,
}

impl<C> FuncTree<C> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: AHashMap::new(),
            flags: Vec::new(),
            parent: None,
        }
    }

    /// Chains an inherited tree; lookups search this tree first, then the
    /// parent. Must be set before bindings so collisions are diagnosed.
    pub fn set_parent(&mut self, parent: Arc<Self>) {
        self.parent = Some(parent);
    }

    /// Creates a nested category at `path` (space-separated for nesting).
    ///
    /// # Panics
    /// Panics if the path is already bound to a function.
    pub fn bind_category(&mut self, path: &str) {
        let mut node = self;
        for token in path.split_whitespace() {
            let entry = node
                .entries
                .entry(token.to_string())
                .or_insert_with(|| TreeEntry::Category(Self::new(token)));
            match entry {
                TreeEntry::Category(sub) => node = sub,
                TreeEntry::Func { .. } => {
                    panic!("cannot bind category {path:?}: {token:?} is a function")
                }
            }
        }
    }

    /// Attaches a handler at `path`.
    ///
    /// # Panics
    /// Panics if the path is already bound (including through the inherited
    /// parent tree) or would shadow a category.
    pub fn bind_function(&mut self, path: &str, handler: Handler<C>, help: impl Into<String>) {
        let tokens: Vec<&str> = path.split_whitespace().collect();
        let (last, categories) = tokens.split_last().expect("empty command path");
        if categories.is_empty()
            && let Some(parent) = &self.parent
            && parent.lookup(last).is_some()
        {
            panic!("binding {path:?} would override the inherited {:?} tree", parent.name);
        }
        let mut node = self;
        for token in categories {
            match node.entries.get_mut(*token) {
                Some(TreeEntry::Category(sub)) => node = sub,
                Some(TreeEntry::Func { .. }) => {
                    panic!("cannot descend into function {token:?} binding {path:?}")
                }
                None => panic!("unknown category {token:?} binding {path:?}"),
            }
        }
        match node.entries.get(*last) {
            None => {
                node.entries.insert(
                    (*last).to_string(),
                    TreeEntry::Func {
                        handler,
                        help: help.into(),
                    },
                );
            }
            Some(TreeEntry::Category(_)) => panic!("{path:?} would shadow a category"),
            Some(TreeEntry::Func { .. }) => panic!("{path:?} is already bound"),
        }
    }

    /// Registers a `--long` / `-short` flag writing into `slot`.
    pub fn bind_variable(&mut self, slot: VarSlot, long: &str, short: Option<&str>, help: &str) {
        assert!(
            !self.flags.iter().any(|flag| flag.long == long),
            "flag --{long} is already bound"
        );
        self.flags.push(FlagSpec {
            long: long.to_string(),
            short: short.map(str::to_string),
            help: help.to_string(),
            slot,
        });
    }

    /// Splits a command line on whitespace and dispatches it.
    ///
    /// The first token is the tree identifier (binary name, `self`, ...) and
    /// is stripped before flag parsing and lookup. An empty line is a no-op.
    pub fn parse_str(&self, ctx: &C, line: &str) -> ErrorCode {
        let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if argv.len() <= 1 {
            return ErrorCode::None;
        }
        self.dispatch(ctx, &argv[1..])
    }

    fn dispatch(&self, ctx: &C, rest: &[String]) -> ErrorCode {
        let mut index = 0;
        while index < rest.len() {
            let arg = &rest[index];
            if !arg.starts_with('-') || arg == "-" {
                break;
            }
            if !self.apply_flag(arg) {
                log::warn!("{}: unknown argument {arg:?}", self.name);
                return ErrorCode::UnknownArg;
            }
            index += 1;
        }
        let Some(name) = rest.get(index) else {
            return ErrorCode::None;
        };
        match self.lookup(name) {
            Some(TreeEntry::Func { handler, .. }) => handler(ctx, &Args { argv: &rest[index..] }),
            Some(TreeEntry::Category(sub)) => sub.dispatch(ctx, &rest[index + 1..]),
            None => {
                log::warn!("{}: function {name:?} not found", self.name);
                ErrorCode::CriticalFunctioncallInvalid
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&TreeEntry<C>> {
        self.entries
            .get(name)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.lookup(name)))
    }

    fn apply_flag(&self, arg: &str) -> bool {
        let (body, explicit) = {
            let stripped = arg.trim_start_matches('-');
            match stripped.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (stripped, None),
            }
        };
        let long_form = arg.starts_with("--");
        let Some(spec) = self.flags.iter().find(|flag| {
            if long_form {
                flag.long == body
            } else {
                flag.short.as_deref() == Some(body)
            }
        }) else {
            return false;
        };
        let mut slot = spec.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = match &*slot {
            FlagValue::Bool(_) => FlagValue::Bool(explicit.is_none_or(|value| value != "false")),
            FlagValue::Int(old) => {
                FlagValue::Int(explicit.and_then(|value| value.parse().ok()).unwrap_or(*old))
            }
            FlagValue::Str(_) => FlagValue::Str(explicit.unwrap_or("true").to_string()),
        };
        true
    }

    /// Sorted listing of bound functions with their help lines.
    #[must_use]
    pub fn help_text(&self) -> String {
        let mut lines = Vec::new();
        for flag in &self.flags {
            let short = flag
                .short
                .as_deref()
                .map(|s| format!(", -{s}"))
                .unwrap_or_default();
            lines.push(format!("  --{}{short:<4} {}", flag.long, flag.help));
        }
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        for name in names {
            match &self.entries[name] {
                TreeEntry::Func { help, .. } => lines.push(format!("  {name:<24} {help}")),
                TreeEntry::Category(sub) => {
                    lines.push(format!("  {name:<24} ({} subcommands)", sub.entries.len()));
                }
            }
        }
        format!("Help for {}:\n{}", self.name, lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &(), _: &Args<'_>) -> ErrorCode {
        ErrorCode::None
    }

    fn too_few(_: &(), _: &Args<'_>) -> ErrorCode {
        ErrorCode::TooFewArgs
    }

    #[test]
    fn dispatches_by_first_positional_token() {
        let mut tree = FuncTree::new("test");
        tree.bind_function("go", ok, "do nothing");
        assert_eq!(tree.parse_str(&(), "bin go"), ErrorCode::None);
        assert_eq!(
            tree.parse_str(&(), "bin missing"),
            ErrorCode::CriticalFunctioncallInvalid
        );
    }

    #[test]
    fn empty_line_is_a_noop() {
        let tree: FuncTree<()> = FuncTree::new("test");
        assert_eq!(tree.parse_str(&(), ""), ErrorCode::None);
        assert_eq!(tree.parse_str(&(), "bin"), ErrorCode::None);
    }

    #[test]
    fn categories_nest() {
        let mut tree = FuncTree::new("test");
        tree.bind_category("render");
        tree.bind_function("render cam", ok, "camera");
        assert_eq!(tree.parse_str(&(), "bin render cam"), ErrorCode::None);
    }

    #[test]
    fn flags_fill_bound_slots() {
        let mut tree = FuncTree::new("test");
        let verbose = var_slot(FlagValue::Bool(false));
        let level = var_slot(FlagValue::Int(0));
        tree.bind_variable(Arc::clone(&verbose), "verbose", Some("v"), "chatty output");
        tree.bind_variable(Arc::clone(&level), "level", None, "detail level");
        tree.bind_function("go", ok, "");
        assert_eq!(tree.parse_str(&(), "bin -v --level=3 go"), ErrorCode::None);
        assert_eq!(*verbose.lock().unwrap(), FlagValue::Bool(true));
        assert_eq!(*level.lock().unwrap(), FlagValue::Int(3));
    }

    #[test]
    fn unknown_flag_is_reported() {
        let mut tree = FuncTree::new("test");
        tree.bind_function("go", ok, "");
        assert_eq!(tree.parse_str(&(), "bin --nope go"), ErrorCode::UnknownArg);
    }

    #[test]
    fn parent_chaining_and_shadow_detection() {
        let mut parent = FuncTree::new("parent");
        parent.bind_function("inherited", too_few, "");
        let parent = Arc::new(parent);
        let mut child = FuncTree::new("child");
        child.set_parent(Arc::clone(&parent));
        child.bind_function("own", ok, "");
        assert_eq!(child.parse_str(&(), "bin inherited"), ErrorCode::TooFewArgs);
        assert_eq!(child.parse_str(&(), "bin own"), ErrorCode::None);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            child.bind_function("inherited", ok, "");
        }));
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn double_binding_panics() {
        let mut tree: FuncTree<()> = FuncTree::new("test");
        tree.bind_function("go", ok, "");
        tree.bind_function("go", ok, "");
    }
}
