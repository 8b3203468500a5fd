//! The JSON-backed entity store.
//!
//! A [`Document`] is a mutable JSON-like tree addressed by dotted keys with
//! optional bracket indices (`a.b[2].c`). It is the storage layer behind
//! every entity, the global state, and cached read-only assets.
//!
//! Two properties distinguish it from a plain `serde_json::Value`:
//!
//! * **Stable double pointers.** Numeric double leaves live in
//!   reference-counted [`NumCell`]s. [`Document::stable_double`] hands the
//!   cell out; later writes to the same key go through the same cell, so
//!   compiled expressions can read live values with a single atomic load
//!   instead of a path traversal. Cells stay valid for the document's
//!   lifetime, including across [`Document::deserialize`].
//! * **Ordered object maps.** Objects preserve insertion order (serialized
//!   key order is insertion order).
//!
//! All operations take `&self`; the tree lives under one mutex. Stable-cell
//! reads and writes bypass that mutex entirely.

mod cache;
mod cell;
mod jsonc;
mod path;

pub use cache::{DocumentCache, ReadOnlyDoc};
pub use cell::NumCell;
pub use jsonc::strip_comments;
pub use path::{PathSeg, parse_path};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::error::DocError;

/// Classification returned by [`Document::member_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Absent,
    Leaf,
    Object,
    Array,
}

/// One node of the document tree.
#[derive(Debug)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    /// Double leaves always live in shared cells so a stable pointer can be
    /// handed out at any time without relocating the value.
    Double(Arc<NumCell>),
    Str(String),
    Array(Vec<Node>),
    Object(IndexMap<String, Node>),
}

impl Node {
    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Double(Arc::new(NumCell::new(n.as_f64().unwrap_or(f64::NAN))))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, item)| (key, Self::from_json(item)))
                    .collect(),
            ),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Double(cell) => serde_json::Number::from_f64(cell.get())
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), item.to_json()))
                    .collect(),
            ),
        }
    }

    /// Deep copy with fresh cells, for detaching subtrees into new documents.
    fn detached_clone(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Double(cell) => Self::Double(Arc::new(NumCell::new(cell.get()))),
            Self::Str(s) => Self::Str(s.clone()),
            Self::Array(items) => Self::Array(items.iter().map(Self::detached_clone).collect()),
            Self::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), item.detached_clone()))
                    .collect(),
            ),
        }
    }
}

/// Conversion between Rust values and document leaves.
///
/// `from_node` is lenient in the direction rules need: numeric strings parse
/// as numbers, numbers render as strings, bools coerce both ways. Container
/// nodes never convert.
pub trait DocValue: Sized {
    fn from_node(node: &Node) -> Option<Self>;
    fn into_node(self) -> Node;
}

impl DocValue for f64 {
    fn from_node(node: &Node) -> Option<Self> {
        match node {
            Node::Int(i) => Some(*i as Self),
            Node::Double(cell) => Some(cell.get()),
            Node::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Node::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn into_node(self) -> Node {
        Node::Double(Arc::new(NumCell::new(self)))
    }
}

impl DocValue for i64 {
    fn from_node(node: &Node) -> Option<Self> {
        match node {
            Node::Int(i) => Some(*i),
            Node::Double(cell) => {
                let value = cell.get();
                value.is_finite().then_some(value as Self)
            }
            Node::Bool(b) => Some(Self::from(*b)),
            Node::Str(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as Self))
            }
            _ => None,
        }
    }

    fn into_node(self) -> Node {
        Node::Int(self)
    }
}

impl DocValue for bool {
    fn from_node(node: &Node) -> Option<Self> {
        match node {
            Node::Bool(b) => Some(*b),
            Node::Int(i) => Some(*i != 0),
            Node::Double(cell) => {
                let value = cell.get();
                Some(!value.is_nan() && value != 0.0)
            }
            Node::Str(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                other => other.parse::<f64>().ok().map(|v| !v.is_nan() && v != 0.0),
            },
            _ => None,
        }
    }

    fn into_node(self) -> Node {
        Node::Bool(self)
    }
}

impl DocValue for String {
    fn from_node(node: &Node) -> Option<Self> {
        match node {
            Node::Str(s) => Some(s.clone()),
            Node::Int(i) => Some(i.to_string()),
            Node::Double(cell) => Some(fmt_double(cell.get())),
            Node::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn into_node(self) -> Node {
        Node::Str(self)
    }
}

/// Renders a double the way expression evaluation and string coercion expect:
/// integral values without a fractional part, everything else via ryu.
#[must_use]
pub fn fmt_double(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9e15 {
        format!("{}", value as i64)
    } else {
        let mut buffer = ryu::Buffer::new();
        buffer.format(value).to_string()
    }
}

/// A mutable JSON-like tree with typed access and pointer-stable numeric leaves.
pub struct Document {
    tree: Mutex<Node>,
    /// Per-expression ordered cell arrays for `other`-scope variable access.
    ///
    /// Keyed by the compiling expression's unique id; materialized on first
    /// evaluation of that expression against this document.
    ordered: Mutex<AHashMap<u64, Arc<[Arc<NumCell>]>>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("json", &self.serialize()).finish()
    }
}

impl Document {
    /// Creates an empty document (root object with no members).
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Node::Object(IndexMap::new())),
            ordered: Mutex::new(AHashMap::new()),
        }
    }

    /// Parses JSON or JSONC text into a fresh document.
    pub fn from_text(src: &str) -> Result<Self, DocError> {
        let doc = Self::new();
        doc.deserialize(src)?;
        Ok(doc)
    }

    fn lock_tree(&self) -> MutexGuard<'_, Node> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the document lock for a batch of related operations.
    ///
    /// The returned guard exposes the same typed operations; this is the
    /// scoped equivalent of a recursive lock. Code already holding the guard
    /// performs further operations on the guard rather than on the document.
    pub fn lock(&self) -> DocGuard<'_> {
        DocGuard {
            tree: self.lock_tree(),
        }
    }

    /// Typed read. Returns `default` when the key is absent, malformed, or
    /// not convertible. Never fails.
    pub fn get<T: DocValue>(&self, key: &str, default: T) -> T {
        self.lock().get(key, default)
    }

    /// Typed write. Creates missing object ancestors; refuses (with one
    /// diagnostic) to descend through an existing scalar.
    pub fn set<T: DocValue>(&self, key: &str, value: T) {
        self.lock().set(key, value);
    }

    /// Writes a string, reinterpreting numeric-looking text as a number and
    /// `true`/`false` as bools. Used by `|key=value` reference overrides and
    /// the `set` command, which only see text.
    pub fn set_auto(&self, key: &str, raw: &str) {
        self.lock().set_auto(key, raw);
    }

    /// Numeric read-modify-write: `key += delta`. Absent keys start at zero.
    pub fn set_add(&self, key: &str, delta: f64) {
        self.lock().set_add(key, delta);
    }

    /// Numeric read-modify-write: `key *= factor`. Absent keys start at zero.
    pub fn set_multiply(&self, key: &str, factor: f64) {
        self.lock().set_multiply(key, factor);
    }

    /// String read-modify-write: `key |= suffix`. Absent keys start empty.
    pub fn set_concat(&self, key: &str, suffix: &str) {
        self.lock().set_concat(key, suffix);
    }

    /// Returns the stable cell backing the numeric leaf at `key`.
    ///
    /// The first call may materialize the cell (as `0.0` when the key is
    /// absent, or converted from an existing int/bool/numeric-string leaf).
    /// Repeated calls with the same key return the same cell, and later
    /// numeric writes to the key go through it.
    pub fn stable_double(&self, key: &str) -> Result<Arc<NumCell>, DocError> {
        self.lock().stable_double(key)
    }

    /// Classifies the node at `key`.
    #[must_use]
    pub fn member_check(&self, key: &str) -> MemberKind {
        self.lock().member_check(key)
    }

    /// Element count of the array or object at `key` (0 for leaves/absent).
    #[must_use]
    pub fn member_size(&self, key: &str) -> usize {
        self.lock().member_size(key)
    }

    /// Removes the node at `key`. Returns whether something was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key)
    }

    /// Detaches the subtree at `key` into a new document (fresh cells).
    #[must_use]
    pub fn subdoc(&self, key: &str) -> Option<Self> {
        let guard = self.lock_tree();
        let segs = parse_path(key).ok()?;
        let node = resolve(&guard, &segs)?;
        let root = match node.detached_clone() {
            node @ Node::Object(_) => node,
            other => {
                let mut map = IndexMap::new();
                map.insert("value".to_string(), other);
                Node::Object(map)
            }
        };
        Some(Self {
            tree: Mutex::new(root),
            ordered: Mutex::new(AHashMap::new()),
        })
    }

    /// The string items of the array at `key`, skipping non-string entries.
    #[must_use]
    pub fn string_items(&self, key: &str) -> Vec<String> {
        let guard = self.lock_tree();
        let Ok(segs) = parse_path(key) else {
            return Vec::new();
        };
        match resolve(&guard, &segs) {
            Some(Node::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Node::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Copies the subtree at `from` to `to` (deep copy, fresh cells).
    /// Returns false when `from` is absent or `to` is unreachable.
    pub fn copy_key(&self, from: &str, to: &str) -> bool {
        let mut guard = self.lock_tree();
        let Ok(from_segs) = parse_path(from) else {
            return false;
        };
        let Some(node) = resolve(&guard, &from_segs) else {
            return false;
        };
        let clone = node.detached_clone();
        let Ok(to_segs) = parse_path(to) else {
            return false;
        };
        match ensure(&mut guard, &to_segs, to) {
            Ok(slot) => {
                *slot = clone;
                true
            }
            Err(err) => {
                log::warn!("copy to {to:?} skipped: {err}");
                false
            }
        }
    }

    /// Moves the subtree at `from` to `to`.
    pub fn move_key(&self, from: &str, to: &str) -> bool {
        self.copy_key(from, to) && self.remove(from)
    }

    /// Serializes the whole document to canonical JSON (insertion-order keys).
    #[must_use]
    pub fn serialize(&self) -> String {
        let guard = self.lock_tree();
        guard.to_json().to_string()
    }

    /// Serializes the subtree at `key`, or `None` when absent.
    #[must_use]
    pub fn serialize_key(&self, key: &str) -> Option<String> {
        let guard = self.lock_tree();
        let segs = parse_path(key).ok()?;
        resolve(&guard, &segs).map(|node| node.to_json().to_string())
    }

    /// Replaces the document contents from JSON or JSONC text.
    ///
    /// Stable cells previously handed out stay live: any key that had a cell
    /// and is numeric in the new contents keeps its old cell (updated in
    /// place), so bound expressions keep reflecting the document.
    pub fn deserialize(&self, src: &str) -> Result<(), DocError> {
        let stripped = strip_comments(src);
        let value: serde_json::Value =
            serde_json::from_str(&stripped).map_err(|err| DocError::Malformed(err.to_string()))?;
        if !value.is_object() {
            return Err(DocError::Malformed("document root must be an object".to_string()));
        }
        let mut guard = self.lock_tree();
        let mut cells = AHashMap::new();
        gather_cells(&guard, String::new(), &mut cells);
        *guard = relink(Node::from_json(value), String::new(), &cells);
        Ok(())
    }

    /// Ordered stable-cell array for an expression's `other`-scope variables.
    ///
    /// Materialized on first use per `(expression, document)` pair, then
    /// returned from the cache; slots line up with `keys` by position.
    pub fn ordered_cells(
        &self,
        expr_id: u64,
        keys: &[String],
    ) -> Result<Arc<[Arc<NumCell>]>, DocError> {
        if let Some(hit) = self
            .ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&expr_id)
        {
            return Ok(Arc::clone(hit));
        }
        let cells = keys
            .iter()
            .map(|key| self.stable_double(key))
            .collect::<Result<Vec<_>, _>>()?;
        let cells: Arc<[Arc<NumCell>]> = cells.into();
        self.ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(expr_id, Arc::clone(&cells));
        Ok(cells)
    }
}

/// Scoped lock over a document, exposing the same typed operations.
pub struct DocGuard<'a> {
    tree: MutexGuard<'a, Node>,
}

impl DocGuard<'_> {
    pub fn get<T: DocValue>(&self, key: &str, default: T) -> T {
        let Ok(segs) = parse_path(key) else {
            return default;
        };
        resolve(&self.tree, &segs)
            .and_then(T::from_node)
            .unwrap_or(default)
    }

    pub fn set<T: DocValue>(&mut self, key: &str, value: T) {
        match self.target(key) {
            Ok(slot) => assign(slot, value.into_node()),
            Err(err) => log::warn!("set {key:?} skipped: {err}"),
        }
    }

    pub fn set_auto(&mut self, key: &str, raw: &str) {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            self.set(key, i);
        } else if let Ok(v) = trimmed.parse::<f64>() {
            self.set(key, v);
        } else if trimmed == "true" || trimmed == "false" {
            self.set(key, trimmed == "true");
        } else {
            self.set(key, raw.to_string());
        }
    }

    pub fn set_add(&mut self, key: &str, delta: f64) {
        match self.numeric_cell(key) {
            Ok(cell) => {
                cell.fetch_add(delta);
            }
            Err(err) => log::warn!("set_add {key:?} skipped: {err}"),
        }
    }

    pub fn set_multiply(&mut self, key: &str, factor: f64) {
        match self.numeric_cell(key) {
            Ok(cell) => {
                cell.fetch_mul(factor);
            }
            Err(err) => log::warn!("set_multiply {key:?} skipped: {err}"),
        }
    }

    pub fn set_concat(&mut self, key: &str, suffix: &str) {
        match self.target(key) {
            Ok(slot) => {
                let mut current = String::from_node(slot).unwrap_or_default();
                current.push_str(suffix);
                *slot = Node::Str(current);
            }
            Err(err) => log::warn!("set_concat {key:?} skipped: {err}"),
        }
    }

    pub fn stable_double(&mut self, key: &str) -> Result<Arc<NumCell>, DocError> {
        let slot = self.target(key)?;
        if let Node::Double(cell) = slot {
            return Ok(Arc::clone(cell));
        }
        let initial = f64::from_node(slot).unwrap_or(0.0);
        let cell = Arc::new(NumCell::new(initial));
        *slot = Node::Double(Arc::clone(&cell));
        Ok(cell)
    }

    #[must_use]
    pub fn member_check(&self, key: &str) -> MemberKind {
        let Ok(segs) = parse_path(key) else {
            return MemberKind::Absent;
        };
        match resolve(&self.tree, &segs) {
            None => MemberKind::Absent,
            Some(Node::Object(_)) => MemberKind::Object,
            Some(Node::Array(_)) => MemberKind::Array,
            Some(_) => MemberKind::Leaf,
        }
    }

    #[must_use]
    pub fn member_size(&self, key: &str) -> usize {
        let Ok(segs) = parse_path(key) else {
            return 0;
        };
        match resolve(&self.tree, &segs) {
            Some(Node::Array(items)) => items.len(),
            Some(Node::Object(map)) => map.len(),
            _ => 0,
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let Ok(segs) = parse_path(key) else {
            return false;
        };
        let Some((last, parents)) = segs.split_last() else {
            return false;
        };
        let Some(parent) = resolve_mut(&mut self.tree, parents) else {
            return false;
        };
        match (parent, last) {
            (Node::Object(map), PathSeg::Key(name)) => map.shift_remove(name).is_some(),
            (Node::Array(items), PathSeg::Index(index)) if *index < items.len() => {
                items.remove(*index);
                true
            }
            _ => false,
        }
    }

    fn target(&mut self, key: &str) -> Result<&mut Node, DocError> {
        let segs = parse_path(key)?;
        ensure(&mut self.tree, &segs, key)
    }

    fn numeric_cell(&mut self, key: &str) -> Result<Arc<NumCell>, DocError> {
        self.stable_double(key)
    }
}

fn assign(slot: &mut Node, incoming: Node) {
    match (&mut *slot, incoming) {
        // numeric writes to a held cell go through the cell (stable pointers
        // keep reflecting the key)
        (Node::Double(cell), Node::Double(new)) => cell.set(new.get()),
        (Node::Double(cell), Node::Int(new)) => cell.set(new as f64),
        (slot, incoming) => *slot = incoming,
    }
}

fn resolve<'a>(mut node: &'a Node, segs: &[PathSeg]) -> Option<&'a Node> {
    for seg in segs {
        node = match (node, seg) {
            (Node::Object(map), PathSeg::Key(name)) => map.get(name)?,
            (Node::Array(items), PathSeg::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(node)
}

fn resolve_mut<'a>(mut node: &'a mut Node, segs: &[PathSeg]) -> Option<&'a mut Node> {
    for seg in segs {
        node = match (node, seg) {
            (Node::Object(map), PathSeg::Key(name)) => map.get_mut(name)?,
            (Node::Array(items), PathSeg::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(node)
}

fn ensure<'a>(mut node: &'a mut Node, segs: &[PathSeg], full_key: &str) -> Result<&'a mut Node, DocError> {
    for seg in segs {
        match seg {
            PathSeg::Key(name) => {
                if matches!(node, Node::Null) {
                    *node = Node::Object(IndexMap::new());
                }
                match node {
                    Node::Object(map) => {
                        node = map.entry(name.clone()).or_insert(Node::Null);
                    }
                    _ => {
                        return Err(DocError::ScalarAncestor {
                            key: full_key.to_string(),
                            segment: name.clone(),
                        });
                    }
                }
            }
            PathSeg::Index(index) => {
                if matches!(node, Node::Null) {
                    *node = Node::Array(Vec::new());
                }
                match node {
                    Node::Array(items) => {
                        if items.len() <= *index {
                            items.resize_with(index + 1, || Node::Null);
                        }
                        node = &mut items[*index];
                    }
                    _ => return Err(DocError::BadIndex(full_key.to_string())),
                }
            }
        }
    }
    Ok(node)
}

fn gather_cells(node: &Node, prefix: String, out: &mut AHashMap<String, Arc<NumCell>>) {
    match node {
        Node::Double(cell) => {
            out.insert(prefix, Arc::clone(cell));
        }
        Node::Object(map) => {
            for (key, item) in map {
                let child = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                gather_cells(item, child, out);
            }
        }
        Node::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                gather_cells(item, format!("{prefix}[{index}]"), out);
            }
        }
        _ => {}
    }
}

/// Rebuilds a freshly parsed tree, rewiring numeric leaves onto cells that
/// were already handed out for the same key.
fn relink(node: Node, prefix: String, cells: &AHashMap<String, Arc<NumCell>>) -> Node {
    match node {
        Node::Double(new_cell) => match cells.get(&prefix) {
            Some(old) => {
                old.set(new_cell.get());
                Node::Double(Arc::clone(old))
            }
            None => Node::Double(new_cell),
        },
        Node::Int(value) => match cells.get(&prefix) {
            Some(old) => {
                old.set(value as f64);
                Node::Double(Arc::clone(old))
            }
            None => Node::Int(value),
        },
        Node::Object(map) => Node::Object(
            map.into_iter()
                .map(|(key, item)| {
                    let child = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    (key, relink(item, child, cells))
                })
                .collect(),
        ),
        Node::Array(items) => Node::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| relink(item, format!("{prefix}[{index}]"), cells))
                .collect(),
        ),
        other => other,
    }
}
