//! The expression compiler and evaluator.
//!
//! Source strings mix literal text, variable references, and arithmetic:
//!
//! ```text
//! $(self.pos.x)                     variable, self scope
//! $(other.hp) / $(other.hp_max)    two variables inside literal text
//! $( $(global.time.dt) * 60 )      arithmetic with nested references
//! {1 + 2}                           arithmetic, brace form
//! $(dialog/tree.jsonc:root.line)    read-only document reference
//! ```
//!
//! Compilation binds self/global/doc-cache references to stable cells
//! immediately; `other`-scope references are recorded by key and resolved per
//! evaluation through the other document's ordered cell cache, because any
//! document may play "other". After binding, the arithmetic path performs no
//! allocation and no map lookups on self/global cells.

mod arith;

pub use arith::{Arith, BinOp, Func, UnaryOp};

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    document::{Document, DocumentCache, MemberKind, NumCell, ReadOnlyDoc, fmt_double},
    error::ParseError,
};

/// Everything expression compilation needs to bind variable references.
#[derive(Clone)]
pub struct ExprContext {
    /// Document bound to `self.*` references.
    pub self_doc: Arc<Document>,
    /// Document bound to `global.*` references.
    pub global: Arc<Document>,
    /// Cache resolving `path.jsonc:key` references.
    pub cache: Arc<DocumentCache>,
}

/// Where a variable reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    SelfDoc,
    Other,
    Global,
    Cache,
}

/// Source of one arithmetic slot value.
enum SlotSrc {
    /// Bound stable cell (self, global, or doc-cache scope).
    Cell(Arc<NumCell>),
    /// Index into the other document's ordered cell array.
    Other(usize),
}

/// One compiled piece of the source string.
enum Segment {
    Literal(String),
    /// A standalone variable reference, rendered through its document so
    /// string-valued keys concatenate correctly.
    Var {
        scope: VarScope,
        key: String,
        cache_doc: Option<Arc<ReadOnlyDoc>>,
    },
    Arith(Arith),
}

static EXPR_IDS: AtomicU64 = AtomicU64::new(1);

/// A compiled expression, bound to its self/global documents.
pub struct Expression {
    /// Process-unique id, keying the ordered cell cache on other-documents.
    id: u64,
    source: String,
    segments: SmallVec<[Segment; 2]>,
    /// Slot index -> value source for the arithmetic path.
    slot_sources: Vec<SlotSrc>,
    /// Dotted keys for `other`-scope slots, in slot order.
    other_keys: Vec<String>,
    /// Numeric route for `eval_as_double`: present when the whole expression
    /// is one arithmetic form, or one variable reference bound to a cell.
    fast_path: Option<Arith>,
    self_doc: Arc<Document>,
    global: Arc<Document>,
    /// Folded value when the expression has no variables at all.
    constant: Option<f64>,
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("returnable_as_double", &self.is_returnable_as_double())
            .finish()
    }
}

/// True when a `$(...)` body is a pure variable reference rather than
/// arithmetic: a known scope prefix followed by a plain dotted key, or a
/// `path:key` doc-cache reference.
pub(crate) fn is_var_body(body: &str) -> bool {
    let trimmed = body.trim();
    for scope in ["self.", "other.", "global."] {
        if let Some(rest) = trimmed.strip_prefix(scope) {
            return is_plain_key(rest);
        }
    }
    if let Some((path, key)) = trimmed.split_once(':') {
        return is_cache_path(path) && is_plain_key(key);
    }
    false
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '[' | ']'))
}

fn is_cache_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-'))
}

fn split_var(body: &str) -> (VarScope, &str, Option<&str>) {
    let trimmed = body.trim();
    if let Some(rest) = trimmed.strip_prefix("self.") {
        (VarScope::SelfDoc, rest, None)
    } else if let Some(rest) = trimmed.strip_prefix("other.") {
        (VarScope::Other, rest, None)
    } else if let Some(rest) = trimmed.strip_prefix("global.") {
        (VarScope::Global, rest, None)
    } else {
        let (path, key) = trimmed.split_once(':').unwrap_or((trimmed, ""));
        (VarScope::Cache, key, Some(path))
    }
}

impl Expression {
    /// Compiles and binds a source string.
    pub fn compile(source: &str, ctx: &ExprContext) -> Result<Self, ParseError> {
        Compiler::new(source, ctx).run()
    }

    /// The original source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Folded value when the expression contains no variables.
    #[must_use]
    pub fn constant(&self) -> Option<f64> {
        self.constant
    }

    /// Whether `eval_as_double` takes the numeric route without string
    /// rendering.
    #[must_use]
    pub fn is_returnable_as_double(&self) -> bool {
        self.fast_path.is_some()
    }

    /// Dotted keys this expression reads from the other document.
    #[must_use]
    pub fn other_keys(&self) -> &[String] {
        &self.other_keys
    }

    /// Number of bound variable slots (used for cost estimation).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_sources.len()
    }

    /// Evaluates to a string, substituting every segment.
    #[must_use]
    pub fn eval(&self, other: &Document) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var { scope, key, cache_doc } => {
                    let value = match scope {
                        VarScope::SelfDoc => self.self_doc.get(key, String::new()),
                        VarScope::Global => self.global.get(key, String::new()),
                        VarScope::Other => other.get(key, String::new()),
                        VarScope::Cache => cache_doc
                            .as_ref()
                            .map(|doc| doc.doc().get(key, String::new()))
                            .unwrap_or_default(),
                    };
                    out.push_str(&value);
                }
                Segment::Arith(ast) => {
                    out.push_str(&fmt_double(self.eval_arith(ast, other)));
                }
            }
        }
        out
    }

    /// Evaluates to a double.
    ///
    /// On the numeric route this fills the slot array from bound cells and
    /// recurses over the compiled AST; otherwise the string result is parsed,
    /// yielding NaN when it is not numeric.
    #[must_use]
    pub fn eval_as_double(&self, other: &Document) -> f64 {
        if let Some(value) = self.constant {
            return value;
        }
        if let Some(ast) = &self.fast_path {
            return self.eval_arith(ast, other);
        }
        self.eval(other).trim().parse().unwrap_or(f64::NAN)
    }

    fn eval_arith(&self, ast: &Arith, other: &Document) -> f64 {
        let others = if self.other_keys.is_empty() {
            None
        } else {
            match other.ordered_cells(self.id, &self.other_keys) {
                Ok(cells) => Some(cells),
                Err(_) => return f64::NAN,
            }
        };
        let mut slots: SmallVec<[f64; 8]> = SmallVec::with_capacity(self.slot_sources.len());
        for source in &self.slot_sources {
            slots.push(match source {
                SlotSrc::Cell(cell) => cell.get(),
                SlotSrc::Other(index) => others
                    .as_ref()
                    .and_then(|cells| cells.get(*index))
                    .map_or(f64::NAN, |cell| cell.get()),
            });
        }
        ast.eval(&slots)
    }
}

struct Compiler<'a> {
    source: &'a str,
    ctx: &'a ExprContext,
    segments: SmallVec<[Segment; 2]>,
    slot_sources: Vec<SlotSrc>,
    other_keys: Vec<String>,
    /// variable body -> already assigned slot, so repeated references share
    slot_by_body: AHashMap<String, usize>,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str, ctx: &'a ExprContext) -> Self {
        Self {
            source,
            ctx,
            segments: SmallVec::new(),
            slot_sources: Vec::new(),
            other_keys: Vec::new(),
            slot_by_body: AHashMap::new(),
        }
    }

    fn run(mut self) -> Result<Expression, ParseError> {
        let bytes = self.source.as_bytes();
        let mut literal_start = 0;
        let mut i = 0;
        while i < bytes.len() {
            let group = match bytes[i] {
                b'$' if bytes.get(i + 1) == Some(&b'(') => Some((i, i + 2, b')')),
                b'{' => Some((i, i + 1, b'}')),
                _ => None,
            };
            let Some((group_start, body_start, closer)) = group else {
                i += 1;
                continue;
            };
            if literal_start < group_start {
                self.segments
                    .push(Segment::Literal(self.source[literal_start..group_start].to_string()));
            }
            let body_end = find_balanced(bytes, body_start, closer)
                .ok_or_else(|| ParseError::new(group_start, "unbalanced expression group"))?;
            let body = &self.source[body_start..body_end];
            self.push_group(body, body_start, closer == b')')?;
            i = body_end + 1;
            literal_start = i;
        }
        if literal_start < bytes.len() {
            self.segments
                .push(Segment::Literal(self.source[literal_start..].to_string()));
        }
        self.finish()
    }

    fn push_group(&mut self, body: &str, offset: usize, dollar_form: bool) -> Result<(), ParseError> {
        if dollar_form && is_var_body(body) {
            let (scope, key, cache_path) = split_var(body);
            let cache_doc = match cache_path {
                Some(path) => Some(self.load_cache_doc(path, offset)?),
                None => None,
            };
            self.segments.push(Segment::Var {
                scope,
                key: key.to_string(),
                cache_doc,
            });
            return Ok(());
        }
        let ast = self.parse_body(body, offset)?;
        self.segments.push(Segment::Arith(ast));
        Ok(())
    }

    fn parse_body(&mut self, body: &str, offset: usize) -> Result<Arith, ParseError> {
        // the registrar closure needs exclusive access to the binding state,
        // so take the fields and put them back afterwards
        let ctx = self.ctx;
        let mut slot_by_body = std::mem::take(&mut self.slot_by_body);
        let mut slot_sources = std::mem::take(&mut self.slot_sources);
        let mut other_keys = std::mem::take(&mut self.other_keys);
        let mut registrar = |var_body: &str, pos: usize| -> Result<usize, ParseError> {
            if let Some(&slot) = slot_by_body.get(var_body) {
                return Ok(slot);
            }
            let source = bind_slot(ctx, var_body, pos, &mut other_keys)?;
            let slot = slot_sources.len();
            slot_sources.push(source);
            slot_by_body.insert(var_body.to_string(), slot);
            Ok(slot)
        };
        let result = arith::parse_arith(body, offset, &mut registrar);
        self.slot_by_body = slot_by_body;
        self.slot_sources = slot_sources;
        self.other_keys = other_keys;
        result
    }

    fn load_cache_doc(&self, path: &str, offset: usize) -> Result<Arc<ReadOnlyDoc>, ParseError> {
        self.ctx
            .cache
            .read_doc(path)
            .map_err(|err| ParseError::new(offset, format!("cannot load {path:?}: {err}")))
    }

    fn finish(mut self) -> Result<Expression, ParseError> {
        let lone_var = match &self.segments[..] {
            [Segment::Var { scope, key, cache_doc }] => {
                Some((*scope, key.clone(), cache_doc.clone()))
            }
            _ => None,
        };
        let fast_path = if let [Segment::Arith(ast)] = &self.segments[..] {
            Some(ast.clone())
        } else if let [Segment::Literal(text)] = &self.segments[..] {
            // a purely numeric literal ("0", "3.5") is a constant form
            text.trim().parse().ok().map(Arith::Num)
        } else {
            lone_var.and_then(|(scope, key, cache_doc)| {
                self.lone_var_fast_path(scope, &key, cache_doc.as_deref())
            })
        };
        let constant = match (&fast_path, self.slot_sources.is_empty()) {
            (Some(ast), true) if !ast.has_slots() => Some(ast.eval(&[])),
            _ => None,
        };
        Ok(Expression {
            id: EXPR_IDS.fetch_add(1, Ordering::Relaxed),
            source: self.source.to_string(),
            segments: self.segments,
            slot_sources: self.slot_sources,
            other_keys: self.other_keys,
            fast_path,
            self_doc: Arc::clone(&self.ctx.self_doc),
            global: Arc::clone(&self.ctx.global),
            constant,
        })
    }

    /// A lone variable reference gets a numeric route unless the key
    /// currently holds non-numeric text (then string semantics win).
    fn lone_var_fast_path(
        &mut self,
        scope: VarScope,
        key: &str,
        cache_doc: Option<&ReadOnlyDoc>,
    ) -> Option<Arith> {
        let doc = match scope {
            VarScope::SelfDoc => Some(&*self.ctx.self_doc),
            VarScope::Global => Some(&*self.ctx.global),
            VarScope::Cache => cache_doc.map(ReadOnlyDoc::doc),
            VarScope::Other => None,
        };
        if let Some(doc) = doc {
            match doc.member_check(key) {
                MemberKind::Object | MemberKind::Array => return None,
                MemberKind::Leaf if doc.get(key, f64::NAN).is_nan() => return None,
                _ => {}
            }
        }
        let source = match scope {
            VarScope::SelfDoc => self.ctx.self_doc.stable_double(key).ok().map(SlotSrc::Cell),
            VarScope::Global => self.ctx.global.stable_double(key).ok().map(SlotSrc::Cell),
            VarScope::Cache => cache_doc.and_then(|doc| doc.stable_double(key).ok()).map(SlotSrc::Cell),
            VarScope::Other => {
                let index = self.other_keys.len();
                self.other_keys.push(key.to_string());
                Some(SlotSrc::Other(index))
            }
        }?;
        self.slot_sources.push(source);
        Some(Arith::Slot(self.slot_sources.len() - 1))
    }
}

fn bind_slot(
    ctx: &ExprContext,
    var_body: &str,
    pos: usize,
    other_keys: &mut Vec<String>,
) -> Result<SlotSrc, ParseError> {
    if !is_var_body(var_body) {
        return Err(ParseError::new(pos, format!("not a variable reference: {var_body:?}")));
    }
    let (scope, key, cache_path) = split_var(var_body);
    match scope {
        VarScope::SelfDoc => ctx
            .self_doc
            .stable_double(key)
            .map(SlotSrc::Cell)
            .map_err(|err| ParseError::new(pos, err.to_string())),
        VarScope::Global => ctx
            .global
            .stable_double(key)
            .map(SlotSrc::Cell)
            .map_err(|err| ParseError::new(pos, err.to_string())),
        VarScope::Other => {
            let index = other_keys.len();
            other_keys.push(key.to_string());
            Ok(SlotSrc::Other(index))
        }
        VarScope::Cache => {
            let path = cache_path.unwrap_or_default();
            let doc = ctx
                .cache
                .read_doc(path)
                .map_err(|err| ParseError::new(pos, format!("cannot load {path:?}: {err}")))?;
            doc.stable_double(key)
                .map(SlotSrc::Cell)
                .map_err(|err| ParseError::new(pos, err.to_string()))
        }
    }
}

fn find_balanced(bytes: &[u8], start: usize, closer: u8) -> Option<usize> {
    let opener = if closer == b')' { b'(' } else { b'{' };
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if b == opener {
            depth += 1;
        } else if b == closer {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExprContext {
        ExprContext {
            self_doc: Arc::new(Document::new()),
            global: Arc::new(Document::new()),
            cache: Arc::new(DocumentCache::new()),
        }
    }

    #[test]
    fn literal_only() {
        let ctx = ctx();
        let expr = Expression::compile("hello world", &ctx).unwrap();
        let other = Document::new();
        assert_eq!(expr.eval(&other), "hello world");
        assert!(!expr.is_returnable_as_double());
    }

    #[test]
    fn constant_arithmetic_folds() {
        let ctx = ctx();
        let expr = Expression::compile("$(1 + 1)", &ctx).unwrap();
        assert_eq!(expr.constant(), Some(2.0));
        assert!(expr.is_returnable_as_double());
        let other = Document::new();
        assert_eq!(expr.eval(&other), "2");
    }

    #[test]
    fn self_and_other_mix() {
        let ctx = ctx();
        ctx.self_doc.set("a", 3.0);
        let other = Document::new();
        other.set("b", 4.5);
        let expr = Expression::compile("$(self.a) + $(other.b)", &ctx).unwrap();
        assert_eq!(expr.eval(&other), "3 + 4.5");
        let sum = Expression::compile("$( $(self.a) + $(other.b) )", &ctx).unwrap();
        assert_eq!(sum.eval_as_double(&other), 7.5);
        assert_eq!(sum.eval(&other), "7.5");
    }

    #[test]
    fn self_binding_tracks_later_writes() {
        let ctx = ctx();
        let expr = Expression::compile("$( $(self.x) * 2 )", &ctx).unwrap();
        assert_eq!(expr.eval_as_double(&Document::new()), 0.0);
        ctx.self_doc.set("x", 21.0);
        assert_eq!(expr.eval_as_double(&Document::new()), 42.0);
    }

    #[test]
    fn brace_form_is_arithmetic() {
        let ctx = ctx();
        let expr = Expression::compile("{2 * 3}", &ctx).unwrap();
        assert_eq!(expr.constant(), Some(6.0));
    }

    #[test]
    fn lone_variable_has_numeric_fast_path() {
        let ctx = ctx();
        ctx.self_doc.set("hp", 12.0);
        let expr = Expression::compile("$(self.hp)", &ctx).unwrap();
        assert!(expr.is_returnable_as_double());
        assert_eq!(expr.eval_as_double(&Document::new()), 12.0);
    }

    #[test]
    fn lone_string_variable_stays_textual() {
        let ctx = ctx();
        ctx.self_doc.set("name", "wolf".to_string());
        let expr = Expression::compile("$(self.name)", &ctx).unwrap();
        assert!(!expr.is_returnable_as_double());
        assert_eq!(expr.eval(&Document::new()), "wolf");
        assert!(expr.eval_as_double(&Document::new()).is_nan());
    }

    #[test]
    fn other_ordered_cache_is_reused() {
        let ctx = ctx();
        let other = Document::new();
        other.set("b", 2.0);
        let expr = Expression::compile("$( $(other.b) + 1 )", &ctx).unwrap();
        assert_eq!(expr.eval_as_double(&other), 3.0);
        other.set("b", 9.0);
        assert_eq!(expr.eval_as_double(&other), 10.0);
        assert_eq!(expr.other_keys(), ["b".to_string()]);
    }

    #[test]
    fn repeated_variable_shares_one_slot() {
        let ctx = ctx();
        ctx.self_doc.set("x", 3.0);
        let expr = Expression::compile("$( $(self.x) * $(self.x) )", &ctx).unwrap();
        assert_eq!(expr.eval_as_double(&Document::new()), 9.0);
        assert_eq!(expr.slot_count(), 1);
    }

    #[test]
    fn unbalanced_group_is_a_parse_error() {
        let ctx = ctx();
        let err = Expression::compile("$(1 + (2)", &ctx).unwrap_err();
        assert_eq!(err.position, 0);
        assert!(Expression::compile("{1 + 2", &ctx).is_err());
    }

    #[test]
    fn global_scope_binds() {
        let ctx = ctx();
        ctx.global.set("counter", 5.0);
        let expr = Expression::compile("$( $(global.counter) >= 5 )", &ctx).unwrap();
        assert_eq!(expr.eval_as_double(&Document::new()), 1.0);
    }

    #[test]
    fn lone_other_variable_uses_ordered_cache() {
        let ctx = ctx();
        let other = Document::new();
        other.set("count", 4.0);
        let expr = Expression::compile("$(other.count)", &ctx).unwrap();
        assert!(expr.is_returnable_as_double());
        assert_eq!(expr.eval_as_double(&other), 4.0);
    }
}
