//! Reading declarative rule JSON into compiled rulesets.
//!
//! Rules live in the entity document's `invokes` array. Each entry is either
//! an inline rule object or a path to a rule file (JSONC allowed):
//!
//! ```jsonc
//! {
//!   "topic": "tick",
//!   "logicalArg": ["$(other.alive)", "$(self.range) > 10"],  // AND-combined
//!   "exprs": ["other.count += 1", "self.cooldown = 30"],
//!   "functioncalls_global": ["echo tick delivered"],
//!   "functioncalls_self": ["update-text"],
//!   "functioncalls_other": []
//! }
//! ```
//!
//! Invalid entries are skipped with a diagnostic; parsing never aborts the
//! whole file.

use std::sync::{Arc, Weak};

use super::{AssignOp, Assignment, Ruleset, Target};
use crate::{
    document::{Document, MemberKind},
    entity::Entity,
    expr::{ExprContext, Expression},
    resource,
};

/// Compiled rules split by broadcast class.
#[derive(Debug, Default)]
pub struct ParsedRules {
    /// Rules with a topic: broadcast each frame, matched against listeners.
    pub global: Vec<Arc<Ruleset>>,
    /// Rules with an empty topic: evaluated locally with other = self.
    pub local: Vec<Arc<Ruleset>>,
}

/// Parses every entry of the document's `invokes` array.
#[must_use]
pub fn parse_rules(doc: &Document, ctx: &ExprContext, owner: Weak<Entity>) -> ParsedRules {
    let mut parsed = ParsedRules::default();
    match doc.member_check("invokes") {
        MemberKind::Array => {}
        MemberKind::Absent => return parsed,
        _ => {
            log::warn!("invokes field is not an array; no rules loaded");
            return parsed;
        }
    }
    let count = doc.member_size("invokes");
    for index in 0..count {
        let key = format!("invokes[{index}]");
        let Some(entry) = load_entry(doc, &key) else {
            log::warn!("could not load invoke entry {index}; skipping");
            continue;
        };
        match compile_entry(&entry, ctx, owner.clone()) {
            Some(rule) => {
                let rule = Arc::new(rule);
                if rule.is_local() {
                    parsed.local.push(rule);
                } else {
                    parsed.global.push(rule);
                }
            }
            None => log::warn!("invalid invoke entry {index}; skipping"),
        }
    }
    parsed
}

/// An entry is an inline object or a path to a rule file.
fn load_entry(doc: &Document, key: &str) -> Option<Document> {
    match doc.member_check(key) {
        MemberKind::Object => doc.subdoc(key),
        MemberKind::Leaf => {
            let link = doc.get(key, String::new());
            let text = resource::load_text(&link)?;
            Document::from_text(&text).ok()
        }
        _ => None,
    }
}

fn compile_entry(entry: &Document, ctx: &ExprContext, owner: Weak<Entity>) -> Option<Ruleset> {
    let topic = entry.get("topic", "all".to_string()).trim().to_string();

    let predicate_src = logical_arg(entry);
    let predicate = compile(&predicate_src, ctx)?;

    let mut assignments = Vec::new();
    for index in 0..entry.member_size("exprs") {
        let source = entry.get(&format!("exprs[{index}]"), String::new());
        match parse_assignment(&source, ctx) {
            Some(assignment) => assignments.push(assignment),
            None => {
                log::warn!("invalid assignment {source:?}; skipping");
            }
        }
    }

    let calls_global = call_list(entry, "functioncalls_global", None, ctx);
    let calls_self = call_list(entry, "functioncalls_self", Some("self"), ctx);
    let calls_other = call_list(entry, "functioncalls_other", Some("other"), ctx);

    Some(Ruleset::new(
        topic,
        predicate,
        assignments,
        calls_global,
        calls_self,
        calls_other,
        owner,
    ))
}

/// Builds the predicate source: an array is AND-combined by multiplication,
/// `(a)*(b)*(c)`, and the result is wrapped in `$(...)` when not already.
fn logical_arg(entry: &Document) -> String {
    let combined = if entry.member_check("logicalArg") == MemberKind::Array {
        let parts: Vec<String> = (0..entry.member_size("logicalArg"))
            .map(|index| {
                format!("({})", entry.get(&format!("logicalArg[{index}]"), "0".to_string()))
            })
            .collect();
        parts.join("*")
    } else {
        entry.get("logicalArg", "0".to_string())
    };
    let trimmed = combined.trim();
    if is_single_group(trimmed) {
        trimmed.to_string()
    } else {
        format!("$({trimmed})")
    }
}

/// True when the whole string is one balanced `$(...)` group, i.e. already a
/// complete arithmetic form. `$(a) > 10` is not: the group closes early, so
/// the predicate still needs wrapping.
fn is_single_group(src: &str) -> bool {
    let Some(inner) = src.strip_prefix("$(").and_then(|rest| rest.strip_suffix(')')) else {
        return false;
    };
    let mut depth = 0i32;
    for ch in inner.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Parses `<target>.<key><op><value>` with op in `+=`, `*=`, `|=`, `=`.
fn parse_assignment(source: &str, ctx: &ExprContext) -> Option<Assignment> {
    let trimmed = source.trim();
    let (target, rest) = if let Some(rest) = trimmed.strip_prefix("self.") {
        (Target::SelfDoc, rest)
    } else if let Some(rest) = trimmed.strip_prefix("other.") {
        (Target::Other, rest)
    } else if let Some(rest) = trimmed.strip_prefix("global.") {
        (Target::Global, rest)
    } else {
        return None;
    };

    // compound operators first so `a += b` is not read as `a +` `= b`
    let (op, op_text) = if rest.contains("+=") {
        (AssignOp::Add, "+=")
    } else if rest.contains("*=") {
        (AssignOp::Multiply, "*=")
    } else if rest.contains("|=") {
        (AssignOp::Concat, "|=")
    } else if rest.contains('=') {
        (AssignOp::Set, "=")
    } else {
        log::warn!("no operation found in assignment {source:?}");
        return None;
    };
    let split = rest.find(op_text)?;
    let key = rest[..split].trim().to_string();
    let value_src = rest[split + op_text.len()..].trim();
    if key.is_empty() {
        return None;
    }
    let value = compile(value_src, ctx)?;
    Some(Assignment { target, key, op, value })
}

/// Reads a functioncall array, forcing the domain identifier token in front
/// where the command tree expects one.
fn call_list(
    entry: &Document,
    field: &str,
    prefix: Option<&str>,
    ctx: &ExprContext,
) -> Vec<Expression> {
    if entry.member_check(field) != MemberKind::Array {
        return Vec::new();
    }
    (0..entry.member_size(field))
        .filter_map(|index| {
            let mut call = entry.get(&format!("{field}[{index}]"), String::new());
            if call.trim().is_empty() {
                return None;
            }
            if let Some(prefix) = prefix
                && !call.starts_with(&format!("{prefix} "))
            {
                call = format!("{prefix} {call}");
            }
            compile(&call, ctx)
        })
        .collect()
}

fn compile(source: &str, ctx: &ExprContext) -> Option<Expression> {
    match Expression::compile(source, ctx) {
        Ok(expr) => Some(expr),
        Err(err) => {
            log::warn!("cannot compile {source:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentCache;

    fn ctx() -> ExprContext {
        ExprContext {
            self_doc: Arc::new(Document::new()),
            global: Arc::new(Document::new()),
            cache: Arc::new(DocumentCache::new()),
        }
    }

    fn doc(json: &str) -> Document {
        Document::from_text(json).unwrap()
    }

    #[test]
    fn splits_global_and_local_rules() {
        let entity = doc(
            r#"{
                "invokes": [
                    { "topic": "tick", "logicalArg": "1", "exprs": ["other.count += 1"] },
                    { "topic": "", "logicalArg": "$(self.x) > 10", "exprs": ["self.x = 0"] }
                ]
            }"#,
        );
        let parsed = parse_rules(&entity, &ctx(), Weak::new());
        assert_eq!(parsed.global.len(), 1);
        assert_eq!(parsed.local.len(), 1);
        assert_eq!(parsed.global[0].topic, "tick");
        assert!(parsed.local[0].is_local());
    }

    #[test]
    fn topic_defaults_to_all() {
        let entity = doc(r#"{ "invokes": [ { "logicalArg": "1", "exprs": ["self.a = 1"] } ] }"#);
        let parsed = parse_rules(&entity, &ctx(), Weak::new());
        assert_eq!(parsed.global[0].topic, "all");
    }

    #[test]
    fn logical_arg_array_is_and_combined() {
        let entity = doc(
            r#"{ "invokes": [ { "topic": "t", "logicalArg": ["1", "2 > 1"], "exprs": ["self.a = 1"] } ] }"#,
        );
        let parsed = parse_rules(&entity, &ctx(), Weak::new());
        assert_eq!(parsed.global[0].predicate.source(), "$((1)*(2 > 1))");
        assert_eq!(parsed.global[0].predicate.constant(), Some(1.0));
    }

    #[test]
    fn assignment_operators() {
        let ctx = ctx();
        let add = parse_assignment("other.count += 1", &ctx).unwrap();
        assert_eq!(add.target, Target::Other);
        assert_eq!(add.key, "count");
        assert_eq!(add.op, AssignOp::Add);
        let concat = parse_assignment("self.log |= x", &ctx).unwrap();
        assert_eq!(concat.op, AssignOp::Concat);
        let set = parse_assignment("global.state = 3", &ctx).unwrap();
        assert_eq!(set.op, AssignOp::Set);
        assert!(parse_assignment("count += 1", &ctx).is_none());
        assert!(parse_assignment("self.count", &ctx).is_none());
    }

    #[test]
    fn invalid_entries_are_skipped_not_fatal() {
        let entity = doc(
            r#"{
                "invokes": [
                    { "topic": "t", "logicalArg": "$(1 +", "exprs": ["self.a = 1"] },
                    { "topic": "t", "logicalArg": "1", "exprs": ["self.a = 1"] }
                ]
            }"#,
        );
        let parsed = parse_rules(&entity, &ctx(), Weak::new());
        assert_eq!(parsed.global.len(), 1);
    }

    #[test]
    fn functioncalls_get_domain_prefixes() {
        let entity = doc(
            r#"{
                "invokes": [ {
                    "topic": "t",
                    "logicalArg": "1",
                    "exprs": ["self.a = 1"],
                    "functioncalls_self": ["delete"],
                    "functioncalls_other": ["other update-text"],
                    "functioncalls_global": ["echo hi"]
                } ]
            }"#,
        );
        let parsed = parse_rules(&entity, &ctx(), Weak::new());
        let rule = &parsed.global[0];
        assert_eq!(rule.calls_self[0].source(), "self delete");
        assert_eq!(rule.calls_other[0].source(), "other update-text");
        assert_eq!(rule.calls_global[0].source(), "echo hi");
    }
}
