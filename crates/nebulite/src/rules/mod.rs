//! Compiled invoke rules.
//!
//! A [`Ruleset`] is the compiled form of one declarative rule: a broadcast
//! topic, a predicate, an ordered list of assignments, and functioncall
//! lists for the global, self, and other domains. Execution is driven by the
//! invoke bus; this module only holds the compiled parts and the predicate
//! truth policy.

mod parser;

pub use parser::{ParsedRules, parse_rules};

use std::sync::{
    Weak,
    atomic::{AtomicBool, Ordering},
};

use strum::{Display, EnumString};

use crate::{document::Document, entity::Entity, expr::Expression};

/// Which document an assignment writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Target {
    #[strum(serialize = "self")]
    SelfDoc,
    Other,
    Global,
}

/// How an assignment combines the evaluated value with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Add,
    /// `*=`
    Multiply,
    /// `|=`
    Concat,
}

/// One compiled assignment: `<target>.<key> <op> <value>`.
#[derive(Debug)]
pub struct Assignment {
    pub target: Target,
    pub key: String,
    pub op: AssignOp,
    pub value: Expression,
}

/// The compiled form of one declarative rule.
#[derive(Debug)]
pub struct Ruleset {
    /// Broadcast topic. Empty means local-only: the rule is never published
    /// and only ever evaluated with other = self.
    pub topic: String,
    pub predicate: Expression,
    pub assignments: Vec<Assignment>,
    pub calls_global: Vec<Expression>,
    pub calls_self: Vec<Expression>,
    pub calls_other: Vec<Expression>,
    /// Owning entity. Weak: entities own their rules, the bus only borrows.
    pub self_entity: Weak<Entity>,
    /// Set when the predicate produced NaN; the rule then evaluates false in
    /// O(1) without further diagnostics until the entity reloads its rules.
    poisoned: AtomicBool,
}

impl Ruleset {
    pub(crate) fn new(
        topic: String,
        predicate: Expression,
        assignments: Vec<Assignment>,
        calls_global: Vec<Expression>,
        calls_self: Vec<Expression>,
        calls_other: Vec<Expression>,
        self_entity: Weak<Entity>,
    ) -> Self {
        Self {
            topic,
            predicate,
            assignments,
            calls_global,
            calls_self,
            calls_other,
            self_entity,
            poisoned: AtomicBool::new(false),
        }
    }

    /// Local-only rules are never broadcast.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.topic.is_empty()
    }

    /// Evaluates the predicate against `other`.
    ///
    /// Truth is nonzero-and-non-NaN. A NaN result poisons the rule: one
    /// diagnostic is emitted and every later call returns false immediately,
    /// until the owning entity recompiles its rules.
    #[must_use]
    pub fn is_true(&self, other: &Document) -> bool {
        if self.poisoned.load(Ordering::Relaxed) {
            return false;
        }
        if let Some(value) = self.predicate.constant() {
            return !value.is_nan() && value != 0.0;
        }
        let result = self.predicate.eval_as_double(other);
        if result.is_nan() {
            log::warn!(
                "predicate {:?} evaluated to NaN; rule disabled until reload",
                self.predicate.source()
            );
            self.poisoned.store(true, Ordering::Relaxed);
            return false;
        }
        result != 0.0
    }

    /// Number of bound variable references across all expressions, used for
    /// computational cost estimation.
    #[must_use]
    pub fn bound_var_count(&self) -> usize {
        let exprs = std::iter::once(&self.predicate)
            .chain(self.assignments.iter().map(|a| &a.value))
            .chain(&self.calls_global)
            .chain(&self.calls_self)
            .chain(&self.calls_other);
        exprs.map(Expression::slot_count).sum()
    }
}
