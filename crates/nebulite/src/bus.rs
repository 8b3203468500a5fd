//! The invoke bus: topic-keyed broadcast/listen and batched parallel apply.
//!
//! Rules broadcast into `published_next_frame`; at `end_frame` the bus swaps
//! next into this, so a rule broadcast in frame N is visible to listeners in
//! frame N+1. Listening evaluates each published rule's predicate against
//! (self = publisher, other = listener); matches are collected into fixed-size
//! batches, and `apply_all` runs one scoped worker per batch, joining before
//! it returns. No worker survives the frame.
//!
//! Rules that both write the same global or other key from different batches
//! are racy by design; the numeric read-modify-write ops are atomic, so
//! commutative updates like `+=` still sum exactly.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use ahash::AHashMap;

use crate::{
    document::{Document, fmt_double},
    entity::Entity,
    rules::{AssignOp, Ruleset, Target},
};

/// Matched pairs per worker batch.
pub const PAIR_BATCH_SIZE: usize = 128;

type Pair = (Arc<Ruleset>, Arc<Entity>);
type TopicMap = AHashMap<String, Vec<Arc<Ruleset>>>;

/// Shared FIFO the bus appends global functioncalls to; drained by the frame
/// driver after `apply_all`.
pub type CommandQueue = Arc<Mutex<VecDeque<String>>>;

/// Per-frame broadcast/listen/apply hub.
pub struct InvokeBus {
    global: Arc<Document>,
    /// Rules visible to listeners this frame. Immutable during the listen
    /// phase; only `end_frame` writes it.
    published_this_frame: RwLock<TopicMap>,
    /// Rules broadcast during this frame, visible next frame.
    published_next_frame: Mutex<TopicMap>,
    /// Batches of matched `(rule, listener)` pairs awaiting `apply_all`.
    matched_pairs: Mutex<Vec<Vec<Pair>>>,
    /// Listen calls per topic this frame, for cost estimation.
    listen_counts: Mutex<AHashMap<String, usize>>,
    commands: CommandQueue,
}

impl InvokeBus {
    #[must_use]
    pub fn new(global: Arc<Document>, commands: CommandQueue) -> Self {
        Self {
            global,
            published_this_frame: RwLock::new(TopicMap::new()),
            published_next_frame: Mutex::new(TopicMap::new()),
            matched_pairs: Mutex::new(Vec::new()),
            listen_counts: Mutex::new(AHashMap::new()),
            commands,
        }
    }

    /// The global document assignments with `global.` targets write to.
    #[must_use]
    pub fn global_doc(&self) -> &Arc<Document> {
        &self.global
    }

    /// Publishes a rule for next frame under its topic.
    ///
    /// Rules with an empty topic are local-only; broadcasting one is dropped
    /// with a warning.
    pub fn broadcast(&self, rule: Arc<Ruleset>) {
        if rule.topic.is_empty() {
            log::warn!("attempted to broadcast a rule with an empty topic; skipping");
            return;
        }
        self.published_next_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(rule.topic.clone())
            .or_default()
            .push(rule);
    }

    /// Evaluates every rule published on `topic` against `listener`,
    /// batching the matches.
    ///
    /// Self-matches (publisher == listener) are suppressed for broadcast
    /// rules; local interaction runs through [`Entity::update`] instead.
    pub fn listen(&self, listener: &Arc<Entity>, topic: &str) {
        *self
            .listen_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default() += 1;
        let published = self
            .published_this_frame
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(rules) = published.get(topic) else {
            return;
        };
        for rule in rules {
            let Some(owner) = rule.self_entity.upgrade() else {
                continue;
            };
            if Arc::ptr_eq(&owner, listener) {
                continue;
            }
            if rule.is_true(listener.doc()) {
                self.push_pair(Arc::clone(rule), Arc::clone(listener));
            }
        }
    }

    fn push_pair(&self, rule: Arc<Ruleset>, listener: Arc<Entity>) {
        let mut batches = self.matched_pairs.lock().unwrap_or_else(PoisonError::into_inner);
        match batches.last_mut() {
            Some(batch) if batch.len() < PAIR_BATCH_SIZE => batch.push((rule, listener)),
            _ => batches.push(vec![(rule, listener)]),
        }
    }

    /// Applies all matched batches, one scoped worker per batch, and joins.
    ///
    /// Pair order within a batch is preserved; batches run concurrently with
    /// no cross-batch ordering.
    pub fn apply_all(&self) {
        let batches = std::mem::take(
            &mut *self.matched_pairs.lock().unwrap_or_else(PoisonError::into_inner),
        );
        match batches.len() {
            0 => {}
            1 => {
                for (rule, listener) in &batches[0] {
                    self.apply_pair(rule, listener);
                }
            }
            _ => {
                std::thread::scope(|scope| {
                    for batch in &batches {
                        scope.spawn(move || {
                            for (rule, listener) in batch {
                                self.apply_pair(rule, listener);
                            }
                        });
                    }
                });
            }
        }
    }

    /// Applies one `(rule, other)` pair: self, other, then global assignment
    /// groups (declared order within each), then the functioncall lists.
    ///
    /// Also used for local rules, where `other` is the owning entity itself.
    pub fn apply_pair(&self, rule: &Arc<Ruleset>, other: &Arc<Entity>) {
        let Some(owner) = rule.self_entity.upgrade() else {
            return;
        };
        let other_doc = other.doc();
        for target in [Target::SelfDoc, Target::Other, Target::Global] {
            for assignment in rule.assignments.iter().filter(|a| a.target == target) {
                let doc = match target {
                    Target::SelfDoc => owner.doc(),
                    Target::Other => other_doc,
                    Target::Global => &self.global,
                };
                if assignment.value.is_returnable_as_double() {
                    let value = assignment.value.eval_as_double(other_doc);
                    apply_numeric(doc, &assignment.key, assignment.op, value);
                } else {
                    let value = assignment.value.eval(other_doc);
                    apply_text(doc, &assignment.key, assignment.op, &value);
                }
            }
        }
        for call in &rule.calls_global {
            let command = call.eval(other_doc);
            self.commands
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(command);
        }
        for call in &rule.calls_self {
            let command = call.eval(other_doc);
            let _ = owner.parse_str(&command);
        }
        for call in &rule.calls_other {
            let command = call.eval(other_doc);
            let _ = other.parse_str(&command);
        }
    }

    /// Frame boundary: clears matched pairs and listen counts, then makes the
    /// rules broadcast this frame visible for the next one.
    pub fn end_frame(&self) {
        self.matched_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.listen_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let next = std::mem::take(
            &mut *self.published_next_frame.lock().unwrap_or_else(PoisonError::into_inner),
        );
        *self
            .published_this_frame
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Drops all published rules and matched pairs (scene unload).
    pub fn clear(&self) {
        self.published_this_frame
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.published_next_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.matched_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Rules currently visible to listeners on `topic`.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> usize {
        self.published_this_frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Listen calls seen on `topic` this frame.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.listen_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .copied()
            .unwrap_or(0)
    }
}

fn apply_numeric(doc: &Document, key: &str, op: AssignOp, value: f64) {
    match op {
        AssignOp::Set => doc.set(key, value),
        AssignOp::Add => doc.set_add(key, value),
        AssignOp::Multiply => doc.set_multiply(key, value),
        AssignOp::Concat => doc.set_concat(key, &fmt_double(value)),
    }
}

fn apply_text(doc: &Document, key: &str, op: AssignOp, value: &str) {
    match op {
        AssignOp::Set => doc.set_auto(key, value),
        AssignOp::Add | AssignOp::Multiply => match value.trim().parse::<f64>() {
            Ok(parsed) if op == AssignOp::Add => doc.set_add(key, parsed),
            Ok(parsed) => doc.set_multiply(key, parsed),
            Err(_) => log::warn!("non-numeric value {value:?} for numeric assignment on {key:?}"),
        },
        AssignOp::Concat => doc.set_concat(key, value),
    }
}
