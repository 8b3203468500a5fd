//! Runtime entities.
//!
//! An [`Entity`] owns one [`Document`] holding all of its state, the rules
//! compiled from that document's `invokes` array, and a set of management
//! flags the frame driver and renderer act on. Identity is the entity's
//! `Arc` allocation plus a process-unique id; rules and the bus refer to
//! entities weakly, the scene container owns them.

use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    bus::InvokeBus,
    document::{Document, DocumentCache},
    error::{DocError, ErrorCode},
    expr::ExprContext,
    funcs,
    resource::{self, RefOverride},
    rules::{ParsedRules, parse_rules},
};

static ENTITY_IDS: AtomicU64 = AtomicU64::new(1);

/// Management flags checked by the frame driver and renderer.
///
/// All atomic: rules running in parallel pair batches flip them through
/// functioncalls (`delete`, `update-text`, `reload-invokes`).
#[derive(Debug, Default)]
pub struct EntityFlags {
    /// Destroy this entity at the end of the current frame.
    pub delete_from_scene: AtomicBool,
    /// Re-rasterize text through the renderer on the next render.
    pub recalculate_text: AtomicBool,
    /// Re-parse rules from the document before the next update.
    pub reload_rules: AtomicBool,
}

/// Derived render geometry, recomputed at the end of each update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A scene object: one document, its compiled rules, and its command surface.
pub struct Entity {
    id: u64,
    /// Self-reference so rules can carry a weak `self` back-pointer.
    weak: Weak<Self>,
    doc: Arc<Document>,
    /// Compile context with `self_doc` bound to this entity's document.
    ctx: ExprContext,
    rules: Mutex<ParsedRules>,
    pub flags: EntityFlags,
    geometry: Mutex<Rect>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity").field("id", &self.id).finish()
    }
}

impl Entity {
    /// Builds an entity from an already-parsed document.
    #[must_use]
    pub fn from_doc(
        doc: Document,
        global: &Arc<Document>,
        cache: &Arc<DocumentCache>,
    ) -> Arc<Self> {
        let id = ENTITY_IDS.fetch_add(1, Ordering::Relaxed);
        doc.set("id", i64::try_from(id).unwrap_or_default());
        let doc = Arc::new(doc);
        let entity = Arc::new_cyclic(|weak| Self {
            id,
            weak: weak.clone(),
            doc: Arc::clone(&doc),
            ctx: ExprContext {
                self_doc: doc,
                global: Arc::clone(global),
                cache: Arc::clone(cache),
            },
            rules: Mutex::new(ParsedRules::default()),
            flags: EntityFlags::default(),
            geometry: Mutex::new(Rect::default()),
        });
        entity.flags.reload_rules.store(true, Ordering::Relaxed);
        entity
    }

    /// Builds an entity from a reference: inline JSON, or a file path with
    /// optional `|key=value` / `|functioncall` overrides.
    ///
    /// Key overrides are applied here; functioncall overrides are returned
    /// for the caller to dispatch once the entity is in the scene.
    pub fn from_ref(
        reference: &str,
        global: &Arc<Document>,
        cache: &Arc<DocumentCache>,
    ) -> Result<(Arc<Self>, Vec<String>), DocError> {
        let (doc, calls) = if resource::looks_like_json(reference) {
            (Document::from_text(reference)?, Vec::new())
        } else {
            let doc_ref = resource::split_ref(reference);
            let text = resource::load_text(&doc_ref.path)
                .ok_or_else(|| DocError::Malformed(format!("cannot load {:?}", doc_ref.path)))?;
            let doc = Document::from_text(&text)?;
            let mut calls = Vec::new();
            for over in doc_ref.overrides {
                match over {
                    RefOverride::KeyValue { key, value } => doc.set_auto(&key, &value),
                    RefOverride::Call(call) => calls.push(call),
                }
            }
            (doc, calls)
        };
        Ok((Self::from_doc(doc, global, cache), calls))
    }

    /// Process-unique id, also mirrored into the document's `id` key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owning `Arc` for this entity. Valid while the entity is alive.
    #[must_use]
    pub fn arc(&self) -> Arc<Self> {
        self.weak.upgrade().expect("entity is alive while borrowed")
    }

    /// The entity's backing document.
    #[must_use]
    pub fn doc(&self) -> &Arc<Document> {
        &self.doc
    }

    /// Expression context bound to this entity as `self`.
    #[must_use]
    pub fn ctx(&self) -> &ExprContext {
        &self.ctx
    }

    /// Serialized document state.
    #[must_use]
    pub fn serialize(&self) -> String {
        self.doc.serialize()
    }

    /// Replaces document state from JSON/JSONC text or a `path|override`
    /// reference, and schedules a rule reload.
    pub fn deserialize(&self, src: &str) -> Result<(), DocError> {
        if resource::looks_like_json(src) {
            self.doc.deserialize(src)?;
        } else {
            let doc_ref = resource::split_ref(src);
            let text = resource::load_text(&doc_ref.path)
                .ok_or_else(|| DocError::Malformed(format!("cannot load {:?}", doc_ref.path)))?;
            self.doc.deserialize(&text)?;
            for over in doc_ref.overrides {
                match over {
                    RefOverride::KeyValue { key, value } => self.doc.set_auto(&key, &value),
                    RefOverride::Call(call) => {
                        let _ = self.parse_str(&call);
                    }
                }
            }
        }
        self.flags.reload_rules.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Per-frame update: reload rules when flagged, run local rules,
    /// broadcast global rules, subscribe to listened topics, and refresh the
    /// derived geometry.
    pub fn update(&self, bus: &InvokeBus) {
        if self.flags.reload_rules.swap(false, Ordering::Relaxed) {
            self.reload_rules_now();
        }
        let this = self.arc();
        {
            let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
            for rule in &rules.local {
                if rule.is_true(&self.doc) {
                    bus.apply_pair(rule, &this);
                }
            }
            for rule in &rules.global {
                bus.broadcast(Arc::clone(rule));
            }
        }
        for topic in self.doc.string_items("listens") {
            bus.listen(&this, &topic);
        }
        self.recalculate_geometry();
    }

    /// Re-parses the `invokes` array into compiled rules.
    pub fn reload_rules_now(&self) {
        let parsed = parse_rules(&self.doc, &self.ctx, self.weak.clone());
        *self.rules.lock().unwrap_or_else(PoisonError::into_inner) = parsed;
    }

    /// Routes a command through the entity command tree. The first token
    /// must be a self-identifier (`self`, `other`, ...) and is stripped.
    pub fn parse_str(&self, command: &str) -> ErrorCode {
        funcs::entity_tree().parse_str(&self.arc(), command)
    }

    /// Rough per-frame cost: bound variable references weighted by how many
    /// listeners each topic currently attracts. Schedulers use this to size
    /// batches.
    #[must_use]
    pub fn estimate_computational_cost(&self, bus: &InvokeBus) -> u64 {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let global: u64 = rules
            .global
            .iter()
            .map(|rule| rule.bound_var_count() as u64 * bus.listener_count(&rule.topic).max(1) as u64)
            .sum();
        let local: u64 = rules.local.iter().map(|rule| rule.bound_var_count() as u64).sum();
        global + local
    }

    /// Cached destination rectangle derived from `pos.*` and `sprite.*`.
    #[must_use]
    pub fn dst_rect(&self) -> Rect {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recalculate_geometry(&self) {
        let guard = self.doc.lock();
        let scale = guard.get("sprite.scale", 1.0);
        let rect = Rect {
            x: guard.get("pos.x", 0.0),
            y: guard.get("pos.y", 0.0),
            w: guard.get("sprite.w", 0.0) * scale,
            h: guard.get("sprite.h", 0.0) * scale,
        };
        drop(guard);
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner) = rect;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> (Arc<Document>, Arc<DocumentCache>) {
        (Arc::new(Document::new()), Arc::new(DocumentCache::new()))
    }

    #[test]
    fn from_doc_assigns_ids_and_schedules_reload() {
        let (global, cache) = deps();
        let a = Entity::from_doc(Document::new(), &global, &cache);
        let b = Entity::from_doc(Document::new(), &global, &cache);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.doc().get("id", 0i64), i64::try_from(a.id()).unwrap());
        assert!(a.flags.reload_rules.load(Ordering::Relaxed));
        assert!(Arc::ptr_eq(&a.arc(), &a));
    }

    #[test]
    fn inline_json_reference() {
        let (global, cache) = deps();
        let (entity, calls) =
            Entity::from_ref(r#"{ "hp": 10, "listens": ["tick"] }"#, &global, &cache).unwrap();
        assert!(calls.is_empty());
        assert_eq!(entity.doc().get("hp", 0i64), 10);
    }

    #[test]
    fn geometry_follows_document() {
        let (global, cache) = deps();
        let entity = Entity::from_doc(
            Document::from_text(
                r#"{ "pos": {"x": 4.0, "y": 6.0}, "sprite": {"w": 8, "h": 2, "scale": 2.0} }"#,
            )
            .unwrap(),
            &global,
            &cache,
        );
        entity.recalculate_geometry();
        assert_eq!(
            entity.dst_rect(),
            Rect {
                x: 4.0,
                y: 6.0,
                w: 16.0,
                h: 4.0
            }
        );
    }
}
