//! The per-entity command surface.
//!
//! Commands arrive as `self <command> ...` (or `other <command> ...` from
//! rules); the leading identifier is stripped by the tree. Handlers are
//! stateless over `Arc<Entity>`, so one shared table serves every entity.

use std::sync::{Arc, LazyLock, atomic::Ordering};

use super::{
    doc_cmds::{self, HasDoc},
    tree::{Args, FuncTree},
};
use crate::{
    document::{Document, MemberKind},
    entity::Entity,
    error::ErrorCode,
    resource,
};

static ENTITY_TREE: LazyLock<Arc<FuncTree<Arc<Entity>>>> = LazyLock::new(|| {
    let mut tree = FuncTree::new("entity");
    tree.bind_function("delete", delete, "mark this entity for removal at end of frame");
    tree.bind_function("update-text", update_text, "re-rasterize text on next render");
    tree.bind_function("reload-invokes", reload_invokes, "re-parse rules before next update");
    tree.bind_function("add-invoke", add_invoke, "add-invoke <file>: append a rule reference");
    tree.bind_function(
        "remove-invoke",
        remove_invoke,
        "remove-invoke <name>: drop rules by file reference or topic",
    );
    tree.bind_function("echo", echo, "echo <...>: print the arguments");
    tree.bind_function("log", log_doc, "log [file...]: dump the document as JSON");
    doc_cmds::register(&mut tree);
    Arc::new(tree)
});

/// The shared entity command tree.
pub(crate) fn entity_tree() -> &'static Arc<FuncTree<Arc<Entity>>> {
    &ENTITY_TREE
}

impl HasDoc for Arc<Entity> {
    fn target_doc(&self) -> Arc<Document> {
        Arc::clone(self.doc())
    }
}

fn delete(entity: &Arc<Entity>, _args: &Args<'_>) -> ErrorCode {
    entity.flags.delete_from_scene.store(true, Ordering::Relaxed);
    ErrorCode::None
}

fn update_text(entity: &Arc<Entity>, _args: &Args<'_>) -> ErrorCode {
    entity.flags.recalculate_text.store(true, Ordering::Relaxed);
    ErrorCode::None
}

fn reload_invokes(entity: &Arc<Entity>, _args: &Args<'_>) -> ErrorCode {
    entity.flags.reload_rules.store(true, Ordering::Relaxed);
    ErrorCode::None
}

fn add_invoke(entity: &Arc<Entity>, args: &Args<'_>) -> ErrorCode {
    let Some(reference) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let doc = entity.doc();
    let index = doc.member_size("invokes");
    doc.set(&format!("invokes[{index}]"), reference.to_string());
    entity.flags.reload_rules.store(true, Ordering::Relaxed);
    ErrorCode::None
}

fn remove_invoke(entity: &Arc<Entity>, args: &Args<'_>) -> ErrorCode {
    let Some(name) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let doc = entity.doc();
    let mut removed = false;
    // walk backwards so removals do not shift the indices still to visit
    for index in (0..doc.member_size("invokes")).rev() {
        let key = format!("invokes[{index}]");
        let matches = match doc.member_check(&key) {
            MemberKind::Leaf => doc.get(&key, String::new()) == name,
            MemberKind::Object => doc.get(&format!("{key}.topic"), String::new()) == name,
            _ => false,
        };
        if matches {
            removed |= doc.remove(&key);
        }
    }
    if removed {
        entity.flags.reload_rules.store(true, Ordering::Relaxed);
        ErrorCode::None
    } else {
        ErrorCode::CustomError
    }
}

fn echo(_entity: &Arc<Entity>, args: &Args<'_>) -> ErrorCode {
    println!("{}", args.tail(1));
    ErrorCode::None
}

fn log_doc(entity: &Arc<Entity>, args: &Args<'_>) -> ErrorCode {
    let serialized = entity.serialize();
    let targets: Vec<String> = if args.argc() > 1 {
        args.argv()[1..].to_vec()
    } else {
        vec![format!("entity_id{}.log.json", entity.id())]
    };
    for target in targets {
        if let Err(err) = resource::write_text(&target, &serialized) {
            log::warn!("could not write {target:?}: {err}");
            return ErrorCode::CustomError;
        }
    }
    ErrorCode::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentCache;

    fn entity() -> Arc<Entity> {
        let global = Arc::new(Document::new());
        let cache = Arc::new(DocumentCache::new());
        Entity::from_doc(Document::new(), &global, &cache)
    }

    #[test]
    fn flags_are_set_by_commands() {
        let entity = entity();
        entity.flags.reload_rules.store(false, Ordering::Relaxed);
        assert_eq!(entity.parse_str("self delete"), ErrorCode::None);
        assert_eq!(entity.parse_str("self update-text"), ErrorCode::None);
        assert_eq!(entity.parse_str("self reload-invokes"), ErrorCode::None);
        assert!(entity.flags.delete_from_scene.load(Ordering::Relaxed));
        assert!(entity.flags.recalculate_text.load(Ordering::Relaxed));
        assert!(entity.flags.reload_rules.load(Ordering::Relaxed));
    }

    #[test]
    fn add_and_remove_invoke_edit_the_document() {
        let entity = entity();
        assert_eq!(entity.parse_str("self add-invoke rules/follow.jsonc"), ErrorCode::None);
        assert_eq!(entity.doc().member_size("invokes"), 1);
        assert_eq!(entity.parse_str("self remove-invoke rules/follow.jsonc"), ErrorCode::None);
        assert_eq!(entity.doc().member_size("invokes"), 0);
        assert_eq!(
            entity.parse_str("self remove-invoke missing"),
            ErrorCode::CustomError
        );
    }

    #[test]
    fn document_ops_are_inherited() {
        let entity = entity();
        assert_eq!(entity.parse_str("self set hp 42"), ErrorCode::None);
        assert_eq!(entity.doc().get("hp", 0i64), 42);
        assert_eq!(entity.parse_str("self copy hp hp_backup"), ErrorCode::None);
        assert_eq!(entity.doc().get("hp_backup", 0i64), 42);
        assert_eq!(entity.parse_str("self delete-key hp"), ErrorCode::None);
        assert_eq!(entity.doc().get("hp", -1i64), -1);
    }

    #[test]
    fn unknown_command_is_critical() {
        let entity = entity();
        assert_eq!(
            entity.parse_str("self frobnicate"),
            ErrorCode::CriticalFunctioncallInvalid
        );
    }
}
