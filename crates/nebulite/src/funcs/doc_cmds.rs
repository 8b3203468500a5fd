//! Document key operations, registered on every domain that exposes one.
//!
//! The same command group serves the global tree (operating on the global
//! document) and entity trees (operating on the entity document); the domain
//! only has to say which document it owns via [`HasDoc`].

use std::sync::Arc;

use super::tree::{Args, FuncTree};
use crate::{document::Document, error::ErrorCode};

/// A command context that owns a document for `set`/`get`/key ops.
pub trait HasDoc {
    fn target_doc(&self) -> Arc<Document>;
}

/// Registers the document key operations on a tree.
pub fn register<C: HasDoc>(tree: &mut FuncTree<C>) {
    tree.bind_function("set", set_key::<C>, "set <key> <value>: write a value");
    tree.bind_function("get", get_key::<C>, "get <key>: print a value");
    tree.bind_function("copy", copy_key::<C>, "copy <from> <to>: duplicate a subtree");
    tree.bind_function("move", move_key::<C>, "move <from> <to>: relocate a subtree");
    tree.bind_function("delete-key", delete_key::<C>, "delete-key <key>: remove a subtree");
}

fn set_key<C: HasDoc>(ctx: &C, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 3 {
        return ErrorCode::TooFewArgs;
    }
    let Some(key) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    ctx.target_doc().set_auto(key, &args.tail(2));
    ErrorCode::None
}

fn get_key<C: HasDoc>(ctx: &C, args: &Args<'_>) -> ErrorCode {
    if args.argc() < 2 {
        return ErrorCode::TooFewArgs;
    }
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    let Some(key) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    match ctx.target_doc().serialize_key(key) {
        Some(value) => println!("{key} = {value}"),
        None => println!("{key} is not set"),
    }
    ErrorCode::None
}

fn copy_key<C: HasDoc>(ctx: &C, args: &Args<'_>) -> ErrorCode {
    let (Some(from), Some(to)) = (args.get(1), args.get(2)) else {
        return ErrorCode::TooFewArgs;
    };
    if args.argc() > 3 {
        return ErrorCode::TooManyArgs;
    }
    if ctx.target_doc().copy_key(from, to) {
        ErrorCode::None
    } else {
        ErrorCode::CustomError
    }
}

fn move_key<C: HasDoc>(ctx: &C, args: &Args<'_>) -> ErrorCode {
    let (Some(from), Some(to)) = (args.get(1), args.get(2)) else {
        return ErrorCode::TooFewArgs;
    };
    if args.argc() > 3 {
        return ErrorCode::TooManyArgs;
    }
    if ctx.target_doc().move_key(from, to) {
        ErrorCode::None
    } else {
        ErrorCode::CustomError
    }
}

fn delete_key<C: HasDoc>(ctx: &C, args: &Args<'_>) -> ErrorCode {
    let Some(key) = args.get(1) else {
        return ErrorCode::TooFewArgs;
    };
    if args.argc() > 2 {
        return ErrorCode::TooManyArgs;
    }
    ctx.target_doc().remove(key);
    ErrorCode::None
}
