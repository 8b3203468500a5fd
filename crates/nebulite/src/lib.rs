#![doc = include_str!("../../../README.md")]

mod bus;
mod document;
mod entity;
mod error;
mod expr;
mod funcs;
mod global;
mod io;
mod render;
mod resource;
mod rules;
mod time;

pub use crate::{
    bus::{InvokeBus, PAIR_BATCH_SIZE},
    document::{
        DocValue, Document, DocumentCache, MemberKind, NumCell, ReadOnlyDoc, fmt_double,
        strip_comments,
    },
    entity::{Entity, EntityFlags, Rect},
    error::{DocError, ErrorCode, ParseError, TaskQueueResult},
    expr::{ExprContext, Expression},
    funcs::{Args, FlagValue, FuncTree, HasDoc, VarSlot, var_slot},
    global::{GlobalSpace, QueueKind},
    io::{CollectStringPrint, NoPrint, PrintWriter, SharedPrint, StdPrint},
    render::{HeadlessRenderer, Renderer},
    resource::{DocRef, RefOverride, resolve as resolve_path, split_ref},
    rules::{AssignOp, Assignment, ParsedRules, Ruleset, Target, parse_rules},
    time::TimeKeeper,
};
