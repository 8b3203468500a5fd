//! Command dispatch: the generic tree plus the registration groups for each
//! domain (global space, entities, documents).

mod doc_cmds;
mod entity_cmds;
mod global_cmds;
mod tree;

pub use doc_cmds::HasDoc;
pub use tree::{Args, FlagValue, FuncTree, Handler, VarSlot, var_slot};

pub(crate) use entity_cmds::entity_tree;
pub(crate) use global_cmds::build_global_tree;
