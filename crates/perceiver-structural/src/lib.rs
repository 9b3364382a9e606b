//! Structural perception over captured pages: a tolerant HTML parser, JSON
//! snapshot ingestion, element judges, a small CSS selector engine and the
//! DOM condenser.

pub mod classify;
pub mod condense;
pub mod dom;
pub mod errors;
pub mod judges;
pub mod page;
mod parse;
pub mod selector;
mod snapshot;

pub use classify::DEFAULT_TEST_ID_ATTRIBUTES;
pub use condense::{
    condense, condense_snapshot, condense_tree, condense_with, estimate_tokens, CondenseOptions,
    CondensedDOM, ElementDescriptor, LARGE_INPUT_BYTES,
};
pub use dom::{collapse_whitespace, DomNode, DomTree, ElementData, NodeData, NodeId};
pub use errors::PerceiverError;
pub use judges::{interactable, visible, JudgeReport};
pub use page::RawPage;
pub use parse::decode_entities;
pub use selector::{css_for, path_for, query, quote, Selector};
