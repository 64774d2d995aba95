//! Patient identity resolution for multi-patient scanned documents.
//!
//! This crate links per-page identifier records into patient clusters,
//! assigns pages to those clusters (or leaves them for manual review), and
//! plans the per-patient split (e.g., `pipeline::resolve_document`).

pub mod assigner;
pub mod linker;
pub mod pipeline;
pub mod similarity;
pub mod split;
