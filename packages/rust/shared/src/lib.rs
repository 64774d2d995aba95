//! Shared types, error model, and configuration for patientsplit.
//!
//! This crate is the foundation depended on by all other patientsplit crates.
//! It provides:
//! - [`PatientSplitError`]: the unified error type
//! - Domain types ([`IdentifierRecord`], [`PatientCluster`], [`PageAssignment`], [`SplitPlan`])
//! - Configuration ([`AppConfig`], [`ResolveConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssignmentConfig, ExtractionConfig, FieldWeights, LinkingConfig, MatchingConfig,
    MetadataFormat, OutputConfig, ResolveConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{PatientSplitError, Result};
pub use types::{
    AssignmentDecision, AssignmentReason, AssignmentSummary, CURRENT_SCHEMA_VERSION, ClusterId,
    FieldKind, IdentifierRecord, PageAssignment, PageRecords, PageText, PatientCluster,
    PatientDocument, RepresentativeValue, RunId, SimilarityScore, SplitManifest, SplitPlan,
};
