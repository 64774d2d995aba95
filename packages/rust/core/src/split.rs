//! Split planning and metadata output.
//!
//! Groups assigned pages per patient, collects the pages left for manual
//! review, and writes the split metadata directory:
//!
//! ```text
//! <out_dir>/
//! ├── split_metadata.json   (the SplitManifest)
//! ├── patient_001.json      (one PatientDocument per patient)
//! └── patient_002.json
//! ```
//!
//! TOML output uses the same layout with `.toml` files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use patientsplit_shared::{
    AssignmentSummary, CURRENT_SCHEMA_VERSION, ClusterId, MetadataFormat, PatientCluster,
    PatientDocument, PatientSplitError, Result, RunId, SplitManifest, SplitPlan,
};

/// File stem of the global split metadata file.
pub const METADATA_FILE_STEM: &str = "split_metadata";

/// Paths written by [`write_split`].
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub metadata_path: PathBuf,
    pub document_paths: Vec<PathBuf>,
}

/// Group assigned pages by cluster.
///
/// Documents come out ordered by cluster id; clusters that received no
/// pages are omitted. With `include_unassigned` off the manual-review page
/// lists are left empty, while `total_pages` and `assigned_pages` still
/// account for every page.
pub fn plan_split(
    summary: &AssignmentSummary,
    clusters: &[PatientCluster],
    include_unassigned: bool,
) -> SplitPlan {
    let mut by_cluster: BTreeMap<ClusterId, (Vec<usize>, f64)> = BTreeMap::new();
    for assignment in summary.assignments.iter().filter(|a| a.is_assigned()) {
        if let Some(id) = assignment.cluster_id {
            let entry = by_cluster.entry(id).or_default();
            entry.0.push(assignment.page_index);
            entry.1 += assignment.score;
        }
    }

    let documents: Vec<PatientDocument> = by_cluster
        .into_iter()
        .map(|(cluster_id, (mut pages, score_sum))| {
            pages.sort_unstable();
            let identifiers = clusters
                .iter()
                .find(|c| c.id == cluster_id)
                .map(|c| {
                    c.representative_values
                        .iter()
                        .map(|(kind, rep)| (*kind, rep.value.clone()))
                        .collect()
                })
                .unwrap_or_default();
            PatientDocument {
                cluster_id,
                average_score: score_sum / pages.len() as f64,
                pages,
                identifiers,
            }
        })
        .collect();

    let assigned_pages = documents.iter().map(|d| d.pages.len()).sum();
    let (unassigned_pages, ambiguous_pages) = if include_unassigned {
        (
            summary.unassigned_pages.clone(),
            summary.ambiguous_pages.clone(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    SplitPlan {
        documents,
        unassigned_pages,
        ambiguous_pages,
        total_pages: summary.assignments.len(),
        assigned_pages,
    }
}

/// Wrap a plan with run metadata.
pub fn build_manifest(
    plan: SplitPlan,
    source: impl Into<String>,
    source_sha256: Option<String>,
) -> SplitManifest {
    SplitManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id: RunId::new(),
        source: source.into(),
        source_sha256,
        generated_at: Utc::now(),
        plan,
    }
}

/// Serialize split metadata as pretty JSON or TOML.
pub fn render_metadata<T: Serialize>(data: &T, format: MetadataFormat) -> Result<String> {
    match format {
        MetadataFormat::Json => serde_json::to_string_pretty(data)
            .map_err(|e| PatientSplitError::Serialization(format!("JSON: {e}"))),
        MetadataFormat::Toml => toml::to_string_pretty(data)
            .map_err(|e| PatientSplitError::Serialization(format!("TOML: {e}"))),
    }
}

/// Write the manifest and one file per patient document into `out_dir`.
///
/// Each file is written to a temp name and renamed into place.
#[instrument(skip_all, fields(out_dir = %out_dir.display(), documents = manifest.plan.documents.len()))]
pub fn write_split(
    out_dir: &Path,
    manifest: &SplitManifest,
    format: MetadataFormat,
) -> Result<SplitOutput> {
    std::fs::create_dir_all(out_dir).map_err(|e| PatientSplitError::io(out_dir, e))?;

    let mut document_paths = Vec::with_capacity(manifest.plan.documents.len());
    for document in &manifest.plan.documents {
        let file_name = format!("{}.{}", document.cluster_id, format.extension());
        let path = write_atomic(out_dir, &file_name, &render_metadata(document, format)?)?;
        document_paths.push(path);
    }

    let file_name = format!("{METADATA_FILE_STEM}.{}", format.extension());
    let metadata_path = write_atomic(out_dir, &file_name, &render_metadata(manifest, format)?)?;

    info!(
        run_id = %manifest.run_id,
        path = %metadata_path.display(),
        "split metadata written"
    );

    Ok(SplitOutput {
        metadata_path,
        document_paths,
    })
}

/// Read back a manifest written by [`write_split`], checking its schema version.
pub fn read_manifest(path: &Path) -> Result<SplitManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| PatientSplitError::io(path, e))?;
    let manifest: SplitManifest = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| {
            PatientSplitError::validation(format!("invalid {}: {e}", path.display()))
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            PatientSplitError::validation(format!("invalid {}: {e}", path.display()))
        })?,
    };

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(PatientSplitError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }

    Ok(manifest)
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_atomic(dir: &Path, file_name: &str, content: &str) -> Result<PathBuf> {
    let target = dir.join(file_name);
    let temp = dir.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| PatientSplitError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| PatientSplitError::io(&target, e))?;

    debug!(path = %target.display(), size = content.len(), "wrote file");
    Ok(target)
}
