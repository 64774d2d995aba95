//! End-to-end resolution: page records → linking → assignment → split plan.

use std::time::{Duration, Instant};

use tracing::{info, instrument};

use patientsplit_shared::{
    AssignmentSummary, PageRecords, PatientCluster, ResolveConfig, Result, SplitPlan,
};

use crate::assigner::assign_pages;
use crate::linker::link_entities;
use crate::split::plan_split;

/// Wall-clock time spent in one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: &'static str,
    pub duration: Duration,
}

/// Result of [`resolve_document`].
#[derive(Debug)]
pub struct ResolveResult {
    /// Frozen patient clusters, numbered in order of first page.
    pub clusters: Vec<PatientCluster>,
    /// One assignment per input page, in page order.
    pub summary: AssignmentSummary,
    pub plan: SplitPlan,
    pub stage_timings: Vec<StageTiming>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &ResolveResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &ResolveResult) {}
}

/// Resolve which pages belong to which patient.
///
/// Configuration is validated up front; that is the only error path.
/// Insufficient evidence shows up as unassigned pages, never as an error.
#[instrument(skip_all, fields(pages = pages.len(), strict = config.linking.strict_mode))]
pub fn resolve_document(
    pages: &[PageRecords],
    config: &ResolveConfig,
    progress: &dyn ProgressReporter,
) -> Result<ResolveResult> {
    config.validate()?;

    let start = Instant::now();
    let mut stage_timings = Vec::with_capacity(3);

    // --- Phase 1: Entity linking ---
    progress.phase("Linking patient identities");
    let stage = Instant::now();
    let clusters = link_entities(pages, &config.matching, &config.linking);
    stage_timings.push(StageTiming {
        stage: "linking",
        duration: stage.elapsed(),
    });

    // --- Phase 2: Page assignment ---
    progress.phase("Assigning pages");
    let stage = Instant::now();
    let summary = assign_pages(pages, &clusters, &config.matching, &config.assignment);
    stage_timings.push(StageTiming {
        stage: "assignment",
        duration: stage.elapsed(),
    });

    // --- Phase 3: Split planning ---
    progress.phase("Planning split");
    let stage = Instant::now();
    let plan = plan_split(&summary, &clusters, config.include_unassigned);
    stage_timings.push(StageTiming {
        stage: "planning",
        duration: stage.elapsed(),
    });

    let result = ResolveResult {
        clusters,
        summary,
        plan,
        stage_timings,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        clusters = result.clusters.len(),
        documents = result.plan.documents.len(),
        assigned = result.plan.assigned_pages,
        unassigned = result.summary.unassigned_pages.len(),
        ambiguous = result.summary.ambiguous_pages.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "resolution complete"
    );

    Ok(result)
}
