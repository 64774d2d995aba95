//! Page assignment: score each page against the resolved clusters and decide.

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use patientsplit_shared::{
    AssignmentConfig, AssignmentDecision, AssignmentReason, AssignmentSummary, ClusterId,
    FieldKind, FieldWeights, MatchingConfig, PageAssignment, PageRecords, PatientCluster,
};

use crate::similarity::similarity;

/// Slack for threshold comparisons, so a margin or score that equals its
/// threshold in decimal still meets it after floating-point subtraction.
const SCORE_EPSILON: f64 = 1e-9;

/// Assign every page to at most one cluster.
///
/// Exactly one assignment per input page, in input order. Pages are scored
/// in parallel; the thread count has no effect on the result.
#[instrument(skip_all, fields(pages = pages.len(), clusters = clusters.len()))]
pub fn assign_pages(
    pages: &[PageRecords],
    clusters: &[PatientCluster],
    matching: &MatchingConfig,
    config: &AssignmentConfig,
) -> AssignmentSummary {
    let assignments: Vec<PageAssignment> = pages
        .par_iter()
        .map(|page| assign_page(page, clusters, matching, config))
        .collect();

    let pages_with = |decision: AssignmentDecision| -> Vec<usize> {
        assignments
            .iter()
            .filter(|a| a.decision == decision)
            .map(|a| a.page_index)
            .collect()
    };
    let unassigned_pages = pages_with(AssignmentDecision::UnassignedLowConfidence);
    let ambiguous_pages = pages_with(AssignmentDecision::UnassignedAmbiguous);

    let summary = AssignmentSummary {
        assignments,
        unassigned_pages,
        ambiguous_pages,
    };

    info!(
        assigned = summary.assigned_count(),
        unassigned = summary.unassigned_pages.len(),
        ambiguous = summary.ambiguous_pages.len(),
        "page assignment complete"
    );

    summary
}

/// Apply the decision rule to one page's cluster scores, ranked best first.
///
/// - no clusters, or a best score of 0 or below `min_confidence`: low confidence
/// - more than one cluster within `ambiguity_margin` of each other: ambiguous
/// - otherwise assigned to the best cluster
///
/// With `allow_unassigned` off, any positive best score is assigned.
pub fn decide(
    page_index: usize,
    ranked: &[(ClusterId, f64)],
    config: &AssignmentConfig,
) -> PageAssignment {
    let Some(&(best_id, best)) = ranked.first() else {
        return PageAssignment {
            page_index,
            cluster_id: None,
            score: 0.0,
            margin: 0.0,
            decision: AssignmentDecision::UnassignedLowConfidence,
            reasons: Vec::new(),
        };
    };
    let second = ranked.get(1).map_or(0.0, |&(_, score)| score);
    let margin = best - second;

    let decision = if !config.allow_unassigned && best > 0.0 {
        AssignmentDecision::Assigned
    } else if best <= 0.0 || best + SCORE_EPSILON < config.min_confidence {
        AssignmentDecision::UnassignedLowConfidence
    } else if ranked.len() > 1 && margin + SCORE_EPSILON < config.ambiguity_margin {
        AssignmentDecision::UnassignedAmbiguous
    } else {
        AssignmentDecision::Assigned
    };

    PageAssignment {
        page_index,
        cluster_id: (decision == AssignmentDecision::Assigned).then_some(best_id),
        score: best,
        margin,
        decision,
        reasons: Vec::new(),
    }
}

fn assign_page(
    page: &PageRecords,
    clusters: &[PatientCluster],
    matching: &MatchingConfig,
    config: &AssignmentConfig,
) -> PageAssignment {
    let present: Vec<FieldKind> = FieldKind::ALL
        .into_iter()
        .filter(|&kind| page.values_of(kind).next().is_some())
        .collect();
    let denominator = config.weights.total_of(present.iter().copied());

    if present.is_empty() || denominator <= 0.0 {
        debug!(page = page.page_index, "no usable identifiers on page");
        return decide(page.page_index, &[], config);
    }

    let mut scored: Vec<(ClusterId, f64, Vec<AssignmentReason>)> = clusters
        .iter()
        .map(|cluster| {
            let (score, reasons) =
                score_against(page, cluster, &present, denominator, matching, &config.weights);
            (cluster.id, score, reasons)
        })
        .collect();
    scored.sort_by(|x, y| y.1.total_cmp(&x.1).then_with(|| x.0.cmp(&y.0)));

    let ranked: Vec<(ClusterId, f64)> = scored.iter().map(|(id, score, _)| (*id, *score)).collect();
    let mut assignment = decide(page.page_index, &ranked, config);
    assignment.reasons = scored
        .into_iter()
        .next()
        .map(|(_, _, reasons)| reasons)
        .unwrap_or_default();

    debug!(
        page = page.page_index,
        decision = %assignment.decision,
        score = assignment.score,
        margin = assignment.margin,
        "page decided"
    );

    assignment
}

/// Weighted agreement of a page with one cluster over the kinds present on the page.
fn score_against(
    page: &PageRecords,
    cluster: &PatientCluster,
    present: &[FieldKind],
    denominator: f64,
    matching: &MatchingConfig,
    weights: &FieldWeights,
) -> (f64, Vec<AssignmentReason>) {
    let mut total = 0.0;
    let mut reasons = Vec::with_capacity(present.len());

    for &kind in present {
        let cluster_value = cluster.representative(kind);

        // Best-matching page value of this kind; the first one wins ties.
        let mut best: Option<(f64, &str)> = None;
        for record in page.values_of(kind) {
            let value = record.normalized_value.as_str();
            let sim = cluster_value
                .and_then(|rep| similarity(kind, value, rep, matching))
                .unwrap_or(0.0);
            if best.is_none_or(|(current, _)| sim > current) {
                best = Some((sim, value));
            }
        }
        let Some((sim, page_value)) = best else {
            continue;
        };

        let contribution = weights.get(kind) * sim / denominator;
        total += contribution;
        reasons.push(AssignmentReason {
            kind,
            page_value: page_value.trim().to_string(),
            cluster_value: cluster_value.map(str::to_string),
            contribution,
        });
    }

    (total.clamp(0.0, 1.0), reasons)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
