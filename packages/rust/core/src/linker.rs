//! Entity linking: cluster per-page identifier records into patients.
//!
//! Agglomerative merging over immutable snapshots. Every page seeds one
//! cluster; each round scores the cluster pairs it has not scored yet (in
//! parallel), picks the best eligible pair by (score desc, id pair asc), and
//! builds the next snapshot with that pair merged. Scores for pairs the merge
//! did not touch carry over to the next round.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use patientsplit_shared::{
    ClusterId, FieldKind, IdentifierRecord, LinkingConfig, MatchingConfig, PageRecords,
    PatientCluster, RepresentativeValue,
};

use crate::similarity::similarity;

/// Partition every record of every page into patient clusters.
///
/// Never fails: pages without usable identifiers stay singletons, and
/// zero pages yield zero clusters. Clusters come back numbered from 1 in
/// order of their first page.
#[instrument(skip_all, fields(pages = pages.len(), strict = linking.strict_mode))]
pub fn link_entities(
    pages: &[PageRecords],
    matching: &MatchingConfig,
    linking: &LinkingConfig,
) -> Vec<PatientCluster> {
    let mut snapshot = seed_clusters(pages);
    let mut scores: BTreeMap<(u32, u32), PairScore> = BTreeMap::new();
    let mut pending = all_pairs(&snapshot);
    let mut merges = 0usize;

    loop {
        let fresh: Vec<((u32, u32), PairScore)> = pending
            .par_iter()
            .map(|&(i, j)| {
                let (a, b) = (&snapshot[i], &snapshot[j]);
                (pair_key(a.seed, b.seed), score_pair(a, b, matching, linking))
            })
            .collect();
        scores.extend(fresh);

        let best = scores
            .par_iter()
            .filter(|(_, s)| s.eligible)
            .map(|(key, s)| (*key, *s))
            .reduce_with(better_pair);

        let Some(((keep, absorb), pair)) = best else {
            break;
        };

        debug!(
            keep,
            absorb,
            score = pair.score,
            anchored = pair.anchored,
            "merging clusters"
        );

        scores.retain(|&(a, b), _| a != keep && a != absorb && b != keep && b != absorb);
        snapshot = merge_into_next(snapshot, keep, absorb);
        merges += 1;

        let merged_pos = snapshot
            .iter()
            .position(|c| c.seed == keep)
            .unwrap_or_default();
        pending = (0..snapshot.len())
            .filter(|&other| other != merged_pos)
            .map(|other| (merged_pos.min(other), merged_pos.max(other)))
            .collect();
    }

    let clusters = freeze(snapshot);

    info!(
        clusters = clusters.len(),
        merges,
        records = clusters.iter().map(|c| c.member_records.len()).sum::<usize>(),
        "entity linking complete"
    );

    clusters
}

// ---------------------------------------------------------------------------
// Working state
// ---------------------------------------------------------------------------

/// A cluster under construction. `seed` is the input position of the page
/// that created it; merged clusters keep the smaller seed.
#[derive(Debug, Clone)]
struct WorkingCluster {
    seed: u32,
    /// (input sequence number, record), ordered by sequence number.
    members: Vec<(usize, IdentifierRecord)>,
    representatives: BTreeMap<FieldKind, RepresentativeValue>,
    pages: BTreeSet<usize>,
}

impl WorkingCluster {
    fn representative(&self, kind: FieldKind) -> Option<&str> {
        self.representatives.get(&kind).map(|r| r.value.as_str())
    }
}

fn seed_clusters(pages: &[PageRecords]) -> Vec<WorkingCluster> {
    let mut seq = 0usize;
    pages
        .iter()
        .enumerate()
        .map(|(pos, page)| {
            let members: Vec<(usize, IdentifierRecord)> = page
                .records
                .iter()
                .map(|record| {
                    seq += 1;
                    (seq, record.clone())
                })
                .collect();
            let mut page_set: BTreeSet<usize> = members.iter().map(|(_, r)| r.page_index).collect();
            page_set.insert(page.page_index);
            WorkingCluster {
                seed: pos as u32,
                representatives: select_representatives(&members),
                members,
                pages: page_set,
            }
        })
        .collect()
}

/// Per field kind, the usable member with the highest confidence; ties go
/// to the record seen first.
fn select_representatives(
    members: &[(usize, IdentifierRecord)],
) -> BTreeMap<FieldKind, RepresentativeValue> {
    let mut best: BTreeMap<FieldKind, &(usize, IdentifierRecord)> = BTreeMap::new();
    for member in members.iter().filter(|(_, r)| r.has_value()) {
        let record = &member.1;
        match best.get(&record.kind) {
            Some(current)
                if current.1.confidence.total_cmp(&record.confidence).is_ge() => {}
            _ => {
                best.insert(record.kind, member);
            }
        }
    }
    best.into_iter()
        .map(|(kind, (_, record))| {
            (
                kind,
                RepresentativeValue {
                    value: record.normalized_value.trim().to_string(),
                    confidence: record.confidence,
                    page_index: record.page_index,
                },
            )
        })
        .collect()
}

fn all_pairs(snapshot: &[WorkingCluster]) -> Vec<(usize, usize)> {
    (0..snapshot.len())
        .flat_map(|i| (i + 1..snapshot.len()).map(move |j| (i, j)))
        .collect()
}

fn pair_key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

/// Build the next snapshot: `absorb` folded into `keep`, everything else as is.
fn merge_into_next(snapshot: Vec<WorkingCluster>, keep: u32, absorb: u32) -> Vec<WorkingCluster> {
    let (mut next, mut taken): (Vec<WorkingCluster>, Vec<WorkingCluster>) = snapshot
        .into_iter()
        .partition(|c| c.seed != keep && c.seed != absorb);

    let mut merged = match (taken.pop(), taken.pop()) {
        (Some(a), Some(b)) => {
            let (mut target, source) = if a.seed == keep { (a, b) } else { (b, a) };
            target.members.extend(source.members);
            target.members.sort_by_key(|(seq, _)| *seq);
            target.pages.extend(source.pages);
            target
        }
        // Both seeds come from the current snapshot; keep whatever was found.
        (Some(a), None) => a,
        _ => return next,
    };
    merged.representatives = select_representatives(&merged.members);

    next.push(merged);
    next.sort_by_key(|c| c.seed);
    next
}

fn freeze(mut snapshot: Vec<WorkingCluster>) -> Vec<PatientCluster> {
    snapshot.sort_by_key(|c| (c.pages.first().copied().unwrap_or(usize::MAX), c.seed));
    snapshot
        .into_iter()
        .enumerate()
        .map(|(n, cluster)| PatientCluster {
            id: ClusterId(n as u32 + 1),
            member_records: cluster.members.into_iter().map(|(_, r)| r).collect(),
            representative_values: cluster.representatives,
            contributing_pages: cluster.pages.into_iter().collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pair scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PairScore {
    score: f64,
    /// MRN or DOB agree exactly.
    anchored: bool,
    eligible: bool,
}

impl PairScore {
    const NONE: PairScore = PairScore {
        score: 0.0,
        anchored: false,
        eligible: false,
    };
}

/// Weighted agreement over the field kinds both clusters know.
///
/// A field below its match threshold contributes nothing but still counts
/// toward the denominator; unknown fields count toward neither.
fn score_pair(
    a: &WorkingCluster,
    b: &WorkingCluster,
    matching: &MatchingConfig,
    linking: &LinkingConfig,
) -> PairScore {
    if a.representatives.is_empty() || b.representatives.is_empty() {
        return PairScore::NONE;
    }

    let mut weighted = 0.0;
    let mut known_weight = 0.0;
    let mut anchored = false;

    for kind in FieldKind::ALL {
        let (Some(va), Some(vb)) = (a.representative(kind), b.representative(kind)) else {
            continue;
        };
        let Some(sim) = similarity(kind, va, vb, matching) else {
            continue;
        };
        let weight = linking.weights.get(kind);
        known_weight += weight;
        if sim >= matching.threshold(kind) {
            weighted += weight * sim;
        }
        if kind.is_high_precision() && sim >= 1.0 {
            anchored = true;
        }
    }

    if known_weight <= 0.0 {
        return PairScore::NONE;
    }

    let score = weighted / known_weight;
    PairScore {
        score,
        anchored,
        eligible: score >= linking.merge_threshold && (anchored || !linking.strict_mode),
    }
}

/// Total order for merge selection: higher score wins, then the smaller id pair.
fn better_pair(
    x: ((u32, u32), PairScore),
    y: ((u32, u32), PairScore),
) -> ((u32, u32), PairScore) {
    match x.1.score.total_cmp(&y.1.score) {
        std::cmp::Ordering::Greater => x,
        std::cmp::Ordering::Less => y,
        std::cmp::Ordering::Equal => {
            if x.0 <= y.0 {
                x
            } else {
                y
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
