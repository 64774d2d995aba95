//! Property-based tests for linking and assignment invariants:
//! - Clusters partition every record and every page, with no record lost or duplicated
//! - Similarity is symmetric
//! - Results do not depend on the rayon thread count
//! - Assignment covers every page, in order
//! - Raising `min_confidence` never assigns more pages

use std::collections::BTreeSet;

use patientsplit_core::assigner::assign_pages;
use patientsplit_core::linker::link_entities;
use patientsplit_core::similarity::similarity;
use patientsplit_shared::{
    AssignmentConfig, AssignmentSummary, FieldKind, IdentifierRecord, LinkingConfig,
    MatchingConfig, PageRecords, PatientCluster,
};
use proptest::prelude::*;

const NAMES: &[&str] = &["John Smith", "Jon Smith", "J. Smith", "Mary Jones", "Mary Jone5", ""];
const MRNS: &[&str] = &["A12345", "A12346", "B77881", "a-12345", ""];
const DOBS: &[&str] = &["01/02/1980", "1980-01-02", "07/14/1975", "14 July", ""];
const PHONES: &[&str] = &["5551112222", "(555) 111-2223", "5559990000", ""];

fn field() -> impl Strategy<Value = (FieldKind, &'static str)> {
    prop_oneof![
        prop::sample::select(NAMES).prop_map(|v| (FieldKind::Name, v)),
        prop::sample::select(MRNS).prop_map(|v| (FieldKind::Mrn, v)),
        prop::sample::select(DOBS).prop_map(|v| (FieldKind::Dob, v)),
        prop::sample::select(PHONES).prop_map(|v| (FieldKind::Phone, v)),
    ]
}

fn document() -> impl Strategy<Value = Vec<PageRecords>> {
    prop::collection::vec(prop::collection::vec((field(), 0.3f64..1.0), 0..4), 0..10).prop_map(
        |pages| {
            pages
                .into_iter()
                .enumerate()
                .map(|(index, fields)| {
                    let records = fields
                        .into_iter()
                        .map(|((kind, value), confidence)| {
                            IdentifierRecord::new(index, kind, value, value, confidence)
                        })
                        .collect();
                    PageRecords::new(index, records)
                })
                .collect()
        },
    )
}

type RecordKey = (usize, FieldKind, String, u64);

fn key(record: &IdentifierRecord) -> RecordKey {
    (
        record.page_index,
        record.kind,
        record.normalized_value.clone(),
        record.confidence.to_bits(),
    )
}

fn linking(strict: bool) -> LinkingConfig {
    LinkingConfig {
        strict_mode: strict,
        ..LinkingConfig::default()
    }
}

fn resolve(pages: &[PageRecords], strict: bool) -> (Vec<PatientCluster>, AssignmentSummary) {
    let matching = MatchingConfig::default();
    let clusters = link_entities(pages, &matching, &linking(strict));
    let summary = assign_pages(pages, &clusters, &matching, &AssignmentConfig::default());
    (clusters, summary)
}

// ============================================================================
// Linking
// ============================================================================

/// Property: every record and every page lands in exactly one cluster
#[test]
fn proptest_clusters_partition_input() {
    proptest!(|(pages in document(), strict in any::<bool>())| {
        let clusters = link_entities(&pages, &MatchingConfig::default(), &linking(strict));

        let mut records: Vec<RecordKey> = pages.iter().flat_map(|p| &p.records).map(key).collect();
        let mut members: Vec<RecordKey> = clusters
            .iter()
            .flat_map(|c| &c.member_records)
            .map(key)
            .collect();
        records.sort_unstable();
        members.sort_unstable();
        prop_assert_eq!(records, members);

        for cluster in &clusters {
            for record in &cluster.member_records {
                prop_assert!(cluster.contributing_pages.contains(&record.page_index));
            }
        }

        let mut seen: Vec<usize> = clusters
            .iter()
            .flat_map(|c| c.contributing_pages.iter().copied())
            .collect();
        seen.sort_unstable();
        let expected: Vec<usize> = (0..pages.len()).collect();
        prop_assert_eq!(seen, expected);

        for (n, cluster) in clusters.iter().enumerate() {
            prop_assert_eq!(cluster.id.0 as usize, n + 1);
        }
    });
}

/// Property: results are identical on one thread and on four
#[test]
fn proptest_thread_count_does_not_change_result() {
    let single = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let multi = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

    proptest!(ProptestConfig::with_cases(64), |(pages in document(), strict in any::<bool>())| {
        let a = single.install(|| resolve(&pages, strict));
        let b = multi.install(|| resolve(&pages, strict));
        prop_assert_eq!(a.0, b.0);
        prop_assert_eq!(a.1, b.1);
    });
}

// ============================================================================
// Similarity
// ============================================================================

/// Property: similarity(a, b) == similarity(b, a), bit for bit
#[test]
fn proptest_similarity_is_symmetric() {
    let matching = MatchingConfig::default();
    proptest!(|(a in "[A-Za-z0-9 /.\\-]{0,16}", b in "[A-Za-z0-9 /.\\-]{0,16}")| {
        for kind in FieldKind::ALL {
            let ab = similarity(kind, &a, &b, &matching).map(f64::to_bits);
            let ba = similarity(kind, &b, &a, &matching).map(f64::to_bits);
            prop_assert_eq!(ab, ba, "kind={}", kind);
        }
    });
}

/// Property: known similarity scores stay within [0, 1]
#[test]
fn proptest_similarity_in_unit_interval() {
    let matching = MatchingConfig::default();
    proptest!(|(a in "\\PC{0,20}", b in "\\PC{0,20}")| {
        for kind in FieldKind::ALL {
            if let Some(score) = similarity(kind, &a, &b, &matching) {
                prop_assert!((0.0..=1.0).contains(&score), "kind={} score={}", kind, score);
            }
        }
    });
}

// ============================================================================
// Assignment
// ============================================================================

/// Property: one assignment per page, in page order, consistent with its decision
#[test]
fn proptest_assignment_is_total_and_ordered() {
    proptest!(|(pages in document())| {
        let (_, summary) = resolve(&pages, false);
        prop_assert_eq!(summary.assignments.len(), pages.len());

        for (page, assignment) in pages.iter().zip(&summary.assignments) {
            prop_assert_eq!(page.page_index, assignment.page_index);
            prop_assert_eq!(assignment.is_assigned(), assignment.cluster_id.is_some());
            if assignment.is_assigned() {
                let min_confidence = AssignmentConfig::default().min_confidence;
                prop_assert!(assignment.score + 1e-9 >= min_confidence);
            }
            if !page.has_evidence() {
                prop_assert!(!assignment.is_assigned());
            }
        }
    });
}

/// Property: pages assigned at a higher minimum confidence are also assigned at a lower one
#[test]
fn proptest_min_confidence_is_monotone() {
    proptest!(|(pages in document(), low in 0.0f64..1.0, delta in 0.0f64..0.5)| {
        let high = (low + delta).min(1.0);
        let matching = MatchingConfig::default();
        let clusters = link_entities(&pages, &matching, &LinkingConfig::default());

        let assigned = |min_confidence: f64| -> BTreeSet<usize> {
            let config = AssignmentConfig {
                min_confidence,
                ..AssignmentConfig::default()
            };
            assign_pages(&pages, &clusters, &matching, &config)
                .assignments
                .iter()
                .filter(|a| a.is_assigned())
                .map(|a| a.page_index)
                .collect()
        };

        let at_high = assigned(high);
        let at_low = assigned(low);
        prop_assert!(at_high.is_subset(&at_low));
    });
}
