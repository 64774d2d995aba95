//! Core domain types for patient identity resolution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the split manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// FieldKind
// ---------------------------------------------------------------------------

/// The kind of patient identifier an extracted record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Name,
    Mrn,
    Dob,
    Phone,
}

impl FieldKind {
    /// Every field kind, in canonical order.
    pub const ALL: [FieldKind; 4] = [
        FieldKind::Name,
        FieldKind::Mrn,
        FieldKind::Dob,
        FieldKind::Phone,
    ];

    /// MRN and DOB identify a patient with high precision; name and phone don't.
    pub fn is_high_precision(self) -> bool {
        matches!(self, FieldKind::Mrn | FieldKind::Dob)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Name => "name",
            FieldKind::Mrn => "mrn",
            FieldKind::Dob => "dob",
            FieldKind::Phone => "phone",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Identifier records (extraction output)
// ---------------------------------------------------------------------------

/// One extracted field occurrence on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierRecord {
    /// Zero-based page the field was found on.
    pub page_index: usize,
    /// Which identifier this is.
    pub kind: FieldKind,
    /// Text as it appeared in the OCR output.
    #[serde(default)]
    pub raw_value: String,
    /// Value after extraction-side normalization. May be empty for
    /// malformed records; those are kept but score as unknown.
    #[serde(default)]
    pub normalized_value: String,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
}

impl IdentifierRecord {
    pub fn new(
        page_index: usize,
        kind: FieldKind,
        raw_value: impl Into<String>,
        normalized_value: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            page_index,
            kind,
            raw_value: raw_value.into(),
            normalized_value: normalized_value.into(),
            confidence,
        }
    }

    /// Whether the record carries a usable normalized value.
    pub fn has_value(&self) -> bool {
        !self.normalized_value.trim().is_empty()
    }
}

/// All identifier records extracted from a single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRecords {
    pub page_index: usize,
    #[serde(default)]
    pub records: Vec<IdentifierRecord>,
}

impl PageRecords {
    pub fn new(page_index: usize, records: Vec<IdentifierRecord>) -> Self {
        Self {
            page_index,
            records,
        }
    }

    /// Records of one kind that carry a usable value.
    pub fn values_of(&self, kind: FieldKind) -> impl Iterator<Item = &IdentifierRecord> {
        self.records
            .iter()
            .filter(move |r| r.kind == kind && r.has_value())
    }

    /// Whether the page has any usable identifier at all.
    pub fn has_evidence(&self) -> bool {
        self.records.iter().any(IdentifierRecord::has_value)
    }
}

/// OCR text for one page, the input to field extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub page_index: usize,
    pub text: String,
    /// Average OCR word confidence in [0, 1], when the OCR engine reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// ClusterId
// ---------------------------------------------------------------------------

/// Identifier of a patient cluster, rendered as `patient_001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ClusterId(pub u32);

const CLUSTER_ID_PREFIX: &str = "patient_";

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{CLUSTER_ID_PREFIX}{:03}", self.0)
    }
}

impl std::str::FromStr for ClusterId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s.strip_prefix(CLUSTER_ID_PREFIX).unwrap_or(s);
        digits
            .parse::<u32>()
            .map(ClusterId)
            .map_err(|_| format!("invalid cluster id '{s}'"))
    }
}

impl From<ClusterId> for String {
    fn from(id: ClusterId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ClusterId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// PatientCluster
// ---------------------------------------------------------------------------

/// The canonical value chosen for one field kind of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeValue {
    pub value: String,
    pub confidence: f64,
    /// Page the chosen occurrence came from.
    pub page_index: usize,
}

/// A provisional patient identity: the records believed to belong to one person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientCluster {
    pub id: ClusterId,
    /// Member records, ordered by page then by position on the page.
    pub member_records: Vec<IdentifierRecord>,
    /// One normalized value per field kind.
    pub representative_values: BTreeMap<FieldKind, RepresentativeValue>,
    /// Sorted, deduplicated page indices.
    pub contributing_pages: Vec<usize>,
}

impl PatientCluster {
    pub fn representative(&self, kind: FieldKind) -> Option<&str> {
        self.representative_values
            .get(&kind)
            .map(|r| r.value.as_str())
    }

    /// A cluster with no representative values has nothing to match on.
    pub fn has_evidence(&self) -> bool {
        !self.representative_values.is_empty()
    }

    pub fn first_page(&self) -> Option<usize> {
        self.contributing_pages.first().copied()
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Result of comparing two values of the same field kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub kind: FieldKind,
    pub value_a: String,
    pub value_b: String,
    /// `None` when either side is missing: unknown, neither match nor mismatch.
    pub score: Option<f64>,
}

impl SimilarityScore {
    pub fn is_known(&self) -> bool {
        self.score.is_some()
    }
}

// ---------------------------------------------------------------------------
// Page assignment
// ---------------------------------------------------------------------------

/// Outcome of scoring one page against the resolved clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentDecision {
    Assigned,
    UnassignedLowConfidence,
    UnassignedAmbiguous,
}

impl std::fmt::Display for AssignmentDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssignmentDecision::Assigned => "assigned",
            AssignmentDecision::UnassignedLowConfidence => "unassigned_low_confidence",
            AssignmentDecision::UnassignedAmbiguous => "unassigned_ambiguous",
        };
        f.write_str(s)
    }
}

/// One field's contribution to a page's score against its best cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentReason {
    pub kind: FieldKind,
    pub page_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_value: Option<String>,
    /// Weighted share of the page score this field provided.
    pub contribution: f64,
}

/// The assignment decision for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAssignment {
    pub page_index: usize,
    /// Present only when `decision` is [`AssignmentDecision::Assigned`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    /// Score of the best-matching cluster (0 when there is none).
    pub score: f64,
    /// Gap between the best and second-best cluster scores.
    pub margin: f64,
    pub decision: AssignmentDecision,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<AssignmentReason>,
}

impl PageAssignment {
    pub fn is_assigned(&self) -> bool {
        self.decision == AssignmentDecision::Assigned
    }
}

/// Page assignments for a whole document, in page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub assignments: Vec<PageAssignment>,
    /// Pages left for manual review for lack of evidence.
    pub unassigned_pages: Vec<usize>,
    /// Pages left for manual review because two clusters scored too close.
    pub ambiguous_pages: Vec<usize>,
}

impl AssignmentSummary {
    pub fn assigned_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_assigned()).count()
    }
}

// ---------------------------------------------------------------------------
// Split plan
// ---------------------------------------------------------------------------

/// The pages that make up one patient's output document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDocument {
    pub cluster_id: ClusterId,
    pub pages: Vec<usize>,
    /// Mean assignment score over `pages`.
    pub average_score: f64,
    /// Representative identifier values, keyed by field kind.
    pub identifiers: BTreeMap<FieldKind, String>,
}

/// How a document's pages are divided between patients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub documents: Vec<PatientDocument>,
    /// Pages routed to the manual-review bucket (empty when that bucket is disabled).
    #[serde(default)]
    pub unassigned_pages: Vec<usize>,
    #[serde(default)]
    pub ambiguous_pages: Vec<usize>,
    pub total_pages: usize,
    pub assigned_pages: usize,
}

/// Split metadata written next to the output documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub run_id: RunId,
    /// Label of the input document (usually its path).
    pub source: String,
    /// SHA-256 of the input file, when read from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub plan: SplitPlan,
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one resolution run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
