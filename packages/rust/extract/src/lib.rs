//! Regex-based patient identifier extraction from OCR page text.
//!
//! Each configured pattern carries a named capture group (`name`, `mrn`,
//! `dob`, `phone`). Matches are truncated at line breaks, normalized per
//! kind, scored, filtered by minimum confidence, and deduplicated.

mod normalize;

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info, instrument};

use patientsplit_shared::{
    ExtractionConfig, FieldKind, IdentifierRecord, PageRecords, PageText, PatientSplitError,
    Result,
};

pub use normalize::normalize_value;

use normalize::truncate_at_line_break;

/// Confidence every match starts from.
const BASE_CONFIDENCE: f64 = 0.6;

/// Weight of the page's OCR confidence in a match's confidence.
const OCR_CONFIDENCE_WEIGHT: f64 = 0.2;

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Compiled extraction patterns.
#[derive(Debug, Clone)]
pub struct Extractor {
    patterns: Vec<(FieldKind, Regex)>,
    min_confidence: f64,
}

impl Extractor {
    /// Compile the configured patterns. An invalid pattern or an out-of-range
    /// minimum confidence is a configuration error.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        if !config.min_confidence.is_finite() || !(0.0..=1.0).contains(&config.min_confidence) {
            return Err(PatientSplitError::config(format!(
                "extraction.min_confidence must be within [0, 1], got {}",
                config.min_confidence
            )));
        }

        let patterns = FieldKind::ALL
            .into_iter()
            .map(|kind| {
                Regex::new(config.pattern(kind))
                    .map(|re| (kind, re))
                    .map_err(|e| {
                        PatientSplitError::config(format!(
                            "extraction.{kind}_pattern is not a valid regex: {e}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            min_confidence: config.min_confidence,
        })
    }

    /// Extract identifier records from one page of OCR text.
    ///
    /// Records come out grouped by kind (name, MRN, DOB, phone), each group
    /// in order of first appearance on the page.
    pub fn extract_page(&self, page: &PageText) -> PageRecords {
        let mut records: Vec<IdentifierRecord> = Vec::new();
        let mut seen: HashMap<(FieldKind, String), usize> = HashMap::new();

        for (kind, re) in &self.patterns {
            for caps in re.captures_iter(&page.text) {
                let Some(matched) = caps.name(kind.as_str()).or_else(|| caps.get(0)) else {
                    continue;
                };
                let raw = truncate_at_line_break(matched.as_str()).trim();
                let normalized = normalize_value(*kind, raw);
                if normalized.is_empty() {
                    continue;
                }

                let confidence = match_confidence(*kind, &normalized, page.confidence);
                if confidence < self.min_confidence {
                    debug!(
                        page = page.page_index,
                        %kind,
                        value = %normalized,
                        confidence,
                        "discarding low-confidence match"
                    );
                    continue;
                }

                match seen.get(&(*kind, normalized.clone())) {
                    Some(&at) => {
                        if records[at].confidence < confidence {
                            records[at].confidence = confidence;
                            records[at].raw_value = raw.to_string();
                        }
                    }
                    None => {
                        seen.insert((*kind, normalized.clone()), records.len());
                        records.push(IdentifierRecord::new(
                            page.page_index,
                            *kind,
                            raw,
                            normalized,
                            confidence,
                        ));
                    }
                }
            }
        }

        debug!(
            page = page.page_index,
            identifiers = records.len(),
            "page extracted"
        );

        PageRecords::new(page.page_index, records)
    }

    /// Extract every page, in input order.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn extract_document(&self, pages: &[PageText]) -> Vec<PageRecords> {
        let extracted: Vec<PageRecords> = pages.iter().map(|p| self.extract_page(p)).collect();

        info!(
            records = extracted.iter().map(|p| p.records.len()).sum::<usize>(),
            pages_without_identifiers = extracted.iter().filter(|p| !p.has_evidence()).count(),
            "extraction complete"
        );

        extracted
    }
}

/// Heuristic confidence of one match: a base score, a bonus per kind, and a
/// share of the page's OCR confidence when known.
fn match_confidence(kind: FieldKind, normalized: &str, ocr_confidence: Option<f64>) -> f64 {
    let bonus = match kind {
        FieldKind::Name | FieldKind::Dob => 0.1,
        FieldKind::Mrn => (normalized.chars().count() as f64 / 12.0).min(0.2),
        FieldKind::Phone => 0.0,
    };
    let ocr = ocr_confidence
        .filter(|c| c.is_finite())
        .map_or(0.0, |c| c.clamp(0.0, 1.0) * OCR_CONFIDENCE_WEIGHT);
    (BASE_CONFIDENCE + bonus + ocr).min(1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const INTAKE_PAGE: &str = "\
Patient Name: John Smith
MRN: A-12345
DOB: 01/02/1980
Phone: (555) 111-2222

Referral for follow-up. Patient: John Smith
";

    fn page(text: &str, confidence: Option<f64>) -> PageText {
        PageText {
            page_index: 0,
            text: text.to_string(),
            confidence,
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(&ExtractionConfig::default()).unwrap()
    }

    fn value_of(records: &PageRecords, kind: FieldKind) -> Option<&str> {
        records
            .records
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.normalized_value.as_str())
    }

    #[test]
    fn extracts_all_four_kinds() {
        let records = extractor().extract_page(&page(INTAKE_PAGE, None));
        assert_eq!(value_of(&records, FieldKind::Name), Some("John Smith"));
        assert_eq!(value_of(&records, FieldKind::Mrn), Some("A12345"));
        assert_eq!(value_of(&records, FieldKind::Dob), Some("1980-01-02"));
        assert_eq!(value_of(&records, FieldKind::Phone), Some("5551112222"));
        // The second "John Smith" mention is folded into the first.
        assert_eq!(records.records.len(), 4);
    }

    #[test]
    fn labels_match_case_insensitively() {
        let records =
            extractor().extract_page(&page("mrn# B77881\ndate of birth 1975-07-14", None));
        assert_eq!(value_of(&records, FieldKind::Mrn), Some("B77881"));
        assert_eq!(value_of(&records, FieldKind::Dob), Some("1975-07-14"));
    }

    #[test]
    fn confidence_follows_kind_and_ocr() {
        let plain = extractor().extract_page(&page(INTAKE_PAGE, None));
        let conf = |records: &PageRecords, kind| {
            records
                .records
                .iter()
                .find(|r| r.kind == kind)
                .map(|r| r.confidence)
                .unwrap()
        };
        assert!((conf(&plain, FieldKind::Name) - 0.7).abs() < 1e-9);
        assert!((conf(&plain, FieldKind::Mrn) - 0.8).abs() < 1e-9);
        assert!((conf(&plain, FieldKind::Phone) - 0.6).abs() < 1e-9);

        let scanned = extractor().extract_page(&page(INTAKE_PAGE, Some(0.9)));
        assert!((conf(&scanned, FieldKind::Name) - 0.88).abs() < 1e-9);
        assert!((conf(&scanned, FieldKind::Mrn) - 0.98).abs() < 1e-9);
    }

    #[test]
    fn low_confidence_matches_are_dropped() {
        let config = ExtractionConfig {
            min_confidence: 0.65,
            ..ExtractionConfig::default()
        };
        let records = Extractor::new(&config)
            .unwrap()
            .extract_page(&page(INTAKE_PAGE, None));
        assert_eq!(value_of(&records, FieldKind::Phone), None);
        assert!(value_of(&records, FieldKind::Name).is_some());
    }

    #[test]
    fn page_without_labels_has_no_records() {
        let records = extractor().extract_page(&page("Lab results attached.\nSee page 2.", None));
        assert!(records.records.is_empty());
        assert!(!records.has_evidence());
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let config = ExtractionConfig {
            mrn_pattern: "(?P<mrn>[A-Z".into(),
            ..ExtractionConfig::default()
        };
        let err = Extractor::new(&config).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("extraction.mrn_pattern"));
    }

    #[test]
    fn pattern_without_named_group_uses_whole_match() {
        let config = ExtractionConfig {
            phone_pattern: r"\d{3}-\d{3}-\d{4}".into(),
            ..ExtractionConfig::default()
        };
        let records = Extractor::new(&config)
            .unwrap()
            .extract_page(&page("call 555-111-2222 today", None));
        assert_eq!(value_of(&records, FieldKind::Phone), Some("5551112222"));
    }

    #[test]
    fn document_keeps_page_order() {
        let pages = vec![
            PageText {
                page_index: 0,
                text: "MRN: A12345".into(),
                confidence: None,
            },
            PageText {
                page_index: 1,
                text: "nothing here".into(),
                confidence: None,
            },
            PageText {
                page_index: 2,
                text: "Name: Mary Jones".into(),
                confidence: Some(0.5),
            },
        ];
        let extracted = extractor().extract_document(&pages);
        let indices: Vec<usize> = extracted.iter().map(|p| p.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(extracted[2].records[0].page_index, 2);
    }
}
