//! Pairwise similarity between identifier values.
//!
//! Every comparison returns a score in [0, 1], or `None` when either side has
//! no usable value. `None` is neutral: callers leave the field out of their
//! weighted sums instead of treating it as a mismatch.
//!
//! Arguments are put into a canonical order before scoring, so
//! `similarity(k, a, b) == similarity(k, b, a)` holds exactly, not just up to
//! floating-point rounding.

use chrono::NaiveDate;

use patientsplit_shared::{FieldKind, MatchingConfig, SimilarityScore};

/// Token pairs scoring below this contribute nothing to a name match.
const TOKEN_MATCH_FLOOR: f64 = 0.6;

/// Score for a single-letter initial against a name starting with that letter.
const INITIAL_MATCH_SCORE: f64 = 0.8;

/// Maximum penalty for token-count mismatch (e.g. a missing middle name).
const COVERAGE_PENALTY: f64 = 0.1;

/// Digits kept from the end of a phone number (drops country codes).
const PHONE_DIGITS: usize = 10;

/// Score two values of the same field kind.
pub fn similarity(kind: FieldKind, a: &str, b: &str, config: &MatchingConfig) -> Option<f64> {
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    match kind {
        FieldKind::Name => name_similarity(a, b),
        FieldKind::Mrn => mrn_similarity(a, b, config.mrn_edit_ceiling),
        FieldKind::Dob => dob_similarity(a, b),
        FieldKind::Phone => phone_similarity(a, b, config.phone_max_edits),
    }
}

/// Like [`similarity`], keeping the compared values alongside the score.
pub fn score(kind: FieldKind, a: &str, b: &str, config: &MatchingConfig) -> SimilarityScore {
    SimilarityScore {
        kind,
        value_a: a.to_string(),
        value_b: b.to_string(),
        score: similarity(kind, a, b, config),
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

fn name_similarity(a: &str, b: &str) -> Option<f64> {
    let tokens_a = name_tokens(a);
    let tokens_b = name_tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return None;
    }
    if tokens_a == tokens_b {
        return Some(1.0);
    }

    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for (i, ta) in tokens_a.iter().enumerate() {
        for (j, tb) in tokens_b.iter().enumerate() {
            let sim = token_similarity(ta, tb);
            if sim >= TOKEN_MATCH_FLOOR {
                pairs.push((sim, i, j));
            }
        }
    }
    pairs.sort_by(|x, y| {
        y.0.total_cmp(&x.0)
            .then_with(|| x.1.cmp(&y.1))
            .then_with(|| x.2.cmp(&y.2))
    });

    // Greedy one-to-one pairing, best token pairs first.
    let mut used_a = vec![false; tokens_a.len()];
    let mut used_b = vec![false; tokens_b.len()];
    let mut matched = 0.0;
    for (sim, i, j) in pairs {
        if used_a[i] || used_b[j] {
            continue;
        }
        used_a[i] = true;
        used_b[j] = true;
        matched += sim;
    }

    let smaller = tokens_a.len().min(tokens_b.len()) as f64;
    let larger = tokens_a.len().max(tokens_b.len()) as f64;
    let coverage = 1.0 - COVERAGE_PENALTY * (larger - smaller) / larger;

    Some((matched / smaller * coverage).clamp(0.0, 1.0))
}

/// Lowercased, OCR-folded, deduplicated name tokens in sorted order.
fn name_tokens(value: &str) -> Vec<String> {
    let cleaned: String = value
        .chars()
        .map(fold_ocr_confusion)
        .flat_map(char::to_lowercase)
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() || c == ',' {
                Some(' ')
            } else {
                None
            }
        })
        .collect();

    let mut tokens: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Digits OCR commonly produces in place of letters. Names carry no digits.
fn fold_ocr_confusion(c: char) -> char {
    match c {
        '0' => 'o',
        '1' | '|' => 'l',
        '5' => 's',
        '8' => 'b',
        _ => c,
    }
}

fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if is_initial_of(a, b) || is_initial_of(b, a) {
        return INITIAL_MATCH_SCORE;
    }
    (strsim::jaro_winkler(a, b) + strsim::normalized_levenshtein(a, b)) / 2.0
}

fn is_initial_of(initial: &str, name: &str) -> bool {
    let mut chars = initial.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => name.starts_with(c),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Medical record numbers
// ---------------------------------------------------------------------------

/// Uppercase alphanumerics only: `"a-123 45"` becomes `"A12345"`.
pub fn normalize_mrn(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn mrn_similarity(a: &str, b: &str, edit_ceiling: f64) -> Option<f64> {
    let a = normalize_mrn(a);
    let b = normalize_mrn(b);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a == b {
        return Some(1.0);
    }
    match strsim::levenshtein(&a, &b) {
        1 => Some(edit_ceiling * strsim::normalized_levenshtein(&a, &b)),
        _ => Some(0.0),
    }
}

// ---------------------------------------------------------------------------
// Dates of birth
// ---------------------------------------------------------------------------

/// Parse a date of birth written `M/D/Y`, `M-D-Y`, `M.D.Y` or `Y-M-D`.
///
/// Two-digit years below 50 land in the 2000s, the rest in the 1900s.
pub fn parse_dob(value: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.trim().split(['/', '-', '.']).map(str::trim).collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse().ok())
        .collect::<Option<_>>()?;

    let (year, month, day) = if parts[0].len() == 4 {
        (i32::try_from(nums[0]).ok()?, nums[1], nums[2])
    } else {
        let year = match parts[2].len() {
            2 => expand_two_digit_year(nums[2]),
            4 => i32::try_from(nums[2]).ok()?,
            _ => return None,
        };
        (year, nums[0], nums[1])
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_two_digit_year(year: u32) -> i32 {
    let year = year as i32;
    if year < 50 { 2000 + year } else { 1900 + year }
}

fn dob_similarity(a: &str, b: &str) -> Option<f64> {
    if a.trim().is_empty() || b.trim().is_empty() {
        return None;
    }
    if let (Some(da), Some(db)) = (parse_dob(a), parse_dob(b)) {
        return Some(if da == db { 1.0 } else { 0.0 });
    }

    // Unparseable: fall back to comparing the bare characters.
    let bare = |v: &str| -> String {
        v.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let (a, b) = (bare(a), bare(b));
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some(if a == b { 1.0 } else { 0.0 })
}

// ---------------------------------------------------------------------------
// Phone numbers
// ---------------------------------------------------------------------------

/// Digits only, keeping the last ten when a country code is present.
pub fn normalize_phone(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > PHONE_DIGITS {
        digits[digits.len() - PHONE_DIGITS..].to_string()
    } else {
        digits
    }
}

fn phone_similarity(a: &str, b: &str, max_edits: usize) -> Option<f64> {
    let a = normalize_phone(a);
    let b = normalize_phone(b);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a == b {
        return Some(1.0);
    }
    let edits = strsim::levenshtein(&a, &b);
    if edits > max_edits {
        return Some(0.0);
    }
    let len = a.len().max(b.len()) as f64;
    Some((1.0 - edits as f64 / len).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(kind: FieldKind, a: &str, b: &str) -> Option<f64> {
        similarity(kind, a, b, &MatchingConfig::default())
    }

    #[test]
    fn name_exact_and_case_insensitive() {
        assert_eq!(sim(FieldKind::Name, "John Doe", "John Doe"), Some(1.0));
        assert_eq!(sim(FieldKind::Name, "JOHN DOE", "john doe"), Some(1.0));
    }

    #[test]
    fn name_tolerates_reordering() {
        assert_eq!(sim(FieldKind::Name, "Doe, John", "John Doe"), Some(1.0));
    }

    #[test]
    fn name_missing_middle_name_scores_high() {
        let score = sim(FieldKind::Name, "John A. Smith", "John Smith").unwrap();
        assert!(score > 0.9 && score < 1.0, "score was {score}");
    }

    #[test]
    fn name_middle_initial_matches_full_middle_name() {
        let score = sim(FieldKind::Name, "John A Smith", "John Adam Smith").unwrap();
        assert!(score > 0.9, "score was {score}");
    }

    #[test]
    fn name_ocr_substitution_degrades_smoothly() {
        let exact = sim(FieldKind::Name, "John Smith", "John Smith").unwrap();
        let ocr = sim(FieldKind::Name, "J0hn 5mith", "John Smith").unwrap();
        let typo = sim(FieldKind::Name, "Jon Smith", "John Smith").unwrap();
        assert_eq!(ocr, exact);
        assert!(typo > 0.85 && typo < 1.0, "typo score was {typo}");
    }

    #[test]
    fn name_disjoint_tokens_score_zero() {
        assert_eq!(sim(FieldKind::Name, "Bob Kim", "Ted Ross"), Some(0.0));
    }

    #[test]
    fn name_empty_is_unknown() {
        assert_eq!(sim(FieldKind::Name, "", "John Smith"), None);
        assert_eq!(sim(FieldKind::Name, " ,. ", "John Smith"), None);
    }

    #[test]
    fn mrn_exact_after_normalization() {
        assert_eq!(sim(FieldKind::Mrn, "123-45", "12345"), Some(1.0));
        assert_eq!(sim(FieldKind::Mrn, "a12345", "A12345"), Some(1.0));
    }

    #[test]
    fn mrn_single_edit_stays_below_ceiling() {
        let config = MatchingConfig::default();
        let score = sim(FieldKind::Mrn, "12345", "12340").unwrap();
        assert!(score > 0.5, "score was {score}");
        assert!(score < config.mrn_edit_ceiling);
    }

    #[test]
    fn mrn_larger_edits_score_zero() {
        assert_eq!(sim(FieldKind::Mrn, "A1", "B2"), Some(0.0));
        assert_eq!(sim(FieldKind::Mrn, "12345", "67890"), Some(0.0));
    }

    #[test]
    fn dob_matches_across_formats() {
        assert_eq!(sim(FieldKind::Dob, "01-02-1990", "01/02/1990"), Some(1.0));
        assert_eq!(sim(FieldKind::Dob, "1/2/90", "1990-01-02"), Some(1.0));
        assert_eq!(sim(FieldKind::Dob, "03.04.1985", "3/4/1985"), Some(1.0));
    }

    #[test]
    fn dob_one_day_off_is_mismatch() {
        assert_eq!(sim(FieldKind::Dob, "01/02/1990", "01/03/1990"), Some(0.0));
    }

    #[test]
    fn dob_unparseable_falls_back_to_text() {
        assert_eq!(sim(FieldKind::Dob, "Jan 2 1990", "Feb 2 1990"), Some(0.0));
        assert_eq!(sim(FieldKind::Dob, "Jan 2 1990", "jan 2, 1990"), Some(1.0));
        assert_eq!(sim(FieldKind::Dob, "", "01/02/1990"), None);
    }

    #[test]
    fn parse_dob_pivots_two_digit_years() {
        assert_eq!(parse_dob("1/2/49"), NaiveDate::from_ymd_opt(2049, 1, 2));
        assert_eq!(parse_dob("1/2/50"), NaiveDate::from_ymd_opt(1950, 1, 2));
        assert_eq!(parse_dob("13/40/1990"), None);
        assert_eq!(parse_dob("1990/01"), None);
    }

    #[test]
    fn phone_equivalent_formats() {
        assert_eq!(sim(FieldKind::Phone, "(555) 111-2222", "5551112222"), Some(1.0));
        assert_eq!(sim(FieldKind::Phone, "+1 555 111 2222", "555-111-2222"), Some(1.0));
    }

    #[test]
    fn phone_graded_by_digit_edits() {
        let one = sim(FieldKind::Phone, "5551112222", "5551112223").unwrap();
        let two = sim(FieldKind::Phone, "5551112222", "5551112233").unwrap();
        assert!((one - 0.9).abs() < 1e-9);
        assert!(two < one);
        assert_eq!(sim(FieldKind::Phone, "5551112222", "4449998888"), Some(0.0));
        assert_eq!(sim(FieldKind::Phone, "n/a", "5551112222"), None);
    }

    #[test]
    fn similarity_is_symmetric() {
        let cases = [
            (FieldKind::Name, "Jon Smyth", "John Smith"),
            (FieldKind::Name, "Alicia Smith", "Alice Smith"),
            (FieldKind::Mrn, "A12345", "A12346"),
            (FieldKind::Phone, "5551112222", "5551112322"),
            (FieldKind::Dob, "01/02/1990", "1990-01-02"),
        ];
        for (kind, a, b) in cases {
            assert_eq!(sim(kind, a, b), sim(kind, b, a), "{kind}: {a} vs {b}");
        }
    }

    #[test]
    fn score_keeps_compared_values() {
        let result = score(FieldKind::Mrn, "A1", "A1", &MatchingConfig::default());
        assert_eq!(result.value_a, "A1");
        assert_eq!(result.score, Some(1.0));
        assert!(result.is_known());
    }
}
