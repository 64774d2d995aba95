//! Per-kind value normalization applied to raw regex matches.

use patientsplit_core::similarity::{normalize_mrn, normalize_phone, parse_dob};
use patientsplit_shared::FieldKind;

/// Normalize a raw matched value for its field kind.
///
/// - name: tokens stripped of `,` and `:`, each capitalized
/// - mrn: uppercase alphanumerics
/// - dob: ISO `YYYY-MM-DD` when the date parses, otherwise the trimmed text
/// - phone: the last ten digits
pub fn normalize_value(kind: FieldKind, raw: &str) -> String {
    let value = truncate_at_line_break(raw).trim();
    match kind {
        FieldKind::Name => normalize_name(value),
        FieldKind::Mrn => normalize_mrn(value),
        FieldKind::Dob => match parse_dob(value) {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => value.replace('.', "/"),
        },
        FieldKind::Phone => normalize_phone(value),
    }
}

/// Everything before the first `\n` or `\r`.
pub(crate) fn truncate_at_line_break(value: &str) -> &str {
    value.split(['\n', '\r']).next().unwrap_or(value)
}

fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .map(|token| token.trim_matches([',', ':']))
        .filter(|token| !token.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
