//! Application configuration for patientsplit.
//!
//! User config lives at `~/.patientsplit/patientsplit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PatientSplitError, Result};
use crate::types::FieldKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "patientsplit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".patientsplit";

// ---------------------------------------------------------------------------
// Config structs (matching patientsplit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-field similarity thresholds and tolerances.
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Entity linking policy.
    #[serde(default)]
    pub linking: LinkingConfig,

    /// Page assignment policy.
    #[serde(default)]
    pub assignment: AssignmentConfig,

    /// Regex field extraction.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Split metadata output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Relative weight of each field kind in a weighted score.
///
/// When the table is given in TOML, all four weights must be present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeights {
    pub name: f64,
    pub mrn: f64,
    pub dob: f64,
    pub phone: f64,
}

impl FieldWeights {
    pub fn get(&self, kind: FieldKind) -> f64 {
        match kind {
            FieldKind::Name => self.name,
            FieldKind::Mrn => self.mrn,
            FieldKind::Dob => self.dob,
            FieldKind::Phone => self.phone,
        }
    }

    /// Sum of the weights of the given kinds.
    pub fn total_of(&self, kinds: impl IntoIterator<Item = FieldKind>) -> f64 {
        kinds.into_iter().map(|k| self.get(k)).sum()
    }

    fn validate(&self, section: &str) -> Result<()> {
        for kind in FieldKind::ALL {
            let w = self.get(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(PatientSplitError::config(format!(
                    "{section}.weights.{kind} must be a non-negative number, got {w}"
                )));
            }
        }
        if self.total_of(FieldKind::ALL) <= 0.0 {
            return Err(PatientSplitError::config(format!(
                "{section}.weights must contain at least one positive weight"
            )));
        }
        Ok(())
    }
}

/// `[matching]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum name similarity that counts as agreement during linking.
    #[serde(default = "default_name_threshold")]
    pub name_threshold: f64,

    /// Minimum MRN similarity that counts as agreement during linking.
    #[serde(default = "default_exact_threshold")]
    pub mrn_threshold: f64,

    /// Minimum DOB similarity that counts as agreement during linking.
    #[serde(default = "default_exact_threshold")]
    pub dob_threshold: f64,

    /// Minimum phone similarity that counts as agreement during linking.
    #[serde(default = "default_phone_threshold")]
    pub phone_threshold: f64,

    /// Upper bound for an MRN pair one edit apart. Must stay below 1.0.
    #[serde(default = "default_mrn_edit_ceiling")]
    pub mrn_edit_ceiling: f64,

    /// Digit edits beyond which two phone numbers score 0.
    #[serde(default = "default_phone_max_edits")]
    pub phone_max_edits: usize,
}

impl MatchingConfig {
    /// Agreement threshold for a field kind.
    pub fn threshold(&self, kind: FieldKind) -> f64 {
        match kind {
            FieldKind::Name => self.name_threshold,
            FieldKind::Mrn => self.mrn_threshold,
            FieldKind::Dob => self.dob_threshold,
            FieldKind::Phone => self.phone_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for kind in FieldKind::ALL {
            check_unit(&format!("matching.{kind}_threshold"), self.threshold(kind))?;
        }
        if !self.mrn_edit_ceiling.is_finite()
            || self.mrn_edit_ceiling < 0.0
            || self.mrn_edit_ceiling >= 1.0
        {
            return Err(PatientSplitError::config(format!(
                "matching.mrn_edit_ceiling must be within [0, 1), got {}",
                self.mrn_edit_ceiling
            )));
        }
        Ok(())
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            name_threshold: default_name_threshold(),
            mrn_threshold: default_exact_threshold(),
            dob_threshold: default_exact_threshold(),
            phone_threshold: default_phone_threshold(),
            mrn_edit_ceiling: default_mrn_edit_ceiling(),
            phone_max_edits: default_phone_max_edits(),
        }
    }
}

fn default_name_threshold() -> f64 {
    0.85
}
fn default_exact_threshold() -> f64 {
    0.99
}
fn default_phone_threshold() -> f64 {
    0.95
}
fn default_mrn_edit_ceiling() -> f64 {
    0.9
}
fn default_phone_max_edits() -> usize {
    2
}

/// `[linking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Minimum weighted cluster-pair score for a merge.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,

    /// Require an exact MRN or DOB agreement before merging.
    #[serde(default)]
    pub strict_mode: bool,

    #[serde(default = "default_link_weights")]
    pub weights: FieldWeights,
}

impl LinkingConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("linking.merge_threshold", self.merge_threshold)?;
        self.weights.validate("linking")
    }
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            strict_mode: false,
            weights: default_link_weights(),
        }
    }
}

fn default_merge_threshold() -> f64 {
    0.7
}
fn default_link_weights() -> FieldWeights {
    FieldWeights {
        name: 0.2,
        mrn: 0.4,
        dob: 0.3,
        phone: 0.1,
    }
}

/// `[assignment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    /// Best-cluster score below which a page is left unassigned.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum gap between the best and second-best cluster.
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,

    /// When false, every page with any evidence is forced onto its best cluster.
    #[serde(default = "default_true")]
    pub allow_unassigned: bool,

    #[serde(default = "default_assign_weights")]
    pub weights: FieldWeights,
}

impl AssignmentConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("assignment.min_confidence", self.min_confidence)?;
        check_unit("assignment.ambiguity_margin", self.ambiguity_margin)?;
        self.weights.validate("assignment")
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            ambiguity_margin: default_ambiguity_margin(),
            allow_unassigned: true,
            weights: default_assign_weights(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.6
}
fn default_ambiguity_margin() -> f64 {
    0.05
}
fn default_true() -> bool {
    true
}
fn default_assign_weights() -> FieldWeights {
    FieldWeights {
        name: 0.3,
        mrn: 0.4,
        dob: 0.2,
        phone: 0.1,
    }
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Matches scoring below this confidence are discarded.
    #[serde(default = "default_extract_min_confidence")]
    pub min_confidence: f64,

    /// Pattern with a `name` capture group.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,

    /// Pattern with an `mrn` capture group.
    #[serde(default = "default_mrn_pattern")]
    pub mrn_pattern: String,

    /// Pattern with a `dob` capture group.
    #[serde(default = "default_dob_pattern")]
    pub dob_pattern: String,

    /// Pattern with a `phone` capture group.
    #[serde(default = "default_phone_pattern")]
    pub phone_pattern: String,
}

impl ExtractionConfig {
    pub fn pattern(&self, kind: FieldKind) -> &str {
        match kind {
            FieldKind::Name => &self.name_pattern,
            FieldKind::Mrn => &self.mrn_pattern,
            FieldKind::Dob => &self.dob_pattern,
            FieldKind::Phone => &self.phone_pattern,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_extract_min_confidence(),
            name_pattern: default_name_pattern(),
            mrn_pattern: default_mrn_pattern(),
            dob_pattern: default_dob_pattern(),
            phone_pattern: default_phone_pattern(),
        }
    }
}

fn default_extract_min_confidence() -> f64 {
    0.5
}
fn default_name_pattern() -> String {
    r"(?i:patient\s+name|patient|name)\s*:?[ \t]*(?P<name>[A-Z][a-z'\-]+(?:,?[ \t]+(?:[A-Z]\.|[A-Z][a-z'\-]+)){1,3})".into()
}
fn default_mrn_pattern() -> String {
    r"(?i)(?:MRN|Medical\s*Record\s*(?:Number|No\.?))[:#\s]*(?P<mrn>[A-Z0-9][A-Z0-9\-]{4,})".into()
}
fn default_dob_pattern() -> String {
    r"(?i)(?:DOB|D\.O\.B\.|Date\s*of\s*Birth)[:\s]*(?P<dob>\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4})".into()
}
fn default_phone_pattern() -> String {
    r"(?i)(?:Phone|Tel|Ph)[:.\s]*(?P<phone>(?:\+?1[\s\-.]?)?\(?\d{3}\)?[\s\-.]?\d{3}[\s\-.]?\d{4})".into()
}

/// Serialization format for split metadata files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    #[default]
    Json,
    Toml,
}

impl MetadataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            MetadataFormat::Json => "json",
            MetadataFormat::Toml => "toml",
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory split metadata is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default)]
    pub metadata_format: MetadataFormat,

    /// Route unassigned pages to a manual-review bucket.
    #[serde(default = "default_true")]
    pub include_unassigned: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            metadata_format: MetadataFormat::default(),
            include_unassigned: true,
        }
    }
}

fn default_output_dir() -> String {
    "outputs/splits".into()
}

// ---------------------------------------------------------------------------
// Resolve config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one resolution run - merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub matching: MatchingConfig,
    pub linking: LinkingConfig,
    pub assignment: AssignmentConfig,
    pub include_unassigned: bool,
}

impl ResolveConfig {
    /// Reject out-of-range weights and thresholds before any processing.
    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        self.linking.validate()?;
        self.assignment.validate()
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResolveConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            matching: config.matching.clone(),
            linking: config.linking.clone(),
            assignment: config.assignment.clone(),
            include_unassigned: config.output.include_unassigned,
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PatientSplitError::config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.patientsplit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PatientSplitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.patientsplit/patientsplit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PatientSplitError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PatientSplitError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PatientSplitError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PatientSplitError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PatientSplitError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("merge_threshold"));
        assert!(toml_str.contains("ambiguity_margin"));
        assert!(toml_str.contains("[linking.weights]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.linking.merge_threshold, 0.7);
        assert_eq!(parsed.assignment.weights.mrn, 0.4);
        assert_eq!(parsed.extraction.mrn_pattern, default_mrn_pattern());
        assert_eq!(parsed.output.metadata_format, MetadataFormat::Json);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[linking]
strict_mode = true

[assignment]
min_confidence = 0.8
allow_unassigned = false

[output]
metadata_format = "toml"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert!(config.linking.strict_mode);
        assert_eq!(config.linking.merge_threshold, 0.7);
        assert_eq!(config.assignment.min_confidence, 0.8);
        assert!(!config.assignment.allow_unassigned);
        assert_eq!(config.assignment.ambiguity_margin, 0.05);
        assert_eq!(config.output.metadata_format, MetadataFormat::Toml);
        assert_eq!(config.matching.name_threshold, 0.85);
    }

    #[test]
    fn resolve_config_from_app_config() {
        let mut app = AppConfig::default();
        app.output.include_unassigned = false;
        let resolve = ResolveConfig::from(&app);
        assert!(!resolve.include_unassigned);
        assert_eq!(resolve.matching.phone_max_edits, 2);
        assert!(resolve.validate().is_ok());
    }

    #[test]
    fn resolve_config_default_matches_app_config_default() {
        let bare = ResolveConfig::default();
        assert!(bare.include_unassigned);
        assert_eq!(
            bare.include_unassigned,
            ResolveConfig::from(&AppConfig::default()).include_unassigned
        );
        assert_eq!(bare.assignment.ambiguity_margin, 0.05);
    }

    #[test]
    fn negative_weight_rejected() {
        let mut resolve = ResolveConfig::from(&AppConfig::default());
        resolve.assignment.weights.phone = -0.1;
        let err = resolve.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("assignment.weights.phone"));
    }

    #[test]
    fn all_zero_weights_rejected() {
        let mut resolve = ResolveConfig::from(&AppConfig::default());
        resolve.linking.weights = FieldWeights {
            name: 0.0,
            mrn: 0.0,
            dob: 0.0,
            phone: 0.0,
        };
        assert!(resolve.validate().is_err());
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let mut resolve = ResolveConfig::from(&AppConfig::default());
        resolve.linking.merge_threshold = 1.2;
        assert!(resolve.validate().is_err());

        let mut resolve = ResolveConfig::from(&AppConfig::default());
        resolve.matching.name_threshold = f64::NAN;
        assert!(resolve.validate().is_err());

        let mut resolve = ResolveConfig::from(&AppConfig::default());
        resolve.matching.mrn_edit_ceiling = 1.0;
        assert!(resolve.validate().is_err());
    }

    #[test]
    fn weights_lookup_by_kind() {
        let weights = default_link_weights();
        assert_eq!(weights.get(FieldKind::Dob), 0.3);
        let total = weights.total_of([FieldKind::Name, FieldKind::Phone]);
        assert!((total - 0.3).abs() < 1e-12);
    }
}
