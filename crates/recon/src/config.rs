use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ReconError;

pub const POLICY_NUMBER: &str = "policy_number";
pub const INSURANCE_COMPANY: &str = "insurance_company";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    #[serde(default)]
    pub comparator: ComparatorConfig,
    /// Canonical schema. Entries here are merged over the built-in core fields.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default = "default_premium_field")]
    pub premium_field: String,
    /// Fields compared for matched policies; empty means every field mapped on both sides.
    #[serde(default)]
    pub compare: Vec<String>,
    pub internal: SourceProfile,
    #[serde(default)]
    pub offline: Option<OfflineProfile>,
    #[serde(default)]
    pub insurers: Vec<InsurerProfile>,
}

fn default_premium_field() -> String {
    "premium_amount".into()
}

impl ReconConfig {
    /// Parse a TOML config string, merge the core schema and validate.
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let mut config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        let mut fields = core_fields();
        fields.append(&mut config.fields);
        config.fields = fields;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ReconError> {
        if self.insurers.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one [[insurers]] profile is required".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for insurer in &self.insurers {
            if insurer.id.trim().is_empty() {
                return Err(ReconError::ConfigValidation("insurer id must not be empty".into()));
            }
            if !seen.insert(insurer.id.to_ascii_uppercase()) {
                return Err(ReconError::ConfigValidation(format!(
                    "duplicate insurer id '{}'",
                    insurer.id
                )));
            }
        }

        match self.fields.get(POLICY_NUMBER) {
            Some(spec) if spec.kind == FieldKind::Identifier => {}
            Some(_) => {
                return Err(ReconError::ConfigValidation(
                    "field 'policy_number' must have kind = \"identifier\"".into(),
                ))
            }
            None => {
                return Err(ReconError::ConfigValidation(
                    "field 'policy_number' is not defined".into(),
                ))
            }
        }

        match self.fields.get(&self.premium_field) {
            Some(spec) if spec.kind == FieldKind::Decimal => {}
            _ => {
                return Err(ReconError::ConfigValidation(format!(
                    "premium_field '{}' must name a decimal field",
                    self.premium_field
                )))
            }
        }

        let c = &self.comparator;
        if !(0.0..=1.0).contains(&c.fuzzy_threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "comparator.fuzzy_threshold must be within [0, 1], got {}",
                c.fuzzy_threshold
            )));
        }
        if c.default_tolerance.is_sign_negative() {
            return Err(ReconError::ConfigValidation(
                "comparator.default_tolerance must not be negative".into(),
            ));
        }
        if c.chunk_size == 0 {
            return Err(ReconError::ConfigValidation("comparator.chunk_size must be > 0".into()));
        }

        for (name, spec) in &self.fields {
            if spec.tolerance.is_some_and(|t| t.is_sign_negative()) {
                return Err(ReconError::ConfigValidation(format!(
                    "field '{name}': tolerance must not be negative"
                )));
            }
        }

        self.check_fields(&self.compare)?;

        self.validate_source("internal", &self.internal.columns, &self.internal.filters)?;
        if let Some(offline) = &self.offline {
            self.validate_source("offline", &offline.columns, &offline.filters)?;
            if !self.fields.contains_key(&offline.status_field) {
                return Err(ReconError::ConfigValidation(format!(
                    "offline.status_field '{}' is not a canonical field",
                    offline.status_field
                )));
            }
        }
        for insurer in &self.insurers {
            self.validate_source(
                &format!("insurer '{}'", insurer.id),
                &insurer.columns,
                &insurer.filters,
            )?;
        }

        Ok(())
    }

    fn validate_source(
        &self,
        label: &str,
        columns: &ColumnMapping,
        filters: &[FilterRule],
    ) -> Result<(), ReconError> {
        if !columns.contains_key(POLICY_NUMBER) {
            return Err(ReconError::ConfigValidation(format!(
                "{label}: no column mapping for 'policy_number'"
            )));
        }
        for (field, candidates) in columns {
            if !self.fields.contains_key(field) {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: mapped field '{field}' is not a canonical field"
                )));
            }
            if candidates.is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: field '{field}' has no candidate columns"
                )));
            }
        }
        for rule in filters {
            if rule.predicate.columns().iter().any(|c| c.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: filter '{}' has an empty column",
                    rule.description
                )));
            }
            // A blank value would match every cell for `contains`.
            if let Some(values) = rule.predicate.values() {
                if values.is_empty() || values.iter().any(|v| v.trim().is_empty()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "{label}: filter '{}' needs non-blank values",
                        rule.description
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Fails with `UnknownField` on the first name outside the schema.
    pub fn check_fields(&self, names: &[String]) -> Result<(), ReconError> {
        match names.iter().find(|n| !self.fields.contains_key(n.as_str())) {
            Some(name) => Err(ReconError::UnknownField(name.clone())),
            None => Ok(()),
        }
    }

    pub fn tolerance_for(&self, spec: &FieldSpec) -> Decimal {
        spec.tolerance.unwrap_or(self.comparator.default_tolerance)
    }
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ComparatorConfig {
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_tolerance")]
    pub default_tolerance: Decimal,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_fuzzy_threshold() -> f64 {
    0.85
}

fn default_tolerance() -> Decimal {
    Decimal::ONE
}

fn default_chunk_size() -> usize {
    500
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            default_tolerance: default_tolerance(),
            chunk_size: default_chunk_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default)]
    pub tolerance: Option<Decimal>,
    #[serde(default)]
    pub combine: Combine,
    /// Groups of text values treated as equal (e.g. fuel-type spellings).
    #[serde(default)]
    pub equivalents: Vec<Vec<String>>,
}

impl FieldSpec {
    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            fuzzy: false,
            tolerance: None,
            combine: Combine::Coalesce,
            equivalents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Identifier,
    Text,
    Decimal,
    Date,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier => write!(f, "identifier"),
            Self::Text => write!(f, "text"),
            Self::Decimal => write!(f, "decimal"),
            Self::Date => write!(f, "date"),
        }
    }
}

/// How several present candidate columns produce one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    /// First candidate with a non-empty cell wins.
    #[default]
    Coalesce,
    /// Non-empty candidate cells joined with a space.
    Concat,
}

/// Built-in canonical fields every config starts from.
pub fn core_fields() -> BTreeMap<String, FieldSpec> {
    let mut fields = BTreeMap::new();
    fields.insert(POLICY_NUMBER.to_string(), FieldSpec::of(FieldKind::Identifier));
    fields.insert(
        "customer_name".to_string(),
        FieldSpec {
            fuzzy: true,
            combine: Combine::Concat,
            ..FieldSpec::of(FieldKind::Text)
        },
    );
    fields.insert("premium_amount".to_string(), FieldSpec::of(FieldKind::Decimal));
    fields.insert("policy_start_date".to_string(), FieldSpec::of(FieldKind::Date));
    fields.insert("policy_end_date".to_string(), FieldSpec::of(FieldKind::Date));
    fields.insert(INSURANCE_COMPANY.to_string(), FieldSpec::of(FieldKind::Text));
    fields.insert("status".to_string(), FieldSpec::of(FieldKind::Text));
    fields
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Ordered source-column alternatives for one canonical field.
/// Accepts `"Premium"` or `["Premium", "Gross Premium"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct ColumnCandidates(pub Vec<String>);

impl From<OneOrMany> for ColumnCandidates {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => Self(vec![s]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl ColumnCandidates {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|c| c.trim().is_empty())
    }
}

pub type ColumnMapping = BTreeMap<String, ColumnCandidates>;

// ---------------------------------------------------------------------------
// Sources + insurer profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceProfile {
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineProfile {
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    /// Duplicate offline rows keep the status ranked first here.
    #[serde(default)]
    pub status_priority: Vec<String>,
    /// Statuses that make a policy Pending; empty means any offline presence.
    #[serde(default)]
    pub pending_statuses: Vec<String>,
}

fn default_status_field() -> String {
    "status".into()
}

impl Default for OfflineProfile {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::new(),
            filters: Vec::new(),
            status_field: default_status_field(),
            status_priority: Vec::new(),
            pending_statuses: Vec::new(),
        }
    }
}

/// Per-insurer configuration. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct InsurerProfile {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub sheets: Vec<String>,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// An exclusion rule: rows matching the predicate are dropped before matching.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRule {
    pub description: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub predicate: Predicate,
}

impl FilterRule {
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or(&self.description)
    }
}

/// Predicates are data, selected by the `predicate` tag.
/// Text checks are case-insensitive on trimmed values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum Predicate {
    Contains { column: String, values: Vec<String> },
    Equals { column: String, values: Vec<String> },
    NotEquals { column: String, values: Vec<String> },
    IsEmpty { column: String },
    NonPositive { column: String },
    DateBefore { column: String, other: String },
    /// Date outside the reference month (keep current-month rows only).
    DateOutsideMonth { column: String },
}

impl Predicate {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Contains { column, .. }
            | Self::Equals { column, .. }
            | Self::NotEquals { column, .. }
            | Self::IsEmpty { column }
            | Self::NonPositive { column }
            | Self::DateOutsideMonth { column } => vec![column.as_str()],
            Self::DateBefore { column, other } => vec![column.as_str(), other.as_str()],
        }
    }

    /// Match values, for the predicates that take them.
    pub fn values(&self) -> Option<&[String]> {
        match self {
            Self::Contains { values, .. }
            | Self::Equals { values, .. }
            | Self::NotEquals { values, .. } => Some(values.as_slice()),
            _ => None,
        }
    }
}
