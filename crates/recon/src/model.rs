use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// A cell as delivered by the loader, before any coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering used for string fields, filters and identifiers.
    /// Whole numbers lose their `.0` so spreadsheet-typed policy numbers
    /// read the same as their CSV counterparts.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Self::Number(n) => Some(format_number(*n)),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A parsed sheet or CSV: header row plus data rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<RawValue>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, RawValue::Empty);
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Parse delimited text. The first record is the header; blank lines
    /// and rows with no non-empty cell are skipped.
    pub fn from_csv_str(data: &str, delimiter: u8) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ReconError::InputParse(format!("CSV header: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for (i, result) in reader.records().enumerate() {
            let record =
                result.map_err(|e| ReconError::InputParse(format!("CSV row {}: {e}", i + 1)))?;
            let row: Vec<RawValue> = record
                .iter()
                .map(|cell| {
                    if cell.trim().is_empty() {
                        RawValue::Empty
                    } else {
                        RawValue::Text(cell.to_string())
                    }
                })
                .collect();
            if row.iter().all(RawValue::is_empty) {
                continue;
            }
            rows.push(row);
        }

        Ok(Self::new(headers, rows))
    }

    /// Header lookup: exact after trimming and ASCII case-folding.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// A typed canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Decimal(Decimal),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Decimal(d) => Some(d.normalize().to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

static NULL: FieldValue = FieldValue::Null;

/// One raw row mapped onto the canonical schema. `key` is the cleaned policy
/// identifier used for matching; `policy_number` keeps the displayed form.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRecord {
    pub row: usize,
    pub key: String,
    pub policy_number: String,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip)]
    pub raw: BTreeMap<String, RawValue>,
}

impl CanonicalRecord {
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        match self.get(field) {
            FieldValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field) {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Raw cell by source header, case-insensitive.
    pub fn raw_value(&self, column: &str) -> Option<&RawValue> {
        let wanted = column.trim();
        self.raw.get(wanted).or_else(|| {
            self.raw
                .iter()
                .find(|(h, _)| h.eq_ignore_ascii_case(wanted))
                .map(|(_, v)| v)
        })
    }

    /// True when the record carries `column` as a canonical field or raw header.
    pub fn has_column(&self, column: &str) -> bool {
        self.fields.contains_key(column) || self.raw_value(column).is_some()
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Field verdicts, declared in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVerdict {
    Exact,
    WithinTolerance,
    FuzzyMatch,
    MissingOnOneSide,
    Mismatch,
}

impl MatchVerdict {
    /// Verdicts that count against a matched policy.
    pub fn is_problem(self) -> bool {
        self >= Self::MissingOnOneSide
    }
}

impl std::fmt::Display for MatchVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::WithinTolerance => write!(f, "within_tolerance"),
            Self::FuzzyMatch => write!(f, "fuzzy_match"),
            Self::MissingOnOneSide => write!(f, "missing_on_one_side"),
            Self::Mismatch => write!(f, "mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldComparisonOutcome {
    pub field: String,
    pub internal: FieldValue,
    pub mis: FieldValue,
    pub verdict: MatchVerdict,
    /// Numeric delta (MIS minus internal), day offset, or 1 - similarity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTag {
    Matched,
    Unbooked,
    NotFoundInMis,
}

impl std::fmt::Display for PolicyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::Unbooked => write!(f, "unbooked"),
            Self::NotFoundInMis => write!(f, "not_found_in_mis"),
        }
    }
}

/// Source rows a result was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mis_row: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyComparisonResult {
    pub policy_number: String,
    pub key: String,
    pub tag: PolicyTag,
    /// Worst field verdict; absent for one-sided policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<MatchVerdict>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldComparisonOutcome>,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_premium: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mis_premium: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub internal: usize,
    pub mis: usize,
    pub offline: usize,
}

impl SourceCounts {
    pub fn total(&self) -> usize {
        self.internal + self.mis + self.offline
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyCounts {
    pub missing_policy_number: SourceCounts,
    pub unparsable_values: SourceCounts,
    pub duplicate_identifier: SourceCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PremiumTotals {
    pub matched_mis: Decimal,
    pub matched_internal: Decimal,
    pub unbooked: Decimal,
    pub not_found_in_mis: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconSummary {
    pub total_policies: usize,
    pub matched: usize,
    /// Matched policies whose worst verdict is a mismatch or a one-sided field.
    pub mismatches: usize,
    pub unbooked: usize,
    pub not_found_in_mis: usize,
    pub verdict_counts: BTreeMap<String, usize>,
    pub premium: PremiumTotals,
    pub anomalies: AnomalyCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer: Option<String>,
    pub compared_fields: Vec<String>,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunAudit {
    pub normalization: Vec<crate::normalize::NormalizationSummary>,
    pub filters: Vec<crate::filter::FilterAudit>,
    pub unattributed_internal: usize,
    pub unattributed_offline: usize,
}

impl RunAudit {
    pub fn is_empty(&self) -> bool {
        self.normalization.is_empty()
            && self.filters.is_empty()
            && self.unattributed_internal == 0
            && self.unattributed_offline == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub policies: Vec<PolicyComparisonResult>,
    #[serde(skip_serializing_if = "RunAudit::is_empty")]
    pub audit: RunAudit,
}

// ---------------------------------------------------------------------------
// Categorization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Booked,
    Pending,
    Unbooked,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Booked => write!(f, "booked"),
            Self::Pending => write!(f, "pending"),
            Self::Unbooked => write!(f, "unbooked"),
        }
    }
}

/// Rows consulted when a policy was categorized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorySources {
    pub mis_row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_row: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizedPolicy {
    pub policy_number: String,
    pub key: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium: Option<Decimal>,
    pub sources: CategorySources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BucketTotals {
    pub count: usize,
    pub premium: Decimal,
}

impl BucketTotals {
    pub(crate) fn add(&mut self, premium: Option<Decimal>) {
        self.count += 1;
        accumulate(&mut self.premium, premium);
    }
}

/// Add a premium to a running total, saturating at the decimal bounds.
pub(crate) fn accumulate(total: &mut Decimal, premium: Option<Decimal>) {
    if let Some(p) = premium {
        *total = total.saturating_add(p);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorySummary {
    pub booked: BucketTotals,
    pub pending: BucketTotals,
    pub unbooked: BucketTotals,
    pub total: BucketTotals,
    pub duplicate_mis: usize,
    pub duplicate_offline: usize,
}

impl CategorySummary {
    pub fn bucket(&self, category: Category) -> &BucketTotals {
        match category {
            Category::Booked => &self.booked,
            Category::Pending => &self.pending,
            Category::Unbooked => &self.unbooked,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Categorization {
    pub policies: Vec<CategorizedPolicy>,
    pub summary: CategorySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_table_skips_blank_rows_and_pads() {
        let data = "\u{feff}PolicyNo,Premium,Status\nP1,100,\n,,\nP2,200\n";
        let table = RawTable::from_csv_str(data, b',').unwrap();
        assert_eq!(table.headers, vec!["PolicyNo", "Premium", "Status"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1][2], RawValue::Empty);
        assert_eq!(table.column_index(" policyno "), Some(0));
        assert_eq!(table.column_index("Policy"), None);
    }

    #[test]
    fn raw_number_text_drops_trailing_zero() {
        assert_eq!(RawValue::Number(12345.0).to_text().as_deref(), Some("12345"));
        assert_eq!(RawValue::Number(10.5).to_text().as_deref(), Some("10.5"));
        assert_eq!(RawValue::Text("  ".into()).to_text(), None);
    }

    #[test]
    fn verdict_order_is_severity() {
        assert!(MatchVerdict::Exact < MatchVerdict::WithinTolerance);
        assert!(MatchVerdict::FuzzyMatch < MatchVerdict::MissingOnOneSide);
        assert!(MatchVerdict::MissingOnOneSide < MatchVerdict::Mismatch);
        assert!(MatchVerdict::MissingOnOneSide.is_problem());
        assert!(!MatchVerdict::FuzzyMatch.is_problem());
    }

    #[test]
    fn record_raw_lookup_ignores_case() {
        let mut raw = BTreeMap::new();
        raw.insert("Business Type".to_string(), RawValue::Text("Renewal".into()));
        let rec = CanonicalRecord {
            row: 1,
            key: "P1".into(),
            policy_number: "P1".into(),
            fields: BTreeMap::new(),
            raw,
        };
        assert!(rec.has_column("business type"));
        assert!(!rec.has_column("status"));
        assert!(rec.get("premium_amount").is_null());
    }
}
