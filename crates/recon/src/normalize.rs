use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{ColumnMapping, Combine, FieldKind, FieldSpec, POLICY_NUMBER};
use crate::error::{Anomaly, AnomalySample, ReconError};
use crate::model::{CanonicalRecord, FieldValue, RawTable, RawValue};
use crate::progress::RunContext;

/// Anomaly samples retained per table; counts are never capped.
pub const MAX_WARNINGS: usize = 100;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%m/%d/%Y", "%d-%b-%Y", "%d %b %Y", "%d.%m.%Y",
    "%Y/%m/%d",
];

const TIME_SUFFIXES: &[&str] = &[" %H:%M:%S", " %H:%M", "T%H:%M:%S"];

// Excel serials for 1900-01-01 and 9999-12-31.
const SERIAL_MIN: f64 = 1.0;
const SERIAL_MAX: f64 = 2_958_465.0;

/// Per-table normalization audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizationSummary {
    pub source: String,
    pub rows_in: usize,
    pub rows_with_policy_number: usize,
    pub missing_policy_number: usize,
    /// Records sharing a policy key with an earlier record.
    pub duplicate_policy_numbers: usize,
    /// Header chosen per canonical field; `None` when no candidate is present.
    pub resolved_columns: BTreeMap<String, Option<String>>,
    pub null_counts: BTreeMap<String, usize>,
    pub unparsable_counts: BTreeMap<String, usize>,
    pub warnings: Vec<AnomalySample>,
}

impl NormalizationSummary {
    pub fn unparsable_total(&self) -> usize {
        self.unparsable_counts.values().sum()
    }

    fn record(&mut self, sample: AnomalySample) {
        if self.warnings.len() < MAX_WARNINGS {
            log::warn!(
                "{}: row {}: {}{}{}",
                sample.source,
                sample.row,
                sample.kind,
                sample.field.as_deref().map(|f| format!(" in '{f}'")).unwrap_or_default(),
                sample.value.as_deref().map(|v| format!(": {v:?}")).unwrap_or_default(),
            );
            self.warnings.push(sample);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedTable {
    pub records: Vec<CanonicalRecord>,
    pub summary: NormalizationSummary,
}

struct ResolvedField<'a> {
    name: &'a str,
    spec: &'a FieldSpec,
    indices: Vec<usize>,
}

/// Map a raw table onto the canonical schema.
///
/// Candidate columns are scanned in declared order; per row the first
/// candidate with a non-empty cell supplies the value (or all of them, joined,
/// for `combine = "concat"`). Rows without a policy identifier are dropped and
/// counted. Fields whose candidates are all absent are null for every row.
/// Every source header is kept in the record's raw row, empty cells included,
/// so filters see a column whenever the table has it.
///
/// Cancellation is checked and progress reported every `chunk_size` rows
/// (or the context's override).
pub fn normalize(
    source: &str,
    table: &RawTable,
    columns: &ColumnMapping,
    schema: &BTreeMap<String, FieldSpec>,
    chunk_size: usize,
    ctx: &RunContext<'_>,
) -> Result<NormalizedTable, ReconError> {
    let mut summary = NormalizationSummary {
        source: source.to_string(),
        rows_in: table.len(),
        ..Default::default()
    };

    let mut resolved = Vec::new();
    for (name, candidates) in columns {
        let Some(spec) = schema.get(name) else {
            log::warn!("{source}: '{name}' is not a canonical field; skipped");
            continue;
        };
        let indices: Vec<usize> = candidates
            .iter()
            .filter_map(|c| table.column_index(c))
            .collect();
        let header = indices.first().map(|&i| table.headers[i].clone());
        if header.is_none() {
            log::warn!("{source}: no column for '{name}' (tried {:?})", candidates.0);
        }
        summary.resolved_columns.insert(name.clone(), header);
        summary.null_counts.insert(name.clone(), 0);
        resolved.push(ResolvedField { name, spec, indices });
    }

    let mut records = Vec::with_capacity(table.len());
    let mut keys = BTreeSet::new();
    let total = table.len();
    let chunk = ctx.chunk_size_or(chunk_size);

    for (i, row) in table.rows.iter().enumerate() {
        if i % chunk == 0 {
            ctx.checkpoint()?;
            ctx.advance(i, total);
        }
        let row_no = i + 1;
        let mut fields = BTreeMap::new();
        let mut unparsable = Vec::new();

        for field in &resolved {
            let value = match pick_cell(row, &field.indices, field.spec.combine) {
                None => FieldValue::Null,
                Some(cell) => match coerce(&cell, field.spec.kind) {
                    Some(v) => v,
                    None => {
                        unparsable.push((field.name, cell.to_text()));
                        FieldValue::Null
                    }
                },
            };
            fields.insert(field.name.to_string(), value);
        }

        let policy_number = match fields.get(POLICY_NUMBER) {
            Some(FieldValue::Text(p)) => p.clone(),
            _ => String::new(),
        };
        let key = clean_identifier(&policy_number);
        if key.is_empty() {
            summary.missing_policy_number += 1;
            summary.record(AnomalySample {
                kind: Anomaly::MissingPolicyIdentifier,
                source: source.to_string(),
                row: row_no,
                field: Some(POLICY_NUMBER.to_string()),
                value: None,
            });
            continue;
        }

        for (name, raw) in unparsable {
            *summary.unparsable_counts.entry(name.to_string()).or_insert(0) += 1;
            summary.record(AnomalySample {
                kind: Anomaly::UnparsableValue,
                source: source.to_string(),
                row: row_no,
                field: Some(name.to_string()),
                value: raw,
            });
        }
        for (name, value) in &fields {
            if value.is_null() {
                *summary.null_counts.entry(name.clone()).or_insert(0) += 1;
            }
        }

        if !keys.insert(key.clone()) {
            summary.duplicate_policy_numbers += 1;
        }

        // Repeated headers keep their first non-empty cell.
        let mut raw = BTreeMap::new();
        for (j, header) in table.headers.iter().enumerate() {
            let slot = raw.entry(header.trim().to_string()).or_insert(RawValue::Empty);
            if slot.is_empty() {
                *slot = row.get(j).cloned().unwrap_or(RawValue::Empty);
            }
        }

        records.push(CanonicalRecord {
            row: row_no,
            key,
            policy_number,
            fields,
            raw,
        });
    }

    ctx.checkpoint()?;
    ctx.advance(total, total);
    summary.rows_with_policy_number = records.len();
    log::info!(
        "{source}: normalized {} of {} rows ({} without policy number, {} unparsable values)",
        summary.rows_with_policy_number,
        summary.rows_in,
        summary.missing_policy_number,
        summary.unparsable_total(),
    );

    Ok(NormalizedTable { records, summary })
}

fn pick_cell(row: &[RawValue], indices: &[usize], combine: Combine) -> Option<RawValue> {
    let mut present = indices
        .iter()
        .filter_map(|&i| row.get(i))
        .filter(|v| !v.is_empty());
    match combine {
        Combine::Coalesce => present.next().cloned(),
        Combine::Concat => {
            let parts: Vec<String> = present.filter_map(RawValue::to_text).collect();
            (!parts.is_empty()).then(|| RawValue::Text(parts.join(" ")))
        }
    }
}

/// `None` means the cell is present but cannot be read as `kind`.
fn coerce(cell: &RawValue, kind: FieldKind) -> Option<FieldValue> {
    match kind {
        FieldKind::Identifier | FieldKind::Text => cell.to_text().map(FieldValue::Text),
        FieldKind::Decimal => match cell {
            RawValue::Number(n) => Decimal::from_f64(*n).map(FieldValue::Decimal),
            RawValue::Text(s) => parse_decimal(s).map(FieldValue::Decimal),
            _ => None,
        },
        FieldKind::Date => match cell {
            RawValue::Date(d) => Some(FieldValue::Date(*d)),
            RawValue::Number(n) => excel_serial_to_date(*n).map(FieldValue::Date),
            RawValue::Text(s) => parse_date(s).map(FieldValue::Date),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

/// Matching key for identifiers: quotes, spaces and hyphens removed, upper-cased.
pub fn clean_identifier(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\'' | '"' | '-') && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Parse an amount such as `₹ 1,23,456.50`, `Rs. 500`, `(12.00)` or `1.5E3`.
pub fn parse_decimal(input: &str) -> Option<Decimal> {
    let mut s = input.trim();
    let parens = s.len() >= 2 && s.starts_with('(') && s.ends_with(')');
    if parens {
        s = s[1..s.len() - 1].trim();
    }

    let upper = s.to_ascii_uppercase();
    for prefix in ["INR", "RS.", "RS"] {
        if upper.starts_with(prefix) {
            s = s[prefix.len()..].trim_start();
            break;
        }
    }

    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '₹' | '$' | '€' | '£' | ',' | '_') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()?;
    Some(if parens { -value } else { value })
}

/// Parse a calendar date using the fixed format list; first success wins.
/// Day-first forms are tried before month-first.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let y = s[0..4].parse().ok()?;
        let m = s[4..6].parse().ok()?;
        let d = s[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATE_FORMATS {
        for suffix in TIME_SUFFIXES {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, &format!("{fmt}{suffix}")) {
                return Some(dt.date());
            }
        }
    }
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Spreadsheet serial (1900 date system) to a calendar date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(SERIAL_MIN..=SERIAL_MAX).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}
