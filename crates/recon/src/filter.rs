use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{FilterRule, Predicate};
use crate::error::ReconError;
use crate::model::{CanonicalRecord, FieldValue, RawValue};
use crate::normalize::{parse_date, parse_decimal};
use crate::progress::RunContext;

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedRecord {
    pub reason: String,
    pub description: String,
    pub record: CanonicalRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterStat {
    pub description: String,
    pub reason: String,
    pub excluded: usize,
    /// The rule's column is absent from the whole table; it never matched.
    pub column_missing: bool,
}

/// Filter results for one source, as carried in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct FilterAudit {
    pub source: String,
    pub rules: Vec<FilterStat>,
    pub excluded: Vec<ExcludedRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub kept: Vec<CanonicalRecord>,
    pub excluded: Vec<ExcludedRecord>,
    pub stats: Vec<FilterStat>,
}

impl FilterOutcome {
    pub fn into_audit(self, source: &str) -> (Vec<CanonicalRecord>, FilterAudit) {
        let audit = FilterAudit {
            source: source.to_string(),
            rules: self.stats,
            excluded: self.excluded,
        };
        (self.kept, audit)
    }
}

/// Apply exclusion rules in declared order. A record is excluded by the first
/// rule whose predicate matches; order only affects attribution.
///
/// Month-window rules use the context's reference date. Cancellation is
/// checked every `chunk_size` records.
pub fn filter(
    source: &str,
    records: Vec<CanonicalRecord>,
    rules: &[FilterRule],
    chunk_size: usize,
    ctx: &RunContext<'_>,
) -> Result<FilterOutcome, ReconError> {
    let active: Vec<bool> = rules
        .iter()
        .map(|rule| {
            let present = rule
                .predicate
                .columns()
                .iter()
                .all(|c| records.iter().any(|r| r.has_column(c)));
            if !present && !records.is_empty() {
                log::warn!(
                    "{source}: filter '{}' skipped, column {:?} not found",
                    rule.description,
                    rule.predicate.columns()
                );
            }
            present
        })
        .collect();

    let mut stats: Vec<FilterStat> = rules
        .iter()
        .zip(&active)
        .map(|(rule, &on)| FilterStat {
            description: rule.description.clone(),
            reason: rule.reason().to_string(),
            excluded: 0,
            column_missing: !on && !records.is_empty(),
        })
        .collect();

    let total = records.len();
    let chunk = ctx.chunk_size_or(chunk_size);
    let reference = ctx.reference_date();
    let mut kept = Vec::with_capacity(total);
    let mut excluded = Vec::new();

    for (i, record) in records.into_iter().enumerate() {
        if i % chunk == 0 {
            ctx.checkpoint()?;
            ctx.advance(i, total);
        }
        let hit = rules
            .iter()
            .zip(&active)
            .position(|(rule, &on)| on && matches_on(&rule.predicate, &record, reference));
        match hit {
            Some(i) => {
                stats[i].excluded += 1;
                excluded.push(ExcludedRecord {
                    reason: rules[i].reason().to_string(),
                    description: rules[i].description.clone(),
                    record,
                });
            }
            None => kept.push(record),
        }
    }

    ctx.checkpoint()?;
    ctx.advance(total, total);
    if !excluded.is_empty() {
        log::info!("{source}: filters excluded {} rows, kept {}", excluded.len(), kept.len());
    }

    Ok(FilterOutcome { kept, excluded, stats })
}

/// True when `predicate` says the record should be excluded. Month windows
/// are taken relative to today.
pub fn matches(predicate: &Predicate, record: &CanonicalRecord) -> bool {
    matches_on(predicate, record, chrono::Local::now().date_naive())
}

/// [`matches`] with an explicit reference date for month windows.
///
/// Keep-only predicates (`not_equals`, `date_outside_month`) exclude a record
/// whose cell is empty or unreadable, but never one that lacks the column.
pub fn matches_on(predicate: &Predicate, record: &CanonicalRecord, reference: NaiveDate) -> bool {
    match predicate {
        Predicate::Contains { column, values } => cell_text(record, column).is_some_and(|t| {
            values
                .iter()
                .any(|v| t.contains(&v.trim().to_lowercase()))
        }),
        Predicate::Equals { column, values } => {
            cell_text(record, column).is_some_and(|t| values.iter().any(|v| text_equals(&t, v)))
        }
        Predicate::NotEquals { column, values } => {
            lookup(record, column).is_some()
                && cell_text(record, column).map_or(true, |t| !values.iter().any(|v| text_equals(&t, v)))
        }
        Predicate::IsEmpty { column } => cell_text(record, column).is_none(),
        Predicate::NonPositive { column } => {
            cell_number(record, column).is_some_and(|n| n <= Decimal::ZERO)
        }
        Predicate::DateBefore { column, other } => {
            match (cell_date(record, column), cell_date(record, other)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            }
        }
        Predicate::DateOutsideMonth { column } => {
            lookup(record, column).is_some()
                && cell_date(record, column).map_or(true, |d| {
                    d.year() != reference.year() || d.month() != reference.month()
                })
        }
    }
}

fn text_equals(cell: &str, value: &str) -> bool {
    let value = value.trim().to_lowercase();
    if cell == value {
        return true;
    }
    match (parse_decimal(cell), parse_decimal(&value)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

enum Cell<'a> {
    Field(&'a FieldValue),
    Raw(&'a RawValue),
}

/// Canonical field first, then raw source column.
fn lookup<'a>(record: &'a CanonicalRecord, column: &str) -> Option<Cell<'a>> {
    if let Some(v) = record.fields.get(column) {
        return Some(Cell::Field(v));
    }
    record.raw_value(column).map(Cell::Raw)
}

/// Trimmed, lower-cased cell text; `None` when empty.
fn cell_text(record: &CanonicalRecord, column: &str) -> Option<String> {
    let text = match lookup(record, column)? {
        Cell::Field(v) => v.to_text(),
        Cell::Raw(v) => v.to_text(),
    }?;
    let t = text.trim().to_lowercase();
    (!t.is_empty()).then_some(t)
}

fn cell_number(record: &CanonicalRecord, column: &str) -> Option<Decimal> {
    match lookup(record, column)? {
        Cell::Field(FieldValue::Decimal(d)) => Some(*d),
        Cell::Field(FieldValue::Text(s)) => parse_decimal(s),
        Cell::Raw(RawValue::Number(n)) => Decimal::from_f64(*n),
        Cell::Raw(RawValue::Text(s)) => parse_decimal(s),
        _ => None,
    }
}

fn cell_date(record: &CanonicalRecord, column: &str) -> Option<NaiveDate> {
    match lookup(record, column)? {
        Cell::Field(FieldValue::Date(d)) | Cell::Raw(RawValue::Date(d)) => Some(*d),
        Cell::Field(FieldValue::Text(s)) | Cell::Raw(RawValue::Text(s)) => parse_date(s),
        Cell::Raw(RawValue::Number(n)) => crate::normalize::excel_serial_to_date(*n),
        _ => None,
    }
}
