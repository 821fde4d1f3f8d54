use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::{ComparatorConfig, FieldKind, FieldSpec};
use crate::model::{FieldComparisonOutcome, FieldValue, MatchVerdict};
use crate::normalize::{clean_identifier, parse_date, parse_decimal};

/// Compare one canonical field across the two sides.
///
/// Pure and total: values that cannot be read as the field's kind yield a
/// `mismatch` with no distance. Numeric distance is `mis - internal`.
pub fn compare(
    field: &str,
    spec: &FieldSpec,
    internal: &FieldValue,
    mis: &FieldValue,
    comparator: &ComparatorConfig,
) -> FieldComparisonOutcome {
    let (verdict, distance) = match (internal.is_null(), mis.is_null()) {
        (true, true) => (MatchVerdict::Exact, None),
        (true, false) | (false, true) => (MatchVerdict::MissingOnOneSide, None),
        (false, false) => match spec.kind {
            FieldKind::Decimal => compare_decimal(
                internal,
                mis,
                spec.tolerance.unwrap_or(comparator.default_tolerance),
            ),
            FieldKind::Date => compare_date(internal, mis),
            FieldKind::Identifier => compare_identifier(internal, mis),
            FieldKind::Text if spec.fuzzy => {
                compare_fuzzy(internal, mis, comparator.fuzzy_threshold)
            }
            FieldKind::Text => compare_text(internal, mis, &spec.equivalents),
        },
    };

    FieldComparisonOutcome {
        field: field.to_string(),
        internal: internal.clone(),
        mis: mis.clone(),
        verdict,
        distance,
    }
}

type Verdict = (MatchVerdict, Option<Decimal>);

fn as_decimal(v: &FieldValue) -> Option<Decimal> {
    match v {
        FieldValue::Decimal(d) => Some(*d),
        FieldValue::Text(s) => parse_decimal(s),
        _ => None,
    }
}

fn as_date(v: &FieldValue) -> Option<NaiveDate> {
    match v {
        FieldValue::Date(d) => Some(*d),
        FieldValue::Text(s) => parse_date(s),
        _ => None,
    }
}

fn compare_decimal(internal: &FieldValue, mis: &FieldValue, tolerance: Decimal) -> Verdict {
    let (Some(a), Some(b)) = (as_decimal(internal), as_decimal(mis)) else {
        return (MatchVerdict::Mismatch, None);
    };
    // Out of range for a decimal difference; no distance to report.
    let Some(delta) = b.checked_sub(a) else {
        return (MatchVerdict::Mismatch, None);
    };
    let verdict = if delta.is_zero() {
        MatchVerdict::Exact
    } else if delta.abs() <= tolerance {
        MatchVerdict::WithinTolerance
    } else {
        MatchVerdict::Mismatch
    };
    (verdict, Some(delta))
}

fn compare_date(internal: &FieldValue, mis: &FieldValue) -> Verdict {
    let (Some(a), Some(b)) = (as_date(internal), as_date(mis)) else {
        return (MatchVerdict::Mismatch, None);
    };
    let offset = (b - a).num_days();
    let verdict = if offset == 0 { MatchVerdict::Exact } else { MatchVerdict::Mismatch };
    (verdict, Some(Decimal::from(offset)))
}

fn compare_identifier(internal: &FieldValue, mis: &FieldValue) -> Verdict {
    match (internal.to_text(), mis.to_text()) {
        (Some(a), Some(b)) if clean_identifier(&a) == clean_identifier(&b) => {
            (MatchVerdict::Exact, None)
        }
        _ => (MatchVerdict::Mismatch, None),
    }
}

fn fold(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn compare_text(internal: &FieldValue, mis: &FieldValue, equivalents: &[Vec<String>]) -> Verdict {
    let (Some(a), Some(b)) = (internal.to_text(), mis.to_text()) else {
        return (MatchVerdict::Mismatch, None);
    };
    let (a, b) = (fold(&a), fold(&b));
    if a == b {
        return (MatchVerdict::Exact, None);
    }
    let group_of = |v: &str| equivalents.iter().position(|g| g.iter().any(|e| fold(e) == v));
    match (group_of(&a), group_of(&b)) {
        (Some(ga), Some(gb)) if ga == gb => (MatchVerdict::Exact, None),
        _ => (MatchVerdict::Mismatch, None),
    }
}

/// Upper-cased, quote-stripped, whitespace-collapsed form used for fuzzy scoring.
fn fuzzy_form(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\'' | '"'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Similarity in [0, 1], tolerant of case, whitespace and transpositions.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_damerau_levenshtein(&fuzzy_form(a), &fuzzy_form(b))
}

fn compare_fuzzy(internal: &FieldValue, mis: &FieldValue, threshold: f64) -> Verdict {
    let (Some(a), Some(b)) = (internal.to_text(), mis.to_text()) else {
        return (MatchVerdict::Mismatch, None);
    };
    if fuzzy_form(&a) == fuzzy_form(&b) {
        return (MatchVerdict::Exact, Some(Decimal::ZERO));
    }
    let score = similarity(&a, &b);
    let distance = Decimal::from_f64(1.0 - score).map(|d| d.round_dp(4));
    let verdict = if score >= threshold {
        MatchVerdict::FuzzyMatch
    } else {
        MatchVerdict::Mismatch
    };
    (verdict, distance)
}
