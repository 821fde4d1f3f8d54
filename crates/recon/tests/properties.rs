// Property-based tests for reconciliation and categorization.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

use misrecon_recon::compare::compare;
use misrecon_recon::config::{ComparatorConfig, FieldKind, FieldSpec, ReconConfig};
use misrecon_recon::model::{CanonicalRecord, Category, FieldValue, MatchVerdict};
use misrecon_recon::normalize::{clean_identifier, parse_date};
use misrecon_recon::{categorize, reconcile, RunContext};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

const CONFIG: &str = r#"
name = "properties"

[internal.columns]
policy_number = "Policy Number"
premium_amount = "Premium"

[offline]
pending_statuses = ["new"]

[offline.columns]
policy_number = "Policy Number"
status = "Status"

[[insurers]]
id = "ACME"
[insurers.columns]
policy_number = "PolicyNo"
premium_amount = "Premium"
"#;

fn recon_config() -> ReconConfig {
    ReconConfig::from_toml(CONFIG).unwrap()
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn record(row: usize, policy: &str, premium: i64, status: Option<&str>) -> CanonicalRecord {
    let mut fields = BTreeMap::new();
    fields.insert("policy_number".to_string(), FieldValue::Text(policy.to_string()));
    fields.insert("premium_amount".to_string(), FieldValue::Decimal(Decimal::new(premium, 2)));
    if let Some(s) = status {
        fields.insert("status".to_string(), FieldValue::Text(s.to_string()));
    }
    CanonicalRecord {
        row,
        key: clean_identifier(policy),
        policy_number: policy.to_string(),
        fields,
        raw: BTreeMap::new(),
    }
}

fn records(keys: &[(String, i64)]) -> Vec<CanonicalRecord> {
    keys.iter()
        .enumerate()
        .map(|(i, (k, p))| record(i + 1, k, *p, None))
        .collect()
}

/// Policy numbers from a small alphabet so both sides overlap often,
/// with the occasional lowercase or padded variant of the same key.
fn arb_policy() -> impl Strategy<Value = String> {
    (r"P[0-9]{1,2}", 0u8..4).prop_map(|(p, style)| match style {
        0 => p.to_lowercase(),
        1 => format!(" {p} "),
        _ => p,
    })
}

fn arb_side() -> impl Strategy<Value = Vec<(String, i64)>> {
    proptest::collection::vec((arb_policy(), 0i64..500_000), 0..30)
}

fn arb_amount() -> impl Strategy<Value = Decimal> {
    (-100_000_000i64..100_000_000).prop_map(|n| Decimal::new(n, 2))
}

fn decimal_spec(tolerance: Decimal) -> FieldSpec {
    let mut spec = FieldSpec::of(FieldKind::Decimal);
    spec.tolerance = Some(tolerance);
    spec
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    /// Every key lands in exactly one of matched / unbooked / not found.
    #[test]
    fn reconciliation_partitions_the_key_union(internal in arb_side(), mis in arb_side()) {
        let config = recon_config();
        let internal = records(&internal);
        let mis = records(&mis);
        let fields = vec!["premium_amount".to_string()];
        let report = reconcile(&internal, &mis, &fields, &config, &RunContext::new()).unwrap();

        let a: BTreeSet<&str> = internal.iter().map(|r| r.key.as_str()).collect();
        let b: BTreeSet<&str> = mis.iter().map(|r| r.key.as_str()).collect();
        let s = &report.summary;

        prop_assert_eq!(s.matched, a.intersection(&b).count());
        prop_assert_eq!(s.unbooked, b.difference(&a).count());
        prop_assert_eq!(s.not_found_in_mis, a.difference(&b).count());
        prop_assert_eq!(s.total_policies, a.union(&b).count());
        prop_assert_eq!(report.policies.len(), s.total_policies);
        prop_assert!(s.mismatches <= s.matched);
    }

    /// Swapping sides keeps the verdict and negates the distance.
    #[test]
    fn decimal_comparison_is_symmetric(a in arb_amount(), b in arb_amount(), tol in 0i64..10_000) {
        let spec = decimal_spec(Decimal::new(tol, 2));
        let comparator = ComparatorConfig::default();
        let fwd = compare("premium_amount", &spec, &FieldValue::Decimal(a), &FieldValue::Decimal(b), &comparator);
        let rev = compare("premium_amount", &spec, &FieldValue::Decimal(b), &FieldValue::Decimal(a), &comparator);

        prop_assert_eq!(fwd.verdict, rev.verdict);
        prop_assert_eq!(fwd.distance, rev.distance.map(|d| -d));
        prop_assert_eq!(fwd.distance, Some(b - a));
    }

    /// Inclusive tolerance: exactly `tol` away passes, anything beyond fails.
    #[test]
    fn tolerance_boundary(a in arb_amount(), tol in 1i64..10_000) {
        let tol = Decimal::new(tol, 2);
        let spec = decimal_spec(tol);
        let comparator = ComparatorConfig::default();
        let internal = FieldValue::Decimal(a);

        let at = compare("premium_amount", &spec, &internal, &FieldValue::Decimal(a + tol), &comparator);
        prop_assert_eq!(at.verdict, MatchVerdict::WithinTolerance);

        let beyond = a + tol + Decimal::new(1, 12);
        let over = compare("premium_amount", &spec, &internal, &FieldValue::Decimal(beyond), &comparator);
        prop_assert_eq!(over.verdict, MatchVerdict::Mismatch);

        let same = compare("premium_amount", &spec, &internal, &FieldValue::Decimal(a), &comparator);
        prop_assert_eq!(same.verdict, MatchVerdict::Exact);
    }

    /// A parsed date re-parses to itself from its ISO and day-first renderings.
    #[test]
    fn date_parsing_is_idempotent(days in 0i64..60_000) {
        let base = NaiveDate::from_ymd_opt(1950, 1, 1).unwrap();
        let date = base + chrono::Duration::days(days);
        let iso = date.format("%Y-%m-%d").to_string();
        let parsed = parse_date(&iso).unwrap();
        prop_assert_eq!(parsed, date);
        prop_assert_eq!(parse_date(&parsed.format("%Y-%m-%d").to_string()), Some(date));
        prop_assert_eq!(parse_date(&date.format("%d/%m/%Y").to_string()), Some(date));
    }
}

// ---------------------------------------------------------------------------
// Categorization
// ---------------------------------------------------------------------------

fn arb_offline() -> impl Strategy<Value = Vec<(String, bool)>> {
    proptest::collection::vec((arb_policy(), prop::bool::ANY), 0..20)
}

proptest! {
    #![proptest_config(config_256())]

    /// Each distinct MIS key gets exactly one category; counts and premiums add up.
    #[test]
    fn categorization_is_a_total_partition(
        mis in arb_side(),
        internal in arb_side(),
        offline in arb_offline(),
    ) {
        let config = recon_config();
        let mis = records(&mis);
        let internal = records(&internal);
        let offline: Vec<CanonicalRecord> = offline
            .iter()
            .enumerate()
            .map(|(i, (k, pending))| record(i + 1, k, 0, Some(if *pending { "New" } else { "Case Lost" })))
            .collect();

        let out = categorize(&mis, &internal, &offline, &config, &RunContext::new()).unwrap();
        let s = &out.summary;

        let distinct: BTreeSet<&str> = mis.iter().map(|r| r.key.as_str()).collect();
        prop_assert_eq!(out.policies.len(), distinct.len());
        prop_assert_eq!(s.booked.count + s.pending.count + s.unbooked.count, distinct.len());
        prop_assert_eq!(s.total.count, distinct.len());
        prop_assert_eq!(s.booked.premium + s.pending.premium + s.unbooked.premium, s.total.premium);
        prop_assert_eq!(s.duplicate_mis, mis.len() - distinct.len());

        let internal_keys: BTreeSet<&str> = internal.iter().map(|r| r.key.as_str()).collect();
        for p in &out.policies {
            if internal_keys.contains(p.key.as_str()) {
                prop_assert_eq!(p.category, Category::Booked);
            } else {
                prop_assert_ne!(p.category, Category::Booked);
            }
            if p.category == Category::Pending {
                prop_assert_eq!(p.offline_status.as_deref(), Some("New"));
            }
        }
    }
}
