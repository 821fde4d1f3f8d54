use std::collections::{BTreeMap, BTreeSet};

use crate::compare::compare;
use crate::config::{ReconConfig, POLICY_NUMBER};
use crate::error::ReconError;
use crate::model::{
    accumulate, CanonicalRecord, FieldComparisonOutcome, MatchVerdict, PolicyComparisonResult, PolicyTag,
    Provenance, ReconMeta, ReconSummary, ReconciliationReport, RunAudit,
};
use crate::progress::RunContext;

/// Key -> record, last seen wins. Returns the map and the collision count.
pub fn index_by_key(records: &[CanonicalRecord]) -> (BTreeMap<&str, &CanonicalRecord>, usize) {
    let mut map = BTreeMap::new();
    let mut duplicates = 0;
    for record in records {
        if let Some(prev) = map.insert(record.key.as_str(), record) {
            duplicates += 1;
            log::debug!(
                "duplicate policy '{}': row {} replaces row {}",
                record.policy_number,
                record.row,
                prev.row
            );
        }
    }
    (map, duplicates)
}

/// Two-way reconciliation of internal against MIS records.
///
/// Identifiers in both sets are compared field by field and tagged
/// `matched`; MIS-only identifiers are `unbooked`; internal-only are
/// `not_found_in_mis`. Counts and premium sums are accumulated in the same
/// pass. Results are in ascending key order.
pub fn reconcile(
    internal: &[CanonicalRecord],
    mis: &[CanonicalRecord],
    fields: &[String],
    config: &ReconConfig,
    ctx: &RunContext<'_>,
) -> Result<ReconciliationReport, ReconError> {
    let specs = fields
        .iter()
        .map(|name| {
            config
                .field(name)
                .map(|spec| (name.as_str(), spec))
                .ok_or_else(|| ReconError::UnknownField(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (internal_map, duplicate_internal) = index_by_key(internal);
    let (mis_map, duplicate_mis) = index_by_key(mis);
    if duplicate_internal + duplicate_mis > 0 {
        log::warn!(
            "duplicate policy identifiers: {duplicate_internal} internal, {duplicate_mis} MIS (last row wins)"
        );
    }

    let keys: BTreeSet<&str> = internal_map.keys().chain(mis_map.keys()).copied().collect();
    let total = keys.len();
    let chunk = ctx.chunk_size_or(config.comparator.chunk_size);
    let premium_field = config.premium_field.as_str();

    let mut summary = ReconSummary::default();
    summary.anomalies.duplicate_identifier.internal = duplicate_internal;
    summary.anomalies.duplicate_identifier.mis = duplicate_mis;
    let mut policies = Vec::with_capacity(total);

    for (i, key) in keys.into_iter().enumerate() {
        if i % chunk == 0 {
            ctx.checkpoint()?;
            ctx.advance(i, total);
        }

        let result = match (internal_map.get(key), mis_map.get(key)) {
            (Some(int), Some(m)) => {
                let outcomes: Vec<FieldComparisonOutcome> = specs
                    .iter()
                    .filter(|(name, _)| *name != POLICY_NUMBER)
                    .map(|(name, spec)| {
                        compare(name, spec, int.get(name), m.get(name), &config.comparator)
                    })
                    .collect();
                let verdict = outcomes
                    .iter()
                    .map(|o| o.verdict)
                    .max()
                    .unwrap_or(MatchVerdict::Exact);

                summary.matched += 1;
                if verdict.is_problem() {
                    summary.mismatches += 1;
                }
                *summary.verdict_counts.entry(verdict.to_string()).or_insert(0) += 1;
                let internal_premium = int.decimal(premium_field);
                let mis_premium = m.decimal(premium_field);
                accumulate(&mut summary.premium.matched_internal, internal_premium);
                accumulate(&mut summary.premium.matched_mis, mis_premium);

                PolicyComparisonResult {
                    policy_number: m.policy_number.clone(),
                    key: key.to_string(),
                    tag: PolicyTag::Matched,
                    verdict: Some(verdict),
                    fields: outcomes,
                    provenance: Provenance { internal_row: Some(int.row), mis_row: Some(m.row) },
                    internal_premium,
                    mis_premium,
                }
            }
            (None, Some(m)) => {
                let mis_premium = m.decimal(premium_field);
                summary.unbooked += 1;
                accumulate(&mut summary.premium.unbooked, mis_premium);
                PolicyComparisonResult {
                    policy_number: m.policy_number.clone(),
                    key: key.to_string(),
                    tag: PolicyTag::Unbooked,
                    verdict: None,
                    fields: Vec::new(),
                    provenance: Provenance { internal_row: None, mis_row: Some(m.row) },
                    internal_premium: None,
                    mis_premium,
                }
            }
            (Some(int), None) => {
                let internal_premium = int.decimal(premium_field);
                summary.not_found_in_mis += 1;
                accumulate(&mut summary.premium.not_found_in_mis, internal_premium);
                PolicyComparisonResult {
                    policy_number: int.policy_number.clone(),
                    key: key.to_string(),
                    tag: PolicyTag::NotFoundInMis,
                    verdict: None,
                    fields: Vec::new(),
                    provenance: Provenance { internal_row: Some(int.row), mis_row: None },
                    internal_premium,
                    mis_premium: None,
                }
            }
            (None, None) => continue,
        };
        policies.push(result);
    }

    ctx.checkpoint()?;
    ctx.advance(total, total);
    summary.total_policies = policies.len();

    log::info!(
        "reconciled {} policies: {} matched ({} with mismatches), {} unbooked, {} not found in MIS",
        summary.total_policies,
        summary.matched,
        summary.mismatches,
        summary.unbooked,
        summary.not_found_in_mis,
    );

    Ok(ReconciliationReport {
        meta: ReconMeta {
            config_name: config.name.clone(),
            insurer: None,
            compared_fields: specs.iter().map(|(n, _)| n.to_string()).collect(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        policies,
        audit: RunAudit::default(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::model::FieldValue;
    use crate::normalize::clean_identifier;

    const CONFIG: &str = r#"
name = "engine test"

[internal.columns]
policy_number = "Policy Number"
premium_amount = "Premium"
customer_name = "Customer Name"

[[insurers]]
id = "ACME"
[insurers.columns]
policy_number = "PolicyNo"
"#;

    fn config() -> ReconConfig {
        ReconConfig::from_toml(CONFIG).unwrap()
    }

    fn rec(row: usize, policy: &str, premium: &str, name: &str) -> CanonicalRecord {
        let mut fields = BTreeMap::new();
        fields.insert("policy_number".to_string(), FieldValue::Text(policy.into()));
        fields.insert(
            "premium_amount".to_string(),
            FieldValue::Decimal(Decimal::from_str(premium).unwrap()),
        );
        fields.insert("customer_name".to_string(), FieldValue::Text(name.into()));
        CanonicalRecord {
            row,
            key: clean_identifier(policy),
            policy_number: policy.into(),
            fields,
            raw: BTreeMap::new(),
        }
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_way_tags_and_sums() {
        let internal = vec![
            rec(1, "P100", "1000.00", "Ravi Kumar"),
            rec(2, "P400", "50", "Internal Only"),
        ];
        let mis = vec![
            rec(1, "P100", "1000.50", "RAVI KUMAR"),
            rec(2, "P200", "700", "Mis Only"),
        ];
        let report = reconcile(
            &internal,
            &mis,
            &fields(&["premium_amount", "customer_name"]),
            &config(),
            &RunContext::new(),
        )
        .unwrap();

        let s = &report.summary;
        assert_eq!((s.matched, s.unbooked, s.not_found_in_mis), (1, 1, 1));
        assert_eq!(s.total_policies, 3);
        assert_eq!(s.mismatches, 0);
        assert_eq!(s.verdict_counts["within_tolerance"], 1);
        assert_eq!(s.premium.unbooked, Decimal::from(700));
        assert_eq!(s.premium.not_found_in_mis, Decimal::from(50));
        assert_eq!(s.premium.matched_mis, Decimal::from_str("1000.50").unwrap());

        let keys: Vec<&str> = report.policies.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["P100", "P200", "P400"]);

        let p100 = &report.policies[0];
        assert_eq!(p100.tag, PolicyTag::Matched);
        assert_eq!(p100.verdict, Some(MatchVerdict::WithinTolerance));
        let premium = p100.fields.iter().find(|f| f.field == "premium_amount").unwrap();
        assert_eq!(premium.distance, Decimal::from_str("0.50").ok());
        assert_eq!(report.policies[1].tag, PolicyTag::Unbooked);
        assert_eq!(report.policies[2].tag, PolicyTag::NotFoundInMis);
    }

    #[test]
    fn premium_totals_saturate() {
        let mut internal = vec![rec(1, "P1", "1", "A"), rec(2, "P2", "1", "B")];
        internal[0].fields.insert("premium_amount".into(), FieldValue::Decimal(Decimal::MAX));
        internal[1].fields.insert("premium_amount".into(), FieldValue::Decimal(Decimal::MAX));
        let report =
            reconcile(&internal, &[], &fields(&["premium_amount"]), &config(), &RunContext::new())
                .unwrap();
        assert_eq!(report.summary.not_found_in_mis, 2);
        assert_eq!(report.summary.premium.not_found_in_mis, Decimal::MAX);
    }

    #[test]
    fn worst_verdict_wins() {
        let internal = vec![rec(1, "P1", "100", "Ravi Kumar")];
        let mis = vec![rec(1, "P1", "100", "Anita Desai")];
        let report = reconcile(
            &internal,
            &mis,
            &fields(&["premium_amount", "customer_name"]),
            &config(),
            &RunContext::new(),
        )
        .unwrap();
        assert_eq!(report.policies[0].verdict, Some(MatchVerdict::Mismatch));
        assert_eq!(report.summary.mismatches, 1);
    }

    #[test]
    fn duplicates_last_write_wins() {
        let internal = vec![rec(1, "P1", "100", "A")];
        let mis = vec![rec(1, "P1", "500", "A"), rec(2, "p-1", "100", "A")];
        let report =
            reconcile(&internal, &mis, &fields(&["premium_amount"]), &config(), &RunContext::new())
                .unwrap();
        assert_eq!(report.summary.anomalies.duplicate_identifier.mis, 1);
        assert_eq!(report.policies.len(), 1);
        assert_eq!(report.policies[0].verdict, Some(MatchVerdict::Exact));
        assert_eq!(report.policies[0].provenance.mis_row, Some(2));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let err = reconcile(&[], &[], &fields(&["colour"]), &config(), &RunContext::new())
            .unwrap_err();
        assert!(matches!(err, ReconError::UnknownField(f) if f == "colour"));
    }

    #[test]
    fn cancelled_run_returns_no_report() {
        let token = crate::progress::cancel_token();
        token.store(true, std::sync::atomic::Ordering::Relaxed);
        let ctx = RunContext::new().with_cancel(token);
        let internal = vec![rec(1, "P1", "1", "A")];
        let result = reconcile(&internal, &internal, &[], &config(), &ctx);
        assert!(matches!(result, Err(ReconError::Cancelled)));
    }

    #[test]
    fn progress_reaches_stage_end() {
        let seen = std::cell::RefCell::new(Vec::new());
        let record = |p: u8| seen.borrow_mut().push(p);
        let ctx = RunContext::new().with_progress(&record).with_chunk_size(1);
        let internal: Vec<_> = (0..4).map(|i| rec(i, &format!("P{i}"), "1", "A")).collect();
        reconcile(&internal, &[], &[], &config(), &ctx).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 25, 50, 75, 100]);
    }
}
