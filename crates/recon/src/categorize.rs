use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{OfflineProfile, ReconConfig};
use crate::engine::index_by_key;
use crate::error::ReconError;
use crate::model::{
    BucketTotals, CanonicalRecord, Categorization, CategorizedPolicy, Category, CategorySources,
    CategorySummary,
};
use crate::progress::RunContext;

/// Collapse offline duplicates: per key keep the record whose status ranks
/// first in `status_priority`. Unknown statuses rank last; ties keep the
/// earliest row. Returns the map and the number of collapsed rows.
pub fn resolve_offline_duplicates<'r>(
    offline: &'r [CanonicalRecord],
    profile: &OfflineProfile,
) -> (BTreeMap<&'r str, &'r CanonicalRecord>, usize) {
    let priority: Vec<String> = profile
        .status_priority
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();
    let rank = |record: &CanonicalRecord| {
        record
            .get(&profile.status_field)
            .to_text()
            .and_then(|s| {
                let s = s.trim().to_lowercase();
                priority.iter().position(|p| *p == s)
            })
            .unwrap_or(priority.len())
    };

    let mut map: BTreeMap<&str, &CanonicalRecord> = BTreeMap::new();
    let mut duplicates = 0;
    for record in offline {
        match map.get(record.key.as_str()).copied() {
            Some(existing) => {
                duplicates += 1;
                if rank(record) < rank(existing) {
                    map.insert(record.key.as_str(), record);
                }
            }
            None => {
                map.insert(record.key.as_str(), record);
            }
        }
    }
    (map, duplicates)
}

/// Classify every MIS policy: `Booked` if present internally, else `Pending`
/// if present offline (with a pending status, when configured), else
/// `Unbooked`. Booked wins over Pending. Premiums come from the MIS record.
pub fn categorize(
    mis: &[CanonicalRecord],
    internal: &[CanonicalRecord],
    offline: &[CanonicalRecord],
    config: &ReconConfig,
    ctx: &RunContext<'_>,
) -> Result<Categorization, ReconError> {
    let default_profile = OfflineProfile::default();
    let profile = config.offline.as_ref().unwrap_or(&default_profile);
    let pending: Vec<String> = profile
        .pending_statuses
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();

    let (mis_map, duplicate_mis) = index_by_key(mis);
    let (internal_map, _) = index_by_key(internal);
    let (offline_map, duplicate_offline) = resolve_offline_duplicates(offline, profile);

    let total = mis_map.len();
    let chunk = ctx.chunk_size_or(config.comparator.chunk_size);
    let mut summary = CategorySummary {
        duplicate_mis,
        duplicate_offline,
        ..Default::default()
    };
    let mut policies = Vec::with_capacity(total);

    for (i, (key, record)) in mis_map.into_iter().enumerate() {
        if i % chunk == 0 {
            ctx.checkpoint()?;
            ctx.advance(i, total);
        }

        let offline_record = offline_map.get(key).copied();
        let offline_status = offline_record
            .and_then(|r| r.get(&profile.status_field).to_text());
        let internal_row = internal_map.get(key).map(|r| r.row);

        let category = if internal_row.is_some() {
            Category::Booked
        } else if offline_record.is_some() && is_pending(offline_status.as_deref(), &pending) {
            Category::Pending
        } else {
            Category::Unbooked
        };

        let premium = record.decimal(&config.premium_field);
        match category {
            Category::Booked => summary.booked.add(premium),
            Category::Pending => summary.pending.add(premium),
            Category::Unbooked => summary.unbooked.add(premium),
        }
        summary.total.add(premium);

        policies.push(CategorizedPolicy {
            policy_number: record.policy_number.clone(),
            key: key.to_string(),
            category,
            premium,
            sources: CategorySources {
                mis_row: record.row,
                internal_row,
                offline_row: offline_record.map(|r| r.row),
            },
            offline_status,
        });
    }

    ctx.checkpoint()?;
    ctx.advance(total, total);

    log::info!(
        "categorized {} MIS policies: {} booked, {} pending, {} unbooked",
        summary.total.count,
        summary.booked.count,
        summary.pending.count,
        summary.unbooked.count,
    );

    Ok(Categorization { policies, summary })
}

fn is_pending(status: Option<&str>, pending: &[String]) -> bool {
    if pending.is_empty() {
        return true;
    }
    status.is_some_and(|s| pending.iter().any(|p| *p == s.trim().to_lowercase()))
}

// ---------------------------------------------------------------------------
// Insurer-wise summary
// ---------------------------------------------------------------------------

const CRORE: i64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryLine {
    /// Number of policies.
    pub nop: usize,
    pub premium: Decimal,
    pub premium_cr: Decimal,
}

impl From<&BucketTotals> for SummaryLine {
    fn from(b: &BucketTotals) -> Self {
        Self {
            nop: b.count,
            premium: b.premium,
            premium_cr: (b.premium / Decimal::from(CRORE)).round_dp(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsurerSummary {
    pub insurer: String,
    pub booked: SummaryLine,
    pub pending: SummaryLine,
    pub unbooked: SummaryLine,
    pub total: SummaryLine,
}

impl InsurerSummary {
    pub fn from_categorization(insurer: &str, categorization: &Categorization) -> Self {
        let s = &categorization.summary;
        Self {
            insurer: insurer.to_string(),
            booked: SummaryLine::from(&s.booked),
            pending: SummaryLine::from(&s.pending),
            unbooked: SummaryLine::from(&s.unbooked),
            total: SummaryLine::from(&s.total),
        }
    }
}
