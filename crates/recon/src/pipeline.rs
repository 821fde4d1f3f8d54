use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::categorize::{categorize, InsurerSummary};
use crate::config::{ColumnMapping, InsurerProfile, ReconConfig, INSURANCE_COMPANY, POLICY_NUMBER};
use crate::engine::reconcile;
use crate::error::ReconError;
use crate::filter::{filter, FilterAudit};
use crate::model::{CanonicalRecord, Categorization, RawTable, ReconciliationReport, RunAudit, SourceCounts};
use crate::normalize::{normalize, NormalizationSummary};
use crate::progress::RunContext;
use crate::registry::ProfileRegistry;

// ---------------------------------------------------------------------------
// Insurer attribution
// ---------------------------------------------------------------------------

/// Records split by the insurer named in their `insurance_company` field.
#[derive(Debug, Clone, Default)]
pub struct InsurerPartition {
    pub by_insurer: BTreeMap<String, Vec<CanonicalRecord>>,
    pub unattributed: Vec<CanonicalRecord>,
}

pub fn partition_by_insurer(
    records: Vec<CanonicalRecord>,
    registry: &ProfileRegistry,
) -> InsurerPartition {
    let mut partition = InsurerPartition::default();
    for record in records {
        let profile = record
            .text(INSURANCE_COMPANY)
            .and_then(|name| registry.detect_insurer(name));
        match profile {
            Some(p) => partition.by_insurer.entry(p.id.clone()).or_default().push(record),
            None => partition.unattributed.push(record),
        }
    }
    if !partition.unattributed.is_empty() {
        log::warn!(
            "{} records could not be attributed to any insurer",
            partition.unattributed.len()
        );
    }
    partition
}

/// A shared source, attributed per insurer when it carries company names.
#[derive(Debug, Clone)]
enum Attributed {
    Whole(Vec<CanonicalRecord>),
    ByInsurer(InsurerPartition),
}

impl Attributed {
    fn new(records: Vec<CanonicalRecord>, columns: &ColumnMapping, registry: &ProfileRegistry) -> Self {
        if columns.contains_key(INSURANCE_COMPANY) {
            Self::ByInsurer(partition_by_insurer(records, registry))
        } else {
            Self::Whole(records)
        }
    }

    fn records_for(&self, insurer: &str) -> &[CanonicalRecord] {
        match self {
            Self::Whole(records) => records,
            Self::ByInsurer(p) => p.by_insurer.get(insurer).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    fn unattributed(&self) -> usize {
        match self {
            Self::Whole(_) => 0,
            Self::ByInsurer(p) => p.unattributed.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared sources
// ---------------------------------------------------------------------------

/// Internal and offline records, normalized, filtered and attributed once per
/// session and reused for every MIS file.
#[derive(Debug, Clone)]
pub struct SharedSources {
    internal: Attributed,
    offline: Option<Attributed>,
    internal_summary: NormalizationSummary,
    offline_summary: Option<NormalizationSummary>,
    filters: Vec<FilterAudit>,
}

impl SharedSources {
    fn audit(&self) -> RunAudit {
        RunAudit {
            normalization: std::iter::once(self.internal_summary.clone())
                .chain(self.offline_summary.clone())
                .collect(),
            filters: self.filters.clone(),
            unattributed_internal: self.internal.unattributed(),
            unattributed_offline: self.offline.as_ref().map_or(0, Attributed::unattributed),
        }
    }
}

pub fn prepare_shared(
    config: &ReconConfig,
    registry: &ProfileRegistry,
    internal: &RawTable,
    offline: Option<&RawTable>,
    ctx: &RunContext<'_>,
) -> Result<SharedSources, ReconError> {
    let chunk = config.comparator.chunk_size;
    ctx.checkpoint()?;
    let normalized = ctx.within(0, 40, || {
        normalize("internal", internal, &config.internal.columns, &config.fields, chunk, ctx)
    })?;
    let internal_summary = normalized.summary;
    let records = normalized.records;
    let (kept, internal_filter) = ctx
        .within(40, 50, || filter("internal", records, &config.internal.filters, chunk, ctx))?
        .into_audit("internal");
    let internal_records = Attributed::new(kept, &config.internal.columns, registry);

    let mut filters = vec![internal_filter];
    let (offline_records, offline_summary) = match offline {
        None => (None, None),
        Some(table) => {
            ctx.checkpoint()?;
            let profile = config.offline.as_ref().ok_or_else(|| {
                ReconError::ConfigValidation(
                    "offline records supplied but the config has no [offline] section".into(),
                )
            })?;
            let normalized = ctx.within(50, 90, || {
                normalize("offline", table, &profile.columns, &config.fields, chunk, ctx)
            })?;
            let summary = normalized.summary;
            let records = normalized.records;
            let (kept, audit) = ctx
                .within(90, 100, || filter("offline", records, &profile.filters, chunk, ctx))?
                .into_audit("offline");
            filters.push(audit);
            (Some(Attributed::new(kept, &profile.columns, registry)), Some(summary))
        }
    };
    ctx.advance(1, 1);

    Ok(SharedSources {
        internal: internal_records,
        offline: offline_records,
        internal_summary,
        offline_summary,
        filters,
    })
}

// ---------------------------------------------------------------------------
// Per-insurer run
// ---------------------------------------------------------------------------

/// Full result for one insurer's MIS file.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonOutcome {
    pub insurer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub report: ReconciliationReport,
    pub categorization: Categorization,
    pub insurer_summary: InsurerSummary,
}

pub struct ComparisonRequest<'a> {
    pub insurer: &'a InsurerProfile,
    pub internal: &'a RawTable,
    pub mis: &'a RawTable,
    pub offline: Option<&'a RawTable>,
    /// Fields to compare; empty defers to `compare` in the config, then to
    /// every field mapped on both sides.
    pub fields: &'a [String],
}

/// Explicit list, else the config's `compare`, else every non-key field
/// mapped for both internal and this insurer.
pub fn resolve_compare_fields(
    config: &ReconConfig,
    requested: &[String],
    mis_columns: &ColumnMapping,
) -> Result<Vec<String>, ReconError> {
    let chosen: Vec<String> = if !requested.is_empty() {
        requested.to_vec()
    } else if !config.compare.is_empty() {
        config.compare.clone()
    } else {
        config
            .fields
            .keys()
            .filter(|k| {
                k.as_str() != POLICY_NUMBER
                    && config.internal.columns.contains_key(*k)
                    && mis_columns.contains_key(*k)
            })
            .cloned()
            .collect()
    };
    config.check_fields(&chosen)?;
    Ok(chosen)
}

/// Reconcile and categorize one MIS table against prepared shared sources.
/// Progress: normalization 0-20, filtering 20-30, reconciliation 30-90,
/// categorization 90-100 of the current window.
pub fn run_prepared(
    config: &ReconConfig,
    shared: &SharedSources,
    insurer: &InsurerProfile,
    mis: &RawTable,
    fields: &[String],
    ctx: &RunContext<'_>,
) -> Result<ComparisonOutcome, ReconError> {
    let source = format!("mis:{}", insurer.id);
    let compare_fields = resolve_compare_fields(config, fields, &insurer.columns)?;

    let chunk = config.comparator.chunk_size;

    let normalized = ctx.within(0, 20, || {
        normalize(&source, mis, &insurer.columns, &config.fields, chunk, ctx)
    })?;
    let mis_summary = normalized.summary;
    let records = normalized.records;

    let (mis_records, mis_filter) = ctx
        .within(20, 30, || filter(&source, records, &insurer.filters, chunk, ctx))?
        .into_audit(&source);
    if mis_records.is_empty() {
        return Err(ReconError::NoComparableRows {
            source_name: "mis".into(),
            insurer: insurer.id.clone(),
        });
    }

    let internal = shared.internal.records_for(&insurer.id);
    let offline = shared
        .offline
        .as_ref()
        .map_or(&[][..], |o| o.records_for(&insurer.id));
    log::info!(
        "{}: {} MIS, {} internal, {} offline records in scope",
        insurer.id,
        mis_records.len(),
        internal.len(),
        offline.len()
    );

    let mut report =
        ctx.within(30, 90, || reconcile(internal, &mis_records, &compare_fields, config, ctx))?;
    let categorization =
        ctx.within(90, 100, || categorize(&mis_records, internal, offline, config, ctx))?;

    let anomalies = &mut report.summary.anomalies;
    anomalies.missing_policy_number = SourceCounts {
        internal: shared.internal_summary.missing_policy_number,
        mis: mis_summary.missing_policy_number,
        offline: shared.offline_summary.as_ref().map_or(0, |s| s.missing_policy_number),
    };
    anomalies.unparsable_values = SourceCounts {
        internal: shared.internal_summary.unparsable_total(),
        mis: mis_summary.unparsable_total(),
        offline: shared.offline_summary.as_ref().map_or(0, |s| s.unparsable_total()),
    };
    anomalies.duplicate_identifier.offline = categorization.summary.duplicate_offline;

    report.meta.insurer = Some(insurer.id.clone());
    report.audit = RunAudit {
        normalization: vec![mis_summary],
        filters: vec![mis_filter],
        unattributed_internal: shared.internal.unattributed(),
        unattributed_offline: shared.offline.as_ref().map_or(0, Attributed::unattributed),
    };

    let insurer_summary = InsurerSummary::from_categorization(&insurer.id, &categorization);
    Ok(ComparisonOutcome {
        insurer: insurer.id.clone(),
        label: None,
        report,
        categorization,
        insurer_summary,
    })
}

/// Single-insurer session: normalize, attribute, filter, reconcile, categorize.
/// The report's audit carries the shared sources' summaries ahead of the MIS ones.
pub fn run_comparison(
    config: &ReconConfig,
    registry: &ProfileRegistry,
    request: &ComparisonRequest<'_>,
    ctx: &RunContext<'_>,
) -> Result<ComparisonOutcome, ReconError> {
    let shared = ctx.within(0, 15, || {
        prepare_shared(config, registry, request.internal, request.offline, ctx)
    })?;
    let mut outcome =
        run_prepared(config, &shared, request.insurer, request.mis, request.fields, ctx)?;

    let mut audit = shared.audit();
    audit.normalization.append(&mut outcome.report.audit.normalization);
    audit.filters.append(&mut outcome.report.audit.filters);
    outcome.report.audit = audit;

    ctx.finish();
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One MIS file in a batch. `hint` overrides resolution from `label`.
#[derive(Debug, Clone)]
pub struct MisSource {
    pub label: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub meta: BatchMeta,
    pub runs: Vec<ComparisonOutcome>,
    pub skipped: Vec<SkippedFile>,
    pub insurer_summaries: Vec<InsurerSummary>,
    /// Normalization and filter audit for internal and offline sources.
    pub audit: RunAudit,
}

impl BatchOutcome {
    pub fn has_discrepancies(&self) -> bool {
        self.runs.iter().any(|r| {
            let s = &r.report.summary;
            s.mismatches > 0 || s.unbooked > 0
        })
    }
}

/// Run every MIS file against the shared internal/offline sources.
///
/// `load` reads a file once its profile is known (sheet choice depends on
/// it). Unknown insurers and per-file structural failures land in `skipped`
/// and the batch continues; cancellation aborts the whole batch.
#[allow(clippy::too_many_arguments)]
pub fn run_batch<F>(
    config: &ReconConfig,
    registry: &ProfileRegistry,
    internal: &RawTable,
    offline: Option<&RawTable>,
    sources: &[MisSource],
    fields: &[String],
    mut load: F,
    ctx: &RunContext<'_>,
) -> Result<BatchOutcome, ReconError>
where
    F: FnMut(&MisSource, &InsurerProfile) -> Result<RawTable, ReconError>,
{
    config.check_fields(fields)?;
    let shared = ctx.within(0, 10, || prepare_shared(config, registry, internal, offline, ctx))?;

    let n = sources.len().max(1);
    let mut runs = Vec::new();
    let mut skipped = Vec::new();

    for (i, source) in sources.iter().enumerate() {
        ctx.checkpoint()?;
        let lo = 10 + (90 * i / n) as u8;
        let hi = 10 + (90 * (i + 1) / n) as u8;
        let result = ctx.within(lo, hi, || {
            let profile = match &source.hint {
                Some(hint) => registry.resolve_profile(hint)?,
                None => registry.resolve_from_path(Path::new(&source.label))?,
            };
            log::info!("{}: using profile {}", source.label, profile.id);
            let table = load(source, profile)?;
            run_prepared(config, &shared, profile, &table, fields, ctx)
        });

        match result {
            Ok(mut outcome) => {
                outcome.label = Some(source.label.clone());
                runs.push(outcome);
            }
            Err(e @ (ReconError::Cancelled | ReconError::UnknownField(_))) => return Err(e),
            Err(e) => {
                log::warn!("skipping {}: {e}", source.label);
                skipped.push(SkippedFile { label: source.label.clone(), reason: e.to_string() });
            }
        }
    }

    ctx.finish();

    let insurer_summaries = runs.iter().map(|r| r.insurer_summary.clone()).collect();
    Ok(BatchOutcome {
        meta: BatchMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            files: sources.len(),
        },
        runs,
        skipped,
        insurer_summaries,
        audit: shared.audit(),
    })
}
