//! `misrecon run`: batch reconciliation on a worker thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use clap::Args;

use misrecon_recon::{
    cancel_token, run_batch, BatchOutcome, CancelToken, InsurerProfile, MisSource, ProfileRegistry,
    RawTable, ReconConfig, ReconError, RunContext,
};

use crate::exit_codes::{
    EXIT_ERROR, EXIT_RECON_DISCREPANCIES, EXIT_RECON_RUNTIME, EXIT_RECON_SKIPPED,
};
use crate::profiles::load_config;
use crate::CliError;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the .recon.toml config file
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Internal booking records (csv, tsv, xlsx, xls, xlsb, ods)
    #[arg(long)]
    internal: PathBuf,

    /// Sheet to read from an internal workbook (default: first sheet)
    #[arg(long, value_name = "NAME")]
    internal_sheet: Option<String>,

    /// Offline booking records
    #[arg(long)]
    offline: Option<PathBuf>,

    /// Sheet to read from an offline workbook (default: first sheet)
    #[arg(long, value_name = "NAME")]
    offline_sheet: Option<String>,

    /// Insurer MIS file. Repeatable; the insurer is resolved from the file name.
    #[arg(long, required = true)]
    mis: Vec<PathBuf>,

    /// Insurer name for every MIS file, instead of resolving from file names
    #[arg(long, value_name = "NAME")]
    insurer: Option<String>,

    /// Fields to compare (comma-separated). Default: config `compare`, else all mapped.
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Output JSON to stdout
    #[arg(long)]
    json: bool,

    /// Write JSON output to file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Show progress on stderr
    #[arg(long)]
    progress: bool,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Date that month-window filters compare against (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    reference_date: Option<NaiveDate>,
}

enum Event {
    Progress(u8),
    SheetWarning(String),
}

type WorkerResult = Result<BatchOutcome, ReconError>;

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args.config)?;
    let fields: Vec<String> = args
        .fields
        .iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();
    config.check_fields(&fields).map_err(|e| CliError::recon(&e))?;

    let internal = load_source(&args.internal, args.internal_sheet.as_deref())?;
    let offline = args
        .offline
        .as_deref()
        .map(|p| load_source(p, args.offline_sheet.as_deref()))
        .transpose()?;

    let sources: Vec<MisSource> = args
        .mis
        .iter()
        .map(|p| MisSource {
            label: p.display().to_string(),
            hint: args.insurer.clone(),
        })
        .collect();

    let cancel = cancel_token();
    let (tx, rx) = mpsc::channel::<Event>();
    let worker = Worker { cancel: cancel.clone(), reference_date: args.reference_date, tx };
    let handle = thread::Builder::new()
        .name("recon-worker".into())
        .spawn(move || run_worker(config, internal, offline, sources, fields, worker))
        .map_err(|e| CliError::new(EXIT_ERROR, format!("cannot start worker thread: {e}")))?;

    let deadline = args.timeout.map(|s| Instant::now() + Duration::from_secs(s));
    let mut warnings = Vec::new();
    let mut timed_out = false;
    loop {
        let wait = match deadline {
            Some(d) if !timed_out => d.saturating_duration_since(Instant::now()),
            _ => Duration::from_millis(250),
        };
        match rx.recv_timeout(wait) {
            Ok(Event::Progress(p)) => {
                if args.progress {
                    eprint!("\rreconciling... {p:>3}%");
                }
            }
            Ok(Event::SheetWarning(w)) => warnings.push(w),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !timed_out && deadline.is_some_and(|d| Instant::now() >= d) {
                    log::warn!("timeout reached, cancelling");
                    cancel.store(true, Ordering::Relaxed);
                    timed_out = true;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    if args.progress {
        eprintln!();
    }

    let result = handle
        .join()
        .map_err(|_| CliError::new(EXIT_ERROR, "reconciliation worker panicked"))?;
    let outcome = result.map_err(|e| {
        let err = CliError::recon(&e);
        if timed_out {
            err.with_hint(format!("--timeout {}s elapsed", args.timeout.unwrap_or_default()))
        } else {
            err
        }
    })?;

    write_output(&outcome, args.json, args.output.as_deref())?;
    print_summary(&outcome, &warnings);

    if !outcome.skipped.is_empty() {
        return Err(CliError::new(
            EXIT_RECON_SKIPPED,
            format!("{} of {} MIS file(s) skipped", outcome.skipped.len(), outcome.meta.files),
        ));
    }
    if outcome.has_discrepancies() {
        return Err(CliError::new(EXIT_RECON_DISCREPANCIES, "mismatches or unbooked policies found"));
    }
    Ok(())
}

fn load_source(path: &Path, sheet: Option<&str>) -> Result<RawTable, CliError> {
    misrecon_io::load_table(path, sheet).map_err(|e| CliError::new(EXIT_RECON_RUNTIME, e.to_string()))
}

/// What the worker thread owns besides the inputs.
struct Worker {
    cancel: CancelToken,
    reference_date: Option<NaiveDate>,
    tx: mpsc::Sender<Event>,
}

fn run_worker(
    config: ReconConfig,
    internal: RawTable,
    offline: Option<RawTable>,
    sources: Vec<MisSource>,
    fields: Vec<String>,
    worker: Worker,
) -> WorkerResult {
    let Worker { cancel, reference_date, tx } = worker;
    let registry = ProfileRegistry::from_config(&config);
    let progress_tx = tx.clone();
    // Receiver gone means the CLI is exiting; nothing left to report to.
    let report = move |p: u8| {
        let _ = progress_tx.send(Event::Progress(p));
    };
    let mut ctx = RunContext::new().with_progress(&report).with_cancel(cancel);
    if let Some(date) = reference_date {
        ctx = ctx.with_reference_date(date);
    }

    let load = |source: &MisSource, profile: &InsurerProfile| -> Result<RawTable, ReconError> {
        let loaded = misrecon_io::load_mis(Path::new(&source.label), profile)?;
        if let Some(w) = loaded.warning {
            let _ = tx.send(Event::SheetWarning(format!("{}: {w}", source.label)));
        }
        Ok(loaded.table)
    };

    run_batch(&config, &registry, &internal, offline.as_ref(), &sources, &fields, load, &ctx)
}

fn write_output(outcome: &BatchOutcome, json: bool, output: Option<&Path>) -> Result<(), CliError> {
    if !json && output.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(outcome)
        .map_err(|e| CliError::new(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(path) = output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::new(EXIT_RECON_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{json_str}");
    }
    Ok(())
}

/// Human summary to stderr.
fn print_summary(outcome: &BatchOutcome, warnings: &[String]) {
    for run in &outcome.runs {
        let s = &run.report.summary;
        eprintln!(
            "{} ({}): {} policies, {} matched ({} with mismatches), {} unbooked, {} not found in MIS",
            run.insurer,
            run.label.as_deref().unwrap_or("-"),
            s.total_policies,
            s.matched,
            s.mismatches,
            s.unbooked,
            s.not_found_in_mis,
        );
        let t = &run.insurer_summary;
        eprintln!(
            "  booked {} ({} cr), pending {} ({} cr), unbooked {} ({} cr)",
            t.booked.nop, t.booked.premium_cr, t.pending.nop, t.pending.premium_cr, t.unbooked.nop,
            t.unbooked.premium_cr,
        );
        let a = &s.anomalies;
        let missing = a.missing_policy_number.total();
        if missing > 0 {
            eprintln!("  {missing} row(s) without a policy number dropped");
        }
        let unparsable = a.unparsable_values.total();
        if unparsable > 0 {
            eprintln!("  {unparsable} value(s) could not be parsed");
        }
    }
    for skipped in &outcome.skipped {
        eprintln!("skipped {}: {}", skipped.label, skipped.reason);
    }
    for w in warnings {
        eprintln!("warning: {w}");
    }
    let audit = &outcome.audit;
    if audit.unattributed_internal + audit.unattributed_offline > 0 {
        eprintln!(
            "warning: {} internal and {} offline record(s) matched no insurer profile",
            audit.unattributed_internal, audit.unattributed_offline
        );
    }
}
