//! Progress reporting and cooperative cancellation for long runs.
//!
//! The engine is synchronous. Callers that run it on a worker thread hand in
//! a [`CancelToken`] and a progress callback; the engine checks the token at
//! chunk boundaries and reports a percentage that never decreases.
//!
//! The context also pins the run's reference date, which month-window filters
//! compare against.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::ReconError;

/// Shared cancellation flag.
pub type CancelToken = Arc<AtomicBool>;

pub fn cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

pub struct RunContext<'a> {
    progress: Option<&'a dyn Fn(u8)>,
    cancel: Option<CancelToken>,
    chunk_size: Option<usize>,
    reference_date: Option<NaiveDate>,
    last: Cell<Option<u8>>,
    /// Absolute percentage range the current stage maps onto.
    window: Cell<(f64, f64)>,
}

impl Default for RunContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RunContext<'a> {
    pub fn new() -> Self {
        Self {
            progress: None,
            cancel: None,
            chunk_size: None,
            reference_date: None,
            last: Cell::new(None),
            window: Cell::new((0.0, 100.0)),
        }
    }

    pub fn with_progress(mut self, callback: &'a dyn Fn(u8)) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Overrides the config's `comparator.chunk_size`.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn chunk_size_or(&self, default: usize) -> usize {
        self.chunk_size.unwrap_or(default).max(1)
    }

    /// Pin the date month-window filters are evaluated against.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// The pinned reference date, else today in local time.
    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|t| t.load(Ordering::Relaxed))
    }

    /// Chunk boundary: fails with `Cancelled` once the token is set.
    pub fn checkpoint(&self) -> Result<(), ReconError> {
        if self.is_cancelled() {
            log::info!("cancellation requested; aborting run");
            return Err(ReconError::Cancelled);
        }
        Ok(())
    }

    /// Run `f` with progress mapped onto `[from, to]` percent of the current window.
    pub fn within<T>(&self, from: u8, to: u8, f: impl FnOnce() -> T) -> T {
        let outer = self.window.get();
        let span = outer.1 - outer.0;
        let lo = outer.0 + span * f64::from(from.min(100)) / 100.0;
        let hi = outer.0 + span * f64::from(to.min(100)) / 100.0;
        self.window.set((lo, hi.max(lo)));
        let out = f();
        self.window.set(outer);
        out
    }

    /// Report `done` of `total` units of the current stage.
    pub fn advance(&self, done: usize, total: usize) {
        let (lo, hi) = self.window.get();
        let fraction = if total == 0 { 1.0 } else { (done.min(total) as f64) / total as f64 };
        self.emit((lo + (hi - lo) * fraction).floor() as u8);
    }

    /// Final report; always delivers 100 exactly once.
    pub fn finish(&self) {
        self.emit(100);
    }

    fn emit(&self, pct: u8) {
        let pct = pct.min(100);
        if self.last.get().is_some_and(|last| pct <= last) {
            return;
        }
        self.last.set(Some(pct));
        log::debug!("progress {pct}%");
        if let Some(callback) = self.progress {
            callback(pct);
        }
    }
}
