//! `misrecon-recon`: insurance policy reconciliation engine.
//!
//! Pure engine crate: receives parsed tables, returns reports.
//! No CLI or file IO dependencies.

pub mod categorize;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod registry;

pub use categorize::{categorize, InsurerSummary};
pub use compare::compare;
pub use config::{InsurerProfile, ReconConfig};
pub use engine::reconcile;
pub use error::{Anomaly, ReconError};
pub use filter::filter;
pub use model::{
    CanonicalRecord, Categorization, Category, FieldValue, MatchVerdict, PolicyTag, RawTable,
    RawValue, ReconciliationReport,
};
pub use normalize::normalize;
pub use pipeline::{run_batch, run_comparison, BatchOutcome, ComparisonOutcome, ComparisonRequest, MisSource};
pub use progress::{cancel_token, CancelToken, RunContext};
pub use registry::{select_sheet, ProfileRegistry};
