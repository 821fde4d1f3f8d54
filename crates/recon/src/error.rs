use serde::Serialize;
use thiserror::Error;

/// Run-level failures. Row and field problems never surface here; they are
/// recovered locally and counted as [`Anomaly`] samples instead.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (missing policy_number mapping, bad tolerance, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// No insurer profile matches the hint.
    #[error("unknown insurer: no profile matches '{hint}'")]
    UnknownInsurer { hint: String },
    /// None of the profile's sheet candidates exist in the workbook.
    #[error("insurer '{insurer}': no sheet matches {candidates:?} (available: {available:?})")]
    SheetNotFound {
        insurer: String,
        candidates: Vec<String>,
        available: Vec<String>,
    },
    /// A source has zero usable rows once normalized and filtered.
    #[error("insurer '{insurer}': {source_name} has no comparable rows after filtering")]
    NoComparableRows { source_name: String, insurer: String },
    /// A requested comparison field is not part of the canonical schema.
    #[error("unknown field: '{0}' is not a configured canonical field")]
    UnknownField(String),
    /// Tabular input could not be parsed.
    #[error("input parse error: {0}")]
    InputParse(String),
    /// The run was cancelled at a chunk boundary.
    #[error("reconciliation cancelled")]
    Cancelled,
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

pub type ReconResult<T> = Result<T, ReconError>;

/// Row-level problems recovered during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// Row dropped: no value in any policy_number candidate column.
    MissingPolicyIdentifier,
    /// Field nulled: value could not be coerced to its declared type.
    UnparsableValue,
    /// Policy identifier seen more than once; last write wins.
    DuplicateIdentifier,
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPolicyIdentifier => write!(f, "missing_policy_identifier"),
            Self::UnparsableValue => write!(f, "unparsable_value"),
            Self::DuplicateIdentifier => write!(f, "duplicate_identifier"),
        }
    }
}

/// One retained occurrence of an [`Anomaly`], for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySample {
    pub kind: Anomaly,
    pub source: String,
    /// 1-based data row (header excluded).
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = ReconError::UnknownInsurer { hint: "acme_mis.xlsx".into() };
        assert_eq!(err.to_string(), "unknown insurer: no profile matches 'acme_mis.xlsx'");

        let err = ReconError::NoComparableRows {
            source_name: "mis".into(),
            insurer: "RELIANCE".into(),
        };
        assert!(err.to_string().contains("RELIANCE"));
    }

    #[test]
    fn anomaly_serializes_snake_case() {
        let json = serde_json::to_string(&Anomaly::MissingPolicyIdentifier).unwrap();
        assert_eq!(json, "\"missing_policy_identifier\"");
        assert_eq!(Anomaly::DuplicateIdentifier.to_string(), "duplicate_identifier");
    }
}
