//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success, no discrepancies                |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, unknown field)|
//! | 60-69   | recon            | Reconciliation outcome and failure codes |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use misrecon_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed, nothing to report.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unknown field names.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Recon (60-69)
// =============================================================================

/// Run completed and found mismatches or unbooked policies.
pub const EXIT_RECON_DISCREPANCIES: u8 = 60;

/// Config file failed to parse or validate.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 61;

/// Runtime failure: unreadable input, bad file format, empty MIS.
pub const EXIT_RECON_RUNTIME: u8 = 62;

/// Run was cancelled (timeout) before producing results.
pub const EXIT_RECON_CANCELLED: u8 = 63;

/// One or more MIS files were skipped (unknown insurer, unreadable file).
/// Takes precedence over EXIT_RECON_DISCREPANCIES.
pub const EXIT_RECON_SKIPPED: u8 = 64;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_RECON_INVALID_CONFIG,
        ReconError::UnknownField(_) => EXIT_USAGE,
        ReconError::Cancelled => EXIT_RECON_CANCELLED,
        ReconError::UnknownInsurer { .. }
        | ReconError::SheetNotFound { .. }
        | ReconError::NoComparableRows { .. }
        | ReconError::InputParse(_)
        | ReconError::Io(_) => EXIT_RECON_RUNTIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_RECON_DISCREPANCIES,
            EXIT_RECON_INVALID_CONFIG,
            EXIT_RECON_RUNTIME,
            EXIT_RECON_CANCELLED,
            EXIT_RECON_SKIPPED,
        ];
        let unique: std::collections::BTreeSet<u8> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_codes() {
        assert_eq!(recon_exit_code(&ReconError::Cancelled), EXIT_RECON_CANCELLED);
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_RECON_INVALID_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::UnknownField("x".into())), EXIT_USAGE);
        assert_eq!(recon_exit_code(&ReconError::Io("x".into())), EXIT_RECON_RUNTIME);
    }
}
