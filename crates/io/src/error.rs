use std::path::PathBuf;

use misrecon_recon::ReconError;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: unsupported file type (expected csv, tsv, txt, xlsx, xlsm, xls, xlsb or ods)", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("{}: {message}", path.display())]
    Workbook { path: PathBuf, message: String },

    #[error("{}: workbook has no sheets", path.display())]
    NoSheets { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ReconError,
    },
}

impl From<LoadError> for ReconError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Parse { source, .. } => source,
            LoadError::Io { .. } => ReconError::Io(e.to_string()),
            other => ReconError::InputParse(other.to_string()),
        }
    }
}
