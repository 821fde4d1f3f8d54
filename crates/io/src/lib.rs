// File loading for reconciliation inputs

pub mod csv;
pub mod error;
pub mod xlsx;

use std::path::Path;

use misrecon_recon::config::InsurerProfile;
use misrecon_recon::{select_sheet, RawTable, ReconError};

pub use error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Delimited,
    Tsv,
    Workbook,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Delimited),
            "tsv" => Ok(Self::Tsv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(Self::Workbook),
            _ => Err(LoadError::UnsupportedFormat { path: path.to_path_buf() }),
        }
    }
}

/// Load a table. Workbooks read `sheet` when given, else their first sheet;
/// `sheet` is ignored for delimited files.
pub fn load_table(path: &Path, sheet: Option<&str>) -> Result<RawTable, LoadError> {
    match FileKind::from_path(path)? {
        FileKind::Delimited => csv::load(path),
        FileKind::Tsv => csv::load_with_delimiter(path, b'\t'),
        FileKind::Workbook => match sheet {
            Some(name) => xlsx::read_sheet(path, name),
            None => {
                let first = first_sheet(path, &xlsx::list_sheets(path)?)?;
                xlsx::read_sheet(path, &first)
            }
        },
    }
}

fn first_sheet(path: &Path, sheets: &[String]) -> Result<String, LoadError> {
    sheets
        .first()
        .cloned()
        .ok_or_else(|| LoadError::NoSheets { path: path.to_path_buf() })
}

/// An insurer's MIS table plus how its sheet was chosen.
#[derive(Debug, Clone)]
pub struct LoadedMis {
    pub table: RawTable,
    /// Sheet read, for workbooks.
    pub sheet: Option<String>,
    /// Set when no sheet candidate matched and the first sheet was used.
    pub warning: Option<String>,
}

/// Load an insurer MIS file, choosing the workbook sheet from the profile's
/// candidates. No match falls back to the first sheet with a warning.
pub fn load_mis(path: &Path, profile: &InsurerProfile) -> Result<LoadedMis, LoadError> {
    if FileKind::from_path(path)? != FileKind::Workbook {
        return Ok(LoadedMis {
            table: load_table(path, None)?,
            sheet: None,
            warning: None,
        });
    }

    let sheets = xlsx::list_sheets(path)?;
    let (sheet, warning) = match select_sheet(profile, &sheets) {
        Ok(name) => (name.to_string(), None),
        Err(e @ ReconError::SheetNotFound { .. }) => {
            let first = first_sheet(path, &sheets)?;
            let warning = format!("{e}; using first sheet '{first}'");
            log::warn!("{}: {warning}", path.display());
            (first, Some(warning))
        }
        Err(e) => {
            return Err(LoadError::Parse { path: path.to_path_buf(), source: e });
        }
    };
    log::info!("{}: reading sheet '{sheet}' for {}", path.display(), profile.id);

    Ok(LoadedMis {
        table: xlsx::read_sheet(path, &sheet)?,
        sheet: Some(sheet),
        warning,
    })
}
