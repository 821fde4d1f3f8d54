// Spreadsheet loading (xlsx, xlsm, xls, xlsb, ods)

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};

use misrecon_recon::normalize::excel_serial_to_date;
use misrecon_recon::{RawTable, RawValue};

use crate::error::LoadError;

/// Rows beyond this are dropped with a warning.
const MAX_ROWS: usize = 1_048_576;

fn open(path: &Path) -> Result<Sheets<std::io::BufReader<std::fs::File>>, LoadError> {
    open_workbook_auto(path).map_err(|e| LoadError::Workbook {
        path: path.to_path_buf(),
        message: format!("failed to open workbook: {e}"),
    })
}

/// Sheet names in workbook order.
pub fn list_sheets(path: &Path) -> Result<Vec<String>, LoadError> {
    let workbook = open(path)?;
    Ok(workbook.sheet_names().to_vec())
}

/// Read one sheet. The first row with any non-empty cell is the header;
/// rows above it are ignored.
pub fn read_sheet(path: &Path, sheet_name: &str) -> Result<RawTable, LoadError> {
    let mut workbook = open(path)?;
    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| LoadError::Workbook {
            path: path.to_path_buf(),
            message: format!("failed to read sheet '{sheet_name}': {e}"),
        })?;

    let (height, _) = range.get_size();
    if height > MAX_ROWS {
        log::warn!(
            "{} [{}]: {} rows, reading the first {}",
            path.display(),
            sheet_name,
            height,
            MAX_ROWS
        );
    }

    // Range start offset (data may not begin at A1)
    let (_, start_col) = range.start().unwrap_or((0, 0));
    let pad = start_col as usize;

    let mut rows = range.rows().take(MAX_ROWS).map(|row| {
        std::iter::repeat(RawValue::Empty)
            .take(pad)
            .chain(row.iter().map(cell_value))
            .collect::<Vec<_>>()
    });

    let Some(header_row) = rows.by_ref().find(|r| r.iter().any(|v| !v.is_empty())) else {
        return Ok(RawTable::default());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|v| v.to_text().unwrap_or_default())
        .collect();

    let data: Vec<Vec<RawValue>> = rows
        .filter(|r| r.iter().any(|v| !v.is_empty()))
        .collect();

    log::debug!(
        "{} [{}]: {} columns, {} data rows",
        path.display(),
        sheet_name,
        headers.len(),
        data.len()
    );
    Ok(RawTable::new(headers, data))
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) => {
            if s.trim().is_empty() {
                RawValue::Empty
            } else {
                RawValue::Text(s.clone())
            }
        }
        Data::Float(n) => RawValue::Number(*n),
        Data::Int(n) => RawValue::Number(*n as f64),
        Data::Bool(b) => RawValue::Bool(*b),
        // #N/A, #REF! and friends carry no value
        Data::Error(_) => RawValue::Empty,
        Data::DateTime(dt) => {
            // 1900 date system assumed
            let serial = dt.as_f64();
            match excel_serial_to_date(serial) {
                Some(d) => RawValue::Date(d),
                None => RawValue::Number(serial),
            }
        }
        Data::DateTimeIso(s) => RawValue::Text(s.clone()),
        Data::DurationIso(s) => RawValue::Text(s.clone()),
    }
}
