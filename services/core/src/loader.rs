//! Spreadsheet loader: uploaded workbook -> `Dataset`
//!
//! Reads exactly one named sheet (default "informe"). The first row is the
//! header row and every header is trimmed before anything else sees it.
//! Nothing partial is returned on error.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use calamine::{open_workbook_auto, Data, Reader};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::convert::{ConversionError, Converter, ExternalConverter};
use crate::dataset::{Dataset, Value};

pub const DEFAULT_SHEET: &str = "informe";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file type '{0}' (expected xlsx, xls, xlsb or ods)")]
    UnsupportedFormat(String),

    #[error("{0} files are not accepted, convert the workbook to xlsx first")]
    LegacyRejected(SpreadsheetFormat),

    #[error("sheet '{sheet}' not found (available: {})", .available.join(", "))]
    SheetMissing {
        sheet: String,
        available: Vec<String>,
    },

    #[error("failed to read workbook {}: {source}", .path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workbook container formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Xlsx,
    Xls,
    Xlsb,
    Ods,
}

impl SpreadsheetFormat {
    /// Detect from the file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "xlsb" => Some(Self::Xlsb),
            "ods" => Some(Self::Ods),
            _ => None,
        }
    }

    /// Binary formats that go through the legacy policy
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::Xls | Self::Xlsb)
    }
}

impl fmt::Display for SpreadsheetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Xlsx => "XLSX",
            Self::Xls => "XLS",
            Self::Xlsb => "XLSB",
            Self::Ods => "ODS",
        })
    }
}

/// How XLS/XLSB uploads are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LegacyPolicy {
    /// Convert to XLSX with the external converter, then read
    #[default]
    Convert,
    /// Read the binary format directly
    Native,
    /// Refuse the upload
    Reject,
}

impl FromStr for LegacyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "convert" => Ok(Self::Convert),
            "native" => Ok(Self::Native),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown legacy format policy '{}' (expected convert, native or reject)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub legacy: LegacyPolicy,
    pub converter: ExternalConverter,
}

/// Load `sheet_name` from the workbook at `path`
pub async fn load(
    path: &Path,
    sheet_name: &str,
    options: &LoaderOptions,
) -> Result<Dataset, LoadError> {
    load_with(path, sheet_name, options.legacy, &options.converter).await
}

/// Same as [`load`] with an explicit converter
pub async fn load_with<C: Converter>(
    path: &Path,
    sheet_name: &str,
    legacy: LegacyPolicy,
    converter: &C,
) -> Result<Dataset, LoadError> {
    let format = SpreadsheetFormat::from_path(path).ok_or_else(|| {
        LoadError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
        )
    })?;

    if format.is_legacy() {
        match legacy {
            LegacyPolicy::Reject => return Err(LoadError::LegacyRejected(format)),
            LegacyPolicy::Native => {
                log::debug!("Reading {} natively", format);
            }
            LegacyPolicy::Convert => {
                // Removed when dropped, whichever way this branch exits.
                let out_dir = tempfile::Builder::new()
                    .prefix("informe-conv-")
                    .tempdir()?;
                let converted = converter.convert(path, out_dir.path()).await?;
                return read_sheet_blocking(converted, sheet_name).await;
            }
        }
    }

    read_sheet_blocking(path.to_path_buf(), sheet_name).await
}

async fn read_sheet_blocking(path: PathBuf, sheet_name: &str) -> Result<Dataset, LoadError> {
    let sheet = sheet_name.to_string();
    tokio::task::spawn_blocking(move || read_sheet(&path, &sheet))
        .await
        .map_err(|e| LoadError::Io(std::io::Error::other(e)))?
}

/// Read one sheet synchronously (calamine auto-detects xlsx, xls, xlsb, ods)
pub fn read_sheet(path: &Path, sheet_name: &str) -> Result<Dataset, LoadError> {
    let workbook_err = |source| LoadError::Workbook {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = open_workbook_auto(path).map_err(workbook_err)?;

    let available = workbook.sheet_names().to_vec();
    if !available.iter().any(|s| s == sheet_name) {
        return Err(LoadError::SheetMissing {
            sheet: sheet_name.to_string(),
            available,
        });
    }

    let range = workbook.worksheet_range(sheet_name).map_err(workbook_err)?;
    let (row_count, col_count) = range.get_size();
    log::debug!(
        "Sheet '{}' size: {} rows x {} columns",
        sheet_name,
        row_count,
        col_count
    );

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(|c| cell_value(c).to_string()).collect(),
        None => Vec::new(),
    };
    let mut data: Vec<Vec<Value>> = rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    for col in 0..col_count {
        restore_integers(&mut data, col);
    }

    log::info!(
        "Loaded {} rows x {} columns from sheet '{}'",
        data.len(),
        headers.len(),
        sheet_name
    );

    Ok(Dataset::new(&headers, data))
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Empty,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(d) => Value::Text(d.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
    }
}

/// Largest magnitude at which every integer is exactly representable as f64
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Workbooks store every number as a float. A column whose numbers are all
/// whole becomes `Int`, unless it mixes numbers with blanks only, which
/// keeps it floating point (a blank is a missing number).
fn restore_integers(rows: &mut [Vec<Value>], col: usize) {
    let mut has_blank = false;
    let mut has_other = false;
    for value in rows.iter().filter_map(|row| row.get(col)) {
        match value {
            Value::Float(f) if f.fract() != 0.0 || f.abs() > MAX_EXACT_INT => return,
            Value::Float(_) | Value::Int(_) => {}
            v if v.is_empty() => has_blank = true,
            _ => has_other = true,
        }
    }
    if has_blank && !has_other {
        return;
    }

    for cell in rows.iter_mut().filter_map(|row| row.get_mut(col)) {
        if let Value::Float(f) = *cell {
            *cell = Value::Int(f as i64);
        }
    }
}

/// An uploaded workbook written to a uniquely named temporary file.
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    format: SpreadsheetFormat,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn format(&self) -> SpreadsheetFormat {
        self.format
    }
}

/// Stage uploaded bytes, keeping the original extension for format detection
pub fn stage_upload(bytes: &[u8], original_name: &str) -> Result<StagedUpload, LoadError> {
    let name = Path::new(original_name);
    let format = SpreadsheetFormat::from_path(name)
        .ok_or_else(|| LoadError::UnsupportedFormat(original_name.to_string()))?;
    let ext = name
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("informe-upload-")
        .suffix(&format!(".{}", ext))
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;

    log::debug!("Staged {} bytes at {}", bytes.len(), file.path().display());
    Ok(StagedUpload { file, format })
}
