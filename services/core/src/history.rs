//! Append-only history of saved reports
//!
//! Layout of the history directory:
//! - `registro.json`: pretty-printed JSON array of [`HistoryEntry`]
//! - `informe_<mes>_<año>_<YYYYmmdd_HHMMSS>.xlsx`: one archive per save,
//!   with a `Datos` sheet (the saved rows) and a `Metadata` sheet
//!
//! All writes go through a single writer thread owned by [`HistoryLog`], so
//! the read-modify-write of the registry is never interleaved.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, SubsecRound};
use rust_xlsxwriter::{Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::dataset::{Dataset, Value};
use crate::format;

pub const REGISTRY_FILE: &str = "registro.json";
pub const DEFAULT_HISTORY_DIR: &str = "historico_informes";
pub const DATA_SHEET: &str = "Datos";
pub const METADATA_SHEET: &str = "Metadata";

const METADATA_COLUMNS: [&str; 5] = ["Mes", "Año", "Fecha_Generación", "Usuario", "Total_Registros"];
const WRITER_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write archive: {0}")]
    Archive(#[from] XlsxError),

    #[error("registry {} is not a valid history log: {source}", .path.display())]
    CorruptRegistry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode registry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("no saved report named '{0}'")]
    UnknownArchive(String),

    #[error("history writer is not running")]
    WriterClosed,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reporting period a snapshot is filed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    month: String,
    year: i32,
}

impl Period {
    /// The month becomes part of a file name, so it must be a plain label
    pub fn new(month: &str, year: i32) -> Result<Self, HistoryError> {
        let month = month.trim();
        if month.is_empty() {
            return Err(HistoryError::InvalidPeriod("month is empty".to_string()));
        }
        if month == "." || month == ".." || month.chars().any(|c| matches!(c, '/' | '\\') || c.is_control()) {
            return Err(HistoryError::InvalidPeriod(format!(
                "month '{}' is not a plain label",
                month.escape_default()
            )));
        }
        if !(1..=9999).contains(&year) {
            return Err(HistoryError::InvalidPeriod(format!("year {} out of range", year)));
        }
        Ok(Self {
            month: month.to_string(),
            year,
        })
    }

    /// Current month (Spanish name) and year
    pub fn current() -> Self {
        Self {
            month: format::current_month().to_string(),
            year: format::current_year(),
        }
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }
}

/// One line of `registro.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "mes")]
    pub month: String,
    #[serde(rename = "año")]
    pub year: i32,
    /// Local time of the save
    #[serde(rename = "fecha")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "usuario")]
    pub user: String,
    /// Path of the archived workbook
    #[serde(rename = "archivo")]
    pub archive: String,
    #[serde(rename = "registros")]
    pub rows: usize,
}

/// Sort for display: most recent save first
pub fn newest_first(mut entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Read the registry without going through the writer.
/// A missing file is an empty history.
pub fn read_registry(dir: &Path) -> Result<Vec<HistoryEntry>, HistoryError> {
    let path = dir.join(REGISTRY_FILE);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&path)(e)),
    };
    serde_json::from_slice(&content).map_err(|source| HistoryError::CorruptRegistry { path, source })
}

/// Replace the registry via temp file + rename
fn write_registry(dir: &Path, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
    let path = dir.join(REGISTRY_FILE);
    let mut tmp = tempfile::Builder::new()
        .prefix(".registro-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_err(dir))?;

    serde_json::to_writer_pretty(&mut tmp, entries).map_err(HistoryError::Encode)?;
    tmp.write_all(b"\n").map_err(io_err(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;

    tmp.persist(&path).map_err(|e| io_err(&path)(e.error))?;
    Ok(())
}

/// Two-sheet workbook: the rows under `Datos`, the save metadata under `Metadata`
fn build_archive(
    dataset: &Dataset,
    period: &Period,
    user: &str,
    timestamp: NaiveDateTime,
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();

    let data = workbook.add_worksheet();
    data.set_name(DATA_SHEET)?;
    for (col, name) in dataset.columns().iter().enumerate() {
        data.write_string(0, col as u16, name.as_str())?;
    }
    for (row, record) in dataset.rows().enumerate() {
        let row = row as u32 + 1;
        for (col, value) in record.iter().enumerate() {
            let col = col as u16;
            match value {
                Value::Empty => {}
                Value::Bool(b) => {
                    data.write_boolean(row, col, *b)?;
                }
                Value::Int(i) => {
                    data.write_number(row, col, *i as f64)?;
                }
                Value::Float(f) if f.is_finite() => {
                    data.write_number(row, col, *f)?;
                }
                Value::Float(_) => {}
                Value::Text(s) => {
                    data.write_string(row, col, s.as_str())?;
                }
            }
        }
    }

    let meta = workbook.add_worksheet();
    meta.set_name(METADATA_SHEET)?;
    for (col, name) in METADATA_COLUMNS.iter().enumerate() {
        meta.write_string(0, col as u16, *name)?;
    }
    meta.write_string(1, 0, period.month())?;
    meta.write_number(1, 1, period.year() as f64)?;
    meta.write_string(1, 2, timestamp.format("%Y-%m-%d %H:%M:%S").to_string())?;
    meta.write_string(1, 3, user)?;
    meta.write_number(1, 4, dataset.len() as f64)?;

    workbook.save_to_buffer()
}

/// Store archive bytes under a fresh name; same-second saves get `_<n>`
fn write_archive(
    dir: &Path,
    period: &Period,
    timestamp: NaiveDateTime,
    bytes: &[u8],
) -> Result<PathBuf, HistoryError> {
    let stem = format!(
        "informe_{}_{}_{}",
        period.month(),
        period.year(),
        timestamp.format("%Y%m%d_%H%M%S")
    );

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(bytes).map_err(io_err(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{}.xlsx", stem)
        } else {
            format!("{}_{}.xlsx", stem, attempt)
        };
        let target = dir.join(name);

        match tmp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} exists, trying next suffix", target.display());
                tmp = e.file;
                attempt += 1;
            }
            Err(e) => return Err(io_err(&target)(e.error)),
        }
    }
}

/// One save: archive first, then the registry line pointing at it
fn append_entry(
    dir: &Path,
    dataset: &Dataset,
    period: &Period,
    user: &str,
) -> Result<HistoryEntry, HistoryError> {
    append_entry_with(dir, dataset, period, user, write_registry)
}

/// [`append_entry`] with the registry rewrite supplied by the caller.
/// If it fails the new archive is removed again.
fn append_entry_with<W>(
    dir: &Path,
    dataset: &Dataset,
    period: &Period,
    user: &str,
    write_registry: W,
) -> Result<HistoryEntry, HistoryError>
where
    W: FnOnce(&Path, &[HistoryEntry]) -> Result<(), HistoryError>,
{
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    // Validate before writing anything
    let mut entries = read_registry(dir)?;

    let timestamp = Local::now().naive_local().trunc_subsecs(6);
    let bytes = build_archive(dataset, period, user, timestamp)?;
    let archive = write_archive(dir, period, timestamp, &bytes)?;

    let entry = HistoryEntry {
        month: period.month().to_string(),
        year: period.year(),
        timestamp,
        user: user.to_string(),
        archive: archive.to_string_lossy().to_string(),
        rows: dataset.len(),
    };
    entries.push(entry.clone());

    if let Err(e) = write_registry(dir, &entries) {
        log::warn!("Registry update failed, removing {}", archive.display());
        if let Err(rm) = fs::remove_file(&archive) {
            log::warn!("Could not remove {}: {}", archive.display(), rm);
        }
        return Err(e);
    }

    log::info!(
        "Saved {} rows for {} {} to {}",
        entry.rows,
        entry.month,
        entry.year,
        entry.archive
    );
    Ok(entry)
}

/// Bytes of a saved archive. Only bare file names listed in the registry
/// are served.
pub fn read_archive(dir: &Path, name: &str) -> Result<Vec<u8>, HistoryError> {
    let unknown = || HistoryError::UnknownArchive(name.to_string());
    if Path::new(name).file_name() != Some(OsStr::new(name)) {
        return Err(unknown());
    }

    let listed = read_registry(dir)?
        .iter()
        .any(|e| Path::new(&e.archive).file_name() == Some(OsStr::new(name)));
    if !listed {
        return Err(unknown());
    }

    let path = dir.join(name);
    match fs::read(&path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("{} is listed but missing", path.display());
            Err(unknown())
        }
        Err(e) => Err(io_err(&path)(e)),
    }
}

enum Command {
    Append {
        dataset: Dataset,
        period: Period,
        user: String,
        reply: oneshot::Sender<Result<HistoryEntry, HistoryError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<HistoryEntry>, HistoryError>>,
    },
    Archive {
        name: String,
        reply: oneshot::Sender<Result<Vec<u8>, HistoryError>>,
    },
}

/// Handle to the history writer. Cheap to clone; the writer thread exits
/// once every handle is dropped.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    dir: PathBuf,
    tx: mpsc::Sender<Command>,
}

impl HistoryLog {
    /// Start the writer that owns `dir`
    pub fn spawn(dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let dir = dir.into();
        let (tx, mut rx) = mpsc::channel::<Command>(WRITER_QUEUE);

        let owned = dir.clone();
        std::thread::Builder::new()
            .name("history-writer".to_string())
            .spawn(move || {
                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        Command::Append {
                            dataset,
                            period,
                            user,
                            reply,
                        } => {
                            let _ = reply.send(append_entry(&owned, &dataset, &period, &user));
                        }
                        Command::List { reply } => {
                            let _ = reply.send(read_registry(&owned));
                        }
                        Command::Archive { name, reply } => {
                            let _ = reply.send(read_archive(&owned, &name));
                        }
                    }
                }
                log::debug!("History writer for {} stopped", owned.display());
            })
            .map_err(io_err(&dir))?;

        Ok(Self { dir, tx })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive `dataset` and record it in the registry
    pub async fn append(
        &self,
        dataset: Dataset,
        period: Period,
        user: impl Into<String>,
    ) -> Result<HistoryEntry, HistoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Append {
                dataset,
                period,
                user: user.into(),
                reply,
            })
            .await
            .map_err(|_| HistoryError::WriterClosed)?;
        rx.await.map_err(|_| HistoryError::WriterClosed)?
    }

    /// Registry entries in file order
    pub async fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::List { reply })
            .await
            .map_err(|_| HistoryError::WriterClosed)?;
        rx.await.map_err(|_| HistoryError::WriterClosed)?
    }

    /// Contents of the archive file `name`, see [`read_archive`]
    pub async fn archive(&self, name: impl Into<String>) -> Result<Vec<u8>, HistoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Archive {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| HistoryError::WriterClosed)?;
        rx.await.map_err(|_| HistoryError::WriterClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::read_sheet;
    use pretty_assertions::assert_eq;

    fn snapshot(rows: usize) -> Dataset {
        Dataset::new(
            &["Producto", "Gerencia", "Stock", "Valor total"],
            (0..rows)
                .map(|i| {
                    vec![
                        Value::from(format!("P-{}", i)),
                        "ENERGIA".into(),
                        Value::Int(i as i64),
                        if i % 2 == 0 { Value::Float(10.5) } else { Value::Empty },
                    ]
                })
                .collect(),
        )
    }

    fn marzo() -> Period {
        Period::new("Marzo", 2025).unwrap()
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    // -------------------------------------------------------------------------
    // PERIOD
    // -------------------------------------------------------------------------

    #[test]
    fn test_period_validation() {
        assert_eq!(Period::new(" Abril ", 2024).unwrap().month(), "Abril");
        assert!(Period::new("", 2024).is_err());
        assert!(Period::new("   ", 2024).is_err());
        assert!(Period::new("../etc", 2024).is_err());
        assert!(Period::new("a\\b", 2024).is_err());
        assert!(Period::new("..", 2024).is_err());
        assert!(Period::new("Mayo\n", 2024).is_ok());
        assert!(Period::new("Ma\tyo", 2024).is_err());
        assert!(Period::new("Mayo", 0).is_err());
    }

    #[test]
    fn test_current_period_uses_spanish_month() {
        let period = Period::current();
        assert!(format::MONTHS.contains(&period.month()));
    }

    // -------------------------------------------------------------------------
    // REGISTRY
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_registry(&dir.path().join("nada")).unwrap().is_empty());
    }

    #[test]
    fn test_registry_uses_spanish_keys() {
        let dir = tempfile::tempdir().unwrap();
        let entry = append_entry(dir.path(), &snapshot(2), &marzo(), "ana").unwrap();

        let raw = fs::read_to_string(dir.path().join(REGISTRY_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let first = &json[0];
        assert_eq!(first["mes"], "Marzo");
        assert_eq!(first["año"], 2025);
        assert_eq!(first["usuario"], "ana");
        assert_eq!(first["registros"], 2);
        assert_eq!(first["archivo"], entry.archive.as_str());
        assert!(first["fecha"].as_str().unwrap().contains('T'));
        assert!(raw.contains("\n  {"));
    }

    #[test]
    fn test_reads_registry_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(REGISTRY_FILE),
            r#"[
  {"mes": "Mayo", "año": 2024, "fecha": "2024-05-01T10:11:12.123456",
   "usuario": "Sistema", "archivo": "historico_informes/informe_Mayo_2024_20240501_101112.xlsx",
   "registros": 5},
  {"mes": "Junio", "año": 2024, "fecha": "2024-06-01T08:00:00",
   "usuario": "Administrador", "archivo": "x.xlsx", "registros": 0}
]"#,
        )
        .unwrap();

        let entries = read_registry(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].year, 2024);
        assert_eq!(entries[0].rows, 5);
        assert_eq!(entries[1].user, "Administrador");
        assert_eq!(
            entries[0].timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            "2024-05-01 10:11:12.123456"
        );
    }

    #[test]
    fn test_newest_first() {
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        let entry = |month: &str, ts: &str| HistoryEntry {
            month: month.to_string(),
            year: 2024,
            timestamp: at(ts),
            user: "u".to_string(),
            archive: String::new(),
            rows: 0,
        };
        let sorted = newest_first(vec![
            entry("Enero", "2024-01-31 09:00:00"),
            entry("Marzo", "2024-03-31 09:00:00"),
            entry("Febrero", "2024-02-28 09:00:00"),
        ]);
        let months: Vec<_> = sorted.iter().map(|e| e.month.as_str()).collect();
        assert_eq!(months, vec!["Marzo", "Febrero", "Enero"]);
    }

    // -------------------------------------------------------------------------
    // ARCHIVES
    // -------------------------------------------------------------------------

    #[test]
    fn test_archive_has_data_and_metadata_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let entry = append_entry(dir.path(), &snapshot(3), &marzo(), "ana").unwrap();
        let path = PathBuf::from(&entry.archive);

        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("informe_Marzo_2025_"));
        assert!(file_name.ends_with(".xlsx"));

        let data = read_sheet(&path, DATA_SHEET).unwrap();
        assert_eq!(data.columns(), snapshot(3).columns());
        assert_eq!(data.len(), 3);
        assert_eq!(data.get(2, "Producto"), Some(&Value::from("P-2")));
        assert_eq!(data.get(1, "Stock").and_then(Value::as_f64), Some(1.0));
        assert_eq!(data.get(1, "Valor total"), Some(&Value::Empty));

        let meta = read_sheet(&path, METADATA_SHEET).unwrap();
        assert_eq!(meta.columns(), &METADATA_COLUMNS);
        assert_eq!(meta.get(0, "Mes"), Some(&Value::from("Marzo")));
        assert_eq!(meta.get(0, "Usuario"), Some(&Value::from("ana")));
        assert_eq!(meta.get(0, "Total_Registros").and_then(Value::as_f64), Some(3.0));
    }

    #[test]
    fn test_same_second_saves_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Local::now().naive_local();
        let first = write_archive(dir.path(), &marzo(), ts, b"one").unwrap();
        let second = write_archive(dir.path(), &marzo(), ts, b"two").unwrap();
        let third = write_archive(dir.path(), &marzo(), ts, b"three").unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.xlsx"));
        assert!(third.to_string_lossy().ends_with("_2.xlsx"));
        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&third).unwrap(), b"three");
    }

    #[test]
    fn test_corrupt_registry_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join(REGISTRY_FILE);
        fs::write(&registry, b"{ not json").unwrap();

        let err = append_entry(dir.path(), &snapshot(1), &marzo(), "ana").unwrap_err();
        assert!(matches!(err, HistoryError::CorruptRegistry { .. }));
        assert_eq!(fs::read(&registry).unwrap(), b"{ not json");
        assert_eq!(dir_names(dir.path()), vec![REGISTRY_FILE.to_string()]);
    }

    #[test]
    fn test_failed_registry_write_removes_new_archive() {
        let dir = tempfile::tempdir().unwrap();
        append_entry(dir.path(), &snapshot(2), &marzo(), "ana").unwrap();

        let registry = dir.path().join(REGISTRY_FILE);
        let before = fs::read(&registry).unwrap();
        let names = dir_names(dir.path());

        let err = append_entry_with(dir.path(), &snapshot(3), &marzo(), "luis", |dir, entries| {
            assert_eq!(entries.len(), 2);
            Err(HistoryError::Io {
                path: dir.join(REGISTRY_FILE),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            })
        })
        .unwrap_err();

        assert!(matches!(err, HistoryError::Io { .. }));
        assert_eq!(fs::read(&registry).unwrap(), before);
        assert_eq!(dir_names(dir.path()), names);
        assert_eq!(read_registry(dir.path()).unwrap().len(), 1);
    }

    // -------------------------------------------------------------------------
    // DOWNLOAD
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_archive_serves_only_listed_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = append_entry(dir.path(), &snapshot(2), &marzo(), "ana").unwrap();
        let name = Path::new(&entry.archive)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();

        let bytes = read_archive(dir.path(), &name).unwrap();
        assert_eq!(bytes, fs::read(&entry.archive).unwrap());
        assert!(bytes.starts_with(b"PK"));

        fs::write(dir.path().join("otro.xlsx"), b"PK").unwrap();
        for name in ["otro.xlsx", REGISTRY_FILE, "../registro.json", "", ".."] {
            assert!(
                matches!(read_archive(dir.path(), name), Err(HistoryError::UnknownArchive(_))),
                "{:?} should not be served",
                name
            );
        }

        fs::remove_file(&entry.archive).unwrap();
        assert!(matches!(
            read_archive(dir.path(), &name),
            Err(HistoryError::UnknownArchive(_))
        ));
    }

    // -------------------------------------------------------------------------
    // WRITER
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_appends_are_recorded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::spawn(dir.path().join(DEFAULT_HISTORY_DIR)).unwrap();

        assert!(log.list().await.unwrap().is_empty());

        let mut archives = Vec::new();
        for rows in [1, 4, 2] {
            let entry = log.append(snapshot(rows), marzo(), "ana").await.unwrap();
            assert_eq!(entry.rows, rows);
            archives.push(entry.archive);
        }

        let listed = log.list().await.unwrap();
        let counts: Vec<_> = listed.iter().map(|e| e.rows).collect();
        assert_eq!(counts, vec![1, 4, 2]);

        archives.sort();
        archives.dedup();
        assert_eq!(archives.len(), 3);
        assert_eq!(read_registry(log.dir()).unwrap(), listed);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::spawn(dir.path()).unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move {
                    log.append(snapshot(i % 3 + 1), marzo(), format!("user-{}", i)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = log.list().await.unwrap();
        assert_eq!(entries.len(), 20);

        let mut users: Vec<_> = entries.iter().map(|e| e.user.clone()).collect();
        users.sort();
        users.dedup();
        assert_eq!(users.len(), 20);

        let xlsx_count = dir_names(dir.path())
            .iter()
            .filter(|n| n.ends_with(".xlsx"))
            .count();
        assert_eq!(xlsx_count, 20);
    }

    #[tokio::test]
    async fn test_corrupt_registry_reported_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(REGISTRY_FILE), b"[1, 2").unwrap();
        let log = HistoryLog::spawn(dir.path()).unwrap();

        assert!(matches!(
            log.append(snapshot(1), marzo(), "ana").await,
            Err(HistoryError::CorruptRegistry { .. })
        ));
        assert!(matches!(log.list().await, Err(HistoryError::CorruptRegistry { .. })));
    }

    #[tokio::test]
    async fn test_archive_download_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::spawn(dir.path()).unwrap();
        let entry = log.append(snapshot(3), marzo(), "ana").await.unwrap();
        let name = Path::new(&entry.archive).file_name().unwrap().to_string_lossy().to_string();

        let bytes = log.archive(name).await.unwrap();
        let path = dir.path().join("descarga.xlsx");
        fs::write(&path, bytes).unwrap();
        assert_eq!(read_sheet(&path, DATA_SHEET).unwrap().len(), 3);

        assert!(matches!(
            log.archive("nada.xlsx").await,
            Err(HistoryError::UnknownArchive(_))
        ));
    }
}
