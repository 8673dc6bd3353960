//! CSV export of a dataset (UTF-8, comma-separated, header row)

use crate::dataset::Dataset;

/// Serialize the dataset as CSV bytes. Stateless; nothing is persisted.
pub fn to_csv(dataset: &Dataset) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(|v| v.csv_field()))?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Reduce a user query to `[a-z0-9_-]` so it is safe inside a file name
/// and a `Content-Disposition` header. Falls back to `informe`.
pub fn file_name_prefix(query: &str) -> String {
    let prefix: String = query
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if prefix.is_empty() {
        "informe".to_string()
    } else {
        prefix
    }
}

/// Download name, e.g. `energia_Marzo_2025.csv`
pub fn csv_file_name(prefix: &str, month: &str, year: i32) -> String {
    format!("{}_{}_{}.csv", prefix, month, year)
}
