//! Load -> filter -> aggregate, as one call

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::aggregate::{summarize, Summary};
use crate::dataset::Dataset;
use crate::filter::{business_unit_column, filter_business_unit};
use crate::loader::{load, LoadError, LoaderOptions, DEFAULT_SHEET};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub sheet_name: String,
    pub loader: LoaderOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            sheet_name: DEFAULT_SHEET.to_string(),
            loader: LoaderOptions::default(),
        }
    }
}

/// The filter matched nothing. Reported to the user, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmptyResult {
    pub query: String,
}

impl fmt::Display for EmptyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No se encontraron datos para '{}'", self.query)
    }
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Rows in the sheet before filtering
    pub total_rows: usize,
    /// Column the business-unit filter used, `None` when it was skipped
    pub filter_column: Option<&'static str>,
    #[serde(skip)]
    pub dataset: Dataset,
    pub summary: Summary,
    pub warning: Option<EmptyResult>,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Load the configured sheet from `path` and analyze it for `query`
    pub async fn analyze(&self, path: &Path, query: &str) -> Result<Report, LoadError> {
        let dataset = load(path, &self.options.sheet_name, &self.options.loader).await?;
        Ok(analyze_dataset(&dataset, query))
    }
}

/// Filter an already loaded dataset and summarize the result
pub fn analyze_dataset(dataset: &Dataset, query: &str) -> Report {
    let filtered = filter_business_unit(dataset, query);
    let summary = summarize(&filtered);

    let warning = filtered.is_empty().then(|| EmptyResult {
        query: query.to_string(),
    });
    if let Some(w) = &warning {
        log::warn!("{}", w);
    }

    Report {
        total_rows: dataset.len(),
        filter_column: business_unit_column(dataset),
        dataset: filtered,
        summary,
        warning,
    }
}
