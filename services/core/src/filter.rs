//! Row filters over a loaded `Dataset`

use std::collections::BTreeSet;

use crate::dataset::{Dataset, Value};

/// Business-unit columns, in priority order
pub const BUSINESS_UNIT_COLUMNS: &[&str] = &["Gerencia", "Denominación"];

pub const STATUS_COLUMN: &str = "Estado";
pub const COVERAGE_COLUMN: &str = "Cobertura Inv";
pub const DESCRIPTION_COLUMN: &str = "Descripción";

/// Column the business-unit filter would use, if any
pub fn business_unit_column(dataset: &Dataset) -> Option<&'static str> {
    BUSINESS_UNIT_COLUMNS
        .iter()
        .copied()
        .find(|c| dataset.has_column(c))
}

/// Keep rows whose business-unit column contains `query` (case-insensitive).
///
/// Without a business-unit column the dataset is returned unchanged.
/// Null and non-text cells never match.
pub fn filter_business_unit(dataset: &Dataset, query: &str) -> Dataset {
    let Some(column) = business_unit_column(dataset) else {
        log::warn!(
            "No business-unit column ({}) found, filter skipped",
            BUSINESS_UNIT_COLUMNS.join(" / ")
        );
        return dataset.clone();
    };

    let filtered = retain_containing(dataset, column, query);
    log::info!(
        "Filter '{}' on column '{}': {} of {} rows",
        query,
        column,
        filtered.len(),
        dataset.len()
    );
    filtered
}

/// Secondary filters of the data explorer. Unset criteria are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExploreFilter {
    /// Exact "Estado" value
    pub status: Option<String>,
    /// Exact "Cobertura Inv" value
    pub coverage: Option<String>,
    /// Case-insensitive search within "Descripción"
    pub search: Option<String>,
}

impl ExploreFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.coverage.is_none() && self.search.is_none()
    }
}

/// Apply explorer criteria in order: status, coverage, description search.
/// A criterion whose column is missing is skipped.
pub fn explore(dataset: &Dataset, filter: &ExploreFilter) -> Dataset {
    let mut current = dataset.clone();
    if filter.is_empty() {
        return current;
    }

    if let Some(status) = &filter.status {
        current = retain_equal(&current, STATUS_COLUMN, status);
    }
    if let Some(coverage) = &filter.coverage {
        current = retain_equal(&current, COVERAGE_COLUMN, coverage);
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        if current.has_column(DESCRIPTION_COLUMN) {
            current = retain_containing(&current, DESCRIPTION_COLUMN, search);
        }
    }

    current
}

/// Sorted distinct non-null values of a column (empty if absent)
pub fn distinct_values(dataset: &Dataset, column: &str) -> Vec<String> {
    let Some(values) = dataset.column(column) else {
        return Vec::new();
    };
    let unique: BTreeSet<String> = values.filter_map(Value::group_key).collect();
    unique.into_iter().collect()
}

fn retain_containing(dataset: &Dataset, column: &str, query: &str) -> Dataset {
    let Some(idx) = dataset.column_index(column) else {
        return dataset.clone();
    };
    let needle = query.to_lowercase();
    dataset.retain_rows(|row| {
        row[idx]
            .as_text()
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}

fn retain_equal(dataset: &Dataset, column: &str, expected: &str) -> Dataset {
    let Some(idx) = dataset.column_index(column) else {
        return dataset.clone();
    };
    dataset.retain_rows(|row| row[idx].group_key().as_deref() == Some(expected))
}
