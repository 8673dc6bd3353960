//! Summary statistics and grouped aggregates over a filtered `Dataset`
//!
//! Every aggregate declares the columns it needs. `summarize` checks them
//! against the dataset schema and skips (or defaults) the aggregates whose
//! requirements are not met, so a missing column never fails the pipeline.
//! Nothing here is cached: summaries are recomputed for every dataset.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::dataset::{Dataset, Schema};
use crate::filter::{COVERAGE_COLUMN, DESCRIPTION_COLUMN, STATUS_COLUMN};

pub const PRODUCT_COLUMN: &str = "Producto";
pub const STOCK_COLUMN: &str = "Stock";
pub const VALUE_COLUMN: &str = "Valor total";
pub const TURNOVER_COLUMN: &str = "Rotación de Inventarios";

pub const TOP_N: usize = 10;

/// Bins of the turnover distribution chart
pub const TURNOVER_BINS: usize = 40;

/// Columns kept in the top-N table, when present
pub const TOP_DISPLAY_COLUMNS: &[&str] = &[
    PRODUCT_COLUMN,
    DESCRIPTION_COLUMN,
    STOCK_COLUMN,
    VALUE_COLUMN,
];

/// A statistic computed only when its required columns exist
pub trait Aggregate {
    type Output;

    const NAME: &'static str;

    const REQUIRED: &'static [&'static str];

    /// Callers guarantee that every required column is present
    fn compute(&self, dataset: &Dataset) -> Self::Output;
}

/// Run `aggregate` if `schema` satisfies its requirements
pub fn evaluate<A: Aggregate>(aggregate: &A, dataset: &Dataset, schema: &Schema) -> Option<A::Output> {
    if schema.satisfies(A::REQUIRED) {
        Some(aggregate.compute(dataset))
    } else {
        log::debug!("Skipping {}: missing {:?}", A::NAME, schema.missing(A::REQUIRED));
        None
    }
}

/// Sum of values for one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub key: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub rows: usize,
    pub product_count: usize,
    pub total_stock: f64,
    pub total_value: f64,
    pub mean_turnover: Option<f64>,
    pub value_by_status: Option<Vec<GroupTotal>>,
    pub value_by_coverage: Option<Vec<GroupTotal>>,
    pub top_by_value: Option<Dataset>,
    pub turnover_distribution: Option<Histogram>,
}

/// Equal-width histogram. `edges` has one more element than `counts`;
/// every bin is half-open except the last, which also holds the maximum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// `None` without values. When all values are equal the range is widened
    /// to one unit centred on that value.
    pub fn from_values(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }

        let (mut lo, mut hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;

        let mut edges: Vec<f64> = (0..bins).map(|i| lo + width * i as f64).collect();
        edges.push(hi);

        let mut counts = vec![0; bins];
        for &v in values {
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }

        Some(Self { edges, counts })
    }
}

/// Compute every aggregate the dataset supports
pub fn summarize(dataset: &Dataset) -> Summary {
    let schema = dataset.schema();

    Summary {
        rows: dataset.len(),
        product_count: evaluate(&ProductCount, dataset, &schema).unwrap_or(dataset.len()),
        total_stock: evaluate(&StockTotal, dataset, &schema).unwrap_or(0.0),
        total_value: evaluate(&ValueTotal, dataset, &schema).unwrap_or(0.0),
        mean_turnover: evaluate(&MeanTurnover, dataset, &schema).flatten(),
        value_by_status: evaluate(&ValueByStatus, dataset, &schema),
        value_by_coverage: evaluate(&ValueByCoverage, dataset, &schema),
        top_by_value: evaluate(&TopByValue { n: TOP_N }, dataset, &schema),
        turnover_distribution: evaluate(&TurnoverDistribution { bins: TURNOVER_BINS }, dataset, &schema)
            .flatten(),
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Distinct non-null "Producto" values
pub struct ProductCount;

impl Aggregate for ProductCount {
    type Output = usize;

    const NAME: &'static str = "product_count";
    const REQUIRED: &'static [&'static str] = &[PRODUCT_COLUMN];

    fn compute(&self, dataset: &Dataset) -> usize {
        distinct_count(dataset, PRODUCT_COLUMN)
    }
}

pub struct StockTotal;

impl Aggregate for StockTotal {
    type Output = f64;

    const NAME: &'static str = "total_stock";
    const REQUIRED: &'static [&'static str] = &[STOCK_COLUMN];

    fn compute(&self, dataset: &Dataset) -> f64 {
        column_sum(dataset, STOCK_COLUMN)
    }
}

pub struct ValueTotal;

impl Aggregate for ValueTotal {
    type Output = f64;

    const NAME: &'static str = "total_value";
    const REQUIRED: &'static [&'static str] = &[VALUE_COLUMN];

    fn compute(&self, dataset: &Dataset) -> f64 {
        column_sum(dataset, VALUE_COLUMN)
    }
}

/// Mean turnover; `None` inside when the column holds no numbers
pub struct MeanTurnover;

impl Aggregate for MeanTurnover {
    type Output = Option<f64>;

    const NAME: &'static str = "mean_turnover";
    const REQUIRED: &'static [&'static str] = &[TURNOVER_COLUMN];

    fn compute(&self, dataset: &Dataset) -> Option<f64> {
        column_mean(dataset, TURNOVER_COLUMN)
    }
}

/// Value per "Estado", largest first
pub struct ValueByStatus;

impl Aggregate for ValueByStatus {
    type Output = Vec<GroupTotal>;

    const NAME: &'static str = "value_by_status";
    const REQUIRED: &'static [&'static str] = &[STATUS_COLUMN, VALUE_COLUMN];

    fn compute(&self, dataset: &Dataset) -> Vec<GroupTotal> {
        let mut groups = grouped_sum(dataset, STATUS_COLUMN, VALUE_COLUMN);
        groups.sort_by(|a, b| b.value.total_cmp(&a.value));
        groups
    }
}

/// Value per "Cobertura Inv" bucket, in bucket order
pub struct ValueByCoverage;

impl Aggregate for ValueByCoverage {
    type Output = Vec<GroupTotal>;

    const NAME: &'static str = "value_by_coverage";
    const REQUIRED: &'static [&'static str] = &[COVERAGE_COLUMN, VALUE_COLUMN];

    fn compute(&self, dataset: &Dataset) -> Vec<GroupTotal> {
        grouped_sum(dataset, COVERAGE_COLUMN, VALUE_COLUMN)
    }
}

/// The `n` most valuable rows, largest first, ties in source order
pub struct TopByValue {
    pub n: usize,
}

impl Aggregate for TopByValue {
    type Output = Dataset;

    const NAME: &'static str = "top_by_value";
    const REQUIRED: &'static [&'static str] = &[VALUE_COLUMN];

    fn compute(&self, dataset: &Dataset) -> Dataset {
        let mut ranked: Vec<(usize, f64)> = match dataset.column(VALUE_COLUMN) {
            Some(values) => values
                .enumerate()
                .filter_map(|(i, v)| v.as_f64().map(|f| (i, f)))
                .collect(),
            None => Vec::new(),
        };
        // Stable sort keeps the first occurrence ahead on ties
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let indices: Vec<usize> = ranked.into_iter().map(|(i, _)| i).collect();
        dataset
            .pick_rows(&indices)
            .take(self.n)
            .select(TOP_DISPLAY_COLUMNS)
    }
}

/// Turnover histogram; `None` inside when the column holds no numbers
pub struct TurnoverDistribution {
    pub bins: usize,
}

impl Aggregate for TurnoverDistribution {
    type Output = Option<Histogram>;

    const NAME: &'static str = "turnover_distribution";
    const REQUIRED: &'static [&'static str] = &[TURNOVER_COLUMN];

    fn compute(&self, dataset: &Dataset) -> Option<Histogram> {
        let values: Vec<f64> = dataset
            .column(TURNOVER_COLUMN)?
            .filter_map(|v| v.as_f64())
            .collect();
        Histogram::from_values(&values, self.bins)
    }
}

// =============================================================================
// Column helpers
// =============================================================================

/// Sum of the numeric cells of a column (0 if absent or empty)
pub fn column_sum(dataset: &Dataset, column: &str) -> f64 {
    dataset
        .column(column)
        .map(|values| values.filter_map(|v| v.as_f64()).sum())
        .unwrap_or(0.0)
}

/// Mean of the numeric cells of a column
pub fn column_mean(dataset: &Dataset, column: &str) -> Option<f64> {
    let values = dataset.column(column)?;
    let (sum, count) = values
        .filter_map(|v| v.as_f64())
        .fold((0.0, 0usize), |(s, c), f| (s + f, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Number of distinct non-null values of a column
pub fn distinct_count(dataset: &Dataset, column: &str) -> usize {
    dataset
        .column(column)
        .map(|values| values.filter_map(|v| v.group_key()).collect::<HashSet<_>>().len())
        .unwrap_or(0)
}

/// Sum of `value_column` per distinct `key_column`, keys ascending.
/// Rows with a null key are dropped; non-numeric values count as 0.
pub fn grouped_sum(dataset: &Dataset, key_column: &str, value_column: &str) -> Vec<GroupTotal> {
    let (Some(key_idx), Some(value_idx)) =
        (dataset.column_index(key_column), dataset.column_index(value_column))
    else {
        return Vec::new();
    };

    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for row in dataset.rows() {
        let Some(key) = row[key_idx].group_key() else {
            continue;
        };
        *totals.entry(key).or_insert(0.0) += row[value_idx].as_f64().unwrap_or(0.0);
    }

    totals
        .into_iter()
        .map(|(key, value)| GroupTotal { key, value })
        .collect()
}
