//! In-memory tabular model shared by every stage of the pipeline.
//!
//! A `Dataset` is an ordered list of trimmed column names plus ordered rows of
//! `Value`s aligned with those columns. Row order from the source workbook is
//! preserved by every derivation in this module.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Numeric view of the cell. Text is accepted when it parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical key used for distinct counts and grouping.
    /// Nulls have no key, so they never form a group.
    pub fn group_key(&self) -> Option<String> {
        match self {
            Value::Empty => None,
            Value::Float(f) if f.is_nan() => None,
            other => Some(other.to_string()),
        }
    }

    /// Rendering used by the CSV export (floats keep their decimal point).
    pub fn csv_field(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_nan() => String::new(),
            Value::Float(f) => format!("{:?}", f),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// JSON shape: null, bool, number or string
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Empty => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Empty)
    }
}

/// Set of column names available in a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: BTreeSet<String>,
}

impl Schema {
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// True when every required column is available
    pub fn satisfies(&self, required: &[&str]) -> bool {
        required.iter().all(|c| self.contains(c))
    }

    /// Required columns that are not available
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required.iter().copied().filter(|c| !self.contains(c)).collect()
    }
}

/// Trim a header cell. Idempotent.
pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_string()
}

/// Ordered table of rows sharing one column set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Build a dataset from raw headers and rows.
    ///
    /// Headers are trimmed; blank headers become `Unnamed: <index>` and
    /// repeated names get a `.<n>` suffix. Rows are padded with `Empty` or
    /// truncated to the header width.
    pub fn new<S: AsRef<str>>(headers: &[S], rows: Vec<Vec<Value>>) -> Self {
        let columns = dedupe_headers(headers.iter().map(|h| h.as_ref()));
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Empty);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn schema(&self) -> Schema {
        Schema {
            columns: self.columns.iter().cloned().collect(),
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Values of one column in row order, or `None` if the column is absent
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep rows matching `predicate`, preserving order
    pub fn retain_rows<F>(&self, mut predicate: F) -> Dataset
    where
        F: FnMut(&[Value]) -> bool,
    {
        Dataset {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row.as_slice()))
                .cloned()
                .collect(),
        }
    }

    /// Rows at the given indices, in the given order
    pub fn pick_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// First `n` rows
    pub fn take(&self, n: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Project onto the listed columns that are present, in the listed order
    pub fn select(&self, names: &[&str]) -> Dataset {
        let indices: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        Dataset {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }
}

fn dedupe_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut columns = Vec::new();

    for (idx, header) in raw.enumerate() {
        let mut name = normalize_header(header);
        if name.is_empty() {
            name = format!("Unnamed: {}", idx);
        }
        let count = seen.entry(name.clone()).or_insert(0);
        if *count > 0 {
            name = format!("{}.{}", name, count);
        }
        *count += 1;
        columns.push(name);
    }

    columns
}
