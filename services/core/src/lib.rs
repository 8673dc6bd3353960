//! Informe Core - Inventory report ingestion, aggregation and history
//!
//! Responsibilities:
//! - Load the "informe" sheet from an uploaded workbook (XLSX, XLS, XLSB, ODS)
//! - Convert legacy binary workbooks through an external converter
//! - Filter rows to one business unit (gerencia)
//! - Compute summary statistics and grouped aggregates
//! - Export the filtered table as CSV
//! - Persist snapshots to an append-only history directory
//!
//! Column presence is never guaranteed: every aggregate declares the columns
//! it needs and is skipped when they are missing.

pub mod aggregate;
pub mod config;
pub mod convert;
pub mod dataset;
pub mod export;
pub mod filter;
pub mod format;
pub mod history;
pub mod loader;
pub mod pipeline;

pub use aggregate::{summarize, GroupTotal, Summary};
pub use config::{Config, ConfigError};
pub use convert::{ConversionError, Converter, ExternalConverter};
pub use dataset::{Dataset, Schema, Value};
pub use export::to_csv;
pub use filter::{explore, filter_business_unit, ExploreFilter};
pub use history::{HistoryEntry, HistoryError, HistoryLog, Period};
pub use loader::{load, LegacyPolicy, LoadError, LoaderOptions, SpreadsheetFormat, StagedUpload};
pub use pipeline::{analyze_dataset, EmptyResult, Pipeline, PipelineOptions, Report};
