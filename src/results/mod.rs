//! Result reporting
//!
//! Aggregates live events into per-unit workbooks and rebuilds event streams
//! from previously written workbooks.

mod aggregate;
mod import;
mod records;
mod storage;
pub mod workbook;

pub use aggregate::ReportAggregator;
pub use import::{ImportedRun, ReportImporter};
pub use records::TestRecord;
pub use storage::{ReportStore, RunReports};

use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a whole workbook import
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Workbook {} has no metadata record", .0.display())]
    MissingMetadata(PathBuf),

    #[error("Invalid metadata record: {0}")]
    InvalidMetadata(String),

    #[error("Cannot read workbook {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },
}
