//! Workbook layout on disk
//!
//! A workbook is a directory holding one CSV file per sheet: `Details.csv`
//! with the unit metadata, one sheet per test, and `_sheets.csv` mapping
//! sheet names back to full test paths in test order.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ImportError;

pub const DETAILS_SHEET: &str = "Details";
pub const MANIFEST_SHEET: &str = "_sheets";
pub const MANIFEST_FILE: &str = "_sheets.csv";
pub const MANIFEST_HEADERS: [&str; 2] = ["sheet", "test name"];

/// Longest sheet name a spreadsheet accepts
pub const MAX_SHEET_NAME: usize = 31;

pub const DETAILS_HEADERS: [&str; 6] = [
    "Script Name",
    "Device Serial No.",
    "Operator Name",
    "Date/Time",
    "Additional Comments",
    "Unit Index",
];
pub const BOOLEAN_HEADERS: [&str; 4] = ["test name", "result type", "result", "pass"];
pub const NUMBER_HEADERS: [&str; 6] = [
    "test name",
    "result type",
    "result unit",
    "expected range",
    "result value",
    "pass",
];
pub const VECTOR_HEADERS: [&str; 7] = [
    "test name",
    "result type",
    "result unit",
    "expected range",
    "pass",
    "x",
    "y",
];
pub const IMAGE_HEADERS: [&str; 5] = ["test name", "result type", "pass", "image", "image data"];
pub const RAW_HEADERS: [&str; 8] = [
    "message type",
    "test name",
    "unit index",
    "result type",
    "expected range",
    "result unit",
    "result",
    "pass",
];

/// One table of a workbook
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    /// Full test path, empty for the details sheet
    pub test_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, test_name: impl Into<String>, headers: &[&str]) -> Self {
        Self {
            name: name.into(),
            test_name: test_name.into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(header))
    }

    /// Cell by row and header name; missing cells read as `None`
    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.column_index(header)?;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|c| c.as_str())
    }

    /// First non-empty cell of a column
    pub fn first_value(&self, header: &str) -> Option<&str> {
        (0..self.rows.len())
            .filter_map(|row| self.cell(row, header))
            .map(str::trim)
            .find(|c| !c.is_empty())
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name)
    }
}

/// Sheets of one unit's workbook, as read back from disk
#[derive(Clone, Debug, Default)]
pub struct Workbook {
    pub path: PathBuf,
    pub details: Option<Sheet>,
    /// Test sheets in manifest order
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn load(dir: &Path) -> Result<Self, ImportError> {
        let unreadable = |e: anyhow::Error| ImportError::Unreadable {
            path: dir.to_path_buf(),
            message: format!("{e:#}"),
        };

        if !dir.is_dir() {
            return Err(ImportError::Unreadable {
                path: dir.to_path_buf(),
                message: "not a workbook directory".to_string(),
            });
        }

        let details_path = dir.join(format!("{DETAILS_SHEET}.csv"));
        let details = if details_path.exists() {
            Some(read_sheet(&details_path, DETAILS_SHEET, "").map_err(unreadable)?)
        } else {
            None
        };

        let manifest = read_manifest(dir).map_err(unreadable)?;
        let mut sheets = Vec::new();
        for (name, test_name) in manifest {
            let path = dir.join(format!("{name}.csv"));
            if !path.exists() {
                debug!("Manifest lists missing sheet {}", path.display());
                continue;
            }
            sheets.push(read_sheet(&path, &name, &test_name).map_err(unreadable)?);
        }

        Ok(Self {
            path: dir.to_path_buf(),
            details,
            sheets,
        })
    }
}

/// Replace characters spreadsheets reject and cut to 31 characters
pub fn sanitize_sheet_name(test_name: &str) -> String {
    test_name
        .chars()
        .take(MAX_SHEET_NAME)
        .map(|c| match c {
            '[' | ']' | ':' | '?' | '*' | '\\' | '/' => '_',
            other => other,
        })
        .collect()
}

/// Make a string usable as a file name component
pub fn file_safe(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn write_sheet(dir: &Path, sheet: &Sheet) -> Result<PathBuf> {
    let path = dir.join(sheet.file_name());
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&path)
        .with_context(|| format!("Failed to create sheet {}", path.display()))?;

    writer.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    Ok(path)
}

pub fn read_sheet(path: &Path, name: &str, test_name: &str) -> Result<Sheet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open sheet {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read sheet headers")?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Sheet {
        name: name.to_string(),
        test_name: test_name.to_string(),
        headers,
        rows,
    })
}

pub fn write_manifest(dir: &Path, entries: &[(String, String)]) -> Result<()> {
    let path = dir.join(MANIFEST_FILE);
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create manifest {}", path.display()))?;
    writer.write_record(MANIFEST_HEADERS)?;
    for (sheet, test) in entries {
        writer.write_record([sheet, test])?;
    }
    writer.flush()?;
    Ok(())
}

/// `(sheet, test name)` pairs; without a manifest every non-details CSV
/// is listed by name
pub fn read_manifest(dir: &Path) -> Result<Vec<(String, String)>> {
    let path = dir.join(MANIFEST_FILE);
    if path.exists() {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open manifest {}", path.display()))?;
        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.context("Malformed manifest row")?;
            let sheet = record.get(0).unwrap_or_default().to_string();
            if sheet.is_empty() {
                continue;
            }
            let test = record
                .get(1)
                .filter(|t| !t.is_empty())
                .unwrap_or(sheet.as_str())
                .to_string();
            entries.push((sheet, test));
        }
        return Ok(entries);
    }

    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .filter(|name| name != DETAILS_SHEET && !name.starts_with('_'))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|n| (n.clone(), n)).collect())
}
