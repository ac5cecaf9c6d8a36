//! Report storage
//!
//! One workbook directory per (run, unit) plus a run-wide JSON event log.
//! Test sheets are overwritten on every write so incremental and final
//! flushes leave identical files behind.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::aggregate::ReportAggregator;
use super::records::{MetadataRecord, TestRecord};
use super::workbook::{
    file_safe, read_manifest, sanitize_sheet_name, write_manifest, write_sheet, Sheet,
    BOOLEAN_HEADERS, DETAILS_HEADERS, DETAILS_SHEET, IMAGE_HEADERS, MANIFEST_SHEET,
    MAX_SHEET_NAME, NUMBER_HEADERS, RAW_HEADERS, VECTOR_HEADERS,
};
use crate::models::{Event, ResultPayload, RunDetails};

/// Prefix of the cell written in place of image data that could not be read
pub const MISSING_IMAGE_PREFIX: &str = "missing image: ";

/// File name stamp of a run start time
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Report storage manager
#[derive(Clone, Debug)]
pub struct ReportStore {
    base_dir: PathBuf,
}

impl ReportStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))
    }

    /// `{script}_{serial}_{timestamp}_{operator}_unit{n}`
    pub fn workbook_name(
        script: &str,
        serial: &str,
        started: DateTime<Local>,
        operator: &str,
        unit: u32,
    ) -> String {
        format!(
            "{}_{}_{}_{}_unit{}",
            file_safe(script),
            file_safe(serial),
            started.format(FILE_STAMP_FORMAT),
            file_safe(operator),
            unit
        )
    }

    pub fn workbook_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn full_log_path(&self, script: &str, started: DateTime<Local>) -> PathBuf {
        self.base_dir.join(format!(
            "{}_{}_full_log.json",
            file_safe(script),
            started.format(FILE_STAMP_FORMAT)
        ))
    }

    /// Persist every event of a run, barrier events included
    pub fn write_full_log(
        &self,
        script: &str,
        started: DateTime<Local>,
        events: &[Event],
    ) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.full_log_path(script, started);
        let file = File::create(&path).context("Failed to create full log")?;
        serde_json::to_writer_pretty(BufWriter::new(file), events)
            .context("Failed to write full log")?;

        info!("Saved {} events to {}", events.len(), path.display());
        Ok(path)
    }

    pub fn load_full_log(&self, path: &Path) -> Result<Vec<Event>> {
        let file = File::open(path).context("Failed to open full log")?;
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse full log")
    }

    /// Workbook directories under the base directory, newest name last
    pub fn list_workbooks(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut workbooks = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.join(format!("{DETAILS_SHEET}.csv")).exists() {
                workbooks.push(path);
            }
        }

        workbooks.sort();
        Ok(workbooks)
    }
}

/// Writes the sheets of one unit's workbook
///
/// Sheet names and manifest order are fixed when a test is first reserved,
/// so writing records one at a time or all at once yields the same files.
#[derive(Debug)]
pub struct WorkbookWriter {
    dir: PathBuf,
    /// `(sheet, test name)` of every known test, in test order
    sheets: Vec<(String, String)>,
    /// Tests whose sheet is on disk
    written: BTreeSet<String>,
}

impl WorkbookWriter {
    /// Open or create a workbook directory, keeping any existing manifest
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workbook {}", dir.display()))?;
        let sheets = read_manifest(&dir)?;
        let written = sheets.iter().map(|(_, test)| test.clone()).collect();
        Ok(Self {
            dir,
            sheets,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write_metadata(&self, meta: &MetadataRecord) -> Result<()> {
        let mut sheet = Sheet::new(DETAILS_SHEET, "", &DETAILS_HEADERS);
        sheet.push_row([
            meta.script_name.clone(),
            meta.serial.clone(),
            meta.operator.clone(),
            meta.timestamp.clone(),
            meta.comment.clone(),
            meta.unit_index.to_string(),
        ]);
        write_sheet(&self.dir, &sheet)?;
        Ok(())
    }

    /// Assign sheet names to tests not seen before, in the given order
    pub fn reserve<S: AsRef<str>>(&mut self, tests: &[S]) {
        for test in tests {
            let test = test.as_ref();
            if self.sheet_of(test).is_none() {
                let name = self.free_sheet_name(test);
                self.sheets.push((name, test.to_string()));
            }
        }
    }

    /// Overwrite the sheet of one test
    pub fn write_record(&mut self, record: &TestRecord) -> Result<PathBuf> {
        let test_name = record.test_name();
        self.reserve(&[test_name]);
        let name = self
            .sheet_of(test_name)
            .context("Sheet name missing after reservation")?
            .to_string();

        let sheet = render_record(&name, record);
        let path = write_sheet(&self.dir, &sheet)?;

        if self.written.insert(test_name.to_string()) {
            write_manifest(&self.dir, &self.manifest())?;
        }

        debug!("Wrote sheet {} for {}", name, test_name);
        Ok(path)
    }

    /// `(sheet, test name)` of the sheets on disk, in test order
    pub fn manifest(&self) -> Vec<(String, String)> {
        self.sheets
            .iter()
            .filter(|(_, test)| self.written.contains(test))
            .cloned()
            .collect()
    }

    fn sheet_of(&self, test_name: &str) -> Option<&str> {
        self.sheets
            .iter()
            .find(|(_, test)| test == test_name)
            .map(|(sheet, _)| sheet.as_str())
    }

    /// Sanitised name; truncation collisions get a numeric suffix
    fn free_sheet_name(&self, test_name: &str) -> String {
        let base = sanitize_sheet_name(test_name);
        let taken = |name: &str| {
            name.eq_ignore_ascii_case(DETAILS_SHEET)
                || name.eq_ignore_ascii_case(MANIFEST_SHEET)
                || self
                    .sheets
                    .iter()
                    .any(|(sheet, _)| sheet.eq_ignore_ascii_case(name))
        };
        if !taken(&base) {
            return base;
        }

        let mut n = 1;
        loop {
            let suffix = format!("_{n}");
            let stem: String = base.chars().take(MAX_SHEET_NAME - suffix.len()).collect();
            let candidate = format!("{stem}{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Writers for every unit of one run
pub struct RunReports {
    store: ReportStore,
    script: String,
    details: RunDetails,
    started: DateTime<Local>,
    writers: BTreeMap<u32, WorkbookWriter>,
}

impl RunReports {
    pub fn new(
        store: ReportStore,
        script: impl Into<String>,
        details: RunDetails,
        started: DateTime<Local>,
    ) -> Self {
        Self {
            store,
            script: script.into(),
            details,
            started,
            writers: BTreeMap::new(),
        }
    }

    /// Write one record, creating the unit's workbook on first use
    pub fn write(&mut self, unit: u32, record: &TestRecord) -> Result<PathBuf> {
        self.writer(unit)?.write_record(record)
    }

    /// Write the record of one (unit, test) held by the aggregator
    pub fn flush(
        &mut self,
        aggregator: &ReportAggregator,
        unit: u32,
        test: &str,
    ) -> Result<Option<PathBuf>> {
        let Some(record) = aggregator.build(unit, test) else {
            return Ok(None);
        };
        self.writer(unit)?.reserve(&aggregator.tests(unit));
        self.write(unit, &record).map(Some)
    }

    /// Rewrite every record the aggregator holds
    pub fn write_all(&mut self, aggregator: &ReportAggregator) -> Result<()> {
        for unit in aggregator.units() {
            let writer = self.writer(unit)?;
            writer.reserve(&aggregator.tests(unit));
            for record in aggregator.records(unit) {
                writer.write_record(&record)?;
            }
        }
        Ok(())
    }

    pub fn workbooks(&self) -> Vec<PathBuf> {
        self.writers
            .values()
            .map(|w| w.path().to_path_buf())
            .collect()
    }

    fn writer(&mut self, unit: u32) -> Result<&mut WorkbookWriter> {
        if !self.writers.contains_key(&unit) {
            let serial = self.details.serial_for(unit);
            let name = ReportStore::workbook_name(
                &self.script,
                &serial,
                self.started,
                &self.details.operator_name,
                unit,
            );
            let writer = WorkbookWriter::create(self.store.workbook_path(&name))?;
            writer.write_metadata(&MetadataRecord::new(
                self.script.clone(),
                unit,
                serial,
                self.details.operator_name.clone(),
                self.details.comment_for(unit),
                self.started,
            ))?;
            info!("Created workbook {}", writer.path().display());
            self.writers.insert(unit, writer);
        }

        self.writers
            .get_mut(&unit)
            .context("Workbook writer missing after creation")
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn render_record(name: &str, record: &TestRecord) -> Sheet {
    match record {
        TestRecord::Boolean {
            test_name,
            result,
            pass,
        } => {
            let mut sheet = Sheet::new(name, test_name.as_str(), &BOOLEAN_HEADERS);
            sheet.push_row([
                test_name.clone(),
                "boolean".to_string(),
                opt(result),
                pass.to_string(),
            ]);
            sheet
        }
        TestRecord::Number {
            test_name,
            result_unit,
            expected_range,
            result,
            pass,
        } => {
            let mut sheet = Sheet::new(name, test_name.as_str(), &NUMBER_HEADERS);
            sheet.push_row([
                test_name.clone(),
                "number".to_string(),
                opt(result_unit),
                opt(expected_range),
                opt(result),
                pass.to_string(),
            ]);
            sheet
        }
        TestRecord::Vector {
            test_name,
            result_unit,
            expected_range,
            pass,
            points,
        } => {
            let mut sheet = Sheet::new(name, test_name.as_str(), &VECTOR_HEADERS);
            let head = [
                test_name.clone(),
                "vector".to_string(),
                opt(result_unit),
                opt(expected_range),
                pass.to_string(),
            ];
            if points.is_empty() {
                sheet.push_row(head.iter().cloned().chain([String::new(), String::new()]));
            }
            for (i, [x, y]) in points.iter().enumerate() {
                let lead = if i == 0 {
                    head.to_vec()
                } else {
                    vec![String::new(); head.len()]
                };
                sheet.push_row(lead.into_iter().chain([x.to_string(), y.to_string()]));
            }
            sheet
        }
        TestRecord::Image {
            test_name,
            pass,
            reference,
        } => {
            let mut sheet = Sheet::new(name, test_name.as_str(), &IMAGE_HEADERS);
            sheet.push_row([
                test_name.clone(),
                "image".to_string(),
                pass.to_string(),
                opt(reference),
                embed_image(test_name, reference.as_deref()),
            ]);
            sheet
        }
        TestRecord::Raw { test_name, events } => {
            let mut sheet = Sheet::new(name, test_name.as_str(), &RAW_HEADERS);
            for event in events {
                let (expected, unit) = match &event.payload {
                    ResultPayload::Boolean { expected, .. } => (opt(expected), String::new()),
                    ResultPayload::Number {
                        expected_range,
                        result_unit,
                        ..
                    } => (opt(expected_range), opt(result_unit)),
                    ResultPayload::Vector {
                        expected_range,
                        result_unit,
                        ..
                    } => (opt(expected_range), opt(result_unit)),
                    ResultPayload::Image { .. } => (String::new(), String::new()),
                };
                sheet.push_row([
                    event.message_type.to_string(),
                    event.test_name.clone(),
                    opt(&event.unit_index),
                    event.result_type().to_string(),
                    expected,
                    unit,
                    event.payload.result_text(),
                    event.pass.to_string(),
                ]);
            }
            sheet
        }
    }
}

/// Base64 of a local image; remote references are left to the reader
fn embed_image(test_name: &str, reference: Option<&str>) -> String {
    let Some(reference) = reference.filter(|r| !r.is_empty()) else {
        return String::new();
    };
    if is_remote(reference) {
        return String::new();
    }

    match fs::read(reference) {
        Ok(bytes) => general_purpose::STANDARD.encode(bytes),
        Err(e) => {
            warn!("Image for {} not readable at {}: {}", test_name, reference, e);
            format!("{MISSING_IMAGE_PREFIX}{reference}")
        }
    }
}

pub fn is_remote(reference: &str) -> bool {
    let lower = reference.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisLabels, Bounds, PassState};
    use crate::results::workbook::Workbook;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn number(result: f64) -> TestRecord {
        TestRecord::Number {
            test_name: "Temp_25/Input_Voltage".to_string(),
            result_unit: Some("Volt".to_string()),
            expected_range: Some(Bounds::new(4.8, 5.2)),
            result: Some(result),
            pass: PassState::Pass,
        }
    }

    #[test]
    fn test_workbook_name() {
        let name = ReportStore::workbook_name("thermal_cycle", "SN 01", started(), "alice", 3);
        assert_eq!(name, "thermal_cycle_SN_01_20240305_140709_alice_unit3");
    }

    #[test]
    fn test_rewrite_is_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path());
        let mut reports = RunReports::new(
            store,
            "thermal_cycle",
            RunDetails::new("alice").with_serial(1, "SN-1"),
            started(),
        );

        reports.write(1, &number(4.9)).unwrap();
        reports.write(1, &number(5.1)).unwrap();

        let workbooks = reports.workbooks();
        assert_eq!(workbooks.len(), 1);
        let workbook = Workbook::load(&workbooks[0]).unwrap();
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].rows.len(), 1);
        assert_eq!(workbook.sheets[0].cell(0, "result value"), Some("5.1"));
        assert_eq!(workbook.sheets[0].test_name, "Temp_25/Input_Voltage");

        let details = workbook.details.unwrap();
        assert_eq!(details.cell(0, "Device Serial No."), Some("SN-1"));
        assert_eq!(details.cell(0, "Date/Time"), Some("2024-03-05 14:07:09.000000"));
    }

    #[test]
    fn test_missing_serial_uses_placeholder() {
        let dir = TempDir::new().unwrap();
        let mut reports = RunReports::new(
            ReportStore::new(dir.path()),
            "thermal_cycle",
            RunDetails::new("bob"),
            started(),
        );
        let path = reports.write(2, &number(5.0)).unwrap();
        assert!(path
            .parent()
            .unwrap()
            .ends_with("thermal_cycle_unknown_20240305_140709_bob_unit2"));
    }

    #[test]
    fn test_vector_metadata_on_first_row_only() {
        let record = TestRecord::Vector {
            test_name: "Temp_25/Output_Power_By_Freq".to_string(),
            result_unit: Some(AxisLabels::new("Time", "Volt")),
            expected_range: Some(Bounds::new(10.0, 30.0)),
            pass: PassState::Pass,
            points: vec![[0.0, 20.0], [1.0, 21.0]],
        };
        let sheet = render_record("Output", &record);

        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.cell(0, "result unit"), Some(r#""Time", "Volt""#));
        assert_eq!(sheet.cell(0, "expected range"), Some("(10, 30)"));
        assert_eq!(sheet.cell(1, "test name"), Some(""));
        assert_eq!(sheet.cell(1, "pass"), Some(""));
        assert_eq!(sheet.cell(1, "x"), Some("1"));
        assert_eq!(sheet.cell(1, "y"), Some("21"));
    }

    #[test]
    fn test_sheet_name_collision_suffixed() {
        let dir = TempDir::new().unwrap();
        let mut writer = WorkbookWriter::create(dir.path().join("wb")).unwrap();
        let long_a = "Temp_25/Output_Power_By_Frequency_A";
        let long_b = "Temp_25/Output_Power_By_Frequency_B";

        for test in [long_a, long_b, long_a] {
            writer
                .write_record(&TestRecord::Boolean {
                    test_name: test.to_string(),
                    result: Some(true),
                    pass: PassState::Pass,
                })
                .unwrap();
        }

        let manifest = read_manifest(writer.path()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_ne!(manifest[0].0, manifest[1].0);
        assert!(manifest[1].0.ends_with("_1"));
        assert_eq!(manifest[1].1, long_b);
    }

    fn boolean_event(message_type: crate::models::MessageType, test: &str) -> Event {
        Event::new(
            message_type,
            test,
            Some(1),
            ResultPayload::Boolean {
                expected: Some(true),
                result: Some(true),
            },
            PassState::Pass,
        )
    }

    fn reports_in(dir: &Path) -> RunReports {
        RunReports::new(
            ReportStore::new(dir),
            "thermal_cycle",
            RunDetails::new("alice").with_serial(1, "SN-1"),
            started(),
        )
    }

    #[test]
    fn test_incremental_flush_matches_batch_write() {
        use crate::models::MessageType;

        let unfinished = "Temp_25/Output_Power_By_Frequency_A";
        let finished = "Temp_25/Output_Power_By_Frequency_B";
        let events = [
            boolean_event(MessageType::NewTest, unfinished),
            boolean_event(MessageType::NewTest, finished),
            boolean_event(MessageType::TestEnd, finished),
        ];

        let live_dir = TempDir::new().unwrap();
        let mut live = reports_in(live_dir.path());
        let mut aggregator = ReportAggregator::new();
        for event in events.iter().cloned() {
            if let Some((unit, test)) = aggregator.record(event) {
                live.flush(&aggregator, unit, &test).unwrap();
            }
        }
        live.write_all(&aggregator).unwrap();

        let batch_dir = TempDir::new().unwrap();
        let mut batch = reports_in(batch_dir.path());
        batch
            .write_all(&ReportAggregator::from_events(events))
            .unwrap();

        let live_manifest = read_manifest(&live.workbooks()[0]).unwrap();
        let batch_manifest = read_manifest(&batch.workbooks()[0]).unwrap();
        assert_eq!(live_manifest, batch_manifest);
        assert_eq!(live_manifest[0].1, unfinished);
        assert_eq!(live_manifest[1].1, finished);
        assert!(live_manifest[1].0.ends_with("_1"));

        let live_sheets = Workbook::load(&live.workbooks()[0]).unwrap().sheets;
        let batch_sheets = Workbook::load(&batch.workbooks()[0]).unwrap().sheets;
        assert_eq!(live_sheets, batch_sheets);
    }

    #[test]
    fn test_reserved_sheet_names_not_reused() {
        let dir = TempDir::new().unwrap();
        let mut writer = WorkbookWriter::create(dir.path().join("wb")).unwrap();

        for test in ["_sheets", "Details", "Temp_25/Input_Voltage"] {
            writer
                .write_record(&TestRecord::Boolean {
                    test_name: test.to_string(),
                    result: Some(true),
                    pass: PassState::Pass,
                })
                .unwrap();
        }

        let manifest = read_manifest(writer.path()).unwrap();
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest[0], ("_sheets_1".to_string(), "_sheets".to_string()));
        assert_eq!(manifest[1], ("Details_1".to_string(), "Details".to_string()));

        let workbook = Workbook::load(writer.path()).unwrap();
        assert_eq!(workbook.sheets.len(), 3);
        assert_eq!(workbook.sheets[0].test_name, "_sheets");
        assert!(workbook.details.is_none());
    }

    #[test]
    fn test_missing_image_leaves_diagnostic() {
        let record = TestRecord::Image {
            test_name: "Screen_Capture".to_string(),
            pass: PassState::Pass,
            reference: Some("/nonexistent/capture.png".to_string()),
        };
        let sheet = render_record("Screen_Capture", &record);
        assert_eq!(
            sheet.cell(0, "image data"),
            Some("missing image: /nonexistent/capture.png")
        );
    }

    #[test]
    fn test_local_image_embedded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.png");
        fs::write(&path, b"\x89PNG").unwrap();

        let encoded = embed_image("Screen_Capture", path.to_str());
        assert_eq!(general_purpose::STANDARD.decode(encoded).unwrap(), b"\x89PNG");
        assert_eq!(embed_image("Screen_Capture", Some("https://cdn/x.png")), "");
    }

    #[test]
    fn test_full_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path());
        let event = Event::new(
            crate::models::MessageType::TestEnd,
            "Temp_25",
            None,
            ResultPayload::Boolean {
                expected: Some(true),
                result: Some(true),
            },
            PassState::Pass,
        );

        let path = store
            .write_full_log("thermal_cycle", started(), std::slice::from_ref(&event))
            .unwrap();
        assert_eq!(store.load_full_log(&path).unwrap(), vec![event]);
        assert!(store.list_workbooks().unwrap().is_empty());
    }
}
