//! Report import
//!
//! Rebuilds an event stream from one unit's persisted workbook. Tests that
//! cannot be decoded are skipped and reported as diagnostics; only a missing
//! or malformed metadata record fails the whole import.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::records::MetadataRecord;
use super::storage::{is_remote, MISSING_IMAGE_PREFIX};
use super::workbook::{file_safe, Sheet, Workbook};
use super::ImportError;
use crate::models::{
    AxisLabels, Bounds, Event, MessageType, PassState, ResultPayload, ResultType, UNKNOWN_SERIAL,
};

/// Events and diagnostics reconstructed from one workbook
#[derive(Clone, Debug, Serialize)]
pub struct ImportedRun {
    pub workbook: PathBuf,
    pub metadata: MetadataRecord,
    pub events: Vec<Event>,
    /// Skipped tests and substituted values, human readable
    pub diagnostics: Vec<String>,
}

/// Reconstructs events from persisted report records
#[derive(Clone, Debug)]
pub struct ReportImporter {
    images_dir: PathBuf,
}

/// Per-import state shared by the sheet decoders
struct ImportContext<'a> {
    metadata: &'a MetadataRecord,
    images_dir: &'a Path,
    image_seq: usize,
    diagnostics: Vec<String>,
}

impl ImportContext<'_> {
    fn note(&mut self, message: String) {
        warn!("{}", message);
        self.diagnostics.push(message);
    }

    fn event(
        &self,
        message_type: MessageType,
        test_name: &str,
        payload: ResultPayload,
        pass: PassState,
    ) -> Event {
        Event::new(
            message_type,
            test_name,
            Some(self.metadata.unit_index),
            payload,
            pass,
        )
    }
}

impl ReportImporter {
    /// Image artifacts are materialised under `images_dir`
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
        }
    }

    pub fn import_dir(&self, dir: &Path) -> Result<ImportedRun, ImportError> {
        let workbook = Workbook::load(dir)?;
        self.import(&workbook)
    }

    pub fn import(&self, workbook: &Workbook) -> Result<ImportedRun, ImportError> {
        let metadata = parse_metadata(workbook)?;
        info!(
            "Importing {} sheets for {} unit {}",
            workbook.sheets.len(),
            metadata.script_name,
            metadata.unit_index
        );

        let mut ctx = ImportContext {
            metadata: &metadata,
            images_dir: &self.images_dir,
            image_seq: 0,
            diagnostics: Vec::new(),
        };
        let mut events = Vec::new();

        for sheet in &workbook.sheets {
            let test_name = sheet
                .first_value("test name")
                .or(Some(sheet.test_name.as_str()).filter(|t| !t.is_empty()))
                .unwrap_or(sheet.name.as_str())
                .to_string();

            let result_type = sheet.first_value("result type").and_then(ResultType::parse);
            let decoded = match result_type {
                _ if sheet.column_index("message type").is_some() => {
                    ctx.note(format!("{test_name}: raw event sheet skipped"));
                    continue;
                }
                Some(ResultType::Boolean) => import_boolean(&mut ctx, &test_name, sheet),
                Some(ResultType::Number) => import_number(&mut ctx, &test_name, sheet),
                Some(ResultType::Vector) => import_vector(&mut ctx, &test_name, sheet),
                Some(ResultType::Image) => import_image(&mut ctx, &test_name, sheet),
                None => {
                    ctx.note(format!("{test_name}: unknown result type, skipped"));
                    continue;
                }
            };

            match decoded {
                Some(test_events) => {
                    debug!("{} reconstructed as {} events", test_name, test_events.len());
                    events.extend(test_events);
                }
                None => debug!("{} skipped", test_name),
            }
        }

        let diagnostics = ctx.diagnostics;
        Ok(ImportedRun {
            workbook: workbook.path.clone(),
            metadata,
            events,
            diagnostics,
        })
    }
}

fn parse_metadata(workbook: &Workbook) -> Result<MetadataRecord, ImportError> {
    let details = workbook
        .details
        .as_ref()
        .filter(|d| !d.rows.is_empty())
        .ok_or_else(|| ImportError::MissingMetadata(workbook.path.clone()))?;

    let field = |header: &str| details.cell(0, header).unwrap_or_default().trim().to_string();

    let unit_cell = field("Unit Index");
    let unit_index = unit_cell.parse::<u32>().map_err(|_| {
        ImportError::InvalidMetadata(format!("unit index '{unit_cell}' is not a unit number"))
    })?;

    let script_name = field("Script Name");
    if script_name.is_empty() {
        return Err(ImportError::InvalidMetadata(
            "script name is empty".to_string(),
        ));
    }

    let serial = Some(field("Device Serial No."))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERIAL.to_string());

    Ok(MetadataRecord {
        script_name,
        serial,
        operator: field("Operator Name"),
        timestamp: field("Date/Time"),
        comment: field("Additional Comments"),
        unit_index,
    })
}

fn parse_pass(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<PassState> {
    let cell = sheet.first_value("pass").unwrap_or_default();
    let pass = PassState::parse(cell);
    if pass.is_none() {
        ctx.note(format!("{test_name}: unreadable pass verdict '{cell}', skipped"));
    }
    pass
}

fn parse_range(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<Bounds> {
    let cell = sheet.first_value("expected range")?;
    let range = Bounds::parse(cell);
    if range.is_none() {
        ctx.note(format!("{test_name}: malformed expected range '{cell}' dropped"));
    }
    range
}

fn import_boolean(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<Vec<Event>> {
    let pass = parse_pass(ctx, test_name, sheet)?;
    let cell = sheet.cell(0, "result").unwrap_or_default().trim();
    let result = match cell.to_lowercase().as_str() {
        "" => None,
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        other => {
            ctx.note(format!("{test_name}: non-boolean result '{other}' dropped"));
            None
        }
    };

    Some(vec![ctx.event(
        MessageType::TestEnd,
        test_name,
        ResultPayload::Boolean {
            expected: None,
            result,
        },
        pass,
    )])
}

fn import_number(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<Vec<Event>> {
    let pass = parse_pass(ctx, test_name, sheet)?;

    let cell = sheet.cell(0, "result value").unwrap_or_default().trim();
    let result = if cell.is_empty() {
        None
    } else {
        match cell.parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                ctx.note(format!("{test_name}: result '{cell}' is not a number, skipped"));
                return None;
            }
        }
    };

    let expected_range = parse_range(ctx, test_name, sheet);
    let result_unit = sheet.first_value("result unit").map(str::to_string);

    Some(vec![ctx.event(
        MessageType::TestEnd,
        test_name,
        ResultPayload::Number {
            expected_range,
            result_unit,
            result,
        },
        pass,
    )])
}

fn import_vector(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<Vec<Event>> {
    let pass = parse_pass(ctx, test_name, sheet)?;

    let mut points = Vec::new();
    for row in 0..sheet.rows.len() {
        let x = sheet.cell(row, "x").unwrap_or_default().trim();
        let y = sheet.cell(row, "y").unwrap_or_default().trim();
        if x.is_empty() && y.is_empty() {
            continue;
        }
        match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(x), Ok(y)) => points.push([x, y]),
            _ => {
                ctx.note(format!(
                    "{test_name}: malformed coordinate ({x}, {y}) on row {}, skipped",
                    row + 1
                ));
                return None;
            }
        }
    }

    let mut expected_range = parse_range(ctx, test_name, sheet);
    let mut result_unit = sheet.first_value("result unit").and_then(AxisLabels::parse);

    let mut events: Vec<Event> = points
        .into_iter()
        .map(|point| {
            ctx.event(
                MessageType::Update,
                test_name,
                ResultPayload::Vector {
                    expected_range: expected_range.take(),
                    result_unit: result_unit.take(),
                    result: Some(point),
                },
                PassState::InProgress,
            )
        })
        .collect();

    events.push(ctx.event(
        MessageType::TestEnd,
        test_name,
        ResultPayload::Vector {
            expected_range,
            result_unit,
            result: None,
        },
        pass,
    ));
    Some(events)
}

fn import_image(ctx: &mut ImportContext<'_>, test_name: &str, sheet: &Sheet) -> Option<Vec<Event>> {
    let pass = parse_pass(ctx, test_name, sheet)?;
    let reference = sheet.first_value("image").unwrap_or_default().to_string();
    let data = sheet.first_value("image data").unwrap_or_default();

    let result = if data.is_empty() || data.starts_with(MISSING_IMAGE_PREFIX) {
        if is_remote(&reference) {
            Some(reference)
        } else {
            ctx.note(format!("{test_name}: image data missing, reference dropped"));
            None
        }
    } else {
        let bytes = match general_purpose::STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                ctx.note(format!("{test_name}: image data is not base64 ({e}), skipped"));
                return None;
            }
        };
        materialize_image(ctx, test_name, &reference, &bytes)
    };

    Some(vec![ctx.event(
        MessageType::TestEnd,
        test_name,
        ResultPayload::Image { result },
        pass,
    )])
}

/// `{script}_{test}_{serial}_{timestamp}_{seq}.{ext}` under the images directory
fn materialize_image(
    ctx: &mut ImportContext<'_>,
    test_name: &str,
    reference: &str,
    bytes: &[u8],
) -> Option<String> {
    let ext = Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && !is_remote(reference))
        .unwrap_or("png");
    let name = format!(
        "{}_{}_{}_{}_{}.{}",
        file_safe(&ctx.metadata.script_name),
        file_safe(test_name),
        file_safe(&ctx.metadata.serial),
        file_safe(&ctx.metadata.timestamp),
        ctx.image_seq,
        ext
    );
    ctx.image_seq += 1;

    let path = ctx.images_dir.join(name);
    let written = fs::create_dir_all(ctx.images_dir).and_then(|_| fs::write(&path, bytes));
    match written {
        Ok(()) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            ctx.note(format!(
                "{test_name}: cannot write image {}: {e}",
                path.display()
            ));
            None
        }
    }
}
