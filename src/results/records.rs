//! Persisted report records
//!
//! One metadata record per (run, unit) and one test record per
//! (unit, test) that reached a test-end event.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::{AxisLabels, Bounds, Event, PassState, ResultType};

/// Date/time format used inside workbooks
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Run metadata for one unit, stored in the "Details" sheet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub script_name: String,
    pub serial: String,
    pub operator: String,
    pub timestamp: String,
    pub comment: String,
    pub unit_index: u32,
}

impl MetadataRecord {
    pub fn new(
        script_name: impl Into<String>,
        unit_index: u32,
        serial: impl Into<String>,
        operator: impl Into<String>,
        comment: impl Into<String>,
        started: DateTime<Local>,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            serial: serial.into(),
            operator: operator.into(),
            timestamp: started.format(TIMESTAMP_FORMAT).to_string(),
            comment: comment.into(),
            unit_index,
        }
    }
}

/// Aggregated result of one (unit, test) execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result type", rename_all = "lowercase")]
pub enum TestRecord {
    Boolean {
        test_name: String,
        result: Option<bool>,
        pass: PassState,
    },
    Number {
        test_name: String,
        result_unit: Option<String>,
        expected_range: Option<Bounds>,
        result: Option<f64>,
        pass: PassState,
    },
    Vector {
        test_name: String,
        result_unit: Option<AxisLabels>,
        expected_range: Option<Bounds>,
        pass: PassState,
        /// Ordered `(x, y)` points from update events
        points: Vec<[f64; 2]>,
    },
    Image {
        test_name: String,
        pass: PassState,
        /// Path or URL of the captured image
        reference: Option<String>,
    },
    /// Events whose result types disagree, kept verbatim
    Raw {
        test_name: String,
        events: Vec<Event>,
    },
}

impl TestRecord {
    pub fn test_name(&self) -> &str {
        match self {
            TestRecord::Boolean { test_name, .. }
            | TestRecord::Number { test_name, .. }
            | TestRecord::Vector { test_name, .. }
            | TestRecord::Image { test_name, .. }
            | TestRecord::Raw { test_name, .. } => test_name,
        }
    }

    /// `None` for raw records
    pub fn result_type(&self) -> Option<ResultType> {
        match self {
            TestRecord::Boolean { .. } => Some(ResultType::Boolean),
            TestRecord::Number { .. } => Some(ResultType::Number),
            TestRecord::Vector { .. } => Some(ResultType::Vector),
            TestRecord::Image { .. } => Some(ResultType::Image),
            TestRecord::Raw { .. } => None,
        }
    }

    pub fn pass(&self) -> Option<PassState> {
        match self {
            TestRecord::Boolean { pass, .. }
            | TestRecord::Number { pass, .. }
            | TestRecord::Vector { pass, .. }
            | TestRecord::Image { pass, .. } => Some(*pass),
            TestRecord::Raw { .. } => None,
        }
    }
}
