//! Run lifecycle models
//!
//! Run details supplied by the operator, session state and run summaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::event::Event;

/// Placeholder used when a unit has no serial number
pub const UNKNOWN_SERIAL: &str = "unknown";

/// Operator supplied details for a run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunDetails {
    pub operator_name: String,
    /// Serial number per unit number
    #[serde(default)]
    pub serials: BTreeMap<u32, String>,
    /// Free-text comment per unit number
    #[serde(default)]
    pub comments: BTreeMap<u32, String>,
}

impl RunDetails {
    pub fn new(operator_name: impl Into<String>) -> Self {
        Self {
            operator_name: operator_name.into(),
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, unit: u32, serial: impl Into<String>) -> Self {
        self.serials.insert(unit, serial.into());
        self
    }

    pub fn with_comment(mut self, unit: u32, comment: impl Into<String>) -> Self {
        self.comments.insert(unit, comment.into());
        self
    }

    pub fn serial_for(&self, unit: u32) -> String {
        self.serials
            .get(&unit)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SERIAL)
            .to_string()
    }

    pub fn comment_for(&self, unit: u32) -> String {
        self.comments.get(&unit).cloned().unwrap_or_default()
    }
}

/// Lifecycle of the run session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
    Completed,
}

impl RunState {
    /// Whether a run currently owns the session
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Cancelling)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "IDLE"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Cancelling => write!(f, "CANCELLING"),
            RunState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// How the scheduling loop terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Message delivered to live observers of a run
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMessage {
    Update(Event),
    Complete { message: String },
}

/// Summary of a finished run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub script: String,
    pub outcome: RunOutcome,
    pub units: Vec<u32>,
    pub events: usize,
    pub steps_executed: usize,
    pub duration_ms: u64,
    pub workbooks: Vec<PathBuf>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} - {} ({})", self.run_id, self.script, self.outcome)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Units: {:?} | Steps: {} | Events: {} | Duration: {}ms",
            self.units, self.steps_executed, self.events, self.duration_ms
        )?;
        for workbook in &self.workbooks {
            writeln!(f, "  {}", workbook.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_placeholder() {
        let details = RunDetails::new("alice")
            .with_serial(1, "SN-001")
            .with_serial(2, "  ")
            .with_comment(1, "first article");

        assert_eq!(details.serial_for(1), "SN-001");
        assert_eq!(details.serial_for(2), UNKNOWN_SERIAL);
        assert_eq!(details.serial_for(3), UNKNOWN_SERIAL);
        assert_eq!(details.comment_for(1), "first article");
        assert_eq!(details.comment_for(2), "");
    }

    #[test]
    fn test_run_state_active() {
        assert!(!RunState::Idle.is_active());
        assert!(RunState::Running.is_active());
        assert!(RunState::Cancelling.is_active());
        assert!(!RunState::Completed.is_active());
    }

    #[test]
    fn test_complete_message_shape() {
        let msg = RunMessage::Complete {
            message: "Test execution complete.".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "complete");
    }
}
