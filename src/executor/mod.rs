//! Test execution engine
//!
//! The scheduler drives one plan across the selected units; the session owns
//! run lifecycle, live fan-out and report persistence around it.

mod scheduler;
mod session;
mod tracker;

pub use session::{RunSession, StartRequest};

use thiserror::Error;

/// Fatal run failures
#[derive(Error, Debug)]
pub enum RunError {
    #[error("No units selected")]
    NoUnits,

    #[error("{script}: step of {test} failed on {}: {source:#}", unit_label(.unit))]
    StepFailed {
        script: String,
        test: String,
        unit: Option<u32>,
        #[source]
        source: anyhow::Error,
    },
}

fn unit_label(unit: &Option<u32>) -> String {
    match unit {
        Some(u) => format!("unit {u}"),
        None => "all units".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_message() {
        let err = RunError::StepFailed {
            script: "thermal_cycle".to_string(),
            test: "Temp_25/Input_Voltage".to_string(),
            unit: Some(2),
            source: anyhow::anyhow!("meter timeout"),
        };
        assert_eq!(
            err.to_string(),
            "thermal_cycle: step of Temp_25/Input_Voltage failed on unit 2: meter timeout"
        );

        let barrier = RunError::StepFailed {
            script: "thermal_cycle".to_string(),
            test: "Temp_25".to_string(),
            unit: None,
            source: anyhow::anyhow!("chamber offline"),
        };
        assert!(barrier.to_string().contains("on all units"));
    }
}
