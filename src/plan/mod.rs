//! Test plan construction
//!
//! Flattens test trees and builds the phased execution plan consumed by the
//! scheduler.

mod execution;
mod flatten;

pub use execution::{ExecutionPlan, Phase, PlanEntry};
pub use flatten::flatten;

use thiserror::Error;

/// Plan construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Unknown test: {0}")]
    UnknownTest(String),

    #[error("Duplicate test path: {0}")]
    DuplicatePath(String),

    #[error("Test path contains an empty name: {0}")]
    EmptyName(String),

    #[error("Test {path} has invalid exec_order {exec_order}")]
    InvalidPhase { path: String, exec_order: i32 },

    #[error("Test {0} has steps but exec_order 0, which is never scheduled")]
    UnschedulablePhase(String),
}
