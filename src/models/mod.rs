//! Data models for hardware test runs
//!
//! This module contains all data structures used throughout the application.

mod event;
mod run;
mod tree;

pub use event::{AxisLabels, Bounds, Event, MessageType, PassState, ResultPayload, ResultType};
pub use run::{RunDetails, RunMessage, RunOutcome, RunState, RunSummary, UNKNOWN_SERIAL};
pub use tree::{step, Reporter, StepContext, StepFn, TestNode, TestOutline, TestTree};
