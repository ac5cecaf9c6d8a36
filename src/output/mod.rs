//! Output formatting module
//!
//! Renders live events, test outlines and imported workbooks.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
