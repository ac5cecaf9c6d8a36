//! Output formatters for run events
//!
//! Provides table and JSON renderings of live events, test outlines,
//! run summaries and imported workbooks.

use serde::Serialize;

use crate::models::{Event, PassState, RunMessage, RunSummary, TestOutline};
use crate::results::ImportedRun;
use crate::scripts::ScriptRegistry;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// Outline of one script as offered for selection
#[derive(Serialize)]
struct ScriptTests<'a> {
    script: &'a str,
    max_units: u32,
    tests: &'a [TestOutline],
}

#[derive(Serialize)]
struct ScriptInfo<'a> {
    name: &'a str,
    description: &'a str,
    max_units: u32,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    fn verdict(&self, pass: PassState) -> String {
        if !self.colorize {
            return pass.symbol().to_string();
        }
        match pass {
            PassState::Pass => format!("\x1b[32m{}\x1b[0m", pass.symbol()),
            PassState::Fail => format!("\x1b[31m{}\x1b[0m", pass.symbol()),
            PassState::InProgress => format!("\x1b[33m{}\x1b[0m", pass.symbol()),
        }
    }

    /// One line per event
    pub fn format_event(&self, event: &Event) -> String {
        match self.format {
            OutputFormat::Table => {
                let unit = event
                    .unit_index
                    .map(|u| format!("unit {u}"))
                    .unwrap_or_else(|| "all".to_string());
                let mut line = format!(
                    "{} {:8} {:40} {:10} {:8}",
                    self.verdict(event.pass),
                    unit,
                    event.test_name,
                    event.message_type,
                    event.result_type()
                );
                let value = event.payload.result_text();
                if !value.is_empty() {
                    line.push(' ');
                    line.push_str(&truncate(&value, 48));
                }
                line.trim_end().to_string()
            }
            _ => self.json(event),
        }
    }

    /// Live channel message
    pub fn format_message(&self, message: &RunMessage) -> String {
        match (self.format, message) {
            (OutputFormat::Table, RunMessage::Update(event)) => self.format_event(event),
            (OutputFormat::Table, RunMessage::Complete { message }) => format!("\n{message}"),
            _ => self.json(message),
        }
    }

    pub fn format_scripts(&self, registry: &ScriptRegistry) -> String {
        if self.format != OutputFormat::Table {
            let scripts: Vec<ScriptInfo<'_>> = registry
                .iter()
                .map(|s| ScriptInfo {
                    name: s.name(),
                    description: s.description(),
                    max_units: s.max_units(),
                })
                .collect();
            return self.json(&scripts);
        }

        let mut output = String::new();
        output.push_str(&format!("\nTest Scripts ({} total)\n", registry.len()));
        output.push_str(RULE);
        output.push('\n');
        for script in registry.iter() {
            output.push_str(&format!(
                "  {:16} [max {} units] {}\n",
                script.name(),
                script.max_units(),
                script.description()
            ));
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Test tree of a script, indented by depth
    pub fn format_outline(&self, script: &str, max_units: u32, tests: &[TestOutline]) -> String {
        if self.format != OutputFormat::Table {
            return self.json(&ScriptTests {
                script,
                max_units,
                tests,
            });
        }

        let mut output = String::new();
        output.push_str(&format!("\n{script} (up to {max_units} units)\n"));
        output.push_str(RULE);
        output.push('\n');
        for node in tests {
            push_outline(&mut output, node, 1);
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => summary.to_string(),
            _ => self.json(summary),
        }
    }

    /// Reconstructed events of one workbook followed by its diagnostics
    pub fn format_import(&self, run: &ImportedRun) -> String {
        if self.format != OutputFormat::Table {
            return self.json(run);
        }

        let meta = &run.metadata;
        let mut output = String::new();
        output.push_str(&format!(
            "\n{} - unit {} (serial {}, operator {}, {})\n",
            meta.script_name, meta.unit_index, meta.serial, meta.operator, meta.timestamp
        ));
        if !meta.comment.is_empty() {
            output.push_str(&format!("  {}\n", meta.comment));
        }
        output.push_str(RULE);
        output.push('\n');
        for event in &run.events {
            output.push_str(&self.format_event(event));
            output.push('\n');
        }
        output.push_str(RULE);
        output.push('\n');
        output.push_str(&format!("Events: {}\n", run.events.len()));

        if !run.diagnostics.is_empty() {
            output.push_str(&format!("\nDiagnostics ({}):\n", run.diagnostics.len()));
            for message in &run.diagnostics {
                output.push_str(&format!("  ! {message}\n"));
            }
        }
        output
    }
}

fn push_outline(output: &mut String, node: &TestOutline, depth: usize) {
    output.push_str(&format!("{}{}\n", "  ".repeat(depth), node.name));
    for child in &node.children {
        push_outline(output, child, depth + 1);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}
