//! Test result event models
//!
//! Defines the event vocabulary emitted by step functions and consumed by
//! the report aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle position of an event within one (test, unit) execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "new test")]
    NewTest,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "test end")]
    TestEnd,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NewTest => "new test",
            MessageType::Update => "update",
            MessageType::TestEnd => "test end",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state pass verdict carried as a string tag on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "true")]
    Pass,
    #[serde(rename = "false")]
    Fail,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::InProgress => "in progress",
            PassState::Pass => "true",
            PassState::Fail => "false",
        }
    }

    pub fn from_bool(passed: bool) -> Self {
        if passed {
            PassState::Pass
        } else {
            PassState::Fail
        }
    }

    /// Parse a persisted verdict cell
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "pass" | "1" => Some(PassState::Pass),
            "false" | "fail" | "0" => Some(PassState::Fail),
            "in progress" | "in_progress" => Some(PassState::InProgress),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            PassState::InProgress => "…",
            PassState::Pass => "✓",
            PassState::Fail => "✗",
        }
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Boolean,
    Number,
    Vector,
    Image,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Boolean => "boolean",
            ResultType::Number => "number",
            ResultType::Vector => "vector",
            ResultType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Some(ResultType::Boolean),
            "number" => Some(ResultType::Number),
            "vector" => Some(ResultType::Vector),
            "image" => Some(ResultType::Image),
            _ => None,
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed numeric interval `[low, high]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds(pub f64, pub f64);

impl Bounds {
    pub fn new(low: f64, high: f64) -> Self {
        Self(low, high)
    }

    pub fn low(&self) -> f64 {
        self.0
    }

    pub fn high(&self) -> f64 {
        self.1
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low() && value <= self.high()
    }

    /// Decode a persisted range such as `(4.8, 5.2)`, `[10, 30]` or `1;2`
    pub fn parse(s: &str) -> Option<Self> {
        let values: Vec<f64> = strip_brackets(s)
            .split([',', ';'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;

        match values.as_slice() {
            [low, high] => Some(Self(*low, *high)),
            _ => None,
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low(), self.high())
    }
}

/// Axis labels of a vector result: `(x, y)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLabels(pub String, pub String);

impl AxisLabels {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        Self(x.into(), y.into())
    }

    /// Split a compound label; a single label is used for both axes.
    ///
    /// Quoted labels may contain separators, unquoted ones are split on
    /// `,` or `|`.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = strip_brackets(s);
        if inner.is_empty() {
            return None;
        }

        let parts: Vec<String> = match quoted_labels(inner) {
            Some(labels) if !labels.is_empty() => labels,
            _ => inner
                .split([',', '|'])
                .map(|p| p.trim().trim_matches(|c| c == '\'' || c == '"').trim().to_string())
                .collect(),
        };

        match parts.as_slice() {
            [x, y, ..] => Some(Self::new(x.as_str(), y.as_str())),
            [single] => Some(Self::new(single.as_str(), single.as_str())),
            [] => None,
        }
    }
}

impl fmt::Display for AxisLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\", \"{}\"",
            self.0.replace('"', "\"\""),
            self.1.replace('"', "\"\"")
        )
    }
}

/// Labels written as `"x", "y"` or `'x', 'y'`; a doubled quote stands for
/// itself. `None` when the text is not entirely quoted.
fn quoted_labels(s: &str) -> Option<Vec<String>> {
    let mut chars = s.chars().peekable();
    let mut labels = Vec::new();

    loop {
        while chars
            .peek()
            .is_some_and(|c| c.is_whitespace() || *c == ',' || *c == '|')
        {
            chars.next();
        }

        let quote = match chars.next() {
            None => break,
            Some(q @ ('"' | '\'')) => q,
            Some(_) => return None,
        };

        let mut label = String::new();
        loop {
            match chars.next() {
                Some(c) if c == quote => {
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        label.push(quote);
                    } else {
                        break;
                    }
                }
                Some(c) => label.push(c),
                None => return None,
            }
        }
        labels.push(label.trim().to_string());
    }

    Some(labels)
}

fn strip_brackets(s: &str) -> &str {
    s.trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']'])
        .trim()
}

/// Type-dependent part of an event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result type", rename_all = "lowercase")]
pub enum ResultPayload {
    Boolean {
        #[serde(rename = "expected range", default)]
        expected: Option<bool>,
        #[serde(default)]
        result: Option<bool>,
    },
    Number {
        #[serde(rename = "expected range", default)]
        expected_range: Option<Bounds>,
        #[serde(rename = "result unit", default)]
        result_unit: Option<String>,
        #[serde(default)]
        result: Option<f64>,
    },
    Vector {
        #[serde(rename = "expected range", default)]
        expected_range: Option<Bounds>,
        #[serde(rename = "result unit", default)]
        result_unit: Option<AxisLabels>,
        #[serde(default)]
        result: Option<[f64; 2]>,
    },
    Image {
        /// External reference (path or URL) to an already stored image
        #[serde(default)]
        result: Option<String>,
    },
}

impl ResultPayload {
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultPayload::Boolean { .. } => ResultType::Boolean,
            ResultPayload::Number { .. } => ResultType::Number,
            ResultPayload::Vector { .. } => ResultType::Vector,
            ResultPayload::Image { .. } => ResultType::Image,
        }
    }

    /// Human readable result value, empty when absent
    pub fn result_text(&self) -> String {
        match self {
            ResultPayload::Boolean { result, .. } => {
                result.map(|r| r.to_string()).unwrap_or_default()
            }
            ResultPayload::Number { result, .. } => {
                result.map(|r| r.to_string()).unwrap_or_default()
            }
            ResultPayload::Vector { result, .. } => result
                .map(|[x, y]| format!("({x}, {y})"))
                .unwrap_or_default(),
            ResultPayload::Image { result } => result.clone().unwrap_or_default(),
        }
    }
}

/// One immutable message describing a moment in a test's lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "message type")]
    pub message_type: MessageType,

    #[serde(rename = "test name")]
    pub test_name: String,

    /// Unit number, `None` for barrier tasks
    #[serde(rename = "unit index")]
    pub unit_index: Option<u32>,

    #[serde(flatten)]
    pub payload: ResultPayload,

    pub pass: PassState,
}

impl Event {
    pub fn new(
        message_type: MessageType,
        test_name: impl Into<String>,
        unit_index: Option<u32>,
        payload: ResultPayload,
        pass: PassState,
    ) -> Self {
        Self {
            message_type,
            test_name: test_name.into(),
            unit_index,
            payload,
            pass,
        }
    }

    pub fn result_type(&self) -> ResultType {
        self.payload.result_type()
    }

    pub fn is_end(&self) -> bool {
        self.message_type == MessageType::TestEnd
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self
            .unit_index
            .map(|u| format!("unit {u}"))
            .unwrap_or_else(|| "all units".to_string());
        write!(
            f,
            "{} [{}] {} ({}, {})",
            self.pass.symbol(),
            unit,
            self.test_name,
            self.message_type,
            self.result_type()
        )?;
        let value = self.payload.result_text();
        if !value.is_empty() {
            write!(f, " = {value}")?;
        }
        Ok(())
    }
}
