//! Test tree definition models
//!
//! A script describes its tests as a tree of named nodes. Each node carries
//! the step functions to execute and an `exec_order` phase value.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::event::{Event, MessageType, PassState, ResultPayload};

/// Sink for events emitted by step functions
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

impl<F> Reporter for F
where
    F: Fn(Event) + Send + Sync,
{
    fn report(&self, event: Event) {
        self(event)
    }
}

/// Everything a step function receives when invoked
pub struct StepContext<'a> {
    reporter: &'a dyn Reporter,
    /// Full slash-joined test path
    pub test_name: &'a str,
    /// All selected unit numbers, ascending
    pub units: &'a [u32],
    /// Unit under test, `None` for barrier tasks
    pub unit: Option<u32>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        reporter: &'a dyn Reporter,
        test_name: &'a str,
        units: &'a [u32],
        unit: Option<u32>,
    ) -> Self {
        Self {
            reporter,
            test_name,
            units,
            unit,
        }
    }

    /// Emit one event for the current test and unit
    pub fn emit(&self, message_type: MessageType, payload: ResultPayload, pass: PassState) {
        self.reporter.report(Event::new(
            message_type,
            self.test_name,
            self.unit,
            payload,
            pass,
        ));
    }

    pub fn new_test(&self, payload: ResultPayload) {
        self.emit(MessageType::NewTest, payload, PassState::InProgress);
    }

    pub fn update(&self, payload: ResultPayload, pass: PassState) {
        self.emit(MessageType::Update, payload, pass);
    }

    pub fn end(&self, payload: ResultPayload, pass: PassState) {
        self.emit(MessageType::TestEnd, payload, pass);
    }
}

/// Executable step: blocking, reports progress through the context
pub type StepFn = Arc<dyn Fn(&StepContext<'_>) -> Result<()> + Send + Sync>;

/// Wrap a closure as a step function
pub fn step<F>(f: F) -> StepFn
where
    F: Fn(&StepContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One node of a test definition tree
#[derive(Clone)]
pub struct TestNode {
    pub name: String,
    pub steps: Vec<StepFn>,
    /// `-1` barrier, `0` unscheduled, `k > 0` phased
    pub exec_order: i32,
    pub children: Vec<TestNode>,
}

impl TestNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            exec_order: 0,
            children: Vec::new(),
        }
    }

    pub fn exec_order(mut self, exec_order: i32) -> Self {
        self.exec_order = exec_order;
        self
    }

    pub fn step(mut self, step: StepFn) -> Self {
        self.steps.push(step);
        self
    }

    pub fn child(mut self, child: TestNode) -> Self {
        self.children.push(child);
        self
    }

    fn outline(&self) -> TestOutline {
        TestOutline {
            name: self.name.clone(),
            children: self.children.iter().map(TestNode::outline).collect(),
        }
    }
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestNode")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("exec_order", &self.exec_order)
            .field("children", &self.children)
            .finish()
    }
}

/// Ordered forest of test nodes
#[derive(Clone, Debug, Default)]
pub struct TestTree {
    pub nodes: Vec<TestNode>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: TestNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Tree shape with steps and phases stripped
    pub fn outline(&self) -> Vec<TestOutline> {
        self.nodes.iter().map(TestNode::outline).collect()
    }
}

/// Test hierarchy as exposed to callers selecting tests
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TestOutline {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestOutline>,
}

impl TestOutline {
    /// Full paths of this node and its descendants, in tree order
    pub fn paths(&self, parent: Option<&str>) -> Vec<String> {
        let full = match parent {
            Some(p) => format!("{p}/{}", self.name),
            None => self.name.clone(),
        };
        let mut paths = vec![full.clone()];
        for child in &self.children {
            paths.extend(child.paths(Some(&full)));
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_outline_strips_steps() {
        let tree = TestTree::new().node(
            TestNode::new("Temp_25")
                .exec_order(-1)
                .step(step(|_| Ok(())))
                .child(TestNode::new("Input_Voltage").exec_order(1)),
        );

        let outline = tree.outline();
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].name, "Temp_25");
        assert_eq!(outline[0].children[0].name, "Input_Voltage");
        assert_eq!(
            outline[0].paths(None),
            vec!["Temp_25".to_string(), "Temp_25/Input_Voltage".to_string()]
        );

        let json = serde_json::to_value(&outline).unwrap();
        assert!(json[0].get("steps").is_none());
        assert!(json[0].get("exec_order").is_none());
    }

    #[test]
    fn test_step_context_emits_through_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |event: Event| seen.lock().unwrap().push(event);
        let units = [1, 2];
        let ctx = StepContext::new(&reporter, "Calibration", &units, Some(2));

        ctx.new_test(ResultPayload::Boolean {
            expected: Some(true),
            result: None,
        });
        ctx.end(
            ResultPayload::Boolean {
                expected: Some(true),
                result: Some(true),
            },
            PassState::Pass,
        );

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].message_type, MessageType::NewTest);
        assert_eq!(seen[0].pass, PassState::InProgress);
        assert_eq!(seen[1].unit_index, Some(2));
        assert!(seen[1].is_end());
    }
}
