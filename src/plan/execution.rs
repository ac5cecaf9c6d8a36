//! Execution plan construction
//!
//! Restricts a flattened tree to the caller's selection and classifies each
//! entry by scheduling phase.

use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use super::flatten::FlattenedTree;
use super::PlanError;
use crate::models::StepFn;

/// Scheduling tier of a test node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Runs once, unbound to a unit, after every preceding test is done
    Barrier,
    /// `exec_order == 0`, never scheduled
    Unscheduled,
    /// Runs once per unit during the given scheduler phase
    Tier(u32),
}

impl Phase {
    pub fn from_exec_order(exec_order: i32) -> Option<Phase> {
        match exec_order {
            -1 => Some(Phase::Barrier),
            0 => Some(Phase::Unscheduled),
            k if k > 0 => Some(Phase::Tier(k as u32)),
            _ => None,
        }
    }

    pub fn exec_order(&self) -> i32 {
        match self {
            Phase::Barrier => -1,
            Phase::Unscheduled => 0,
            Phase::Tier(k) => *k as i32,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Barrier => write!(f, "barrier"),
            Phase::Unscheduled => write!(f, "unscheduled"),
            Phase::Tier(k) => write!(f, "phase {k}"),
        }
    }
}

/// One runnable test of the plan
#[derive(Clone)]
pub struct PlanEntry {
    pub path: String,
    pub phase: Phase,
    pub steps: Vec<StepFn>,
}

impl fmt::Debug for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanEntry")
            .field("path", &self.path)
            .field("phase", &self.phase)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Ordered list of selected tests in tree order
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
}

impl ExecutionPlan {
    /// Restrict a flattened tree to the selected paths, preserving tree order
    pub fn build<S: AsRef<str>>(flat: &FlattenedTree, selected: &[S]) -> Result<Self, PlanError> {
        let mut seen = HashSet::new();
        for path in &flat.order {
            if !seen.insert(path.as_str()) {
                return Err(PlanError::DuplicatePath(path.clone()));
            }
            if path.split('/').any(str::is_empty) {
                return Err(PlanError::EmptyName(path.clone()));
            }
        }

        let selected: HashSet<&str> = selected.iter().map(AsRef::as_ref).collect();
        if let Some(unknown) = selected.iter().find(|p| !flat.contains(p)) {
            return Err(PlanError::UnknownTest(unknown.to_string()));
        }

        let mut entries = Vec::new();
        for path in flat.order.iter().filter(|p| selected.contains(p.as_str())) {
            let exec_order = flat.phases.get(path).copied().unwrap_or(0);
            let phase = Phase::from_exec_order(exec_order).ok_or_else(|| PlanError::InvalidPhase {
                path: path.clone(),
                exec_order,
            })?;
            let steps = flat.steps.get(path).cloned().unwrap_or_default();

            if phase == Phase::Unscheduled {
                if steps.is_empty() {
                    debug!("Dropping grouping node {} from plan", path);
                    continue;
                }
                return Err(PlanError::UnschedulablePhase(path.clone()));
            }

            entries.push(PlanEntry {
                path: path.clone(),
                phase,
                steps,
            });
        }

        Ok(Self { entries })
    }

    /// Build a plan selecting every test in the tree
    pub fn build_all(flat: &FlattenedTree) -> Result<Self, PlanError> {
        Self::build(flat, &flat.order)
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest positive phase present, 0 if none
    pub fn max_phase(&self) -> u32 {
        self.entries
            .iter()
            .filter_map(|e| match e.phase {
                Phase::Tier(k) => Some(k),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn barrier_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.phase == Phase::Barrier)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{step, TestNode, TestTree};
    use crate::plan::flatten;

    fn noop() -> StepFn {
        step(|_| Ok(()))
    }

    fn thermal_tree() -> TestTree {
        TestTree::new()
            .node(
                TestNode::new("Temp_25")
                    .exec_order(-1)
                    .step(noop())
                    .child(TestNode::new("Input_Voltage").exec_order(1).step(noop()))
                    .child(TestNode::new("Calibration").exec_order(1).step(noop())),
            )
            .node(
                TestNode::new("Temp_70")
                    .exec_order(-1)
                    .step(noop())
                    .child(TestNode::new("Input_Voltage").exec_order(3).step(noop())),
            )
    }

    #[test]
    fn test_build_preserves_tree_order() {
        let flat = flatten(&thermal_tree());
        let plan = ExecutionPlan::build(
            &flat,
            &["Temp_70/Input_Voltage", "Temp_25", "Temp_25/Calibration"],
        )
        .unwrap();

        assert_eq!(
            plan.paths(),
            vec!["Temp_25", "Temp_25/Calibration", "Temp_70/Input_Voltage"]
        );
        assert_eq!(plan.max_phase(), 3);
        assert_eq!(plan.barrier_count(), 1);
    }

    #[test]
    fn test_unknown_test_rejected() {
        let flat = flatten(&thermal_tree());
        let err = ExecutionPlan::build(&flat, &["Temp_99"]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownTest(p) if p == "Temp_99"));
    }

    #[test]
    fn test_phase_zero_grouping_node_dropped() {
        let tree = TestTree::new().node(
            TestNode::new("Group").child(TestNode::new("Leaf").exec_order(1).step(noop())),
        );
        let flat = flatten(&tree);
        let plan = ExecutionPlan::build_all(&flat).unwrap();
        assert_eq!(plan.paths(), vec!["Group/Leaf"]);
    }

    #[test]
    fn test_phase_zero_with_steps_rejected() {
        let tree = TestTree::new().node(TestNode::new("Orphan").step(noop()));
        let flat = flatten(&tree);
        let err = ExecutionPlan::build_all(&flat).unwrap_err();
        assert!(matches!(err, PlanError::UnschedulablePhase(p) if p == "Orphan"));
    }

    #[test]
    fn test_invalid_phase_rejected() {
        let tree = TestTree::new().node(TestNode::new("Odd").exec_order(-2).step(noop()));
        let flat = flatten(&tree);
        let err = ExecutionPlan::build_all(&flat).unwrap_err();
        assert!(matches!(err, PlanError::InvalidPhase { exec_order: -2, .. }));
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let tree = TestTree::new()
            .node(TestNode::new("Same").exec_order(1))
            .node(TestNode::new("Same").exec_order(1));
        let flat = flatten(&tree);
        assert!(matches!(
            ExecutionPlan::build_all(&flat),
            Err(PlanError::DuplicatePath(_))
        ));
    }

    #[test]
    fn test_phase_conversion() {
        assert_eq!(Phase::from_exec_order(-1), Some(Phase::Barrier));
        assert_eq!(Phase::from_exec_order(0), Some(Phase::Unscheduled));
        assert_eq!(Phase::from_exec_order(2), Some(Phase::Tier(2)));
        assert_eq!(Phase::from_exec_order(-5), None);
        assert_eq!(Phase::Tier(4).exec_order(), 4);
    }
}
