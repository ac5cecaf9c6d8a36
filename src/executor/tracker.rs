//! Completion tracking for one run
//!
//! Flags only move from `false` to `true`.

use std::collections::HashMap;

use crate::plan::{ExecutionPlan, Phase, PlanEntry};

/// Per-(test, unit) and per-barrier completion flags
#[derive(Clone, Debug, Default)]
pub struct CompletionTracker {
    phased: HashMap<String, Vec<bool>>,
    barriers: HashMap<String, bool>,
}

impl CompletionTracker {
    pub fn new(plan: &ExecutionPlan, num_units: usize) -> Self {
        let mut tracker = Self::default();
        for entry in plan.entries() {
            match entry.phase {
                Phase::Barrier => {
                    tracker.barriers.insert(entry.path.clone(), false);
                }
                _ => {
                    tracker
                        .phased
                        .insert(entry.path.clone(), vec![false; num_units]);
                }
            }
        }
        tracker
    }

    pub fn barrier_done(&self, path: &str) -> bool {
        self.barriers.get(path).copied().unwrap_or(false)
    }

    pub fn unit_done(&self, path: &str, ordinal: usize) -> bool {
        self.phased
            .get(path)
            .and_then(|flags| flags.get(ordinal))
            .copied()
            .unwrap_or(false)
    }

    pub fn mark_barrier(&mut self, path: &str) {
        if let Some(flag) = self.barriers.get_mut(path) {
            *flag = true;
        }
    }

    pub fn mark_unit(&mut self, path: &str, ordinal: usize) {
        if let Some(flag) = self
            .phased
            .get_mut(path)
            .and_then(|flags| flags.get_mut(ordinal))
        {
            *flag = true;
        }
    }

    /// Barrier: its own flag. Phased: done on every unit.
    pub fn is_done(&self, entry: &PlanEntry) -> bool {
        match entry.phase {
            Phase::Barrier => self.barrier_done(&entry.path),
            _ => self
                .phased
                .get(&entry.path)
                .map(|flags| flags.iter().all(|f| *f))
                .unwrap_or(false),
        }
    }

    pub fn all_barriers_done(&self) -> bool {
        self.barriers.values().all(|f| *f)
    }

    /// Number of completed (test, unit) pairs plus completed barriers
    pub fn completed(&self) -> usize {
        let phased: usize = self
            .phased
            .values()
            .map(|flags| flags.iter().filter(|f| **f).count())
            .sum();
        phased + self.barriers.values().filter(|f| **f).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{step, TestNode, TestTree};
    use crate::plan::flatten;

    fn plan() -> ExecutionPlan {
        let noop = step(|_| Ok(()));
        let tree = TestTree::new().node(
            TestNode::new("Setup")
                .exec_order(-1)
                .step(noop.clone())
                .child(TestNode::new("Measure").exec_order(1).step(noop)),
        );
        ExecutionPlan::build_all(&flatten(&tree)).unwrap()
    }

    #[test]
    fn test_tracker_starts_false() {
        let plan = plan();
        let tracker = CompletionTracker::new(&plan, 2);
        assert!(!tracker.barrier_done("Setup"));
        assert!(!tracker.unit_done("Setup/Measure", 0));
        assert!(!tracker.unit_done("Setup/Measure", 1));
        assert!(!tracker.all_barriers_done());
        assert_eq!(tracker.completed(), 0);
    }

    #[test]
    fn test_phased_done_requires_every_unit() {
        let plan = plan();
        let mut tracker = CompletionTracker::new(&plan, 2);
        let measure = &plan.entries()[1];

        assert_eq!(measure.path, "Setup/Measure");

        tracker.mark_unit("Setup/Measure", 0);
        assert!(tracker.unit_done("Setup/Measure", 0));
        assert!(!tracker.is_done(measure));
        tracker.mark_unit("Setup/Measure", 1);
        assert!(tracker.is_done(measure));
        assert_eq!(tracker.completed(), 2);
    }

    #[test]
    fn test_marks_are_monotonic() {
        let plan = plan();
        let mut tracker = CompletionTracker::new(&plan, 1);
        tracker.mark_barrier("Setup");
        tracker.mark_barrier("Setup");
        assert!(tracker.barrier_done("Setup"));
        assert!(tracker.all_barriers_done());

        // out-of-range ordinals and unknown paths are ignored
        tracker.mark_unit("Setup/Measure", 7);
        tracker.mark_unit("Nope", 0);
        assert_eq!(tracker.completed(), 1);
    }
}
