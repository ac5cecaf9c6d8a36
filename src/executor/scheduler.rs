//! Phased multi-unit scheduler
//!
//! Repeatedly walks the plan in tree order with two cursors, a unit ordinal
//! and a current phase, using the completion tracker as memoization. A pass
//! runs every barrier whose predecessors are done and every test of the
//! current phase not yet run on the current unit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::tracker::CompletionTracker;
use super::RunError;
use crate::models::{Reporter, RunOutcome, StepContext};
use crate::plan::{ExecutionPlan, Phase, PlanEntry};
use crate::utils::timer::Timer;

/// Shared stop request, written by an external controller
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters describing one scheduling loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleStats {
    pub outcome: RunOutcome,
    /// Step function invocations
    pub steps_executed: usize,
    /// Full walks over the plan
    pub passes: usize,
    /// Completed barrier runs plus completed (test, unit) pairs
    pub completed: usize,
}

/// Drives an execution plan to completion across the selected units
pub struct Scheduler<'a> {
    script: String,
    plan: &'a ExecutionPlan,
    units: Vec<u32>,
    cancel: CancelFlag,
}

impl<'a> Scheduler<'a> {
    /// Units are deduplicated and visited in ascending order
    pub fn new(
        script: impl Into<String>,
        plan: &'a ExecutionPlan,
        units: impl IntoIterator<Item = u32>,
        cancel: CancelFlag,
    ) -> Self {
        let units: BTreeSet<u32> = units.into_iter().collect();
        Self {
            script: script.into(),
            plan,
            units: units.into_iter().collect(),
            cancel,
        }
    }

    /// Run until every test is done or cancellation is requested
    pub fn run(&self, reporter: &dyn Reporter) -> Result<ScheduleStats, RunError> {
        if self.units.is_empty() {
            return Err(RunError::NoUnits);
        }

        let entries = self.plan.entries();
        let num_units = self.units.len();
        let max_phase = self.plan.max_phase();
        let mut tracker = CompletionTracker::new(self.plan, num_units);

        let mut stats = ScheduleStats {
            outcome: RunOutcome::Completed,
            steps_executed: 0,
            passes: 0,
            completed: 0,
        };

        info!(
            "Scheduling {} tests of {} across units {:?} (max phase {})",
            entries.len(),
            self.script,
            self.units,
            max_phase
        );

        let mut unit_ordinal = 0usize;
        let mut current_phase = 1u32;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(stats, &tracker));
            }

            stats.passes += 1;
            debug!(
                "Pass {} (phase {}, unit {})",
                stats.passes, current_phase, self.units[unit_ordinal]
            );

            for (idx, entry) in entries.iter().enumerate() {
                match entry.phase {
                    Phase::Barrier => {
                        if tracker.barrier_done(&entry.path) {
                            continue;
                        }
                        let ready = entries[..idx].iter().all(|prev| tracker.is_done(prev));
                        if !ready {
                            continue;
                        }
                        if !self.execute(entry, None, reporter, &mut stats)? {
                            return Ok(self.cancelled(stats, &tracker));
                        }
                        tracker.mark_barrier(&entry.path);
                    }
                    Phase::Tier(k) if k == current_phase => {
                        if tracker.unit_done(&entry.path, unit_ordinal) {
                            continue;
                        }
                        let unit = self.units[unit_ordinal];
                        if !self.execute(entry, Some(unit), reporter, &mut stats)? {
                            return Ok(self.cancelled(stats, &tracker));
                        }
                        tracker.mark_unit(&entry.path, unit_ordinal);
                    }
                    // earlier phases already ran, later ones are not yet due
                    _ => {}
                }
            }

            if current_phase > max_phase && tracker.all_barriers_done() {
                stats.completed = tracker.completed();
                info!(
                    "Schedule for {} complete: {} steps in {} passes",
                    self.script, stats.steps_executed, stats.passes
                );
                return Ok(stats);
            }

            if unit_ordinal < num_units - 1 {
                unit_ordinal += 1;
            } else {
                unit_ordinal = 0;
                current_phase += 1;
            }
        }
    }

    /// Invoke every step of an entry; `Ok(false)` when cancelled first
    fn execute(
        &self,
        entry: &PlanEntry,
        unit: Option<u32>,
        reporter: &dyn Reporter,
        stats: &mut ScheduleStats,
    ) -> Result<bool, RunError> {
        let ctx = StepContext::new(reporter, &entry.path, &self.units, unit);

        for step in &entry.steps {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            let timer = Timer::start(match unit {
                Some(u) => format!("{} on unit {u}", entry.path),
                None => format!("{} on all units", entry.path),
            });
            step(&ctx).map_err(|source| RunError::StepFailed {
                script: self.script.clone(),
                test: entry.path.clone(),
                unit,
                source,
            })?;
            stats.steps_executed += 1;
            timer.stop();
        }

        Ok(true)
    }

    fn cancelled(&self, mut stats: ScheduleStats, tracker: &CompletionTracker) -> ScheduleStats {
        info!(
            "Schedule for {} cancelled after {} steps",
            self.script, stats.steps_executed
        );
        stats.outcome = RunOutcome::Cancelled;
        stats.completed = tracker.completed();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{step, Event, StepFn, TestNode, TestTree};
    use crate::plan::flatten;
    use std::sync::Mutex;

    /// Records `(test path, unit)` for every step invocation
    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<(String, Option<u32>)>>>);

    impl CallLog {
        fn step(&self) -> StepFn {
            let log = self.clone();
            step(move |ctx| {
                log.0
                    .lock()
                    .unwrap()
                    .push((ctx.test_name.to_string(), ctx.unit));
                Ok(())
            })
        }

        fn calls(&self) -> Vec<(String, Option<u32>)> {
            self.0.lock().unwrap().clone()
        }

        fn position(&self, test: &str, unit: Option<u32>) -> usize {
            self.calls()
                .iter()
                .position(|(t, u)| t == test && *u == unit)
                .unwrap_or_else(|| panic!("{test} on {unit:?} never ran"))
        }
    }

    fn ignore(_: Event) {}

    fn run_tree(tree: &TestTree, units: &[u32]) -> ScheduleStats {
        let plan = ExecutionPlan::build_all(&flatten(tree)).unwrap();
        Scheduler::new("demo", &plan, units.iter().copied(), CancelFlag::new())
            .run(&ignore)
            .unwrap()
    }

    #[test]
    fn test_barrier_runs_before_child_phase() {
        let log = CallLog::default();
        let tree = TestTree::new().node(
            TestNode::new("Temp_25")
                .exec_order(-1)
                .step(log.step())
                .child(
                    TestNode::new("Input_Voltage")
                        .exec_order(1)
                        .step(log.step()),
                ),
        );

        let stats = run_tree(&tree, &[1]);

        assert_eq!(stats.outcome, RunOutcome::Completed);
        assert_eq!(
            log.calls(),
            vec![
                ("Temp_25".to_string(), None),
                ("Temp_25/Input_Voltage".to_string(), Some(1)),
            ]
        );
        assert_eq!(stats.steps_executed, 2);
    }

    #[test]
    fn test_units_visited_in_ascending_order() {
        let log = CallLog::default();
        let tree = TestTree::new().node(TestNode::new("Measure").exec_order(1).step(log.step()));

        run_tree(&tree, &[2, 1]);

        assert_eq!(
            log.calls(),
            vec![
                ("Measure".to_string(), Some(1)),
                ("Measure".to_string(), Some(2)),
            ]
        );
    }

    #[test]
    fn test_unit_numbers_not_ordinals() {
        let log = CallLog::default();
        let tree = TestTree::new().node(TestNode::new("Measure").exec_order(1).step(log.step()));

        run_tree(&tree, &[7, 3]);

        let units: Vec<_> = log.calls().into_iter().map(|(_, u)| u).collect();
        assert_eq!(units, vec![Some(3), Some(7)]);
    }

    #[test]
    fn test_every_phased_test_runs_once_per_unit() {
        let log = CallLog::default();
        let tree = TestTree::new()
            .node(TestNode::new("A").exec_order(1).step(log.step()))
            .node(TestNode::new("B").exec_order(2).step(log.step()))
            .node(TestNode::new("C").exec_order(1).step(log.step()));

        let stats = run_tree(&tree, &[1, 2, 3]);
        let calls = log.calls();

        assert_eq!(calls.len(), 9);
        for test in ["A", "B", "C"] {
            for unit in [1, 2, 3] {
                let count = calls
                    .iter()
                    .filter(|(t, u)| t == test && *u == Some(unit))
                    .count();
                assert_eq!(count, 1, "{test} on unit {unit}");
            }
        }
        assert_eq!(stats.completed, 9);
    }

    #[test]
    fn test_lower_phase_completes_on_unit_first() {
        let log = CallLog::default();
        let tree = TestTree::new()
            .node(TestNode::new("Late").exec_order(2).step(log.step()))
            .node(TestNode::new("Early").exec_order(1).step(log.step()));

        run_tree(&tree, &[1, 2]);

        for unit in [1, 2] {
            assert!(log.position("Early", Some(unit)) < log.position("Late", Some(unit)));
        }
        // phase 1 finishes on all units before phase 2 starts anywhere
        assert!(log.position("Early", Some(2)) < log.position("Late", Some(1)));
    }

    #[test]
    fn test_barrier_waits_for_all_units() {
        let log = CallLog::default();
        let tree = TestTree::new()
            .node(TestNode::new("Warm").exec_order(1).step(log.step()))
            .node(TestNode::new("Cool_Down").exec_order(-1).step(log.step()))
            .node(TestNode::new("Cold").exec_order(2).step(log.step()));

        let stats = run_tree(&tree, &[1, 2]);

        let barrier = log.position("Cool_Down", None);
        assert!(log.position("Warm", Some(1)) < barrier);
        assert!(log.position("Warm", Some(2)) < barrier);
        assert!(barrier < log.position("Cold", Some(1)));
        let barrier_runs = log.calls().iter().filter(|(_, u)| u.is_none()).count();
        assert_eq!(barrier_runs, 1);
        assert_eq!(stats.outcome, RunOutcome::Completed);
    }

    #[test]
    fn test_barrier_chain_runs_in_tree_order() {
        let log = CallLog::default();
        let tree = TestTree::new()
            .node(TestNode::new("First").exec_order(-1).step(log.step()))
            .node(TestNode::new("Second").exec_order(-1).step(log.step()));

        let stats = run_tree(&tree, &[1]);

        assert_eq!(
            log.calls(),
            vec![("First".to_string(), None), ("Second".to_string(), None)]
        );
        assert_eq!(stats.passes, 1);
    }

    #[test]
    fn test_thermal_sequence_order() {
        let log = CallLog::default();
        let mut tree = TestTree::new();
        for (name, tier) in [("Temp_25", 1), ("Temp_n10", 2), ("Temp_70", 3)] {
            tree = tree.node(
                TestNode::new(name)
                    .exec_order(-1)
                    .step(log.step())
                    .child(TestNode::new("Input_Voltage").exec_order(tier).step(log.step()))
                    .child(TestNode::new("Calibration").exec_order(tier).step(log.step())),
            );
        }

        run_tree(&tree, &[1, 2]);

        assert_eq!(log.calls().len(), 3 + 3 * 2 * 2);
        let n10 = log.position("Temp_n10", None);
        let t70 = log.position("Temp_70", None);
        for unit in [Some(1), Some(2)] {
            assert!(log.position("Temp_25/Calibration", unit) < n10);
            assert!(n10 < log.position("Temp_n10/Input_Voltage", unit));
            assert!(log.position("Temp_n10/Calibration", unit) < t70);
            assert!(t70 < log.position("Temp_70/Input_Voltage", unit));
        }
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        let log = CallLog::default();
        let tree = TestTree::new().node(TestNode::new("Measure").exec_order(1).step(log.step()));
        let plan = ExecutionPlan::build_all(&flatten(&tree)).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let stats = Scheduler::new("demo", &plan, [1], cancel)
            .run(&ignore)
            .unwrap();

        assert_eq!(stats.outcome, RunOutcome::Cancelled);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_cancel_from_inside_step_stops_further_steps() {
        let log = CallLog::default();
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let stopper = step(move |_| {
            trigger.cancel();
            Ok(())
        });
        let tree = TestTree::new()
            .node(
                TestNode::new("Stop_Here")
                    .exec_order(1)
                    .step(log.step())
                    .step(stopper)
                    .step(log.step()),
            )
            .node(TestNode::new("Never").exec_order(1).step(log.step()));
        let plan = ExecutionPlan::build_all(&flatten(&tree)).unwrap();

        let stats = Scheduler::new("demo", &plan, [1, 2], cancel)
            .run(&ignore)
            .unwrap();

        assert_eq!(stats.outcome, RunOutcome::Cancelled);
        assert_eq!(log.calls(), vec![("Stop_Here".to_string(), Some(1))]);
        assert_eq!(stats.steps_executed, 2);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_step_fault_is_fatal() {
        let log = CallLog::default();
        let failing = step(|_| Err(anyhow::anyhow!("instrument not responding")));
        let tree = TestTree::new()
            .node(TestNode::new("Broken").exec_order(1).step(failing))
            .node(TestNode::new("After").exec_order(1).step(log.step()));
        let plan = ExecutionPlan::build_all(&flatten(&tree)).unwrap();

        let err = Scheduler::new("demo", &plan, [4], CancelFlag::new())
            .run(&ignore)
            .unwrap_err();

        match err {
            RunError::StepFailed {
                script, test, unit, ..
            } => {
                assert_eq!(script, "demo");
                assert_eq!(test, "Broken");
                assert_eq!(unit, Some(4));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_empty_units_rejected() {
        let plan = ExecutionPlan::default();
        let err = Scheduler::new("demo", &plan, Vec::new(), CancelFlag::new())
            .run(&ignore)
            .unwrap_err();
        assert!(matches!(err, RunError::NoUnits));
    }

    #[test]
    fn test_empty_plan_completes() {
        let plan = ExecutionPlan::default();
        let stats = Scheduler::new("demo", &plan, [1], CancelFlag::new())
            .run(&ignore)
            .unwrap();
        assert_eq!(stats.outcome, RunOutcome::Completed);
        assert_eq!(stats.steps_executed, 0);
    }

    #[test]
    fn test_events_reach_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |event: Event| seen.lock().unwrap().push(event);
        let emit = step(|ctx| {
            ctx.end(
                crate::models::ResultPayload::Number {
                    expected_range: None,
                    result_unit: None,
                    result: Some(5.1),
                },
                crate::models::PassState::Pass,
            );
            Ok(())
        });
        let tree = TestTree::new().node(TestNode::new("Input_Voltage").exec_order(1).step(emit));
        let plan = ExecutionPlan::build_all(&flatten(&tree)).unwrap();

        Scheduler::new("demo", &plan, [1, 2], CancelFlag::new())
            .run(&reporter)
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].unit_index, Some(1));
        assert_eq!(seen[1].unit_index, Some(2));
    }
}
