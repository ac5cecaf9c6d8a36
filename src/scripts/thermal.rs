//! Temperature chamber sequence
//!
//! Three chamber set-points run as barriers; under each, every unit gets an
//! input voltage check, an output power sweep, a calibration check and a
//! load group. Instrument reads are simulated.

use std::thread::sleep;
use std::time::Duration;
use tracing::info;

use super::TestScript;
use crate::models::{
    step, AxisLabels, Bounds, PassState, ResultPayload, StepContext, StepFn, TestNode, TestTree,
};

/// Chamber set-point name, temperature in C, and the phase of its checks
const SET_POINTS: [(&str, i32, i32); 3] = [
    ("Temp_25", 25, 1),
    ("Temp_n10", -10, 2),
    ("Temp_70", 70, 3),
];

/// Output power samples of one sweep, volts
const POWER_SWEEP: [f64; 22] = [
    20.0, 21.0, 20.0, 23.0, 20.0, 19.0, 18.0, 22.0, 26.0, 23.0, 15.0, 9.0, 26.0, 31.0, 30.0, 25.0,
    20.0, 20.0, 25.0, 30.0, 37.0, 19.0,
];

pub struct ThermalCycleScript {
    delay: Duration,
}

impl ThermalCycleScript {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn set_point(&self, name: &str, celsius: i32, tier: i32) -> TestNode {
        let mut node = TestNode::new(name)
            .exec_order(-1)
            .step(change_temperature(celsius, self.delay))
            .child(
                TestNode::new("Input_Voltage")
                    .exec_order(tier)
                    .step(measure_number(Bounds::new(4.8, 5.2), "Volt", 5.1, self.delay)),
            )
            .child(
                TestNode::new("Output_Power_By_Freq")
                    .exec_order(tier)
                    .step(power_sweep(self.delay)),
            )
            .child(
                TestNode::new("Calibration")
                    .exec_order(tier)
                    .step(calibration(self.delay)),
            );

        // the hot set-point skips the load group
        if celsius < 70 {
            node = node.child(
                TestNode::new("Under_Load")
                    .exec_order(tier)
                    .step(connect_load())
                    .child(
                        TestNode::new("Test_A")
                            .exec_order(tier)
                            .step(measure_number(Bounds::new(1.0, 2.0), "Volt", 1.4, self.delay)),
                    )
                    .child(
                        TestNode::new("Test_B")
                            .exec_order(tier)
                            .step(measure_number(Bounds::new(1.0, 2.0), "Volt", 1.5, self.delay)),
                    ),
            );
        }

        node
    }
}

impl TestScript for ThermalCycleScript {
    fn name(&self) -> &str {
        "thermal_cycle"
    }

    fn description(&self) -> &str {
        "Chamber at 25, -10 and 70 degrees C with per-unit electrical checks"
    }

    fn tree(&self) -> TestTree {
        SET_POINTS
            .iter()
            .fold(TestTree::new(), |tree, (name, celsius, tier)| {
                tree.node(self.set_point(name, *celsius, *tier))
            })
    }

    fn max_units(&self) -> u32 {
        4
    }
}

fn boolean(result: Option<bool>) -> ResultPayload {
    ResultPayload::Boolean {
        expected: Some(true),
        result,
    }
}

fn boolean_check(ctx: &StepContext<'_>, passed: bool) {
    ctx.new_test(boolean(None));
    ctx.update(boolean(Some(passed)), PassState::from_bool(passed));
    ctx.end(boolean(Some(passed)), PassState::from_bool(passed));
}

fn change_temperature(celsius: i32, delay: Duration) -> StepFn {
    step(move |ctx| {
        info!("Chamber set to {} C for units {:?}", celsius, ctx.units);
        sleep(delay);
        boolean_check(ctx, true);
        Ok(())
    })
}

fn connect_load() -> StepFn {
    step(|ctx| {
        info!("Load connected for {}", ctx.test_name);
        Ok(())
    })
}

fn calibration(delay: Duration) -> StepFn {
    step(move |ctx| {
        sleep(delay);
        boolean_check(ctx, true);
        Ok(())
    })
}

fn measure_number(range: Bounds, unit: &'static str, measured: f64, delay: Duration) -> StepFn {
    step(move |ctx| {
        let payload = |result| ResultPayload::Number {
            expected_range: Some(range),
            result_unit: Some(unit.to_string()),
            result,
        };
        ctx.new_test(payload(None));
        sleep(delay);

        let pass = PassState::from_bool(range.contains(measured));
        ctx.update(payload(Some(measured)), pass);
        ctx.end(payload(Some(measured)), pass);
        Ok(())
    })
}

fn power_sweep(delay: Duration) -> StepFn {
    let range = Bounds::new(10.0, 30.0);
    step(move |ctx| {
        ctx.new_test(ResultPayload::Vector {
            expected_range: Some(range),
            result_unit: Some(AxisLabels::new("Time", "Volt")),
            result: None,
        });
        sleep(delay);

        let mut passed = true;
        for (idx, value) in POWER_SWEEP.iter().enumerate() {
            let in_range = range.contains(*value);
            passed &= in_range;
            ctx.update(
                ResultPayload::Vector {
                    expected_range: Some(range),
                    result_unit: None,
                    result: Some([idx as f64, *value]),
                },
                PassState::from_bool(in_range),
            );
            sleep(delay / 5);
        }

        ctx.end(
            ResultPayload::Vector {
                expected_range: Some(range),
                result_unit: None,
                result: None,
            },
            PassState::from_bool(passed),
        );
        Ok(())
    })
}
