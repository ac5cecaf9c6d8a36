//! Display panel check
//!
//! Powers the panel rig once, then per unit reads the backlight current and
//! captures a screen image.

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use super::TestScript;
use crate::models::{step, Bounds, PassState, ResultPayload, StepFn, TestNode, TestTree};
use crate::results::workbook::file_safe;

/// 1x1 grey PNG standing in for a frame grabber capture
const CAPTURE_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

pub struct DisplayCheckScript {
    images_dir: PathBuf,
    delay: Duration,
}

impl DisplayCheckScript {
    pub fn new(images_dir: impl Into<PathBuf>, delay: Duration) -> Self {
        Self {
            images_dir: images_dir.into(),
            delay,
        }
    }
}

impl TestScript for DisplayCheckScript {
    fn name(&self) -> &str {
        "display_check"
    }

    fn description(&self) -> &str {
        "Panel power-on, backlight current and screen capture"
    }

    fn tree(&self) -> TestTree {
        TestTree::new().node(
            TestNode::new("Power_On")
                .exec_order(-1)
                .step(power_on(self.delay))
                .child(
                    TestNode::new("Backlight")
                        .exec_order(1)
                        .step(backlight(self.delay)),
                )
                .child(
                    TestNode::new("Screen_Capture")
                        .exec_order(1)
                        .step(screen_capture(self.images_dir.clone(), self.delay)),
                ),
        )
    }

    fn max_units(&self) -> u32 {
        2
    }
}

fn power_on(delay: Duration) -> StepFn {
    step(move |ctx| {
        let payload = |result| ResultPayload::Boolean {
            expected: Some(true),
            result,
        };
        ctx.new_test(payload(None));
        sleep(delay);
        ctx.end(payload(Some(true)), PassState::Pass);
        Ok(())
    })
}

fn backlight(delay: Duration) -> StepFn {
    let range = Bounds::new(110.0, 130.0);
    step(move |ctx| {
        let payload = |result| ResultPayload::Number {
            expected_range: Some(range),
            result_unit: Some("mA".to_string()),
            result,
        };
        ctx.new_test(payload(None));
        sleep(delay);

        let measured = 118.0 + f64::from(ctx.unit.unwrap_or(0) % 4);
        ctx.end(
            payload(Some(measured)),
            PassState::from_bool(range.contains(measured)),
        );
        Ok(())
    })
}

fn screen_capture(images_dir: PathBuf, delay: Duration) -> StepFn {
    step(move |ctx| {
        ctx.new_test(ResultPayload::Image { result: None });
        sleep(delay);

        let bytes = general_purpose::STANDARD
            .decode(CAPTURE_PNG)
            .context("Capture image is not valid base64")?;
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create {}", images_dir.display()))?;

        let unit = ctx
            .unit
            .map(|u| u.to_string())
            .unwrap_or_else(|| "all".to_string());
        let path = images_dir.join(format!("{}_unit{}.png", file_safe(ctx.test_name), unit));
        fs::write(&path, bytes)
            .with_context(|| format!("Failed to write capture {}", path.display()))?;

        ctx.end(
            ResultPayload::Image {
                result: Some(path.to_string_lossy().into_owned()),
            },
            PassState::Pass,
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, StepContext};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_capture_writes_png() {
        let dir = TempDir::new().unwrap();
        let seen = Mutex::new(Vec::new());
        let reporter = |event: Event| seen.lock().unwrap().push(event);
        let units = [2];
        let ctx = StepContext::new(&reporter, "Power_On/Screen_Capture", &units, Some(2));

        screen_capture(dir.path().to_path_buf(), Duration::ZERO)(&ctx).unwrap();

        let seen = seen.into_inner().unwrap();
        let path = match &seen[1].payload {
            ResultPayload::Image { result: Some(p) } => PathBuf::from(p),
            other => panic!("unexpected payload {other:?}"),
        };
        assert!(path.ends_with("Power_On_Screen_Capture_unit2.png"));
        assert!(fs::read(path).unwrap().starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_tree_has_barrier_and_phase_one() {
        let script = DisplayCheckScript::new("/tmp", Duration::ZERO);
        let outline = script.available_tests();
        assert_eq!(outline.len(), 1);
        assert_eq!(
            outline[0].paths(None),
            vec!["Power_On", "Power_On/Backlight", "Power_On/Screen_Capture"]
        );
    }
}
