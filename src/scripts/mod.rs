//! Test script registry
//!
//! Scripts are statically linked implementations looked up by a stable id.

mod display;
mod thermal;

pub use display::DisplayCheckScript;
pub use thermal::ThermalCycleScript;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::{TestOutline, TestTree};

/// A loadable test-tree definition
pub trait TestScript: Send + Sync {
    /// Stable identifier used to select the script
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Fresh test tree for one run
    fn tree(&self) -> TestTree;

    /// Largest number of units one run may select
    fn max_units(&self) -> u32 {
        1
    }

    /// Tree shape offered to callers selecting tests
    fn available_tests(&self) -> Vec<TestOutline> {
        self.tree().outline()
    }
}

/// Scripts by id
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: BTreeMap<String, Arc<dyn TestScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in script
    pub fn builtin(config: &AppConfig) -> Self {
        let delay = Duration::from_millis(config.step_delay_ms);
        let mut registry = Self::new();
        registry.register(ThermalCycleScript::new(delay));
        registry.register(DisplayCheckScript::new(config.images_dir.clone(), delay));
        registry
    }

    /// Add a script, replacing any script with the same id
    pub fn register(&mut self, script: impl TestScript + 'static) {
        self.scripts
            .insert(script.name().to_string(), Arc::new(script));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TestScript>> {
        self.scripts.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TestScript>> {
        self.scripts.values()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ScriptRegistry::builtin(&AppConfig::default());
        assert_eq!(registry.names(), vec!["display_check", "thermal_cycle"]);
        assert_eq!(registry.get("thermal_cycle").unwrap().max_units(), 4);
        assert_eq!(registry.get("display_check").unwrap().max_units(), 2);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_default_max_units() {
        struct Empty;
        impl TestScript for Empty {
            fn name(&self) -> &str {
                "empty"
            }
            fn description(&self) -> &str {
                "no tests"
            }
            fn tree(&self) -> TestTree {
                TestTree::new()
            }
        }

        let mut registry = ScriptRegistry::new();
        registry.register(Empty);
        let script = registry.get("empty").unwrap();
        assert_eq!(script.max_units(), 1);
        assert!(script.available_tests().is_empty());
        assert_eq!(registry.len(), 1);
    }
}
