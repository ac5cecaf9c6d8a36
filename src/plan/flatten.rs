//! Test tree flattening
//!
//! Converts a nested test definition into three aligned tables keyed by full
//! path: the ordered path list, the step table and the phase table.

use std::collections::HashMap;

use crate::models::{StepFn, TestNode, TestTree};

/// Flat view of a test tree
#[derive(Clone, Default)]
pub struct FlattenedTree {
    /// Full paths, depth-first, parents before children, siblings in order
    pub order: Vec<String>,
    pub steps: HashMap<String, Vec<StepFn>>,
    pub phases: HashMap<String, i32>,
}

impl FlattenedTree {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.phases.contains_key(path)
    }
}

/// Flatten a test tree
pub fn flatten(tree: &TestTree) -> FlattenedTree {
    let mut flat = FlattenedTree::default();
    for node in &tree.nodes {
        extract(node, None, &mut flat);
    }
    flat
}

fn extract(node: &TestNode, parent: Option<&str>, flat: &mut FlattenedTree) {
    let full = match parent {
        Some(p) => format!("{p}/{}", node.name),
        None => node.name.clone(),
    };

    flat.order.push(full.clone());
    flat.steps.insert(full.clone(), node.steps.clone());
    flat.phases.insert(full.clone(), node.exec_order);

    for child in &node.children {
        extract(child, Some(&full), flat);
    }
}
