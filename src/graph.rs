//! Dependency graph and topological level assignment (C8)
//!
//! The graph is a flat, id-keyed table of [`DependencyNode`]s. Dependents
//! are derived from the recorded dependencies in one pass when the graph is
//! built, rather than threading cyclic back-references through by hand.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::workflow::predicate::Predicate;

/// A dependency one step has on another.
#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    /// The target step must have run (success or failure) and not been skipped.
    Completion(String),
    /// The target step must have succeeded.
    Success(String),
    /// The target step's output must contain this key.
    Data(String, String),
    /// A predicate over the execution context must hold.
    Conditional(Predicate),
    /// Reserved for future resource-contention modeling; always ready.
    Resource(String),
}

impl Dependency {
    /// The step id this dependency refers to, if any (conditional/resource
    /// dependencies do not name a specific upstream step).
    pub fn target(&self) -> Option<&str> {
        match self {
            Dependency::Completion(id) | Dependency::Success(id) | Dependency::Data(id, _) => {
                Some(id)
            }
            Dependency::Conditional(_) | Dependency::Resource(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub step_id: String,
    pub dependencies: Vec<Dependency>,
    pub dependents: BTreeSet<String>,
    pub blocked_by: BTreeSet<String>,
    pub execution_level: Option<usize>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("step {0} depends on unknown step {1}")]
    MissingReference(String, String),
    #[error("cycle detected involving step {0}")]
    Cycle(String),
    #[error("no progress possible leveling the graph: {0:?} remain blocked")]
    Deadlock(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step and its dependencies. Dependent sets are rebuilt as steps
    /// are added so `dependents` always reflects every edge added so far.
    pub fn add_step(&mut self, step_id: impl Into<String>, dependencies: Vec<Dependency>) {
        let step_id = step_id.into();
        let blocked_by: BTreeSet<String> = dependencies
            .iter()
            .filter_map(Dependency::target)
            .map(str::to_string)
            .collect();

        for dep_id in &blocked_by {
            self.nodes
                .entry(dep_id.clone())
                .or_insert_with(|| DependencyNode {
                    step_id: dep_id.clone(),
                    dependencies: vec![],
                    dependents: BTreeSet::new(),
                    blocked_by: BTreeSet::new(),
                    execution_level: None,
                })
                .dependents
                .insert(step_id.clone());
        }

        self.nodes
            .entry(step_id.clone())
            .or_insert_with(|| DependencyNode {
                step_id: step_id.clone(),
                dependencies: vec![],
                dependents: BTreeSet::new(),
                blocked_by: BTreeSet::new(),
                execution_level: None,
            });
        let node = self.nodes.get_mut(&step_id).unwrap();
        node.dependencies = dependencies;
        node.blocked_by = blocked_by;
    }

    pub fn node(&self, step_id: &str) -> Option<&DependencyNode> {
        self.nodes.get(step_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validate the graph: every named dependency target must exist, and the
    /// graph must be acyclic. Returns every error found, not just the first.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut errors = Vec::new();

        for (id, node) in &self.nodes {
            for dep in &node.dependencies {
                if let Some(target) = dep.target() {
                    if !self.nodes.contains_key(target) {
                        errors.push(GraphError::MissingReference(id.clone(), target.to_string()));
                    }
                }
            }
        }

        if errors.is_empty() {
            if let Some(cycle_node) = self.find_cycle() {
                errors.push(GraphError::Cycle(cycle_node));
            }
        }

        errors
    }

    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        fn visit<'a>(
            id: &'a str,
            nodes: &'a BTreeMap<String, DependencyNode>,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Option<String> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(id.to_string()),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(node) = nodes.get(id) {
                for dep in &node.dependencies {
                    if let Some(target) = dep.target() {
                        if let Some(found) = visit(target, nodes, marks) {
                            return Some(found);
                        }
                    }
                }
            }
            marks.insert(id, Mark::Done);
            None
        }

        for id in self.nodes.keys() {
            if let Some(found) = visit(id, &self.nodes, &mut marks) {
                return Some(found);
            }
        }
        None
    }

    /// Compute parallel execution levels by iteratively draining nodes whose
    /// `blocked_by` set is empty. Assumes [`validate`] has already passed.
    pub fn calculate_execution_order(&mut self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut remaining: BTreeMap<String, BTreeSet<String>> = self
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.blocked_by.clone()))
            .collect();
        let mut levels = Vec::new();
        let mut level_index = 0;

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, blocked)| blocked.is_empty())
                .map(|(id, _)| id.clone())
                .collect();

            if ready.is_empty() {
                return Err(GraphError::Deadlock(remaining.keys().cloned().collect()));
            }

            for id in &ready {
                remaining.remove(id);
                if let Some(node) = self.nodes.get_mut(id) {
                    node.execution_level = Some(level_index);
                }
            }
            for blocked in remaining.values_mut() {
                for id in &ready {
                    blocked.remove(id);
                }
            }

            levels.push(ready);
            level_index += 1;
        }

        Ok(levels)
    }

    /// Whether a node is ready to execute given the set of steps that have
    /// completed (with success) and the current execution context, used by
    /// [`Dependency::Data`]/[`Dependency::Conditional`] evaluation.
    pub fn is_ready(
        &self,
        step_id: &str,
        completed: &HashSet<String>,
        succeeded: &HashSet<String>,
        outputs: &BTreeMap<String, crate::workflow::value::Value>,
        context: &BTreeMap<String, crate::workflow::value::Value>,
    ) -> bool {
        let Some(node) = self.nodes.get(step_id) else {
            return false;
        };
        node.dependencies.iter().all(|dep| match dep {
            Dependency::Completion(id) => completed.contains(id),
            Dependency::Success(id) => succeeded.contains(id),
            Dependency::Data(id, key) => outputs
                .get(id)
                .and_then(|v| v.get(key))
                .is_some(),
            Dependency::Conditional(predicate) => predicate.evaluate(context),
            Dependency::Resource(_) => true,
        })
    }
}
