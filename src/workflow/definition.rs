//! Workflow and step definitions (C3 data model)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::predicate::{Predicate, PredicateParseError};
use super::value::Value;
use crate::graph::Dependency;

/// The kind of work a step performs. Closed by design: a new kind is added
/// by extending this enum and registering an executor for it, not by
/// runtime plugin loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    LlmQuery,
    RemoteTool,
    FileOp,
    Shell,
    UiAction,
    Conditional,
    Loop,
    Wait,
    Validation,
    Transform,
    Notify,
    ExternalCall,
    Custom,
}

/// How a failed step should affect the rest of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    #[default]
    Stop,
    Continue,
    Rollback,
}

/// A dependency as written in a workflow definition, before being resolved
/// into the graph's [`Dependency`] (which carries a parsed [`Predicate`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySpec {
    Completion { step: String },
    Success { step: String },
    Data { step: String, key: String },
    Conditional { expression: String },
    Resource { name: String },
}

impl DependencySpec {
    pub fn resolve(&self) -> Result<Dependency, PredicateParseError> {
        Ok(match self {
            DependencySpec::Completion { step } => Dependency::Completion(step.clone()),
            DependencySpec::Success { step } => Dependency::Success(step.clone()),
            DependencySpec::Data { step, key } => Dependency::Data(step.clone(), key.clone()),
            DependencySpec::Conditional { expression } => {
                Dependency::Conditional(Predicate::parse(expression)?)
            }
            DependencySpec::Resource { name } => Dependency::Resource(name.clone()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
    pub target: String,
    pub parameters: Value,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// A condition gating whether this step runs at all (not a dependency on
    /// another step's outcome); parsed once at construction time.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub retry_limit: u32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub parallel_group: Option<String>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, kind: StepKind, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            target: target.into(),
            parameters: Value::Map(BTreeMap::new()),
            dependencies: vec![],
            condition: None,
            retry_limit: 0,
            timeout: Duration::from_secs(30),
            parallel_group: None,
        }
    }

    /// Parse `condition` up front so a malformed condition is a construction
    /// error, never a runtime surprise.
    pub fn parsed_condition(&self) -> Result<Option<Predicate>, PredicateParseError> {
        self.condition.as_deref().map(Predicate::parse).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
    #[serde(with = "duration_secs")]
    pub global_timeout: Duration,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("step {0} has an invalid condition: {1}")]
    InvalidCondition(String, PredicateParseError),
    #[error("step {0} has an invalid dependency expression: {1}")]
    InvalidDependency(String, PredicateParseError),
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("graph error: {0}")]
    Graph(#[from] crate::graph::GraphError),
    #[error("step {0} has kind {1:?} which has no registered rollback handler, but failure_strategy is rollback")]
    NotRollbackable(String, StepKind),
}

impl WorkflowDefinition {
    /// Build and validate the dependency graph, parse every condition, and
    /// -- when `failure_strategy` is `Rollback` -- reject the definition if
    /// any step's kind has no registered reverse handler.
    pub fn validate(
        &self,
        rollbackable_kinds: &[StepKind],
    ) -> Result<crate::graph::DependencyGraph, Vec<DefinitionError>> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut graph = crate::graph::DependencyGraph::new();

        for step in &self.steps {
            if !seen.insert(step.id.clone()) {
                errors.push(DefinitionError::DuplicateStepId(step.id.clone()));
            }
            if let Err(e) = step.parsed_condition() {
                errors.push(DefinitionError::InvalidCondition(step.id.clone(), e));
            }

            let mut deps = Vec::with_capacity(step.dependencies.len());
            let mut dep_ok = true;
            for dep in &step.dependencies {
                match dep.resolve() {
                    Ok(resolved) => deps.push(resolved),
                    Err(e) => {
                        errors.push(DefinitionError::InvalidDependency(step.id.clone(), e));
                        dep_ok = false;
                    }
                }
            }
            if dep_ok {
                graph.add_step(step.id.clone(), deps);
            }

            if self.failure_strategy == FailureStrategy::Rollback
                && !rollbackable_kinds.contains(&step.kind)
            {
                errors.push(DefinitionError::NotRollbackable(step.id.clone(), step.kind));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let graph_errors = graph.validate();
        if !graph_errors.is_empty() {
            return Err(graph_errors.into_iter().map(DefinitionError::from).collect());
        }

        Ok(graph)
    }
}
