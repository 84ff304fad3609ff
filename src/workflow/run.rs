//! Workflow run state: status, per-step results, execution context

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::definition::StepKind;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub output_data: Value,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub attempts: u32,
    pub kind: StepKind,
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn skipped(kind: StepKind) -> Self {
        let now = Utc::now();
        Self {
            success: false,
            output_data: Value::Null,
            error: None,
            execution_time: Duration::ZERO,
            attempts: 0,
            kind,
            skipped: true,
            started_at: now,
            completed_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub definition_id: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_level: usize,
    pub step_results: BTreeMap<String, StepResult>,
    pub execution_context: BTreeMap<String, Value>,
}

impl WorkflowRun {
    pub fn new(definition_id: impl Into<String>, input: BTreeMap<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            definition_id: definition_id.into(),
            status: WorkflowStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            current_level: 0,
            step_results: BTreeMap::new(),
            execution_context: input,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_starts_pending_and_not_terminal() {
        let run = WorkflowRun::new("wf", BTreeMap::new());
        assert_eq!(run.status, WorkflowStatus::Pending);
        assert!(!run.is_terminal());
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut run = WorkflowRun::new("wf", BTreeMap::new());
        run.status = WorkflowStatus::Cancelled;
        assert!(run.is_terminal());
    }
}
