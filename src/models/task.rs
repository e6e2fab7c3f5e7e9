use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::action::ExecutorAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Claimed,
    Running,
    Completed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Claimed => write!(f, "claimed"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
        }
    }
}

/// A one-off unit of work with a definite completion signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub guid: String,
    pub stack: String,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub disk_mb: u64,
    #[serde(default)]
    pub actions: Vec<ExecutorAction>,
    #[serde(default)]
    pub state: TaskState,
    /// Rep that won the claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    /// Container the executor runs the task in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_guid: Option<String>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub failure_reason: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(guid: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            stack: stack.into(),
            memory_mb: 0,
            disk_mb: 0,
            actions: Vec::new(),
            state: TaskState::Pending,
            claimed_by: None,
            container_guid: None,
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_resources(mut self, memory_mb: u64, disk_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self.disk_mb = disk_mb;
        self
    }

    pub fn with_action(mut self, action: ExecutorAction) -> Self {
        self.actions.push(action);
        self
    }
}
