use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::action::ExecutorAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrpState {
    #[default]
    Desired,
    Claimed,
}

impl std::fmt::Display for LrpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LrpState::Desired => write!(f, "desired"),
            LrpState::Claimed => write!(f, "claimed"),
        }
    }
}

/// Transitional long-running process spec. Only the claim-and-start phase
/// lives here; the rest of its lifecycle is owned elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrpSpec {
    pub guid: String,
    pub stack: String,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub disk_mb: u64,
    #[serde(default)]
    pub actions: Vec<ExecutorAction>,
    #[serde(default)]
    pub state: LrpState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl LrpSpec {
    pub fn new(guid: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            stack: stack.into(),
            memory_mb: 0,
            disk_mb: 0,
            actions: Vec::new(),
            state: LrpState::Desired,
            claimed_by: None,
            created_at: Utc::now(),
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
