use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A step the executor performs inside the container.
///
/// The rep never interprets actions; it copies them from the desired item
/// into the container request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum ExecutorAction {
    Download {
        from: String,
        to: String,
        #[serde(default)]
        extract: bool,
    },
    Run {
        script: String,
        #[serde(default)]
        env: Vec<EnvVar>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Upload {
        from: String,
        to: String,
    },
}

impl ExecutorAction {
    pub fn run(script: impl Into<String>) -> Self {
        ExecutorAction::Run {
            script: script.into(),
            env: Vec::new(),
            timeout_ms: None,
        }
    }
}
