use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness announcement for one rep process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepPresence {
    pub rep_id: String,
    pub stack: String,
}

impl RepPresence {
    pub fn new(rep_id: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            rep_id: rep_id.into(),
            stack: stack.into(),
        }
    }
}

/// Fresh host identity, generated once per process start.
pub fn generate_rep_id() -> String {
    Uuid::new_v4().to_string()
}
