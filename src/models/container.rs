use serde::{Deserialize, Serialize};

use crate::models::action::ExecutorAction;

/// Body of a container-creation request sent to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    pub guid: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub actions: Vec<ExecutorAction>,
    /// Where the executor reports completion. Absent for LRPs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_url: Option<String>,
    /// Opaque bytes echoed back unchanged in the run result
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes::option"
    )]
    pub metadata: Option<Vec<u8>>,
}

/// Executor reply to a successful container creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCreated {
    pub executor_guid: String,
    pub guid: String,
}

/// Completion report posted by the executor to the callback route.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerRunResult {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub failure_reason: String,
    #[serde(default)]
    pub result: String,
    #[serde(default, with = "base64_bytes")]
    pub metadata: Vec<u8>,
}

impl ContainerRunResult {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Byte blobs travel as standard base64 strings inside JSON documents.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }

    pub mod option {
        use super::STANDARD;
        use base64::Engine;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(b) => serializer.serialize_str(&STANDARD.encode(b)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_result_decodes_base64_metadata() {
        let body = br#"{"failed":true,"failure_reason":"oom","result":"","metadata":"aGVsbG8="}"#;
        let result = ContainerRunResult::from_json(body).unwrap();
        assert!(result.failed);
        assert_eq!(result.failure_reason, "oom");
        assert_eq!(result.metadata, b"hello");
    }

    #[test]
    fn run_result_tolerates_missing_fields() {
        let result = ContainerRunResult::from_json(b"{}").unwrap();
        assert_eq!(result, ContainerRunResult::default());
    }

    #[test]
    fn run_result_rejects_non_json() {
        assert!(ContainerRunResult::from_json(b"not json").is_err());
        assert!(ContainerRunResult::from_json(br#"{"failed":"yes"}"#).is_err());
        assert!(ContainerRunResult::from_json(br#"{"metadata":"%%%"}"#).is_err());
    }

    #[test]
    fn lrp_request_omits_callback_and_metadata() {
        let req = ContainerRequest {
            guid: "lrp-1".to_string(),
            memory_mb: 128,
            disk_mb: 512,
            actions: vec![],
            complete_url: None,
            metadata: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("complete_url").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn created_response_matches_executor_fields() {
        let created: ContainerCreated =
            serde_json::from_str(r#"{"executor_guid":"executor-guid","guid":"guid-123"}"#)
                .unwrap();
        assert_eq!(created.executor_guid, "executor-guid");
        assert_eq!(created.guid, "guid-123");
    }
}
