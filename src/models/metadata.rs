//! Versioned encoding of the task carried through the executor as opaque
//! container metadata.
//!
//! Current documents look like `{"version": 1, "task": {...}}`. A bare task
//! document without a `version` key is still accepted so that results for
//! containers created by older reps resolve.

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::models::task::Task;

pub const METADATA_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    task: &'a Task,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    task: Task,
}

pub fn encode_task(task: &Task) -> Result<Vec<u8>, MetadataError> {
    Ok(serde_json::to_vec(&EnvelopeRef {
        version: METADATA_VERSION,
        task,
    })?)
}

pub fn decode_task(bytes: &[u8]) -> Result<Task, MetadataError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if value.get("version").is_none() {
        return Ok(serde_json::from_value(value)?);
    }

    let envelope: Envelope = serde_json::from_value(value)?;
    if envelope.version != METADATA_VERSION {
        return Err(MetadataError::UnsupportedVersion(envelope.version));
    }
    Ok(envelope.task)
}
