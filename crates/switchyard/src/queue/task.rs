//! Task - the unit of work carried by the queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Error building a task from arbitrary JSON
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A queued unit of work.
///
/// The payload is fixed at construction; consumers get read access only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    id: Uuid,
    payload: Map<String, Value>,
    enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// Build a task from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self, TaskError> {
        match value {
            Value::Object(payload) => Ok(Self::new(payload)),
            Value::Null => Err(TaskError::NotAnObject("null")),
            Value::Bool(_) => Err(TaskError::NotAnObject("a boolean")),
            Value::Number(_) => Err(TaskError::NotAnObject("a number")),
            Value::String(_) => Err(TaskError::NotAnObject("a string")),
            Value::Array(_) => Err(TaskError::NotAnObject("an array")),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Look up one payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

impl From<Map<String, Value>> for Task {
    fn from(payload: Map<String, Value>) -> Self {
        Self::new(payload)
    }
}
