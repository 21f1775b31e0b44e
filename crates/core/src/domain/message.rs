// Message Domain Model
// Bodies on both queues are UTF-8 JSON objects

use super::error::{DomainError, Result};
use super::queue::QueueName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON object carried in a message body
pub type Payload = serde_json::Map<String, Value>;

/// Key holding the task discriminator in every message body
pub const TASK_FIELD: &str = "task";

/// Task type discriminator (e.g. `List`, `Reprice`, `Fulfill`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Validated constructor for externally supplied task names
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(DomainError::InvalidTaskType("task type is empty".to_string()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message on the shared pending-tasks queue
///
/// Tells the dispatch manager that `target` has work waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTaskMessage {
    pub target: QueueName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskType>,

    #[serde(flatten)]
    pub extra: Payload,
}

impl PendingTaskMessage {
    pub fn new(target: QueueName, task: Option<TaskType>) -> Self {
        Self {
            target,
            task,
            extra: Payload::new(),
        }
    }

    /// Decode a broker body; missing or invalid `target` is malformed
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| DomainError::MalformedMessage(e.to_string()))
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Message on a tenant queue, consumed by a worker runtime
///
/// Only the `task` discriminator is interpreted; the rest belongs to the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    payload: Payload,
}

impl TaskMessage {
    pub fn new(task: TaskType, mut payload: Payload) -> Self {
        payload.insert(TASK_FIELD.to_string(), Value::String(task.0));
        Self { payload }
    }

    /// Decode a broker body
    ///
    /// Valid JSON that is not an object decodes to an empty payload (no task).
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| DomainError::MalformedMessage(e.to_string()))?;

        let payload = match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        };

        Ok(Self { payload })
    }

    pub fn task(&self) -> Option<TaskType> {
        self.payload
            .get(TASK_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(TaskType::new)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_message_keeps_extra_fields() {
        let body = br#"{"target":"Shopify.1.acme","task":"List","user_id":"1"}"#;
        let msg = PendingTaskMessage::from_slice(body).unwrap();

        assert_eq!(msg.target.as_str(), "Shopify.1.acme");
        assert_eq!(msg.task, Some(TaskType::new("List")));
        assert_eq!(msg.extra.get("user_id"), Some(&json!("1")));
    }

    #[test]
    fn test_pending_message_without_target_is_malformed() {
        let result = PendingTaskMessage::from_slice(br#"{"task":"List"}"#);
        assert!(matches!(result, Err(DomainError::MalformedMessage(_))));
    }

    #[test]
    fn test_pending_message_invalid_json_is_malformed() {
        assert!(PendingTaskMessage::from_slice(b"{not json").is_err());
        assert!(PendingTaskMessage::from_slice(br#"{"target":""}"#).is_err());
    }

    #[test]
    fn test_task_message_non_object_has_no_task() {
        let msg = TaskMessage::from_slice(b"[1,2,3]").unwrap();
        assert!(msg.task().is_none());
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn test_task_message_empty_task_is_none() {
        let msg = TaskMessage::from_slice(br#"{"task":""}"#).unwrap();
        assert!(msg.task().is_none());
    }

    #[test]
    fn test_task_message_new_sets_discriminator() {
        let mut payload = Payload::new();
        payload.insert("fba_item_id".to_string(), json!("abc"));
        payload.insert("task".to_string(), json!("Overwritten"));

        let msg = TaskMessage::new(TaskType::new("Reprice"), payload);

        assert_eq!(msg.task(), Some(TaskType::new("Reprice")));
        assert_eq!(
            msg.into_value(),
            json!({"task": "Reprice", "fba_item_id": "abc"})
        );
    }

    #[test]
    fn test_task_type_parse_rejects_blank() {
        assert!(TaskType::parse("  ").is_err());
        assert_eq!(TaskType::parse("Track").unwrap().as_str(), "Track");
    }
}
