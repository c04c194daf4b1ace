//! Serializable views handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::group::GroupId;
use super::ids::TaskId;
use super::state::TaskStatus;
use super::task::TaskRecord;

/// Task status for API responses.
///
/// The payload is deliberately left out; callers already have it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub group_id: GroupId,
    pub name: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            group_id: record.group_id.clone(),
            name: record.name.clone(),
            status: record.status,
            progress: record.progress,
            cancel_requested: record.cancel_requested,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

impl From<TaskRecord> for TaskSummary {
    fn from(record: TaskRecord) -> Self {
        Self::from(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn optional_fields_are_omitted() {
        let record = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            GroupId::parse("g").unwrap(),
            "n",
            serde_json::json!("body"),
            Utc::now(),
        );
        let v = serde_json::to_value(TaskSummary::from(&record)).unwrap();

        assert_eq!(v["status"], "pending");
        assert_eq!(v["group_id"], "g");
        assert!(v.get("result").is_none());
        assert!(v.get("error").is_none());
        assert!(v.get("started_at").is_none());
        assert!(v.get("payload").is_none());
    }
}
