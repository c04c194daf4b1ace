//! Task record: the single source of truth for one submitted task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SpoolError;
use super::group::GroupId;
use super::ids::TaskId;
use super::state::TaskStatus;

/// Name given to tasks submitted without one.
pub const DEFAULT_TASK_NAME: &str = "add_memory";

/// Metadata + payload for a submitted task.
///
/// Design:
/// - All state transitions happen through the methods below, which enforce
///   the state machine and the set-once timestamps.
/// - The store applies them atomically; nobody holds a `&mut TaskRecord` outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub group_id: GroupId,
    pub name: String,

    /// Opaque ingestion input. Never inspected here.
    pub payload: serde_json::Value,

    pub status: TaskStatus,

    /// 0-100, reported by the engine while Running.
    pub progress: u8,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Latched by cancel; never cleared.
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        group_id: GroupId,
        name: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            payload,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), SpoolError> {
        if !self.status.can_transition_to(next) {
            return Err(SpoolError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Timestamps never go backwards relative to the previous one.
    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.updated_at)
    }

    /// Pending -> Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SpoolError> {
        self.transition(TaskStatus::Running)?;
        let now = self.stamp(now);
        self.started_at.get_or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// Running -> Completed.
    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), SpoolError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.progress = 100;
        self.finish(now);
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), SpoolError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.finish(now);
        Ok(())
    }

    /// Pending | Running -> Cancelled. Any partial result is dropped.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), SpoolError> {
        self.transition(TaskStatus::Cancelled)?;
        self.cancel_requested = true;
        self.result = None;
        self.finish(now);
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        let now = self.stamp(now);
        self.finished_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Latch the cancel flag. Returns `false` if it was already set.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        self.updated_at = self.stamp(now);
        true
    }

    /// Progress only moves while Running and is clamped to 0-100.
    pub fn set_progress(&mut self, progress: u8, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.progress = progress.min(100);
        self.updated_at = self.stamp(now);
        true
    }
}
