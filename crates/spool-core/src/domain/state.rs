//! State - タスクの状態と遷移規則
//!
//! # 状態遷移
//! - Pending -> Running -> Completed / Failed / Cancelled
//! - Pending -> Cancelled（キューから外された場合のみ Running を飛ばせる）
//!
//! 終端状態（Completed / Failed / Cancelled）からは二度と遷移しない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::SpoolError;

/// TaskStatus は取り込みタスクの状態を表現
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 受け付け済み。グループの枠待ち
    Pending,

    /// 枠を保持し、engine を呼び出し中
    Running,

    Completed,

    Failed,

    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// 終端状態か（これ以上遷移しない）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running | TaskStatus::Cancelled)
                | (
                    TaskStatus::Running,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
                )
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SpoolError;

    /// 大文字小文字は区別しない。知らない値には受け付ける値の一覧を返す
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
                SpoolError::InvalidRequest(format!(
                    "invalid status '{s}'. Valid statuses: {}",
                    valid.join(", ")
                ))
            })
    }
}
