//! Errors - 呼び出し側に返すエラー
//!
//! 実行時のエラー（engine の失敗）はここには現れず、タスクの `error` として記録される。
//! `TimedOut` と `AlreadyTerminal` は結果の一種なので outcome.rs 側にある。

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpoolError {
    /// レコードを作る前に弾いた
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    NotFound(String),

    /// 状態機械が許さない遷移をしようとした
    #[error("invalid transition from {from} to {to} for {task_id}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task manager is shutting down")]
    ShuttingDown,
}

impl SpoolError {
    pub fn not_found(task_id: impl ToString) -> Self {
        Self::NotFound(task_id.to_string())
    }
}
