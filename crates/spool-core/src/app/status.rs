//! Status - 集計ビュー
//!
//! ストアとアドミッションの状態をその瞬間のスナップショットとして返す。

use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, TaskRecord, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

impl<'a> FromIterator<&'a TaskRecord> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = &'a TaskRecord>>(iter: I) -> Self {
        let mut counts = Self::default();
        for record in iter {
            counts.record(record.status);
        }
        counts
    }
}

/// GroupLoad は 1 グループ分のアドミッション状況
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLoad {
    pub group_id: GroupId,
    pub in_use: usize,
    pub queued: usize,
    /// snapshot 時点で読んだ capacity
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub counts: TaskCounts,
    /// 枠を使っているか待ちがあるグループだけ
    pub groups: Vec<GroupLoad>,
}
