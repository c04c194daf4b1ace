//! TaskStore port - タスク状態の正本（source of truth）
//!
//! # 設計原則
//! - 同じ id への更新は直列化される。違う id 同士は互いに待たない（グローバルロックなし）
//! - 更新は record のコピーに対して行い、成功したときだけ反映する（途中状態は見えない）
//! - レコードを削除する操作はない。プロセスの寿命の間だけ保持する

use crate::domain::{GroupId, SpoolError, TaskId, TaskRecord, TaskStatus};

/// Mutation はレコードのロックの中で適用される 1 回分の変更
///
/// `Err` を返すと保存済みのレコードは変わらない
pub type Mutation<'a> = &'a mut dyn FnMut(&mut TaskRecord) -> Result<(), SpoolError>;

/// TaskFilter は [`TaskStore::list`] の絞り込み。`None` は全件に一致
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub group_id: Option<GroupId>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.group_id
            .as_ref()
            .is_none_or(|group| *group == record.group_id)
            && self.status.is_none_or(|status| status == record.status)
    }
}

pub trait TaskStore: Send + Sync {
    /// 新しいレコードを入れる。id は再利用しない
    fn create(&self, record: TaskRecord) -> Result<TaskId, SpoolError>;

    fn get(&self, id: TaskId) -> Result<TaskRecord, SpoolError>;

    /// `mutation` を原子的に適用し、保存後のレコードを返す
    fn update(&self, id: TaskId, mutation: Mutation<'_>) -> Result<TaskRecord, SpoolError>;

    /// 一致するレコードのスナップショット。新しい順
    fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
