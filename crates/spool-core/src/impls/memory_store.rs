//! InMemoryTaskStore - DashMap による TaskStore 実装
//!
//! # 並行性
//! - DashMap のシャード単位ロックなので、別グループ・別タスクの更新は互いに待たない
//! - 更新は下書き（clone）に適用し、成功したときだけ書き戻す
//! - mutation はロックを持ったまま呼ばれるので、中から store を触ってはいけない

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::{SpoolError, TaskId, TaskRecord};
use crate::ports::task_store::{Mutation, TaskFilter, TaskStore};

#[derive(Debug)]
struct Slot {
    /// 挿入順。`list` はこれで並べるので、同じミリ秒内でも投入順が保たれる
    seq: u64,
    record: TaskRecord,
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: DashMap<TaskId, Slot>,
    next_seq: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, record: TaskRecord) -> Result<TaskId, SpoolError> {
        let id = record.id;
        match self.records.entry(id) {
            Entry::Occupied(_) => Err(SpoolError::InvalidRequest(format!(
                "task id {id} already exists"
            ))),
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { seq, record });
                Ok(id)
            }
        }
    }

    fn get(&self, id: TaskId) -> Result<TaskRecord, SpoolError> {
        self.records
            .get(&id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| SpoolError::not_found(id))
    }

    fn update(&self, id: TaskId, mutation: Mutation<'_>) -> Result<TaskRecord, SpoolError> {
        let mut slot = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SpoolError::not_found(id))?;
        let mut draft = slot.record.clone();
        mutation(&mut draft)?;
        slot.record = draft.clone();
        Ok(draft)
    }

    fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let mut matched: Vec<(u64, TaskRecord)> = self
            .records
            .iter()
            .filter(|slot| filter.matches(&slot.record))
            .map(|slot| (slot.seq, slot.record.clone()))
            .collect();
        matched.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        matched.into_iter().map(|(_, record)| record).collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
