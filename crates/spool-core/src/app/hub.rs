//! CompletionHub - 終了待ちとキャンセル
//!
//! 生きているタスクごとに 1 本の watch チャネル（一度だけ値が入る promise）と
//! CancellationToken を持つ。
//!
//! - `wait` はストアを先に読む。すでに終わっていれば即座に返す
//! - 終了の通知は Runner がストアを更新した後に `resolve` で行う。全 waiter が同じ値を受け取る
//! - `wait` のタイムアウトはタスクに一切触れない

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::admission::GroupAdmission;
use crate::domain::{CancelOutcome, SpoolError, TaskId, TaskStatus, TaskSummary, WaitOutcome};
use crate::ports::{Clock, TaskStore};

struct LiveTask {
    cancel: CancellationToken,
    done: watch::Sender<Option<TaskSummary>>,
}

pub struct CompletionHub {
    store: Arc<dyn TaskStore>,
    admission: Arc<GroupAdmission>,
    clock: Arc<dyn Clock>,
    live: DashMap<TaskId, LiveTask>,
    /// 全タスクのトークンの親。shutdown でキャンセルされる
    root: CancellationToken,
}

impl CompletionHub {
    pub fn new(
        store: Arc<dyn TaskStore>,
        admission: Arc<GroupAdmission>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            admission,
            clock,
            live: DashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// `id` の追跡を始め、Runner が見るべきトークンを返す
    pub fn register(&self, id: TaskId) -> CancellationToken {
        let cancel = self.root.child_token();
        let (done, _) = watch::channel(None);
        self.live.insert(
            id,
            LiveTask {
                cancel: cancel.clone(),
                done,
            },
        );
        cancel
    }

    /// レコードを作れなかったタスクの追跡をやめる
    pub fn forget(&self, id: TaskId) {
        self.live.remove(&id);
    }

    /// 終端の summary を全 waiter に配る。同じタスクへの 2 回目以降は何もしない
    pub fn resolve(&self, summary: TaskSummary) {
        if let Some((_, live)) = self.live.remove(&summary.id) {
            debug!(task_id = %summary.id, status = %summary.status, "waking waiters");
            live.done.send_replace(Some(summary));
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// `id` が終端になるか `timeout` が過ぎるまで待つ
    pub async fn wait(&self, id: TaskId, timeout: Duration) -> Result<WaitOutcome, SpoolError> {
        let started = Instant::now();
        let record = self.store.get(id)?;
        if record.status.is_terminal() {
            return Ok(WaitOutcome::Finished {
                task: record.into(),
                waited: started.elapsed(),
            });
        }

        let Some(mut rx) = self.live.get(&id).map(|live| live.done.subscribe()) else {
            // 読んでから購読するまでの間に終わった
            return self.settle(id, started);
        };

        let resolved = tokio::time::timeout(timeout, async {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|value| (*value).clone())
        })
        .await;

        match resolved {
            Ok(Some(task)) => Ok(WaitOutcome::Finished {
                task,
                waited: started.elapsed(),
            }),
            Ok(None) => self.settle(id, started),
            Err(_) => {
                let task = self.store.get(id)?.into();
                debug!(task_id = %id, "wait timed out");
                Ok(WaitOutcome::TimedOut {
                    task,
                    waited: started.elapsed(),
                })
            }
        }
    }

    fn settle(&self, id: TaskId, started: Instant) -> Result<WaitOutcome, SpoolError> {
        let record = self.store.get(id)?;
        let waited = started.elapsed();
        let task = TaskSummary::from(record);
        if task.status.is_terminal() {
            Ok(WaitOutcome::Finished { task, waited })
        } else {
            Ok(WaitOutcome::TimedOut { task, waited })
        }
    }

    /// `id` をキャンセルする
    ///
    /// - Pending: その場で Cancelled にし、グループの待ち行列から外す
    /// - Running: フラグを立てるだけ。次の checkpoint で止まる
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome, SpoolError> {
        let now = self.clock.now();
        let mut outcome = CancelOutcome::Cancelled;
        let record = self.store.update(id, &mut |r| {
            outcome = match r.status {
                TaskStatus::Pending => {
                    r.cancel(now)?;
                    CancelOutcome::Cancelled
                }
                TaskStatus::Running => {
                    r.request_cancel(now);
                    CancelOutcome::Requested
                }
                status => CancelOutcome::AlreadyTerminal { status },
            };
            Ok(())
        })?;

        match outcome {
            CancelOutcome::Cancelled => {
                self.admission.withdraw(&record.group_id, id);
                self.signal(id);
                info!(task_id = %id, group_id = %record.group_id, status = %record.status, "pending task cancelled");
                self.resolve(TaskSummary::from(record));
            }
            CancelOutcome::Requested => {
                self.signal(id);
                info!(task_id = %id, group_id = %record.group_id, "cancellation requested");
            }
            CancelOutcome::AlreadyTerminal { status } => {
                debug!(task_id = %id, status = %status, "cancel after completion ignored");
            }
        }
        Ok(outcome)
    }

    fn signal(&self, id: TaskId) {
        if let Some(live) = self.live.get(&id) {
            live.cancel.cancel();
        }
    }

    /// 生きている全タスクのトークンをキャンセルする
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupId, TaskRecord};
    use crate::impls::{FixedCapacity, InMemoryTaskStore};
    use crate::ports::SystemClock;
    use chrono::Utc;
    use ulid::Ulid;

    fn hub() -> (Arc<InMemoryTaskStore>, Arc<CompletionHub>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let admission = Arc::new(GroupAdmission::new(Arc::new(FixedCapacity(1))));
        let hub = Arc::new(CompletionHub::new(
            store.clone(),
            admission,
            Arc::new(SystemClock),
        ));
        (store, hub)
    }

    fn submit(store: &InMemoryTaskStore, hub: &CompletionHub) -> (TaskId, CancellationToken) {
        let id = TaskId::from_ulid(Ulid::new());
        let token = hub.register(id);
        store
            .create(TaskRecord::new(
                id,
                GroupId::parse("g").unwrap(),
                "t",
                serde_json::json!("x"),
                Utc::now(),
            ))
            .unwrap();
        (id, token)
    }

    fn complete(store: &InMemoryTaskStore, hub: &CompletionHub, id: TaskId) -> TaskSummary {
        store.update(id, &mut |r| r.start(Utc::now())).unwrap();
        let record = store
            .update(id, &mut |r| r.complete(serde_json::json!({"ok": true}), Utc::now()))
            .unwrap();
        let summary = TaskSummary::from(record);
        hub.resolve(summary.clone());
        summary
    }

    #[tokio::test]
    async fn wait_on_unknown_task_is_not_found() {
        let (_, hub) = hub();
        let err = hub
            .wait(TaskId::from_ulid(Ulid::new()), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SpoolError::NotFound(_)));
    }

    #[tokio::test]
    async fn all_waiters_see_the_same_outcome() {
        let (store, hub) = hub();
        let (id, _) = submit(&store, &hub);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let hub = hub.clone();
                tokio::spawn(async move { hub.wait(id, Duration::from_secs(5)).await })
            })
            .collect();
        tokio::task::yield_now().await;

        let summary = complete(&store, &hub, id);
        for w in waiters {
            let outcome = w.await.unwrap().unwrap();
            assert!(!outcome.is_timed_out());
            assert_eq!(outcome.task(), &summary);
        }

        let late = hub.wait(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(late.task(), &summary);
        assert_eq!(hub.live_count(), 0);
    }

    #[tokio::test]
    async fn timeout_leaves_task_alone() {
        let (store, hub) = hub();
        let (id, token) = submit(&store, &hub);

        let outcome = hub.wait(id, Duration::from_millis(20)).await.unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(outcome.task().status, TaskStatus::Pending);
        assert!(!token.is_cancelled());
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_pending_resolves_immediately() {
        let (store, hub) = hub();
        let (id, token) = submit(&store, &hub);
        let waiter = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait(id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(hub.cancel(id).unwrap(), CancelOutcome::Cancelled);
        assert!(token.is_cancelled());

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.task().status, TaskStatus::Cancelled);
        assert!(outcome.task().cancel_requested);
    }

    #[tokio::test]
    async fn cancel_running_only_latches() {
        let (store, hub) = hub();
        let (id, token) = submit(&store, &hub);
        store.update(id, &mut |r| r.start(Utc::now())).unwrap();

        assert_eq!(hub.cancel(id).unwrap(), CancelOutcome::Requested);
        assert!(token.is_cancelled());
        let record = store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.cancel_requested);

        assert_eq!(hub.cancel(id).unwrap(), CancelOutcome::Requested);
    }

    #[tokio::test]
    async fn cancel_terminal_changes_nothing() {
        let (store, hub) = hub();
        let (id, _) = submit(&store, &hub);
        complete(&store, &hub, id);
        let before = store.get(id).unwrap();

        assert_eq!(
            hub.cancel(id).unwrap(),
            CancelOutcome::AlreadyTerminal {
                status: TaskStatus::Completed
            }
        );
        assert_eq!(store.get(id).unwrap(), before);
    }

    #[tokio::test]
    async fn cancel_all_trips_every_token() {
        let (store, hub) = hub();
        let (_, a) = submit(&store, &hub);
        let (_, b) = submit(&store, &hub);

        hub.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
