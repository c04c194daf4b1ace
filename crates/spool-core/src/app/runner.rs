//! Runner - 1 タスク分の実行
//!
//! 流れ: Ticket の許可待ち（キャンセルと競合）→ checkpoint → engine.ingest → 終端状態 → 許可の解放 → waiter を起こす
//!
//! Pending→Running は [`MarkRunning`] が枠の受け渡しと同じロックの中で行う。
//! 許可を受け取った時点でレコードはもう Running になっている。
//!
//! # キャンセル
//! - 協調的。engine が checkpoint を持たなければ最後まで走り、その後でフラグを見て Cancelled にする
//! - 終端状態の決定はストアの原子的更新の中で `cancel_requested` を見て行う（完了との競合で取りこぼさない）
//! - engine の panic は catch_unwind で捕まえて Failed にする。他のタスクには波及しない

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::admission::{GrantHook, Permit, Ticket};
use super::hub::CompletionHub;
use crate::domain::{TaskId, TaskStatus, TaskSummary};
use crate::ports::{Clock, EngineError, IngestContext, IngestionEngine, ProgressSink, TaskStore};

/// MarkRunning は枠を渡す瞬間にレコードを Pending→Running にする
///
/// レコードがもう Pending でなければ（キャンセル済みなど）枠を断る。
pub struct MarkRunning {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl MarkRunning {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl GrantHook for MarkRunning {
    fn on_grant(&self, task_id: TaskId) -> bool {
        let now = self.clock.now();
        match self.store.update(task_id, &mut |r| r.start(now)) {
            Ok(_) => true,
            Err(err) => {
                debug!(task_id = %task_id, reason = %err, "not started");
                false
            }
        }
    }
}

/// engine 呼び出しの結末。キャンセルフラグとの突き合わせ前
enum Verdict {
    Complete(Value),
    Fail(String),
    Cancel,
}

pub struct Runner {
    store: Arc<dyn TaskStore>,
    hub: Arc<CompletionHub>,
    engine: Arc<dyn IngestionEngine>,
    clock: Arc<dyn Clock>,
}

impl Runner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        hub: Arc<CompletionHub>,
        engine: Arc<dyn IngestionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hub,
            engine,
            clock,
        }
    }

    /// タスクを終端状態まで進める
    pub async fn run(self: Arc<Self>, ticket: Ticket, cancel: CancellationToken) {
        let span = info_span!("spool.task", task_id = %ticket.task_id(), group_id = %ticket.group());
        self.execute(ticket, cancel).instrument(span).await
    }

    async fn execute(self: Arc<Self>, mut ticket: Ticket, cancel: CancellationToken) {
        let id = ticket.task_id();
        let group = ticket.group().clone();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            granted = ticket.granted() => match granted {
                Ok(permit) => Some(permit),
                Err(err) => {
                    debug!(reason = %err, "admission ended without a slot");
                    None
                }
            },
        };
        let Some(permit) = permit else {
            // 枠を受け取り済みならレコードは Running。終端にしてから枠を返す
            self.abandon(id);
            drop(ticket);
            return;
        };

        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(err) => {
                warn!(reason = %err, "record vanished after admission");
                drop(permit);
                return;
            }
        };
        info!(status = %record.status, "task started");

        let verdict = if cancel.is_cancelled() {
            Verdict::Cancel
        } else {
            let sink: Arc<dyn ProgressSink> = self.clone();
            let ctx = IngestContext::new(id, group, cancel.clone(), sink);
            let call = AssertUnwindSafe(self.engine.ingest(&record.payload, &ctx));
            match call.catch_unwind().await {
                Ok(Ok(value)) => Verdict::Complete(value),
                Ok(Err(EngineError::Interrupted)) if cancel.is_cancelled() => Verdict::Cancel,
                Ok(Err(err)) => Verdict::Fail(err.to_string()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(panic = %message, "engine panicked");
                    Verdict::Fail(format!("engine panicked: {message}"))
                }
            }
        };

        self.finish(id, verdict, &cancel, permit);
    }

    fn finish(&self, id: TaskId, verdict: Verdict, cancel: &CancellationToken, permit: Permit) {
        let now = self.clock.now();
        let shutting_down = cancel.is_cancelled();
        let updated = self.store.update(id, &mut |r| {
            if r.cancel_requested || shutting_down {
                return r.cancel(now);
            }
            match &verdict {
                Verdict::Complete(value) => r.complete(value.clone(), now),
                Verdict::Fail(message) => r.fail(message.clone(), now),
                Verdict::Cancel => r.cancel(now),
            }
        });

        match updated {
            Ok(record) => {
                drop(permit);
                match record.status {
                    TaskStatus::Failed => warn!(
                        status = %record.status,
                        error = record.error.as_deref().unwrap_or_default(),
                        "task failed"
                    ),
                    _ => info!(status = %record.status, "task finished"),
                }
                self.hub.resolve(TaskSummary::from(record));
            }
            Err(err) => {
                warn!(reason = %err, "terminal update rejected");
                self.abandon(id);
                drop(permit);
            }
        }
    }

    /// エンジンを呼ばずに終わったタスクを Cancelled にする。終端済みならそのまま
    fn abandon(&self, id: TaskId) {
        let now = self.clock.now();
        let updated = self.store.update(id, &mut |r| {
            if !r.status.is_terminal() {
                r.cancel(now)?;
            }
            Ok(())
        });
        match updated {
            Ok(record) => {
                info!(status = %record.status, "task finished without running");
                self.hub.resolve(TaskSummary::from(record));
            }
            Err(err) => warn!(reason = %err, "could not settle abandoned task"),
        }
    }
}

impl ProgressSink for Runner {
    fn report(&self, task_id: TaskId, progress: u8) {
        let now = self.clock.now();
        let updated = self.store.update(task_id, &mut |r| {
            r.set_progress(progress, now);
            Ok(())
        });
        if let Err(err) = updated {
            debug!(task_id = %task_id, progress, reason = %err, "progress dropped");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::admission::GroupAdmission;
    use crate::domain::{CancelOutcome, GroupId, TaskRecord};
    use crate::impls::{FixedCapacity, InMemoryTaskStore};
    use crate::ports::SystemClock;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use ulid::Ulid;

    /// payload で振る舞いを変える: `"ok"` / `"fail"` / `"panic"` / `"block"`（キャンセルまで待つ）/ `"ignore-cancel"`
    struct ScriptedEngine {
        entered: Notify,
    }

    #[async_trait]
    impl IngestionEngine for ScriptedEngine {
        async fn ingest(&self, payload: &Value, ctx: &IngestContext) -> Result<Value, EngineError> {
            self.entered.notify_one();
            match payload.as_str() {
                Some("fail") => Err(EngineError::failed("graph write failed")),
                Some("panic") => panic!("boom"),
                Some("block") => {
                    ctx.report_progress(40);
                    ctx.cancelled().await;
                    ctx.checkpoint()?;
                    Ok(Value::Null)
                }
                Some("ignore-cancel") => {
                    ctx.cancelled().await;
                    Ok(serde_json::json!({"partial": true}))
                }
                _ => Ok(serde_json::json!({"episodes": 1})),
            }
        }
    }

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        admission: Arc<GroupAdmission>,
        hub: Arc<CompletionHub>,
        runner: Arc<Runner>,
        engine: Arc<ScriptedEngine>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(SystemClock);
        let admission = Arc::new(GroupAdmission::with_hook(
            Arc::new(FixedCapacity(1)),
            Arc::new(MarkRunning::new(store.clone(), clock.clone())),
        ));
        let hub = Arc::new(CompletionHub::new(
            store.clone(),
            admission.clone(),
            clock.clone(),
        ));
        let engine = Arc::new(ScriptedEngine {
            entered: Notify::new(),
        });
        let runner = Arc::new(Runner::new(store.clone(), hub.clone(), engine.clone(), clock));
        Fixture {
            store,
            admission,
            hub,
            runner,
            engine,
        }
    }

    impl Fixture {
        fn spawn(&self, payload: &str) -> (TaskId, tokio::task::JoinHandle<()>) {
            let id = TaskId::from_ulid(Ulid::new());
            let group = GroupId::parse("g").unwrap();
            let token = self.hub.register(id);
            self.store
                .create(TaskRecord::new(
                    id,
                    group.clone(),
                    "t",
                    Value::String(payload.to_string()),
                    Utc::now(),
                ))
                .unwrap();
            let ticket = self.admission.enqueue(&group, id);
            let handle = tokio::spawn(self.runner.clone().run(ticket, token));
            (id, handle)
        }
    }

    #[tokio::test]
    async fn success_completes_with_result() {
        let f = fixture();
        let (id, handle) = f.spawn("ok");
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!({"episodes": 1})));
        assert_eq!(record.progress, 100);
        assert!(record.error.is_none());
        assert!(record.started_at.is_some() && record.finished_at.is_some());
        assert_eq!(f.hub.live_count(), 0);
    }

    #[tokio::test]
    async fn engine_error_fails_without_result() {
        let f = fixture();
        let (id, handle) = f.spawn("fail");
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("graph write failed"));
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn engine_panic_is_contained() {
        let f = fixture();
        let (id, handle) = f.spawn("panic");
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("boom"));

        // 枠は戻っている。次のタスクも走る
        let (next, handle) = f.spawn("ok");
        handle.await.unwrap();
        assert_eq!(f.store.get(next).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_at_checkpoint_discards_result() {
        let f = fixture();
        let (id, handle) = f.spawn("block");
        f.engine.entered.notified().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.store.get(id).unwrap().progress != 40 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(f.hub.cancel(id).unwrap(), CancelOutcome::Requested);
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn result_after_cancel_flag_is_discarded() {
        let f = fixture();
        let (id, handle) = f.spawn("ignore-cancel");
        f.engine.entered.notified().await;

        f.hub.cancel(id).unwrap();
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_admission_never_runs() {
        let f = fixture();
        let (first, first_handle) = f.spawn("block");
        f.engine.entered.notified().await;

        let (queued, queued_handle) = f.spawn("ok");
        assert_eq!(f.hub.cancel(queued).unwrap(), CancelOutcome::Cancelled);
        queued_handle.await.unwrap();

        let record = f.store.get(queued).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.started_at.is_none());

        f.hub.cancel(first).unwrap();
        first_handle.await.unwrap();
    }

    #[tokio::test]
    async fn granted_task_is_running_before_its_runner_is_polled() {
        let f = fixture();
        let (id, handle) = f.spawn("ok");
        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.started_at.is_some());
        assert_eq!(f.admission.in_use(&record.group_id), 1);

        // 枠を受け取った後、engine を呼ぶ前にキャンセル。engine には入らない
        assert_eq!(f.hub.cancel(id).unwrap(), CancelOutcome::Requested);
        handle.await.unwrap();

        let record = f.store.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());
        assert!(f.admission.snapshot().is_empty());
        assert_eq!(f.hub.live_count(), 0);
    }

    #[tokio::test]
    async fn progress_for_unknown_task_is_dropped() {
        let f = fixture();
        let ghost = TaskId::from_ulid(Ulid::new());
        f.runner.report(ghost, 30);
        assert!(f.store.get(ghost).is_err());
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "unknown panic");
    }
}
