//! IngestionEngine port - 実際にグラフへ書き込む外部コンポーネント
//!
//! engine は payload を解釈する唯一の場所。タスク管理側は中身を見ない。
//! キャンセルは協調的: engine が [`IngestContext::checkpoint`] を呼んだときだけ中断できる。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{GroupId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// 取り込み失敗。メッセージはタスクに保存される
    #[error("{0}")]
    Failed(String),

    /// キャンセル要求を受けて checkpoint で止まった
    #[error("ingestion interrupted by cancellation")]
    Interrupted,
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// ProgressSink は実行中タスクの進捗を受け取る
pub trait ProgressSink: Send + Sync {
    fn report(&self, task_id: TaskId, progress: u8);
}

/// 何も記録しない
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _task_id: TaskId, _progress: u8) {}
}

/// IngestContext は engine 呼び出しごとに渡すハンドル
#[derive(Clone)]
pub struct IngestContext {
    task_id: TaskId,
    group_id: GroupId,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl IngestContext {
    pub fn new(
        task_id: TaskId,
        group_id: GroupId,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            task_id,
            group_id,
            cancel,
            progress,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 途中の checkpoint。キャンセル要求後は `Err(Interrupted)`
    ///
    /// engine は `?` で伝播させて残りの処理を打ち切る
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }

    /// キャンセル要求で完了する。`select!` で待てる engine 向け
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn report_progress(&self, progress: u8) {
        self.progress.report(self.task_id, progress.min(100));
    }
}

/// IngestionEngine は payload を受け取り、グラフへの書き込み結果を返す
///
/// リトライはしない。失敗はそのままタスクの Failed として残る。
#[async_trait]
pub trait IngestionEngine: Send + Sync {
    async fn ingest(
        &self,
        payload: &serde_json::Value,
        ctx: &IngestContext,
    ) -> Result<serde_json::Value, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn checkpoint_reports_interruption_after_cancel() {
        let token = CancellationToken::new();
        let ctx = IngestContext::new(
            TaskId::from_ulid(Ulid::new()),
            GroupId::parse("g").unwrap(),
            token.clone(),
            Arc::new(NoProgress),
        );

        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert_eq!(ctx.checkpoint(), Err(EngineError::Interrupted));
        assert!(ctx.is_cancel_requested());
    }
}
