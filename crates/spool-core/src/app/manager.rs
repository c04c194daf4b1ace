//! TaskManager - 呼び出し側に見せる表面
//!
//! 引数の検証（limit、status 文字列、timeout、task id の文字列）だけをここで行い、
//! 残りは Dispatcher / CompletionHub / TaskStore に委ねる。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::admission::GroupAdmission;
use super::dispatcher::{Dispatcher, SubmitRequest};
use super::hub::CompletionHub;
use super::status::{ManagerStats, TaskCounts};
use crate::config::SharedSettings;
use crate::domain::{
    CancelOutcome, GroupId, SpoolError, TaskId, TaskStatus, TaskSummary, WaitOutcome,
};
use crate::ports::TaskStore;
use crate::ports::task_store::TaskFilter;

/// ListQuery は [`TaskManager::list_tasks`] の引数。どのフィールドも省略できる
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub group_id: Option<String>,
    /// ステータス名。大文字小文字は区別しない
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    admission: Arc<GroupAdmission>,
    hub: Arc<CompletionHub>,
    dispatcher: Dispatcher,
    settings: SharedSettings,
}

fn parse_task_id(raw: &str) -> Result<TaskId, SpoolError> {
    raw.parse().map_err(|_| SpoolError::not_found(raw))
}

impl TaskManager {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        admission: Arc<GroupAdmission>,
        hub: Arc<CompletionHub>,
        dispatcher: Dispatcher,
        settings: SharedSettings,
    ) -> Self {
        Self {
            store,
            admission,
            hub,
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn submit_task(&self, request: SubmitRequest) -> Result<TaskId, SpoolError> {
        self.dispatcher.submit(request)
    }

    /// 新しい順に最大 `limit` 件
    pub fn list_tasks(&self, query: ListQuery) -> Result<Vec<TaskSummary>, SpoolError> {
        let settings = self.settings.snapshot();
        let limit = query.limit.unwrap_or(settings.list_default_limit);
        if limit == 0 || limit > settings.list_max_limit {
            return Err(SpoolError::InvalidRequest(format!(
                "limit must be between 1 and {}",
                settings.list_max_limit
            )));
        }
        let filter = TaskFilter {
            group_id: query.group_id.as_deref().map(GroupId::parse).transpose()?,
            status: query.status.as_deref().map(str::parse).transpose()?,
        };

        Ok(self
            .store
            .list(&filter)
            .iter()
            .take(limit)
            .map(TaskSummary::from)
            .collect())
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<TaskSummary, SpoolError> {
        let id = parse_task_id(task_id)?;
        self.store.get(id).map(TaskSummary::from)
    }

    /// タスクが終端になるか `timeout`（省略時は設定値）が過ぎるまで待つ
    ///
    /// タイムアウトは [`WaitOutcome::TimedOut`] で返す。タスクはそのまま走り続ける
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, SpoolError> {
        let settings = self.settings.snapshot();
        let timeout = timeout.unwrap_or_else(|| settings.wait_default_timeout());
        let max = settings.wait_max_timeout();
        if timeout.is_zero() || timeout > max {
            return Err(SpoolError::InvalidRequest(format!(
                "timeout must be greater than 0 and at most {} seconds",
                max.as_secs()
            )));
        }
        let id = parse_task_id(task_id)?;
        self.hub.wait(id, timeout).await
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<CancelOutcome, SpoolError> {
        let id = parse_task_id(task_id)?;
        self.hub.cancel(id)
    }

    pub fn stats(&self) -> ManagerStats {
        let records = self.store.list(&TaskFilter::default());
        ManagerStats {
            counts: records.iter().collect::<TaskCounts>(),
            groups: self.admission.snapshot(),
        }
    }

    /// 新規投入を止め、生きているタスクを全部キャンセルし、Runner の終了を待つ
    ///
    /// 待ち行列を先に閉じる。走っていたタスクが返した枠が Pending のタスクに渡らない。
    pub async fn shutdown(&self) {
        info!(in_flight = self.dispatcher.in_flight(), "shutting down task manager");
        self.dispatcher.stop_accepting();
        self.admission.close();
        self.hub.cancel_all();
        self.dispatcher.drain().await;
        info!("task manager stopped");
    }
}
