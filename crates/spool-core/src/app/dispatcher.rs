//! Dispatcher - 投入の入口
//!
//! 検証は同期的に行い、失敗したらレコードは作らない。
//! 成功したら Pending のレコードを作り、その場でグループの待ち行列に並べてから id を返す。
//! 並ぶのは投入した呼び出しの中なので、待ち行列の順序は投入順と一致する。実行は Runner に任せる。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::admission::GroupAdmission;
use super::hub::CompletionHub;
use super::runner::Runner;
use crate::domain::{DEFAULT_TASK_NAME, GroupId, SpoolError, TaskId, TaskRecord};
use crate::ports::{Clock, IdGenerator, TaskStore};

/// SubmitRequest は呼び出し側から届いた投入リクエスト
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl SubmitRequest {
    pub fn new(group_id: impl Into<String>, payload: Value) -> Self {
        Self {
            group_id: Some(group_id.into()),
            name: None,
            payload: Some(payload),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

struct Validated {
    group: GroupId,
    name: String,
    payload: Value,
}

fn validate(request: SubmitRequest) -> Result<Validated, SpoolError> {
    let group = match request.group_id.as_deref() {
        Some(raw) => GroupId::parse(raw)?,
        None => return Err(SpoolError::InvalidRequest("group_id is required".into())),
    };
    let payload = match request.payload {
        None | Some(Value::Null) => {
            return Err(SpoolError::InvalidRequest("payload is required".into()));
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(SpoolError::InvalidRequest("payload must not be empty".into()));
        }
        Some(payload) => payload,
    };
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string());
    Ok(Validated {
        group,
        name,
        payload,
    })
}

pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    admission: Arc<GroupAdmission>,
    hub: Arc<CompletionHub>,
    runner: Arc<Runner>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    tracker: TaskTracker,
    runtime: Handle,
    accepting: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        admission: Arc<GroupAdmission>,
        hub: Arc<CompletionHub>,
        runner: Arc<Runner>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            admission,
            hub,
            runner,
            ids,
            clock,
            tracker: TaskTracker::new(),
            runtime,
            accepting: AtomicBool::new(true),
        }
    }

    /// 検証して Pending で記録し、待ち行列に並べる。実行を待たずに返る
    pub fn submit(&self, request: SubmitRequest) -> Result<TaskId, SpoolError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SpoolError::ShuttingDown);
        }
        let Validated {
            group,
            name,
            payload,
        } = validate(request)?;

        let id = self.ids.generate_task_id();
        let cancel = self.hub.register(id);
        let record = TaskRecord::new(id, group.clone(), name, payload, self.clock.now());
        if let Err(err) = self.store.create(record) {
            self.hub.forget(id);
            return Err(err);
        }
        info!(task_id = %id, group_id = %group, "task submitted");

        let ticket = self.admission.enqueue(&group, id);
        self.tracker
            .spawn_on(Arc::clone(&self.runner).run(ticket, cancel), &self.runtime);
        Ok(id)
    }

    /// 新規の投入を断る。起動済みの Runner はそのまま走る
    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
        self.tracker.close();
    }

    /// 起動した Runner が全部戻るまで待つ
    pub(crate) async fn drain(&self) {
        self.tracker.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::missing_group(SubmitRequest { group_id: None, name: None, payload: Some(json!("x")) })]
    #[case::blank_group(SubmitRequest { group_id: Some("  ".into()), name: None, payload: Some(json!("x")) })]
    #[case::missing_payload(SubmitRequest { group_id: Some("g".into()), name: None, payload: None })]
    #[case::null_payload(SubmitRequest { group_id: Some("g".into()), name: None, payload: Some(Value::Null) })]
    #[case::blank_payload(SubmitRequest { group_id: Some("g".into()), name: None, payload: Some(json!("   ")) })]
    fn rejects_malformed_requests(#[case] request: SubmitRequest) {
        assert!(matches!(
            validate(request),
            Err(SpoolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn name_defaults_when_blank() {
        let v = validate(SubmitRequest::new("g", json!({"episode_body": "x"})).with_name(" ")).unwrap();
        assert_eq!(v.name, DEFAULT_TASK_NAME);

        let v = validate(SubmitRequest::new(" g ", json!("x")).with_name("import")).unwrap();
        assert_eq!(v.name, "import");
        assert_eq!(v.group.as_str(), "g");
    }
}
