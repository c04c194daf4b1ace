//! ManagerBuilder - TaskManager の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - engine が未設定なら BuildError
//! - 設定値が不正なら BuildError
//! - tokio ランタイムの外で build したら BuildError（submit が spawn できないため）

use std::sync::Arc;

use tokio::runtime::Handle;

use super::admission::GroupAdmission;
use super::dispatcher::Dispatcher;
use super::hub::CompletionHub;
use super::manager::TaskManager;
use super::runner::{MarkRunning, Runner};
use crate::config::{ConfigError, SharedSettings, TaskSettings};
use crate::impls::InMemoryTaskStore;
use crate::ports::{
    CapacityProvider, Clock, IdGenerator, IngestionEngine, SystemClock, TaskStore, UlidGenerator,
};

/// ManagerBuilder は TaskManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = ManagerBuilder::new()
///     .engine(Arc::new(MyEngine))
///     .settings(TaskSettings::from_env())
///     .build()?;
/// ```
///
/// 未指定の部品は既定値になる: InMemoryTaskStore / SystemClock / UlidGenerator、
/// capacity は settings から読む。
#[derive(Default)]
pub struct ManagerBuilder {
    engine: Option<Arc<dyn IngestionEngine>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    capacity: Option<Arc<dyn CapacityProvider>>,
    settings: Option<SharedSettings>,
}

/// BuildError は TaskManager 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No ingestion engine configured. Call `engine(..)` before `build()`.")]
    MissingEngine,

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    #[error("TaskManager must be built inside a tokio runtime")]
    NoRuntime,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Arc<dyn IngestionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// グループの capacity の出どころを差し替える。既定は settings
    pub fn capacity(mut self, capacity: Arc<dyn CapacityProvider>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn settings(mut self, settings: TaskSettings) -> Self {
        self.settings = Some(SharedSettings::new(settings));
        self
    }

    /// 既存の設定ハンドルを共有する（実行中に呼び出し側が更新するものなど）
    pub fn shared_settings(mut self, settings: SharedSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<TaskManager, BuildError> {
        let engine = self.engine.ok_or(BuildError::MissingEngine)?;
        let settings = self.settings.unwrap_or_default();
        settings.snapshot().validate()?;
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let capacity = self
            .capacity
            .unwrap_or_else(|| Arc::new(settings.clone()));

        let admission = Arc::new(GroupAdmission::with_hook(
            capacity,
            Arc::new(MarkRunning::new(Arc::clone(&store), Arc::clone(&clock))),
        ));
        let hub = Arc::new(CompletionHub::new(
            Arc::clone(&store),
            Arc::clone(&admission),
            Arc::clone(&clock),
        ));
        let runner = Arc::new(Runner::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            engine,
            Arc::clone(&clock),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&admission),
            Arc::clone(&hub),
            runner,
            ids,
            clock,
            runtime,
        );

        Ok(TaskManager::new(store, admission, hub, dispatcher, settings))
    }
}
