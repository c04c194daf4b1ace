//! spool-core
//!
//! Asynchronous task manager for long-running ingestion jobs.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, group, state, task, summary, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, IngestionEngine, CapacityProvider, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryTaskStore, FixedCapacity）
//! - **app**: アプリケーションロジック（admission, dispatcher, runner, hub, manager, builder）
//! - **config**: 設定（TaskSettings, SharedSettings）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{ListQuery, ManagerBuilder, SubmitRequest, TaskManager};
pub use domain::{CancelOutcome, SpoolError, TaskId, TaskStatus, TaskSummary, WaitOutcome};
