//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。タスク管理の外側にあるもの
//! （状態の保存先、グラフへの書き込み、設定、時刻、ID 生成）を trait として定義する。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - IngestionEngine の中身には関与しない。キャンセルは IngestContext 経由で協調的に伝える
//! - capacity は CapacityProvider から毎回読み直す

pub mod capacity;
pub mod clock;
pub mod engine;
pub mod id_generator;
pub mod task_store;

pub use self::capacity::{CapacityProvider, DEFAULT_GROUP_CAPACITY};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::engine::{EngineError, IngestContext, IngestionEngine, NoProgress, ProgressSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{Mutation, TaskFilter, TaskStore};
