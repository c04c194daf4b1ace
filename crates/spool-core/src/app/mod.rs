//! App - アプリケーション層
//!
//! ports を組み合わせてタスク管理を実装します。
//!
//! # 主要コンポーネント
//! - **GroupAdmission**: グループごとの並列数制御と FIFO 待ち行列
//! - **Dispatcher**: 投入の検証、レコード作成、待ち行列への登録、Runner の起動
//! - **Runner**: 1 タスクの実行（協調的キャンセル付き）
//! - **CompletionHub**: 終了待ちとキャンセル
//! - **TaskManager**: 呼び出し側に見せる表面
//! - **ManagerBuilder**: ワイヤリングと起動時検証

pub mod admission;
pub mod builder;
pub mod dispatcher;
pub mod hub;
pub mod manager;
pub mod runner;
pub mod status;

pub use self::admission::{AdmissionError, AdmitAll, GrantHook, GroupAdmission, Permit, Ticket};
pub use self::builder::{BuildError, ManagerBuilder};
pub use self::dispatcher::{Dispatcher, SubmitRequest};
pub use self::hub::CompletionHub;
pub use self::manager::{ListQuery, TaskManager};
pub use self::runner::{MarkRunning, Runner};
pub use self::status::{GroupLoad, ManagerStats, TaskCounts};
