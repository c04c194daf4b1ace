//! Impls - ports の実装（プロセス内で完結するもの）
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: DashMap による TaskStore。レコードはプロセスの寿命の間だけ残る
//! - **FixedCapacity**: 全グループ同じ並列数を返す CapacityProvider
//!
//! 設定から capacity を読む実装は `config::SharedSettings`。

pub mod capacity;
pub mod memory_store;

pub use self::capacity::FixedCapacity;
pub use self::memory_store::InMemoryTaskStore;
