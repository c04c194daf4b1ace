//! CapacityProvider port - グループごとの最大並列数（設定から読む）
//!
//! 取得のたびに読み直してよい。値が下がっても実行中のタスクは追い出さない。

use crate::domain::GroupId;

/// 設定がないときの既定値
pub const DEFAULT_GROUP_CAPACITY: usize = 5;

pub trait CapacityProvider: Send + Sync {
    /// `group` で同時に受け入れるタスク数の上限
    ///
    /// 0 はアドミッション側で 1 として扱う（グループが詰まらない）
    fn capacity(&self, group: &GroupId) -> usize;
}
