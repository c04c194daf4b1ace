//! FixedCapacity - 全グループ同じ並列数を返す CapacityProvider

use crate::domain::GroupId;
use crate::ports::{CapacityProvider, DEFAULT_GROUP_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCapacity(pub usize);

impl Default for FixedCapacity {
    fn default() -> Self {
        Self(DEFAULT_GROUP_CAPACITY)
    }
}

impl CapacityProvider for FixedCapacity {
    fn capacity(&self, _group: &GroupId) -> usize {
        self.0
    }
}
