//! Task manager settings.
//!
//! Loaded from `SPOOL_*` environment variables or JSON. Storage and
//! validation of the wider application settings live elsewhere; this only
//! covers the knobs the task manager reads.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::GroupId;
use crate::ports::{CapacityProvider, DEFAULT_GROUP_CAPACITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn default_max_workers_per_group() -> usize {
    DEFAULT_GROUP_CAPACITY
}

fn default_list_default_limit() -> usize {
    50
}

fn default_list_max_limit() -> usize {
    100
}

fn default_wait_default_timeout_secs() -> u64 {
    120
}

fn default_wait_max_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Concurrent tasks per group unless overridden in `group_capacity`.
    #[serde(default = "default_max_workers_per_group")]
    pub max_workers_per_group: usize,

    #[serde(default)]
    pub group_capacity: HashMap<String, usize>,

    #[serde(default = "default_list_default_limit")]
    pub list_default_limit: usize,

    #[serde(default = "default_list_max_limit")]
    pub list_max_limit: usize,

    #[serde(default = "default_wait_default_timeout_secs")]
    pub wait_default_timeout_secs: u64,

    #[serde(default = "default_wait_max_timeout_secs")]
    pub wait_max_timeout_secs: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_workers_per_group: default_max_workers_per_group(),
            group_capacity: HashMap::new(),
            list_default_limit: default_list_default_limit(),
            list_max_limit: default_list_max_limit(),
            wait_default_timeout_secs: default_wait_default_timeout_secs(),
            wait_max_timeout_secs: default_wait_max_timeout_secs(),
        }
    }
}

impl TaskSettings {
    /// Build from `SPOOL_*` variables, falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_workers_per_group: env_parse(
                "SPOOL_MAX_WORKERS_PER_GROUP",
                d.max_workers_per_group,
            ),
            group_capacity: HashMap::new(),
            list_default_limit: env_parse("SPOOL_LIST_DEFAULT_LIMIT", d.list_default_limit),
            list_max_limit: env_parse("SPOOL_LIST_MAX_LIMIT", d.list_max_limit),
            wait_default_timeout_secs: env_parse(
                "SPOOL_WAIT_DEFAULT_TIMEOUT_SECS",
                d.wait_default_timeout_secs,
            ),
            wait_max_timeout_secs: env_parse(
                "SPOOL_WAIT_MAX_TIMEOUT_SECS",
                d.wait_max_timeout_secs,
            ),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers_per_group == 0 {
            return Err(ConfigError::Invalid {
                key: "max_workers_per_group",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some((group, _)) = self.group_capacity.iter().find(|(_, c)| **c == 0) {
            return Err(ConfigError::Invalid {
                key: "group_capacity",
                reason: format!("capacity for group '{group}' must be at least 1"),
            });
        }
        if self.list_max_limit == 0 || self.list_default_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "list_default_limit",
                reason: "list limits must be at least 1".to_string(),
            });
        }
        if self.list_default_limit > self.list_max_limit {
            return Err(ConfigError::Invalid {
                key: "list_default_limit",
                reason: format!("must not exceed list_max_limit ({})", self.list_max_limit),
            });
        }
        if self.wait_default_timeout_secs == 0
            || self.wait_default_timeout_secs > self.wait_max_timeout_secs
        {
            return Err(ConfigError::Invalid {
                key: "wait_default_timeout_secs",
                reason: format!(
                    "must be between 1 and wait_max_timeout_secs ({})",
                    self.wait_max_timeout_secs
                ),
            });
        }
        Ok(())
    }

    pub fn capacity_for(&self, group: &GroupId) -> usize {
        self.group_capacity
            .get(group.as_str())
            .copied()
            .unwrap_or(self.max_workers_per_group)
    }

    pub fn wait_default_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_default_timeout_secs)
    }

    pub fn wait_max_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_max_timeout_secs)
    }
}

/// Settings shared with the running manager; capacity changes apply on the next enqueue or release.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<TaskSettings>>,
}

impl SharedSettings {
    pub fn new(settings: TaskSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> TaskSettings {
        self.inner.read().clone()
    }

    /// Replace the settings after validating them.
    pub fn replace(&self, settings: TaskSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        *self.inner.write() = settings;
        Ok(())
    }

    pub fn set_group_capacity(&self, group: &GroupId, capacity: usize) -> Result<(), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "group_capacity",
                reason: format!("capacity for group '{group}' must be at least 1"),
            });
        }
        self.inner
            .write()
            .group_capacity
            .insert(group.as_str().to_string(), capacity);
        Ok(())
    }
}

impl CapacityProvider for SharedSettings {
    fn capacity(&self, group: &GroupId) -> usize {
        self.inner.read().capacity_for(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = TaskSettings::default();
        assert_eq!(s.max_workers_per_group, 5);
        assert_eq!(s.list_default_limit, 50);
        assert_eq!(s.list_max_limit, 100);
        assert_eq!(s.wait_default_timeout(), Duration::from_secs(120));
        assert_eq!(s.wait_max_timeout(), Duration::from_secs(300));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let s = TaskSettings::from_json_str(
            r#"{"max_workers_per_group": 2, "group_capacity": {"big": 8}}"#,
        )
        .unwrap();
        assert_eq!(s.max_workers_per_group, 2);
        assert_eq!(s.capacity_for(&GroupId::parse("big").unwrap()), 8);
        assert_eq!(s.capacity_for(&GroupId::parse("small").unwrap()), 2);
        assert_eq!(s.list_max_limit, 100);
    }

    #[test]
    fn json_rejects_zero_capacity() {
        let err = TaskSettings::from_json_str(r#"{"max_workers_per_group": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "max_workers_per_group",
                ..
            }
        ));
    }

    #[test]
    fn json_rejects_inconsistent_limits() {
        assert!(TaskSettings::from_json_str(r#"{"list_default_limit": 500}"#).is_err());
        assert!(TaskSettings::from_json_str(r#"{"wait_default_timeout_secs": 0}"#).is_err());
    }

    #[test]
    fn shared_settings_are_reread() {
        let shared = SharedSettings::new(TaskSettings::default());
        let group = GroupId::parse("g").unwrap();
        assert_eq!(shared.capacity(&group), 5);

        shared.set_group_capacity(&group, 1).unwrap();
        assert_eq!(shared.capacity(&group), 1);
        assert!(shared.set_group_capacity(&group, 0).is_err());
        assert_eq!(shared.snapshot().capacity_for(&group), 1);
    }

    #[test]
    fn replace_validates_before_swapping() {
        let shared = SharedSettings::new(TaskSettings::default());
        let group = GroupId::parse("g").unwrap();

        let bad = TaskSettings {
            list_default_limit: 0,
            ..TaskSettings::default()
        };
        assert!(shared.replace(bad).is_err());
        assert_eq!(shared.snapshot(), TaskSettings::default());

        let tighter = TaskSettings {
            max_workers_per_group: 2,
            wait_max_timeout_secs: 150,
            ..TaskSettings::default()
        };
        shared.replace(tighter.clone()).unwrap();
        assert_eq!(shared.snapshot(), tighter);
        assert_eq!(shared.capacity(&group), 2);
    }
}
