//! Outcomes of `wait` and `cancel`.
//!
//! Neither a timed-out wait nor a late cancel is an error: they are ordinary
//! answers, and they are kept distinct from any `TaskStatus`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::state::TaskStatus;
use super::summary::TaskSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    /// The task reached a terminal state.
    Finished {
        task: TaskSummary,
        #[serde(with = "duration_secs")]
        waited: Duration,
    },

    /// The wait's own deadline passed. The task itself is untouched.
    TimedOut {
        task: TaskSummary,
        #[serde(with = "duration_secs")]
        waited: Duration,
    },
}

impl WaitOutcome {
    pub fn task(&self) -> &TaskSummary {
        match self {
            WaitOutcome::Finished { task, .. } | WaitOutcome::TimedOut { task, .. } => task,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// A Pending task was pulled out of its queue and is now Cancelled.
    Cancelled,

    /// A Running task had its cancel flag latched; the runner honors it at its next checkpoint.
    Requested,

    /// The task had already finished; nothing changed.
    AlreadyTerminal { status: TaskStatus },
}

impl CancelOutcome {
    /// `true` for both forms of acknowledgement.
    pub fn is_ack(&self) -> bool {
        !matches!(self, CancelOutcome::AlreadyTerminal { .. })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
