//! Domain model (ids, groups, status, records, outcomes, errors).
//!
//! タスク管理の値と状態遷移だけを持つ。I/O や並行性はここに置かない。

pub mod errors;
pub mod group;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod summary;
pub mod task;

pub use self::errors::SpoolError;
pub use self::group::{GroupId, MAX_GROUP_ID_LEN};
pub use self::ids::{Id, IdMarker, ParseIdError, TaskId};
pub use self::outcome::{CancelOutcome, WaitOutcome};
pub use self::state::TaskStatus;
pub use self::summary::TaskSummary;
pub use self::task::{DEFAULT_TASK_NAME, TaskRecord};
