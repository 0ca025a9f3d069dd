//! Domain model (ids, task, lease rules, status, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod lease;
pub mod state;
pub mod status;
pub mod task;

pub use self::errors::ClaimError;
pub use self::events::{EventKind, REASON_LEASE_EXPIRED, TaskEvent};
pub use self::ids::{AgentId, ArtifactRef, TaskId};
pub use self::lease::{Eligibility, claim_eligibility, effective_status, is_expired};
pub use self::state::{EffectiveStatus, TaskStatus};
pub use self::status::StatusCounts;
pub use self::task::{Lease, Task, TaskDraft};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view returned by `get`: the stored task plus its live status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,
    pub effective: EffectiveStatus,
}

impl TaskSnapshot {
    pub fn at(task: Task, now: DateTime<Utc>) -> Self {
        let effective = effective_status(&task, now);
        Self { task, effective }
    }
}
