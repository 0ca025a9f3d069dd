//! Events - タスクの履歴
//!
//! 追記専用（append-only）。書き込まれたイベントは変更されない。
//! `seq` はストア全体で単調増加するので、タスクをまたいだタイムラインも並べられる。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AgentId, TaskId};

/// Reason recorded on every reclaim.
pub const REASON_LEASE_EXPIRED: &str = "lease_expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskClaimed,
    TaskReclaimed,
    TaskDone,
    TaskFailed,
    TaskReleased,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskClaimed => "task_claimed",
            EventKind::TaskReclaimed => "task_reclaimed",
            EventKind::TaskDone => "task_done",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskReleased => "task_released",
        }
    }

    /// Does this event grant a lease?
    pub fn is_claim(self) -> bool {
        matches!(self, EventKind::TaskClaimed | EventKind::TaskReclaimed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub seq: u64,
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Task attempt counter after this event was applied.
    pub attempt: u32,
    /// Owner that lost the lease (reclaims only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_owner: Option<AgentId>,
}
