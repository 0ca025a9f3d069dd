//! State - タスクの状態
//!
//! # 状態遷移
//! - pending → claimed（claim）
//! - claimed → done（complete）/ failed（fail）/ pending（release）
//! - claimed → claimed（lease 期限切れ後の reclaim、attempt+1）

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored task status.
///
/// `Claimed` is not authoritative on its own: a claimed task whose lease has
/// run out is reclaimable. Use [`EffectiveStatus`] when interpreting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Done,
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as seen at a given instant, with lease expiry applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Pending,
    /// Claimed and the lease is still valid.
    Claimed,
    /// Stored as claimed but the lease has expired.
    Reclaimable,
    Done,
    Failed,
}

impl EffectiveStatus {
    /// Can a claim succeed right now?
    pub fn is_claimable(self) -> bool {
        matches!(self, EffectiveStatus::Pending | EffectiveStatus::Reclaimable)
    }
}
