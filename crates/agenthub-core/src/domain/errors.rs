//! Errors - claim store のエラー分類
//!
//! すべてのエラーは呼び出し元に同期的に返り、状態は一切変更されない（all-or-nothing）。
//! ストア内部ではリトライしない。再試行は lease の期限切れを待って呼び出し側が行う。

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::ids::{AgentId, TaskId};
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("task {task_id} already claimed by {owner} until {lease_until}")]
    AlreadyClaimed {
        task_id: TaskId,
        owner: AgentId,
        lease_until: DateTime<Utc>,
    },

    #[error("agent {caller} does not own task {task_id} (owner: {owner:?})")]
    NotOwner {
        task_id: TaskId,
        owner: Option<AgentId>,
        caller: AgentId,
    },

    #[error("lease on task {task_id} expired at {lease_until}; claim it again")]
    LeaseExpired {
        task_id: TaskId,
        lease_until: DateTime<Utc>,
    },

    #[error("cannot {operation} task {task_id} in status {status}")]
    InvalidState {
        task_id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },

    #[error("lease duration must be positive, got {0}ms")]
    InvalidLease(i64),
}

impl ClaimError {
    /// Short machine-readable code, e.g. for JSON reports.
    pub fn code(&self) -> &'static str {
        match self {
            ClaimError::NotFound(_) => "not_found",
            ClaimError::AlreadyExists(_) => "already_exists",
            ClaimError::AlreadyClaimed { .. } => "already_claimed",
            ClaimError::NotOwner { .. } => "not_owner",
            ClaimError::LeaseExpired { .. } => "lease_expired",
            ClaimError::InvalidState { .. } => "invalid_state",
            ClaimError::InvalidLease(_) => "invalid_lease",
        }
    }
}
