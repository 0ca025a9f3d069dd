//! TaskStore port - claim/lease の正本（source of truth）
//!
//! # 設計原則
//! - claim の check-and-set は task_id ごとに線形化可能（linearizable）
//! - 異なる task_id 同士はロックを共有しない
//! - Lease の権威はここにある（DeliveryQueue の pop は候補通知に過ぎない）
//! - 失敗した操作は何も変更しない

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::{
    AgentId, ArtifactRef, ClaimError, StatusCounts, Task, TaskDraft, TaskEvent, TaskId,
    TaskSnapshot,
};

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimGrant {
    /// The task right after the claim was applied.
    pub task: Task,
    /// The previous lease had expired and was taken over.
    pub reclaimed: bool,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a pending task.
    async fn create(&self, draft: TaskDraft) -> Result<Task, ClaimError>;

    /// Grant `agent_id` a lease of `lease` on the task if it is pending or
    /// its current lease has expired.
    async fn claim(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        lease: Duration,
    ) -> Result<ClaimGrant, ClaimError>;

    /// Extend the caller's still-valid lease by its original length.
    async fn renew(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<Task, ClaimError>;

    /// Owner finishes the task.
    async fn complete(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        result_ref: Option<ArtifactRef>,
    ) -> Result<Task, ClaimError>;

    /// Owner gives up on the task for good.
    async fn fail(&self, task_id: &TaskId, agent_id: &AgentId, reason: &str)
    -> Result<Task, ClaimError>;

    /// Owner hands the task back for someone else to claim.
    async fn release(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Task, ClaimError>;

    async fn get(&self, task_id: &TaskId) -> Result<TaskSnapshot, ClaimError>;

    /// Events of one task, in insertion order.
    async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, ClaimError>;

    /// Events of all tasks, ordered by `seq`.
    async fn all_events(&self) -> Vec<TaskEvent>;

    async fn list(&self) -> Vec<TaskSnapshot>;

    /// Result reference of a done task.
    async fn result(&self, task_id: &TaskId) -> Result<Option<ArtifactRef>, ClaimError>;

    /// Tasks stored as claimed whose lease has run out.
    async fn expired_leases(&self) -> Vec<TaskId>;

    async fn counts(&self) -> StatusCounts {
        StatusCounts::from_snapshots(&self.list().await)
    }
}
