//! Task record and its lease.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, ArtifactRef, TaskId};
use super::state::TaskStatus;

/// The exclusive, time-bounded hold an agent has on a task.
///
/// Owner, claim time and expiry always travel together, so a task can never
/// have an owner without a lease (or the other way round).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub lease_until: DateTime<Utc>,
    /// Length granted at claim time; `renew` extends by the same amount.
    pub lease_ms: i64,
}

impl Lease {
    /// `None` when `claimed_at + length` is not a representable timestamp.
    pub fn new(owner: AgentId, claimed_at: DateTime<Utc>, length: Duration) -> Option<Self> {
        let lease_until = claimed_at.checked_add_signed(length)?;
        Some(Self {
            owner,
            claimed_at,
            lease_until,
            lease_ms: length.num_milliseconds(),
        })
    }

    pub fn length(&self) -> Duration {
        Duration::milliseconds(self.lease_ms)
    }

    pub fn is_owned_by(&self, agent_id: &AgentId) -> bool {
        &self.owner == agent_id
    }
}

/// Input for creating a task ("submit goal").
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    /// Explicit id; generated by the store when `None`.
    pub task_id: Option<TaskId>,
    pub title: String,
    pub created_by: Option<AgentId>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            task_id: None,
            title: title.into(),
            created_by: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn created_by(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.created_by = Some(agent_id.into());
        self
    }
}

/// A task on the board.
///
/// Design (TaskRecord と同じ方針):
/// - The store holds the only mutable copy; callers get clones.
/// - All transitions go through the methods below so `attempt` and the
///   lease stay consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub status: TaskStatus,

    /// Current (or, for terminal tasks, final) lease.
    #[serde(flatten)]
    pub lease: Option<Lease>,

    /// Number of claims ever granted, reclaims included.
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub created_by: Option<AgentId>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_ref: Option<ArtifactRef>,
    pub failure_reason: Option<String>,
}

impl Task {
    pub fn new(task_id: TaskId, title: String, created_by: Option<AgentId>, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            title,
            status: TaskStatus::Pending,
            lease: None,
            attempt: 0,
            created_at: now,
            created_by,
            updated_at: now,
            completed_at: None,
            result_ref: None,
            failure_reason: None,
        }
    }

    pub fn owner(&self) -> Option<&AgentId> {
        self.lease.as_ref().map(|l| &l.owner)
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.lease.as_ref().map(|l| l.claimed_at)
    }

    pub fn lease_until(&self) -> Option<DateTime<Utc>> {
        self.lease.as_ref().map(|l| l.lease_until)
    }

    /// Grant a new lease (first claim or reclaim).
    pub fn start_attempt(&mut self, lease: Lease) {
        self.updated_at = lease.claimed_at;
        self.status = TaskStatus::Claimed;
        self.lease = Some(lease);
        self.attempt += 1;
    }

    /// Push `lease_until` forward by the original lease length.
    ///
    /// Returns the new expiry, or `None` (task untouched) when there is no
    /// lease or the new expiry would overflow.
    pub fn extend_lease(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lease = self.lease.as_mut()?;
        let lease_until = now.checked_add_signed(lease.length())?;
        lease.lease_until = lease_until;
        self.updated_at = now;
        Some(lease_until)
    }

    pub fn mark_done(&mut self, result_ref: Option<ArtifactRef>, now: DateTime<Utc>) {
        self.status = TaskStatus::Done;
        self.result_ref = result_ref;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.failure_reason = Some(reason);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Owner gives the task back. The attempt counter is left alone because
    /// no new claim happened.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.lease = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn lease(length: Duration) -> Lease {
        Lease::new(AgentId::new("agentA"), t0(), length).unwrap()
    }

    #[test]
    fn new_task_is_pending_without_lease() {
        let task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 0);
        assert!(task.owner().is_none());
        assert!(task.lease_until().is_none());
    }

    #[test]
    fn start_attempt_sets_lease_and_counts() {
        let mut task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        task.start_attempt(lease(Duration::seconds(60)));

        assert_eq!(task.status, TaskStatus::Claimed);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.owner(), Some(&AgentId::new("agentA")));
        assert_eq!(task.claimed_at(), Some(t0()));
        assert_eq!(task.lease_until(), Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn extend_lease_uses_original_length() {
        let mut task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        task.start_attempt(lease(Duration::seconds(30)));

        let later = t0() + Duration::seconds(20);
        assert_eq!(task.extend_lease(later), Some(later + Duration::seconds(30)));

        assert_eq!(task.lease_until(), Some(later + Duration::seconds(30)));
        assert_eq!(task.claimed_at(), Some(t0()));
    }

    #[test]
    fn lease_past_the_calendar_is_refused() {
        assert!(Lease::new(AgentId::new("agentA"), t0(), Duration::days(100_000_000)).is_none());
        assert!(Lease::new(AgentId::new("agentA"), DateTime::<Utc>::MAX_UTC, Duration::milliseconds(1)).is_none());
    }

    #[test]
    fn extend_lease_overflow_leaves_task_unchanged() {
        let mut task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        task.start_attempt(lease(Duration::seconds(30)));
        let before = task.clone();

        assert_eq!(task.extend_lease(DateTime::<Utc>::MAX_UTC), None);
        assert_eq!(task, before);
    }

    #[test]
    fn release_clears_lease_but_keeps_attempt() {
        let mut task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        task.start_attempt(lease(Duration::seconds(30)));
        task.release(t0() + Duration::seconds(1));

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.lease.is_none());
        assert_eq!(task.attempt, 1);
    }

    #[test]
    fn serialized_task_exposes_flat_lease_fields() {
        let mut task = Task::new(TaskId::new("T"), "title".into(), None, t0());
        task.start_attempt(lease(Duration::seconds(60)));

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "claimed");
        assert_eq!(json["owner"], "agentA");
        assert_eq!(json["attempt"], 1);
        assert!(json["lease_until"].is_string());
    }
}
