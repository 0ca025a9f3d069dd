//! Lease rules.
//!
//! Every place that interprets a lease goes through these functions, so the
//! expiry comparison exists exactly once.
//!
//! A lease is valid on the half-open interval `[claimed_at, lease_until)`:
//! at `now == lease_until` it is already expired.

use chrono::{DateTime, Utc};

use super::ids::AgentId;
use super::state::{EffectiveStatus, TaskStatus};
use super::task::Task;

/// Has the task's lease run out at `now`?
///
/// Tasks without a lease are never "expired".
pub fn is_expired(task: &Task, now: DateTime<Utc>) -> bool {
    task.lease_until().is_some_and(|until| now >= until)
}

/// Live view of the stored status.
pub fn effective_status(task: &Task, now: DateTime<Utc>) -> EffectiveStatus {
    match task.status {
        TaskStatus::Pending => EffectiveStatus::Pending,
        TaskStatus::Claimed if is_expired(task, now) => EffectiveStatus::Reclaimable,
        TaskStatus::Claimed => EffectiveStatus::Claimed,
        TaskStatus::Done => EffectiveStatus::Done,
        TaskStatus::Failed => EffectiveStatus::Failed,
    }
}

/// Outcome of checking whether a claim may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Pending task, first claim (or first after a release).
    Fresh,
    /// Claimed task whose lease expired; `previous_owner` loses it.
    Reclaim { previous_owner: Option<AgentId> },
    /// A valid lease is held.
    Held {
        owner: AgentId,
        lease_until: DateTime<Utc>,
    },
    /// Terminal task.
    Closed(TaskStatus),
}

pub fn claim_eligibility(task: &Task, now: DateTime<Utc>) -> Eligibility {
    match effective_status(task, now) {
        EffectiveStatus::Pending => Eligibility::Fresh,
        EffectiveStatus::Reclaimable => Eligibility::Reclaim {
            previous_owner: task.owner().cloned(),
        },
        EffectiveStatus::Claimed => match task.lease.as_ref() {
            Some(lease) => Eligibility::Held {
                owner: lease.owner.clone(),
                lease_until: lease.lease_until,
            },
            // claimed without a lease cannot be built through Task's methods;
            // treat it as reclaimable rather than stuck.
            None => Eligibility::Reclaim {
                previous_owner: None,
            },
        },
        EffectiveStatus::Done | EffectiveStatus::Failed => Eligibility::Closed(task.status),
    }
}
