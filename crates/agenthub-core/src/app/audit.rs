//! Audit - イベントログとタスクの整合性チェック
//!
//! self-check（`agenthub check`）とテストで使う。ストアが正しく動いていれば常に空。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{EventKind, REASON_LEASE_EXPIRED, Task, TaskEvent, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    /// `task_done` without an earlier claim or reclaim.
    DoneWithoutClaim { task_id: TaskId, seq: u64 },
    /// `task_claimed` while an earlier lease was never closed.
    DoubleClaim { task_id: TaskId, seq: u64 },
    /// Reclaim recorded with some other reason.
    ReclaimWithoutReason { task_id: TaskId, seq: u64 },
    /// Anything appended after done/failed.
    EventAfterTerminal { task_id: TaskId, seq: u64 },
    /// Stored status claimed but no lease.
    ClaimedWithoutLease { task_id: TaskId },
    /// `attempt` differs from the number of claim events.
    AttemptMismatch {
        task_id: TaskId,
        attempt: u32,
        claims: u32,
    },
    /// `seq` not strictly increasing.
    OutOfOrder { seq: u64, previous: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DoneWithoutClaim { task_id, seq } => {
                write!(f, "task {task_id} marked done without prior claim (seq {seq})")
            }
            Violation::DoubleClaim { task_id, seq } => {
                write!(f, "task {task_id} claimed while another lease was open (seq {seq})")
            }
            Violation::ReclaimWithoutReason { task_id, seq } => {
                write!(f, "task {task_id} reclaimed without reason {REASON_LEASE_EXPIRED} (seq {seq})")
            }
            Violation::EventAfterTerminal { task_id, seq } => {
                write!(f, "task {task_id} has events after it finished (seq {seq})")
            }
            Violation::ClaimedWithoutLease { task_id } => {
                write!(f, "task {task_id} claimed but missing owner/lease")
            }
            Violation::AttemptMismatch {
                task_id,
                attempt,
                claims,
            } => write!(f, "task {task_id} attempt={attempt} but {claims} claim events"),
            Violation::OutOfOrder { seq, previous } => {
                write!(f, "event seq {seq} follows {previous}")
            }
        }
    }
}

#[derive(Default)]
struct Replay {
    lease_open: bool,
    finished: bool,
    claims: u32,
}

/// Check `events` (any order across tasks, insertion order within one) and
/// the current `tasks` against the claim rules.
pub fn audit(tasks: &[Task], events: &[TaskEvent]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut replay: HashMap<&TaskId, Replay> = HashMap::new();

    for pair in events.windows(2) {
        if pair[1].seq <= pair[0].seq {
            violations.push(Violation::OutOfOrder {
                seq: pair[1].seq,
                previous: pair[0].seq,
            });
        }
    }

    for event in events {
        let state = replay.entry(&event.task_id).or_default();
        if state.finished {
            violations.push(Violation::EventAfterTerminal {
                task_id: event.task_id.clone(),
                seq: event.seq,
            });
        }
        match event.kind {
            EventKind::TaskClaimed => {
                if state.lease_open {
                    violations.push(Violation::DoubleClaim {
                        task_id: event.task_id.clone(),
                        seq: event.seq,
                    });
                }
                state.lease_open = true;
                state.claims += 1;
            }
            EventKind::TaskReclaimed => {
                if event.reason != REASON_LEASE_EXPIRED {
                    violations.push(Violation::ReclaimWithoutReason {
                        task_id: event.task_id.clone(),
                        seq: event.seq,
                    });
                }
                state.lease_open = true;
                state.claims += 1;
            }
            EventKind::TaskDone | EventKind::TaskFailed => {
                if state.claims == 0 {
                    violations.push(Violation::DoneWithoutClaim {
                        task_id: event.task_id.clone(),
                        seq: event.seq,
                    });
                }
                state.lease_open = false;
                state.finished = true;
            }
            EventKind::TaskReleased => state.lease_open = false,
        }
    }

    for task in tasks {
        if task.status == TaskStatus::Claimed && task.lease.is_none() {
            violations.push(Violation::ClaimedWithoutLease {
                task_id: task.task_id.clone(),
            });
        }
        let claims = replay.get(&task.task_id).map_or(0, |r| r.claims);
        if claims != task.attempt {
            violations.push(Violation::AttemptMismatch {
                task_id: task.task_id.clone(),
                attempt: task.attempt,
                claims,
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, TaskDraft};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{ManualClock, TaskStore};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn event(seq: u64, kind: EventKind, reason: &str) -> TaskEvent {
        TaskEvent {
            seq,
            task_id: TaskId::new("T"),
            kind,
            agent_id: AgentId::new("agentA"),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            reason: reason.to_string(),
            attempt: 1,
            previous_owner: None,
        }
    }

    #[tokio::test]
    async fn clean_store_history_has_no_violations() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = InMemoryTaskStore::new(clock.clone());
        let t = store.create(TaskDraft::new("t").with_id("T")).await.unwrap().task_id;

        store.claim(&t, &AgentId::new("agentA"), Duration::seconds(1)).await.unwrap();
        clock.advance(Duration::seconds(2));
        store.claim(&t, &AgentId::new("agentB"), Duration::seconds(60)).await.unwrap();
        store.release(&t, &AgentId::new("agentB"), "retry later").await.unwrap();
        store.claim(&t, &AgentId::new("agentA"), Duration::seconds(60)).await.unwrap();
        store.complete(&t, &AgentId::new("agentA"), None).await.unwrap();

        let tasks: Vec<Task> = store.list().await.into_iter().map(|s| s.task).collect();
        assert!(audit(&tasks, &store.all_events().await).is_empty());
    }

    #[test]
    fn flags_done_without_claim() {
        let violations = audit(&[], &[event(1, EventKind::TaskDone, "completed")]);
        assert_eq!(
            violations,
            vec![Violation::DoneWithoutClaim {
                task_id: TaskId::new("T"),
                seq: 1
            }]
        );
    }

    #[test]
    fn flags_double_claim_and_bad_reclaim_reason() {
        let events = vec![
            event(1, EventKind::TaskClaimed, "claimed"),
            event(2, EventKind::TaskClaimed, "claimed"),
            event(3, EventKind::TaskReclaimed, "impatient"),
        ];
        let violations = audit(&[], &events);

        assert!(violations.contains(&Violation::DoubleClaim {
            task_id: TaskId::new("T"),
            seq: 2
        }));
        assert!(violations.contains(&Violation::ReclaimWithoutReason {
            task_id: TaskId::new("T"),
            seq: 3
        }));
    }

    #[test]
    fn flags_order_terminal_and_attempt_problems() {
        let events = vec![
            event(2, EventKind::TaskClaimed, "claimed"),
            event(1, EventKind::TaskDone, "completed"),
            event(3, EventKind::TaskReleased, "late"),
        ];
        let mut task = Task::new(
            TaskId::new("T"),
            String::new(),
            None,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        task.attempt = 3;
        task.status = TaskStatus::Claimed;

        let violations = audit(&[task], &events);
        assert!(violations.contains(&Violation::OutOfOrder { seq: 1, previous: 2 }));
        assert!(violations.contains(&Violation::EventAfterTerminal {
            task_id: TaskId::new("T"),
            seq: 3
        }));
        assert!(violations.contains(&Violation::ClaimedWithoutLease {
            task_id: TaskId::new("T")
        }));
        assert!(violations.contains(&Violation::AttemptMismatch {
            task_id: TaskId::new("T"),
            attempt: 3,
            claims: 1
        }));
    }

    #[test]
    fn violations_render_readably() {
        let v = Violation::AttemptMismatch {
            task_id: TaskId::new("T"),
            attempt: 2,
            claims: 1,
        };
        assert_eq!(v.to_string(), "task T attempt=2 but 1 claim events");
    }
}
