//! In-memory claim store.
//!
//! Layout:
//! - `DashMap<TaskId, Arc<Mutex<TaskEntry>>>`: the map is only touched to
//!   look up or insert a slot; it is never held across an await.
//! - Each slot's mutex guards the read-check-write of one task together with
//!   that task's event list, so claims on the same task are linearizable and
//!   claims on different tasks never wait on each other.
//! - Event sinks are called after the slot lock is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

use crate::domain::{
    AgentId, ArtifactRef, ClaimError, Eligibility, EventKind, Lease, REASON_LEASE_EXPIRED, Task,
    TaskDraft, TaskEvent, TaskId, TaskSnapshot, TaskStatus, claim_eligibility, is_expired,
};
use crate::ports::{
    ClaimGrant, Clock, EventSink, IdGenerator, TaskStore, TracingEventSink, UlidGenerator,
};

/// One task plus its own append-only history.
#[derive(Debug)]
struct TaskEntry {
    task: Task,
    events: Vec<TaskEvent>,
}

type Slot = Arc<Mutex<TaskEntry>>;

pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Slot>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    sink: Arc<dyn EventSink>,
    next_seq: AtomicU64,
}

impl InMemoryTaskStore {
    /// Store with ULID ids and a tracing event sink.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            tasks: DashMap::new(),
            clock,
            ids,
            sink: Arc::new(TracingEventSink),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn slot(&self, task_id: &TaskId) -> Result<Slot, ClaimError> {
        self.tasks
            .get(task_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClaimError::NotFound(task_id.clone()))
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Append to the task's log. Must be called with the slot lock held so
    /// `seq` order matches per-task insertion order.
    fn append(
        &self,
        entry: &mut TaskEntry,
        kind: EventKind,
        agent_id: &AgentId,
        now: DateTime<Utc>,
        reason: impl Into<String>,
        previous_owner: Option<AgentId>,
    ) -> TaskEvent {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = TaskEvent {
            seq,
            task_id: entry.task.task_id.clone(),
            kind,
            agent_id: agent_id.clone(),
            timestamp: now,
            reason: reason.into(),
            attempt: entry.task.attempt,
            previous_owner,
        };
        entry.events.push(event.clone());
        event
    }
}

/// Owner-only operations require a claimed task held by the caller.
///
/// The lease itself is not checked: the recorded owner may still finish
/// after expiry as long as nobody has reclaimed the task.
fn ensure_owner(task: &Task, agent_id: &AgentId, operation: &'static str) -> Result<(), ClaimError> {
    if task.status != TaskStatus::Claimed {
        return Err(ClaimError::InvalidState {
            task_id: task.task_id.clone(),
            status: task.status,
            operation,
        });
    }
    match task.owner() {
        Some(owner) if owner == agent_id => Ok(()),
        owner => Err(ClaimError::NotOwner {
            task_id: task.task_id.clone(),
            owner: owner.cloned(),
            caller: agent_id.clone(),
        }),
    }
}

fn non_blank(reason: &str, fallback: &str) -> String {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, draft: TaskDraft) -> Result<Task, ClaimError> {
        let now = self.clock.now();
        let task_id = draft
            .task_id
            .unwrap_or_else(|| self.ids.generate_task_id());

        let task = Task::new(task_id.clone(), draft.title, draft.created_by, now);
        match self.tasks.entry(task_id.clone()) {
            Entry::Occupied(_) => Err(ClaimError::AlreadyExists(task_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(TaskEntry {
                    task: task.clone(),
                    events: Vec::new(),
                })));
                tracing::debug!(task_id = %task_id, "task created");
                Ok(task)
            }
        }
    }

    async fn claim(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        lease: Duration,
    ) -> Result<ClaimGrant, ClaimError> {
        if lease <= Duration::zero() {
            return Err(ClaimError::InvalidLease(lease.num_milliseconds()));
        }
        let slot = self.slot(task_id)?;

        let (grant, event) = {
            let mut entry = slot.lock().await;
            // Read the clock under the lock so the eligibility check and the
            // new lease refer to the same instant.
            let now = self.clock.now();
            let Some(granted) = Lease::new(agent_id.clone(), now, lease) else {
                return Err(ClaimError::InvalidLease(lease.num_milliseconds()));
            };

            let previous = match claim_eligibility(&entry.task, now) {
                Eligibility::Fresh => None,
                Eligibility::Reclaim { previous_owner } => Some(previous_owner),
                Eligibility::Held { owner, lease_until } => {
                    return Err(ClaimError::AlreadyClaimed {
                        task_id: task_id.clone(),
                        owner,
                        lease_until,
                    });
                }
                Eligibility::Closed(status) => {
                    return Err(ClaimError::InvalidState {
                        task_id: task_id.clone(),
                        status,
                        operation: "claim",
                    });
                }
            };
            let reclaimed = previous.is_some();

            entry.task.start_attempt(granted);
            let event = match previous {
                None => self.append(&mut entry, EventKind::TaskClaimed, agent_id, now, "claimed", None),
                Some(previous_owner) => self.append(
                    &mut entry,
                    EventKind::TaskReclaimed,
                    agent_id,
                    now,
                    REASON_LEASE_EXPIRED,
                    previous_owner,
                ),
            };

            let grant = ClaimGrant {
                task: entry.task.clone(),
                reclaimed,
            };
            (grant, event)
        };

        self.sink.emit(&event);
        Ok(grant)
    }

    async fn renew(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<Task, ClaimError> {
        let slot = self.slot(task_id)?;
        let mut entry = slot.lock().await;
        let now = self.clock.now();

        ensure_owner(&entry.task, agent_id, "renew")?;
        if is_expired(&entry.task, now) {
            return Err(ClaimError::LeaseExpired {
                task_id: task_id.clone(),
                lease_until: entry.task.lease_until().unwrap_or(now),
            });
        }

        let Some(lease_until) = entry.task.extend_lease(now) else {
            let lease_ms = entry.task.lease.as_ref().map_or(0, |l| l.lease_ms);
            return Err(ClaimError::InvalidLease(lease_ms));
        };
        tracing::debug!(
            task_id = %task_id,
            agent_id = %agent_id,
            lease_until = %lease_until,
            "lease renewed"
        );
        Ok(entry.task.clone())
    }

    async fn complete(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        result_ref: Option<ArtifactRef>,
    ) -> Result<Task, ClaimError> {
        let slot = self.slot(task_id)?;
        let (task, event) = {
            let mut entry = slot.lock().await;
            let now = self.clock.now();

            ensure_owner(&entry.task, agent_id, "complete")?;
            entry.task.mark_done(result_ref, now);
            let event = self.append(&mut entry, EventKind::TaskDone, agent_id, now, "completed", None);
            (entry.task.clone(), event)
        };

        self.sink.emit(&event);
        Ok(task)
    }

    async fn fail(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Task, ClaimError> {
        let slot = self.slot(task_id)?;
        let (task, event) = {
            let mut entry = slot.lock().await;
            let now = self.clock.now();

            ensure_owner(&entry.task, agent_id, "fail")?;
            let reason = non_blank(reason, "failed");
            entry.task.mark_failed(reason.clone(), now);
            let event = self.append(&mut entry, EventKind::TaskFailed, agent_id, now, reason, None);
            (entry.task.clone(), event)
        };

        self.sink.emit(&event);
        Ok(task)
    }

    async fn release(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Task, ClaimError> {
        let slot = self.slot(task_id)?;
        let (task, event) = {
            let mut entry = slot.lock().await;
            let now = self.clock.now();

            ensure_owner(&entry.task, agent_id, "release")?;
            entry.task.release(now);
            let event = self.append(
                &mut entry,
                EventKind::TaskReleased,
                agent_id,
                now,
                non_blank(reason, "released"),
                None,
            );
            (entry.task.clone(), event)
        };

        self.sink.emit(&event);
        Ok(task)
    }

    async fn get(&self, task_id: &TaskId) -> Result<TaskSnapshot, ClaimError> {
        let slot = self.slot(task_id)?;
        let entry = slot.lock().await;
        Ok(TaskSnapshot::at(entry.task.clone(), self.clock.now()))
    }

    async fn events(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, ClaimError> {
        let slot = self.slot(task_id)?;
        let entry = slot.lock().await;
        Ok(entry.events.clone())
    }

    async fn all_events(&self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        for slot in self.all_slots() {
            events.extend(slot.lock().await.events.iter().cloned());
        }
        events.sort_by_key(|event| event.seq);
        events
    }

    async fn list(&self) -> Vec<TaskSnapshot> {
        let mut snapshots = Vec::with_capacity(self.tasks.len());
        for slot in self.all_slots() {
            let entry = slot.lock().await;
            snapshots.push(TaskSnapshot::at(entry.task.clone(), self.clock.now()));
        }
        snapshots.sort_by(|a, b| {
            a.task
                .created_at
                .cmp(&b.task.created_at)
                .then_with(|| a.task.task_id.cmp(&b.task.task_id))
        });
        snapshots
    }

    async fn result(&self, task_id: &TaskId) -> Result<Option<ArtifactRef>, ClaimError> {
        let slot = self.slot(task_id)?;
        let entry = slot.lock().await;
        if entry.task.status != TaskStatus::Done {
            return Err(ClaimError::InvalidState {
                task_id: task_id.clone(),
                status: entry.task.status,
                operation: "read result of",
            });
        }
        Ok(entry.task.result_ref.clone())
    }

    async fn expired_leases(&self) -> Vec<TaskId> {
        let mut expired = Vec::new();
        for slot in self.all_slots() {
            let entry = slot.lock().await;
            if entry.task.status == TaskStatus::Claimed && is_expired(&entry.task, self.clock.now()) {
                expired.push(entry.task.task_id.clone());
            }
        }
        expired.sort();
        expired
    }
}
