//! InMemoryDeliveryQueue - 開発用の配送キュー
//!
//! - FIFO、同じ task_id が待機中なら二重に積まない
//! - pop は Notify で push を待つ（timeout 付き）
//! - close() で待機中の pop をすべて起こす

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::TaskId;
use crate::ports::{DeliveryQueue, QueueError};

#[derive(Default)]
struct Pending {
    order: VecDeque<TaskId>,
    waiting: HashSet<TaskId>,
}

pub struct InMemoryDeliveryQueue {
    pending: Mutex<Pending>,
    notify: Notify,
    closed: AtomicBool,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryDeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn push(&self, task_id: TaskId) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        {
            let mut pending = self.pending.lock().await;
            if !pending.waiting.insert(task_id.clone()) {
                return Ok(());
            }
            pending.order.push_back(task_id);
        }
        // Notify outside the lock
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a push between the check
            // and the wait is not lost.
            let notified = self.notify.notified();
            {
                let mut pending = self.pending.lock().await;
                if let Some(task_id) = pending.order.pop_front() {
                    pending.waiting.remove(&task_id);
                    return Ok(Some(task_id));
                }
            }
            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            tokio::select! {
                _ = notified => {},
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn len(&self) -> usize {
        self.pending.lock().await.order.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
