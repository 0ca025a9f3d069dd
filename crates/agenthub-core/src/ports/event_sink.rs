//! EventSink port - イベントの外部通知
//!
//! ストアは自分のイベントログを持つ（正本）。EventSink は追記のたびに呼ばれる観測用フック。

use std::sync::{Mutex, PoisonError};

use crate::domain::TaskEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}

/// Default sink: one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TaskEvent) {
        tracing::info!(
            seq = event.seq,
            task_id = %event.task_id,
            agent_id = %event.agent_id,
            attempt = event.attempt,
            reason = %event.reason,
            "{}",
            event.kind
        );
    }
}

/// Keeps every event it sees.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
