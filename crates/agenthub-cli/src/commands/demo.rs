use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agenthub_core::app::{HandlerError, HubBuilder, TaskHandler};
use agenthub_core::config::HubConfig;
use agenthub_core::domain::{StatusCounts, Task, TaskEvent, TaskSnapshot};
use agenthub_core::ports::{Artifact, TaskStore};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

/// Simulated work: a short sleep, then a completion note. Every
/// `crash_every`-th call walks away instead.
struct SimulatedHandler {
    calls: AtomicU64,
    crash_every: u64,
    work: Duration,
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn handle(&self, task: &Task) -> Result<Artifact, HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.crash_every > 0 && call % self.crash_every == 0 {
            return Err(HandlerError::Abandon(format!("simulated crash on call {call}")));
        }
        tokio::time::sleep(self.work).await;
        Ok(Artifact::new(
            "completion_note",
            format!("Task '{}' was simulated and completed.", task.title),
        ))
    }
}

#[derive(Serialize)]
struct DemoOutput {
    counts: StatusCounts,
    tasks: Vec<TaskSnapshot>,
    timeline: Vec<TaskEvent>,
}

/// Timings short enough to watch a lease expire.
fn demo_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.lease.default_lease_ms = 1_000;
    config.lease.renew_interval_ms = 300;
    config.worker.poll_timeout_ms = 200;
    config.reaper.interval_ms = 250;
    config
}

pub async fn run(
    config_path: Option<&Path>,
    tasks: usize,
    workers: Option<usize>,
    crash_every: u64,
) -> anyhow::Result<()> {
    if crash_every == 1 {
        anyhow::bail!("--crash-every 1 would abandon every task; use 0 or >= 2");
    }

    let mut config = match config_path {
        Some(path) => HubConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => demo_config(),
    };
    if let Some(workers) = workers {
        config.worker.count = workers;
    }
    if crash_every > 0 && !config.reaper.enabled {
        tracing::warn!("reaper disabled; abandoned tasks will not be redelivered");
    }

    let lease = config.lease.default_lease_ms;
    let hub = HubBuilder::new().config(config).build()?;
    let running = hub.start(Arc::new(SimulatedHandler {
        calls: AtomicU64::new(0),
        crash_every,
        work: Duration::from_millis(50),
    }));

    for i in 1..=tasks {
        hub.submit(format!("Demo task {i}")).await?;
    }

    // each crash costs roughly one lease plus a reaper tick
    let patience =
        Duration::from_millis(lease.saturating_mul(tasks as u64 + 2)) + Duration::from_secs(10);
    let drained = tokio::select! {
        drained = wait_until_terminal(&**hub.store(), patience) => drained,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            false
        }
    };
    running.shutdown_and_join().await;

    let output = DemoOutput {
        counts: hub.store().counts().await,
        tasks: hub.store().list().await,
        timeline: hub.store().all_events().await,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !drained {
        anyhow::bail!("demo stopped before every task finished: {:?}", output.counts);
    }
    Ok(())
}

async fn wait_until_terminal(store: &dyn TaskStore, patience: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + patience;
    loop {
        let counts = store.counts().await;
        if counts.all_terminal() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(?counts, "demo timed out");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenthub_core::domain::TaskId;

    #[tokio::test]
    async fn handler_abandons_every_nth_call() {
        let handler = SimulatedHandler {
            calls: AtomicU64::new(0),
            crash_every: 2,
            work: Duration::from_millis(1),
        };
        let task = Task::new(TaskId::new("T"), "Write README".into(), None, chrono::Utc::now());

        let first = handler.handle(&task).await.unwrap();
        assert_eq!(first.content, "Task 'Write README' was simulated and completed.");
        assert!(matches!(handler.handle(&task).await, Err(HandlerError::Abandon(_))));
        assert!(handler.handle(&task).await.is_ok());
    }

    #[test]
    fn demo_config_is_valid() {
        demo_config().validate().unwrap();
    }
}
