use std::path::Path;
use std::sync::Arc;

use agenthub_core::app::audit;
use agenthub_core::config::MAX_LEASE_MS;
use agenthub_core::domain::{
    AgentId, ClaimError, EventKind, REASON_LEASE_EXPIRED, Task, TaskDraft, TaskEvent, TaskId,
    TaskStatus,
};
use agenthub_core::impls::InMemoryTaskStore;
use agenthub_core::ports::{SystemClock, TaskStore};
use anyhow::Context;
use chrono::Duration;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub passed: bool,
    pub notes: Vec<String>,
    pub violations: Vec<String>,
    pub events: Vec<TaskEvent>,
}

impl ScenarioReport {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: false,
            notes: Vec::new(),
            violations: Vec::new(),
            events: Vec::new(),
        }
    }

    fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    fn violation(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    fn expect(&mut self, ok: bool, violation: impl Into<String>) {
        if !ok {
            self.violation(violation);
        }
    }

    /// Attach the store's event log and its audit findings.
    async fn finish(mut self, store: &InMemoryTaskStore) -> Self {
        let tasks: Vec<Task> = store.list().await.into_iter().map(|s| s.task).collect();
        self.events = store.all_events().await;
        for violation in audit(&tasks, &self.events) {
            self.violations.push(violation.to_string());
        }
        self.passed = self.violations.is_empty();
        self
    }
}

fn fresh_store() -> InMemoryTaskStore {
    InMemoryTaskStore::new(Arc::new(SystemClock))
}

async fn submit(store: &InMemoryTaskStore, id: &str) -> anyhow::Result<TaskId> {
    let task = store
        .create(
            TaskDraft::new(format!("Check task {id}"))
                .with_id(id)
                .created_by("agenthub-check"),
        )
        .await?;
    Ok(task.task_id)
}

fn kinds(events: &[TaskEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

async fn scenario_a() -> anyhow::Result<ScenarioReport> {
    let mut report = ScenarioReport::new("Scenario A: Single worker claim");
    let store = fresh_store();
    let t = submit(&store, "check-task-a").await?;
    let agent = AgentId::new("agentA");

    match store.claim(&t, &agent, Duration::seconds(60)).await {
        Ok(grant) => {
            if let Some(until) = grant.task.lease_until() {
                report.note(format!("agentA claimed {t} until {}", until.to_rfc3339()));
            }
            report.expect(
                grant.task.attempt == 1,
                format!("attempt is {} after the first claim", grant.task.attempt),
            );
        }
        Err(err) => report.violation(format!("claim failed: {err}")),
    }

    match store.complete(&t, &agent, None).await {
        Ok(task) => report.expect(
            task.status == TaskStatus::Done,
            format!("status is {} after complete", task.status),
        ),
        Err(err) => report.violation(format!("complete failed: {err}")),
    }

    let kinds = kinds(&store.events(&t).await?);
    report.expect(
        kinds == [EventKind::TaskClaimed, EventKind::TaskDone],
        format!("events were {kinds:?}"),
    );
    Ok(report.finish(&store).await)
}

async fn scenario_b() -> anyhow::Result<ScenarioReport> {
    let mut report = ScenarioReport::new("Scenario B: Two workers, no double-claim");
    let store = Arc::new(fresh_store());
    let t = submit(&store, "check-task-b").await?;

    let claims = ["agentA", "agentB"].map(|name| {
        let store = Arc::clone(&store);
        let t = t.clone();
        tokio::spawn(async move {
            let agent = AgentId::new(name);
            let result = store.claim(&t, &agent, Duration::seconds(60)).await;
            (agent, result)
        })
    });

    let mut winners = Vec::new();
    for handle in claims {
        let (agent, result) = handle.await?;
        match result {
            Ok(_) => {
                report.note(format!("{agent} won the claim"));
                winners.push(agent);
            }
            Err(ClaimError::AlreadyClaimed { owner, .. }) => {
                report.note(format!("{agent} refused: already claimed by {owner}"));
            }
            Err(err) => report.violation(format!("{agent} got an unexpected error: {err}")),
        }
    }

    report.expect(
        winners.len() == 1,
        format!("double-claim check: {} agents were granted the lease", winners.len()),
    );
    if let Some(winner) = winners.first() {
        let snapshot = store.get(&t).await?;
        report.expect(
            snapshot.task.owner() == Some(winner),
            format!("final owner is {:?}, expected {winner}", snapshot.task.owner()),
        );
    }
    Ok(report.finish(&store).await)
}

/// How long scenario C waits for agentA's lease to run out.
fn past_lease(lease_ms: u64) -> std::time::Duration {
    std::time::Duration::from_millis(lease_ms.saturating_add(200))
}

async fn scenario_c(lease_ms: u64) -> anyhow::Result<ScenarioReport> {
    let mut report = ScenarioReport::new("Scenario C: Lease expiry reclaim");
    let store = fresh_store();
    let t = submit(&store, "check-task-c").await?;

    let lease = Duration::milliseconds(i64::try_from(lease_ms).context("lease too long")?);
    store.claim(&t, &AgentId::new("agentA"), lease).await?;
    report.note(format!("agentA claimed with a {lease_ms}ms lease and went silent"));

    tokio::time::sleep(past_lease(lease_ms)).await;

    let agent_b = AgentId::new("agentB");
    match store.claim(&t, &agent_b, Duration::seconds(60)).await {
        Ok(grant) => {
            report.note(format!("agentB reclaimed on attempt {}", grant.task.attempt));
            report.expect(grant.reclaimed, "second claim was not reported as a reclaim");
            report.expect(
                grant.task.attempt == 2,
                format!("attempt is {} after reclaim", grant.task.attempt),
            );
            report.expect(
                grant.task.owner() == Some(&agent_b),
                "owner did not move to agentB",
            );
        }
        Err(err) => report.violation(format!("reclaim after expiry failed: {err}")),
    }

    let events = store.events(&t).await?;
    let kinds = kinds(&events);
    report.expect(
        kinds == [EventKind::TaskClaimed, EventKind::TaskReclaimed],
        format!("events were {kinds:?}"),
    );
    if let Some(last) = events.last() {
        report.expect(
            last.reason == REASON_LEASE_EXPIRED,
            format!("reclaim reason was {:?}", last.reason),
        );
    }
    Ok(report.finish(&store).await)
}

pub async fn run_scenarios(lease_ms: u64) -> anyhow::Result<Vec<ScenarioReport>> {
    Ok(vec![
        scenario_a().await?,
        scenario_b().await?,
        scenario_c(lease_ms).await?,
    ])
}

fn print_text(reports: &[ScenarioReport]) {
    for report in reports {
        let status = if report.passed { "PASS" } else { "FAIL" };
        println!("[{status}] {}", report.name);
        for note in &report.notes {
            println!("    - {note}");
        }
        for violation in &report.violations {
            println!("    ! {violation}");
        }
    }
}

pub fn render_markdown(reports: &[ScenarioReport]) -> String {
    let mut lines = vec![
        "# AgentHub Self-Check Report".to_string(),
        String::new(),
        format!("**Generated:** {}", chrono::Utc::now().to_rfc3339()),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        "| Scenario | Result |".to_string(),
        "|----------|--------|".to_string(),
    ];
    for report in reports {
        let status = if report.passed { "PASS" } else { "FAIL" };
        lines.push(format!("| {} | {status} |", report.name));
    }
    lines.push(String::new());

    for report in reports {
        lines.push(format!("## {}", report.name));
        lines.push(String::new());
        if !report.notes.is_empty() {
            lines.push("### Notes".to_string());
            lines.extend(report.notes.iter().map(|n| format!("- {n}")));
            lines.push(String::new());
        }
        if !report.violations.is_empty() {
            lines.push("### Violations".to_string());
            lines.extend(report.violations.iter().map(|v| format!("- {v}")));
            lines.push(String::new());
        }
        if !report.events.is_empty() {
            lines.push("### Events".to_string());
            lines.push("```".to_string());
            for event in &report.events {
                lines.push(format!(
                    "{:>3} {} | {} | {} | {}",
                    event.seq,
                    event.kind,
                    event.agent_id,
                    event.timestamp.to_rfc3339(),
                    event.reason
                ));
            }
            lines.push("```".to_string());
            lines.push(String::new());
        }
    }
    lines.join("\n")
}

pub async fn run(lease_ms: u64, format: OutputFormat, report_path: Option<&Path>) -> anyhow::Result<()> {
    if lease_ms == 0 || lease_ms > MAX_LEASE_MS {
        anyhow::bail!("--lease-ms must be in 1..={MAX_LEASE_MS}");
    }
    tracing::info!(lease_ms, "running claim scenarios");
    let reports = run_scenarios(lease_ms).await?;

    match format {
        OutputFormat::Text => print_text(&reports),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    if let Some(path) = report_path {
        std::fs::write(path, render_markdown(&reports))
            .with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} scenarios failed", reports.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_scenarios_pass_against_in_memory_store() {
        let reports = run_scenarios(50).await.unwrap();
        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert!(report.passed, "{}: {:?}", report.name, report.violations);
        }
        assert_eq!(reports[2].events.len(), 2);
    }

    #[test]
    fn expiry_wait_saturates_for_huge_leases() {
        assert_eq!(past_lease(1_000), std::time::Duration::from_millis(1_200));
        assert_eq!(past_lease(u64::MAX), std::time::Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn out_of_range_lease_is_refused_up_front() {
        for lease_ms in [0, MAX_LEASE_MS + 1, u64::MAX] {
            let err = run(lease_ms, OutputFormat::Text, None).await.unwrap_err();
            assert!(err.to_string().contains("--lease-ms"));
        }
    }

    #[test]
    fn markdown_lists_each_scenario_with_result() {
        let mut failing = ScenarioReport::new("Scenario X");
        failing.violation("task T marked done without prior claim (seq 1)");
        let mut passing = ScenarioReport::new("Scenario Y");
        passing.passed = true;

        let md = render_markdown(&[failing, passing]);
        assert!(md.contains("| Scenario X | FAIL |"));
        assert!(md.contains("| Scenario Y | PASS |"));
        assert!(md.contains("- task T marked done without prior claim (seq 1)"));
    }
}
