//! `sheetgate simulate`: Execute a scenario against an in-memory spreadsheet.
//!
//! Workbooks are seeded, snapshotted, run through a full [`Engine`] and
//! snapshotted again. The report carries per-Intent results plus the diff of
//! every container, with a conflict flag for changes no Intent accounts for.

use super::scenario::Scenario;
use serde::Serialize;
use sheetgate_backend::InMemorySheets;
use sheetgate_config::EngineConfig;
use sheetgate_core::{ContainerId, Intent};
use sheetgate_diff::{ControlledPaths, Diff, DiffSummary, diff_controlled};
use sheetgate_engine::Engine;
use sheetgate_tasks::{Task, TaskState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// The background Task, when run with `--background`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    pub results: serde_json::Value,
    pub diffs: Vec<ContainerDiff>,
}

#[derive(Debug, Serialize)]
pub struct ContainerDiff {
    pub container: ContainerId,
    pub summary: DiffSummary,
    #[serde(flatten)]
    pub diff: Diff,
}

pub async fn run(file: &Path, background: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let scenario = Scenario::load(file)?;

    eprintln!(
        "🧪 Simulating {} intents across {} containers{}",
        scenario.intents.len(),
        scenario.containers().len(),
        if background { " (background)" } else { "" }
    );

    let report = simulate(config, &scenario, background).await?;

    for d in &report.diffs {
        let marker = if d.diff.conflict { "⚠️ " } else { "✅" };
        eprintln!(
            "   {marker} {}: +{} -{} ~{}{}",
            d.container,
            d.summary.added,
            d.summary.removed,
            d.summary.modified,
            if d.diff.conflict { " (changed outside the submitted intents)" } else { "" }
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn simulate(
    config: EngineConfig,
    scenario: &Scenario,
    background: bool,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let sheets = Arc::new(InMemorySheets::new("memory"));
    scenario.seed(&sheets).await?;

    let mut before = Vec::new();
    for container in scenario.containers() {
        if let Some(snapshot) = sheets.snapshot(container.as_str()).await {
            before.push((container, snapshot));
        }
    }

    let engine = Engine::new(config, sheets.clone())?;
    engine.start().await;
    let outcome = if background {
        run_background(&engine, scenario.intents.clone()).await
    } else {
        run_foreground(&engine, &scenario.intents).await
    };
    engine.shutdown().await;
    let (task, results) = outcome?;

    let mut diffs = Vec::with_capacity(before.len());
    for (container, snapshot) in before {
        let after = sheets
            .snapshot(container.as_str())
            .await
            .ok_or_else(|| format!("Container {container} vanished during simulation"))?;
        let controlled = ControlledPaths::from_intents(&scenario.intents_for(&container));
        let diff = diff_controlled(&snapshot, &after, &controlled);
        diffs.push(ContainerDiff {
            container,
            summary: diff.summary(),
            diff,
        });
    }

    Ok(SimulationReport {
        task,
        results,
        diffs,
    })
}

type Outcome = (Option<Task>, serde_json::Value);

async fn run_foreground(engine: &Engine, intents: &[Intent]) -> Result<Outcome, Box<dyn std::error::Error>> {
    let results = engine.execute(intents).await;
    let failed = results.iter().filter(|r| !r.is_ok()).count();
    info!(total = results.len(), failed, "Foreground batch finished");
    Ok((None, serde_json::to_value(&results)?))
}

async fn run_background(engine: &Engine, intents: Vec<Intent>) -> Result<Outcome, Box<dyn std::error::Error>> {
    let task = engine.submit(intents, None).await?;
    eprintln!("   ⏳ Task {} submitted", task.id);

    let mut last_progress = task.progress.clone();
    loop {
        let current = engine.tasks().get(&task.id).await?;
        if current.progress != last_progress {
            if let Some(progress) = &current.progress {
                eprintln!("   ⏳ {progress}");
            }
            last_progress = current.progress.clone();
        }

        if current.state.is_terminal() {
            let results = match current.state {
                TaskState::Completed => engine.tasks().get_result(&task.id).await?,
                _ => serde_json::Value::Null,
            };
            return Ok((Some(current), results));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
