use crate::output::{print_json, print_table};
use anyhow::Context;
use command_exec::WallClock;
use machine_actions_core::{
    ActionStatus, AgentTag, HandlerRegistry, JujuRunHandler, MachineActionsWorker, MemoryFacade,
    Params, Results, Settings, WorkerConfig, WorkerError, WorkerState,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Actions file
// ---------------------------------------------------------------------------

/// One entry of the actions file.
#[derive(Debug, Deserialize)]
struct ActionEntry {
    name: String,
    #[serde(default)]
    params: Params,
}

/// YAML parsing also covers JSON input.
fn load_actions(path: &Path) -> anyhow::Result<Vec<ActionEntry>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read actions file {}", path.display()))?;
    serde_yaml::from_str(&data)
        .with_context(|| format!("cannot parse actions file {}", path.display()))
}

#[derive(Debug, Serialize)]
struct ActionReport {
    tag: String,
    name: String,
    status: ActionStatus,
    message: String,
    results: Results,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(agent: &AgentTag, actions: &Path, settings: &Settings, json: bool) -> anyhow::Result<()> {
    let entries = load_actions(actions)?;

    let facade = MemoryFacade::new();
    let handler = HandlerRegistry::with_builtins(JujuRunHandler::new(
        settings.run_template(),
        Arc::new(WallClock),
    ));
    let config = WorkerConfig::builder()
        .facade(Arc::new(facade.clone()))
        .agent(agent.clone())
        .handler(Arc::new(handler))
        .batch_policy(settings.batch_policy)
        .build()?;
    let worker = MachineActionsWorker::new(config);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(drive(worker, &facade, agent, entries))?;

    let reports: Vec<ActionReport> = facade
        .records()
        .into_iter()
        .map(|r| ActionReport {
            tag: r.tag.to_string(),
            name: r.name,
            status: r.status,
            message: r.message,
            results: r.results,
        })
        .collect();

    if json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = reports
        .into_iter()
        .map(|r| {
            let results = if r.results.is_empty() {
                String::new()
            } else {
                serde_json::Value::Object(r.results).to_string()
            };
            vec![r.tag, r.name, r.status.to_string(), r.message, results]
        })
        .collect();
    print_table(&["TAG", "NAME", "STATUS", "MESSAGE", "RESULTS"], rows);
    Ok(())
}

/// Start the worker, hand it the actions once it is watching, and stop it
/// when they have all settled or on Ctrl-C.
///
/// Each action is enqueued separately so every notification batch holds a
/// single id, whatever the batch policy.
async fn drive(
    worker: MachineActionsWorker,
    facade: &MemoryFacade,
    agent: &AgentTag,
    entries: Vec<ActionEntry>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mut state = worker.state();
    let mut task = tokio::spawn(worker.run(shutdown.clone()));

    let settled = async {
        let active = state
            .wait_for(|s| *s != WorkerState::Initializing)
            .await
            .map(|s| *s == WorkerState::Active)
            .unwrap_or(false);
        if !active {
            // The worker task reports why it stopped.
            std::future::pending::<()>().await;
            return;
        }
        for entry in entries {
            facade.enqueue(agent, entry.name, entry.params);
        }
        facade.wait_settled(agent).await;
    };

    tokio::select! {
        res = &mut task => return finished(res),
        _ = settled => tracing::info!("all actions settled"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    shutdown.cancel();
    finished(task.await)
}

fn finished(res: Result<Result<(), WorkerError>, JoinError>) -> anyhow::Result<()> {
    res.context("worker task panicked")?
        .context("worker stopped")
}
