//! The per-agent action worker.
//!
//! ```text
//! Initializing ── cancel leftover running actions, open the watch ──▶ Active
//! Active ── for each id in each batch (serially):
//!              fetch → begin → handle → finish(Completed | Cancelled)
//! Active ── shutdown requested ──────────────────────────────▶ Terminated (Ok)
//! Active ── facade failure / stream failure ─────────────────▶ Terminated (Err)
//! ```

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::action::{FinishStatus, Results};
use crate::config::{BatchPolicy, WorkerConfig};
use crate::error::{Result, WorkerError};
use crate::facade::NotificationStream;
use crate::tag::ActionTag;

/// Message attached to actions cancelled during startup.
pub const STARTUP_CANCEL_MESSAGE: &str = "action cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Active,
    Terminated,
}

pub struct MachineActionsWorker {
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl MachineActionsWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Initializing);
        Self { config, state }
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled or a hard failure occurs.
    ///
    /// Shutdown interrupts a wait for the next batch, but an action that is
    /// already executing is allowed to finish first.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let span = self.config.span.clone();
        async move {
            let result = self.watch_loop(&shutdown).await;
            self.state.send_replace(WorkerState::Terminated);
            match &result {
                Ok(()) => tracing::info!("worker stopped"),
                Err(e) => tracing::error!(error = %e, "worker terminated"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn watch_loop(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            stream = self.set_up() => stream?,
        };
        self.state.send_replace(WorkerState::Active);
        tracing::info!("watching for actions");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(ids)) => self.handle(&ids, shutdown).await?,
                Some(Err(e)) => return Err(WorkerError::Watch(e)),
                None => return Err(WorkerError::WatchClosed),
            }
        }
    }

    /// Cancel whatever a previous incarnation left running, then subscribe.
    async fn set_up(&self) -> Result<NotificationStream> {
        let facade = &self.config.facade;
        let agent = &self.config.agent;

        let running = facade
            .running_actions(agent)
            .await
            .map_err(WorkerError::RunningActions)?;
        // Serial execution means at most one should be here; this is best effort.
        for action in running {
            let tag = match ActionTag::parse(&action.tag) {
                Ok(tag) => tag,
                Err(e) => {
                    tracing::info!(action = %action.tag, error = %e, "tried to cancel action but failed");
                    continue;
                }
            };
            match facade
                .action_finish(&tag, FinishStatus::Cancelled, Results::new(), STARTUP_CANCEL_MESSAGE)
                .await
            {
                Ok(()) => tracing::info!(action = %tag, "cancelled action left running"),
                Err(e) => {
                    tracing::info!(action = %tag, error = %e, "tried to cancel action but failed")
                }
            }
        }

        facade
            .watch_action_notifications(agent)
            .await
            .map_err(WorkerError::Watch)
    }

    async fn handle(&self, ids: &[String], shutdown: &CancellationToken) -> Result<()> {
        let ids = match self.config.batch_policy {
            BatchPolicy::Drain => ids,
            BatchPolicy::FirstOnly => &ids[..ids.len().min(1)],
        };
        for id in ids {
            if shutdown.is_cancelled() {
                tracing::debug!(remaining = %id, "shutdown requested, leaving rest of batch");
                break;
            }
            self.process(id).await?;
        }
        Ok(())
    }

    async fn process(&self, id: &str) -> Result<()> {
        let tag = match ActionTag::from_id(id) {
            Ok(tag) => tag,
            Err(e) => {
                tracing::warn!(error = %e, "got invalid action id");
                return Ok(());
            }
        };
        let facade = &self.config.facade;

        let action = facade
            .action(&tag)
            .await
            .map_err(|source| WorkerError::Fetch {
                id: id.to_string(),
                source,
            })?;

        facade
            .action_begin(&tag)
            .await
            .map_err(|source| WorkerError::Begin {
                name: action.name.clone(),
                source,
            })?;
        tracing::info!(action = %tag, name = %action.name, "action started");

        let (status, results, message) =
            match self.config.handler.handle_action(&action.name, &action.params).await {
                Ok(results) => (FinishStatus::Completed, results, String::new()),
                Err(e) => {
                    tracing::warn!(action = %tag, name = %action.name, error = %e, "action failed");
                    (FinishStatus::Cancelled, Results::new(), e.to_string())
                }
            };

        facade
            .action_finish(&tag, status, results, &message)
            .await
            .map_err(|source| WorkerError::Finish {
                tag: tag.to_string(),
                source,
            })?;
        tracing::info!(action = %tag, %status, "action finished");
        Ok(())
    }
}

impl std::fmt::Debug for MachineActionsWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineActionsWorker")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}
