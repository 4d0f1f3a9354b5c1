use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::process::{ExecOutcome, RunParams};
use crate::Result;

/// Run `params` to completion, killing it if `timeout` elapses on `clock`
/// first. A zero timeout means no bound at all.
///
/// The command is started before any timer exists, so a start failure
/// returns immediately. Once the race is decided the timer task is aborted
/// and awaited; nothing it owns outlives this call.
pub async fn run_command_with_timeout(
    params: &RunParams,
    timeout: Duration,
    clock: Arc<dyn Clock>,
) -> Result<ExecOutcome> {
    let running = params.start()?;

    if timeout.is_zero() {
        return running.wait().await.map(ExecOutcome::Completed);
    }

    let cancel = CancellationToken::new();
    let elapsed = clock.after(timeout);
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = elapsed => {
                    tracing::info!(?timeout, "command timed out, cancelling");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let outcome = running.wait_with_cancel(cancel).await;

    timer.abort();
    let _ = timer.await;

    outcome
}
