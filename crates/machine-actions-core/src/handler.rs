//! Action handlers and the name-keyed registry that selects between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use command_exec::{run_command_with_timeout, Clock, ExecOutcome, ExecResponse, RunParams};

use crate::action::{Params, Results};
use crate::error::HandlerError;
use crate::params::RunActionParams;

/// Name of the built-in action that runs a shell command.
pub const JUJU_RUN_ACTION_NAME: &str = "juju-run";

// ---------------------------------------------------------------------------
// HandleAction
// ---------------------------------------------------------------------------

/// Performs the work an action asks for.
///
/// The worker awaits each call to completion before looking at the next
/// action, so a slow handler holds up its agent's whole queue.
#[async_trait]
pub trait HandleAction: Send + Sync {
    async fn handle_action(&self, name: &str, params: &Params) -> Result<Results, HandlerError>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Routes each action to the handler registered under its name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn HandleAction>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the `juju-run` handler.
    pub fn with_builtins(run: JujuRunHandler) -> Self {
        Self::new().with(JUJU_RUN_ACTION_NAME, run)
    }

    pub fn with(mut self, name: impl Into<String>, handler: impl HandleAction + 'static) -> Self {
        self.register(name, Arc::new(handler));
        self
    }

    /// Add or replace the handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn HandleAction>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl HandleAction for HandlerRegistry {
    async fn handle_action(&self, name: &str, params: &Params) -> Result<Results, HandlerError> {
        match self.handlers.get(name) {
            Some(handler) => handler.handle_action(name, params).await,
            None => Err(HandlerError::Unsupported(name.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// JujuRunHandler
// ---------------------------------------------------------------------------

/// Runs the `command` parameter through the shell, bounded by `timeout`.
///
/// Results carry `code`, `stdout` and `stderr`. A timed-out command fails
/// the action with "command cancelled".
#[derive(Clone)]
pub struct JujuRunHandler {
    template: RunParams,
    clock: Arc<dyn Clock>,
}

impl JujuRunHandler {
    /// `template` supplies shell, environment and working directory; its
    /// command text is replaced per action.
    pub fn new(template: RunParams, clock: Arc<dyn Clock>) -> Self {
        Self { template, clock }
    }
}

impl std::fmt::Debug for JujuRunHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JujuRunHandler")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HandleAction for JujuRunHandler {
    async fn handle_action(&self, _name: &str, params: &Params) -> Result<Results, HandlerError> {
        let RunActionParams { command, timeout } = RunActionParams::decode(params)?;

        let mut run = self.template.clone();
        run.commands = command;

        match run_command_with_timeout(&run, timeout, Arc::clone(&self.clock)).await? {
            ExecOutcome::Completed(resp) => Ok(exec_results(&resp)),
            ExecOutcome::Cancelled(resp) => {
                tracing::debug!(
                    stdout_bytes = resp.stdout.len(),
                    stderr_bytes = resp.stderr.len(),
                    "discarding output of cancelled command"
                );
                Err(HandlerError::Cancelled)
            }
        }
    }
}

/// The result map reported for a finished command.
pub fn exec_results(resp: &ExecResponse) -> Results {
    let mut results = Results::new();
    results.insert("code".into(), resp.code.into());
    results.insert("stdout".into(), resp.stdout_lossy().into());
    results.insert("stderr".into(), resp.stderr_lossy().into());
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use command_exec::{ManualClock, WallClock};
    use serde_json::json;
    use std::time::Duration;

    fn params(v: serde_json::Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    fn run_handler() -> JujuRunHandler {
        JujuRunHandler::new(RunParams::new(""), Arc::new(WallClock))
    }

    struct Echo;

    #[async_trait]
    impl HandleAction for Echo {
        async fn handle_action(
            &self,
            name: &str,
            params: &Params,
        ) -> Result<Results, HandlerError> {
            let mut r = params.clone();
            r.insert("handled".into(), name.into());
            Ok(r)
        }
    }

    #[tokio::test]
    async fn juju_run_reports_code_and_output() {
        let results = run_handler()
            .handle_action(JUJU_RUN_ACTION_NAME, &params(json!({"command": "echo hi", "timeout": 0})))
            .await
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(results),
            json!({"code": 0, "stdout": "hi\n", "stderr": ""})
        );
    }

    #[tokio::test]
    async fn juju_run_non_zero_exit_still_succeeds() {
        let results = run_handler()
            .handle_action(JUJU_RUN_ACTION_NAME, &params(json!({"command": "echo no >&2; exit 2"})))
            .await
            .unwrap();
        assert_eq!(results["code"], json!(2));
        assert_eq!(results["stderr"], json!("no\n"));
    }

    #[tokio::test]
    async fn juju_run_timeout_is_cancelled() {
        let clock = ManualClock::new();
        let handler = JujuRunHandler::new(RunParams::new(""), Arc::new(clock.clone()));
        let task = tokio::spawn(async move {
            handler
                .handle_action(
                    JUJU_RUN_ACTION_NAME,
                    &params(json!({"command": "sleep 5", "timeout": 1e9})),
                )
                .await
        });

        clock.wait_for_timers(1).await;
        clock.advance(Duration::from_secs(1));

        let err = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("handler should return once the timer fires")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, HandlerError::Cancelled));
        assert_eq!(err.to_string(), "command cancelled");
    }

    #[tokio::test]
    async fn juju_run_bad_params_fail_before_running() {
        let err = run_handler()
            .handle_action(JUJU_RUN_ACTION_NAME, &params(json!({"timeout": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn registry_routes_by_name() {
        let registry = HandlerRegistry::new().with("echo", Echo);
        let results = registry
            .handle_action("echo", &params(json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(results["handled"], json!("echo"));
        assert_eq!(results["x"], json!(1));
    }

    #[tokio::test]
    async fn registry_rejects_unknown_names() {
        let registry = HandlerRegistry::with_builtins(run_handler());
        let err = registry
            .handle_action("custom-noop", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unexpected action custom-noop");
    }

    #[test]
    fn builtins_hold_only_juju_run() {
        let registry = HandlerRegistry::with_builtins(run_handler());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![JUJU_RUN_ACTION_NAME]);
        assert!(!registry.is_empty());
        assert!(HandlerRegistry::new().is_empty());
    }
}
