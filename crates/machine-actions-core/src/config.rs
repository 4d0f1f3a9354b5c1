use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use command_exec::{RunParams, DEFAULT_SHELL};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, WorkerError};
use crate::facade::Facade;
use crate::handler::HandleAction;
use crate::tag::AgentTag;

// ---------------------------------------------------------------------------
// BatchPolicy
// ---------------------------------------------------------------------------

/// How much of each notification batch the worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Every id in the batch, in order, one at a time.
    #[default]
    Drain,
    /// Only the first id; the rest are dropped until the next batch.
    FirstOnly,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// File-backed settings for the command environment and batch handling.
///
/// ```yaml
/// shell: /bin/bash
/// inherit_env: true
/// env:
///   LANG: C.UTF-8
/// working_dir: /var/lib/agent
/// batch_policy: drain
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub batch_policy: BatchPolicy,
}

fn default_shell() -> PathBuf {
    PathBuf::from(DEFAULT_SHELL)
}

fn default_inherit_env() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            inherit_env: default_inherit_env(),
            env: BTreeMap::new(),
            working_dir: None,
            batch_policy: BatchPolicy::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Command template for `juju-run`; the command text is filled in per
    /// action.
    pub fn run_template(&self) -> RunParams {
        let mut params = RunParams::new("")
            .with_shell(&self.shell)
            .inherit_env(self.inherit_env);
        for (k, v) in &self.env {
            params = params.with_env(k, v);
        }
        if let Some(dir) = &self.working_dir {
            params = params.with_working_dir(dir);
        }
        params
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// Dependencies of one worker. Build with [`WorkerConfig::builder`].
#[derive(Clone)]
pub struct WorkerConfig {
    pub facade: Arc<dyn Facade>,
    pub agent: AgentTag,
    pub handler: Arc<dyn HandleAction>,
    /// Every log event the worker emits is recorded inside this span.
    pub span: tracing::Span,
    pub batch_policy: BatchPolicy,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("agent", &self.agent)
            .field("span", &self.span)
            .field("batch_policy", &self.batch_policy)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct WorkerConfigBuilder {
    facade: Option<Arc<dyn Facade>>,
    agent: Option<AgentTag>,
    handler: Option<Arc<dyn HandleAction>>,
    span: Option<tracing::Span>,
    batch_policy: BatchPolicy,
}

impl WorkerConfigBuilder {
    pub fn facade(mut self, facade: Arc<dyn Facade>) -> Self {
        self.facade = Some(facade);
        self
    }

    pub fn agent(mut self, agent: AgentTag) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn HandleAction>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    /// Check that every dependency was supplied.
    ///
    /// Without an explicit span the worker logs under
    /// `machine_actions{agent=...}`.
    pub fn build(self) -> Result<WorkerConfig> {
        let facade = self
            .facade
            .ok_or_else(|| WorkerError::InvalidConfig("missing facade".into()))?;
        let agent = self
            .agent
            .ok_or_else(|| WorkerError::InvalidConfig("missing agent tag".into()))?;
        let handler = self
            .handler
            .ok_or_else(|| WorkerError::InvalidConfig("missing action handler".into()))?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("machine_actions", agent = %agent));

        Ok(WorkerConfig {
            facade,
            agent,
            handler,
            span,
            batch_policy: self.batch_policy,
        })
    }
}
