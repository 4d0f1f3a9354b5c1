use std::path::PathBuf;

use thiserror::Error;

use crate::action::ActionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("invalid action id {0:?}")]
    InvalidActionId(String),

    #[error("{0:?} is not a valid action tag")]
    InvalidActionTag(String),

    #[error("{0:?} is not a valid agent tag")]
    InvalidAgentTag(String),
}

/// Failures reported by a [`Facade`](crate::facade::Facade) implementation.
#[derive(Debug, Clone, Error)]
pub enum FacadeError {
    #[error("action {0} not found")]
    NotFound(String),

    #[error("cannot {op} action {tag}: action is {status}")]
    InvalidTransition {
        tag: String,
        status: ActionStatus,
        op: &'static str,
    },

    #[error("facade unavailable: {0}")]
    Unavailable(String),
}

/// Why a handler could not perform the requested work.
///
/// These never stop the worker; the text becomes the cancelled action's
/// message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unexpected action {0}")]
    Unsupported(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("command cancelled")]
    Cancelled,

    #[error(transparent)]
    Exec(#[from] command_exec::ExecError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid worker config: {0}")]
    InvalidConfig(String),

    #[error("cannot list running actions: {0}")]
    RunningActions(#[source] FacadeError),

    #[error("cannot watch action notifications: {0}")]
    Watch(#[source] FacadeError),

    #[error("action notification stream closed")]
    WatchClosed,

    #[error("could not retrieve action {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: FacadeError,
    },

    #[error("could not begin action {name}: {source}")]
    Begin {
        name: String,
        #[source]
        source: FacadeError,
    },

    #[error("could not finish action {tag}: {source}")]
    Finish {
        tag: String,
        #[source]
        source: FacadeError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;
