//! Action data model.
//!
//! An action is a named unit of work with loosely-typed parameters, enqueued
//! for one agent. The facade owns the record; the worker only reads it and
//! asks for status transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::{ActionTag, AgentTag};

/// Parameters as stored with the action.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Results reported when an action finishes.
pub type Results = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an action.
///
/// Transitions: `Enqueued → Running → Completed | Cancelled`. An enqueued
/// action may also be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Enqueued,
    Running,
    Completed,
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two statuses a finish request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishStatus {
    Completed,
    Cancelled,
}

impl From<FinishStatus> for ActionStatus {
    fn from(s: FinishStatus) -> Self {
        match s {
            FinishStatus::Completed => ActionStatus::Completed,
            FinishStatus::Cancelled => ActionStatus::Cancelled,
        }
    }
}

impl fmt::Display for FinishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ActionStatus::from(*self).fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Action views
// ---------------------------------------------------------------------------

/// What the worker needs to dispatch an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tag: ActionTag,
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

/// An in-flight action as reported by the facade at startup.
///
/// The tag is kept as the facade sent it; the worker parses it itself and
/// skips entries it cannot parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningAction {
    pub tag: String,
    pub name: String,
}

/// The complete record kept by a facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tag: ActionTag,
    pub agent: AgentTag,
    pub name: String,
    pub params: Params,
    pub status: ActionStatus,
    #[serde(default)]
    pub results: Results,
    #[serde(default)]
    pub message: String,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    /// A new record in `Enqueued` state.
    pub fn enqueued(agent: AgentTag, name: impl Into<String>, params: Params) -> Self {
        Self {
            tag: ActionTag::generate(),
            agent,
            name: name.into(),
            params,
            status: ActionStatus::Enqueued,
            results: Results::new(),
            message: String::new(),
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn action(&self) -> Action {
        Action {
            tag: self.tag,
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}
