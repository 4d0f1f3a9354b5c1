//! Identities for actions and the agents that run them.
//!
//! Action identifiers are canonical hyphenated UUIDs. In tag form they carry
//! an `action-` prefix. Agents are either machines (`machine-0`,
//! `machine-0-lxd-1`) or units (`unit-mysql-0`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TagError;

const ACTION_PREFIX: &str = "action-";
const MACHINE_PREFIX: &str = "machine-";
const UNIT_PREFIX: &str = "unit-";

// ---------------------------------------------------------------------------
// ActionTag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionTag(Uuid);

impl ActionTag {
    /// A fresh tag with a random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether `id` is a syntactically valid bare action id.
    pub fn is_valid_id(id: &str) -> bool {
        id.len() == 36 && Uuid::try_parse(id).is_ok()
    }

    /// Build a tag from a bare id as delivered by the notification stream.
    pub fn from_id(id: &str) -> Result<Self, TagError> {
        if !Self::is_valid_id(id) {
            return Err(TagError::InvalidActionId(id.to_string()));
        }
        Uuid::try_parse(id)
            .map(Self)
            .map_err(|_| TagError::InvalidActionId(id.to_string()))
    }

    /// Parse the `action-<uuid>` form.
    pub fn parse(tag: &str) -> Result<Self, TagError> {
        tag.strip_prefix(ACTION_PREFIX)
            .and_then(|id| Self::from_id(id).ok())
            .ok_or_else(|| TagError::InvalidActionTag(tag.to_string()))
    }

    /// The bare id, without the `action-` prefix.
    pub fn id(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ACTION_PREFIX}{}", self.0.hyphenated())
    }
}

impl FromStr for ActionTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActionTag {
    type Error = TagError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ActionTag> for String {
    fn from(tag: ActionTag) -> Self {
        tag.to_string()
    }
}

// ---------------------------------------------------------------------------
// AgentTag
// ---------------------------------------------------------------------------

/// The machine or unit agent a worker serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgentTag {
    /// Machine id such as `0` or `0/lxd/1`.
    Machine(String),
    /// Unit name such as `mysql/0`.
    Unit(String),
}

impl AgentTag {
    pub fn parse(tag: &str) -> Result<Self, TagError> {
        let invalid = || TagError::InvalidAgentTag(tag.to_string());

        if let Some(rest) = tag.strip_prefix(MACHINE_PREFIX) {
            let parts: Vec<&str> = rest.split('-').collect();
            // <n> followed by zero or more <container-type>-<n> pairs.
            if parts.len() % 2 == 0 || !is_number(parts[0]) {
                return Err(invalid());
            }
            for pair in parts[1..].chunks(2) {
                if !is_container_type(pair[0]) || !is_number(pair[1]) {
                    return Err(invalid());
                }
            }
            return Ok(Self::Machine(parts.join("/")));
        }

        if let Some(rest) = tag.strip_prefix(UNIT_PREFIX) {
            let (app, number) = rest.rsplit_once('-').ok_or_else(invalid)?;
            if !is_application_name(app) || !is_number(number) {
                return Err(invalid());
            }
            return Ok(Self::Unit(format!("{app}/{number}")));
        }

        Err(invalid())
    }

    pub fn machine(id: impl Into<String>) -> Self {
        Self::Machine(id.into())
    }

    /// The id in its natural form (`0/lxd/1`, `mysql/0`).
    pub fn id(&self) -> &str {
        match self {
            Self::Machine(id) | Self::Unit(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Machine(_) => "machine",
            Self::Unit(_) => "unit",
        }
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
}

fn is_container_type(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase())
}

fn is_application_name(s: &str) -> bool {
    s.bytes().next().is_some_and(|b| b.is_ascii_lowercase())
        && s.split('-').all(|seg| {
            !seg.is_empty()
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
                && !seg.bytes().all(|b| b.is_ascii_digit())
        })
}

impl fmt::Display for AgentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind(), self.id().replace('/', "-"))
    }
}

impl FromStr for AgentTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentTag {
    type Error = TagError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AgentTag> for String {
    fn from(tag: AgentTag) -> Self {
        tag.to_string()
    }
}
