//! Typed decoding of action parameters.
//!
//! Parameters arrive as a loose JSON map. Each handler decodes them once, up
//! front, into a struct; nothing downstream looks at the raw map again.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::action::Params;
use crate::error::HandlerError;

/// Inputs of the `juju-run` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunActionParams {
    /// Shell script to run.
    pub command: String,
    /// Upper bound on run time. Serialized as a (possibly floating point)
    /// count of nanoseconds; zero or absent means no bound.
    #[serde(default, deserialize_with = "deserialize_nanos")]
    pub timeout: Duration,
}

impl RunActionParams {
    pub fn decode(params: &Params) -> Result<Self, HandlerError> {
        decode(params)
    }
}

/// Decode any `Deserialize` type from a parameter map.
pub fn decode<T: for<'de> Deserialize<'de>>(params: &Params) -> Result<T, HandlerError> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

fn deserialize_nanos<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos: Option<f64> = Option::deserialize(d)?;
    match nanos {
        None => Ok(Duration::ZERO),
        Some(n) if !n.is_finite() || n < 0.0 => Err(serde::de::Error::custom(format!(
            "timeout must be a non-negative number of nanoseconds, got {n}"
        ))),
        // Fractional nanoseconds truncate; values past u64::MAX saturate.
        Some(n) => Ok(Duration::from_nanos(n as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> Params {
        match v {
            serde_json::Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn timeout_is_nanoseconds() {
        let p = RunActionParams::decode(&params(json!({
            "command": "sleep 5",
            "timeout": 1_000_000_000.0
        })))
        .unwrap();
        assert_eq!(p.command, "sleep 5");
        assert_eq!(p.timeout, Duration::from_secs(1));
    }

    #[test]
    fn integer_timeout_is_accepted() {
        let p = RunActionParams::decode(&params(json!({"command": "x", "timeout": 2500}))).unwrap();
        assert_eq!(p.timeout, Duration::from_nanos(2500));
    }

    #[test]
    fn missing_or_null_timeout_is_unbounded() {
        let p = RunActionParams::decode(&params(json!({"command": "echo hi"}))).unwrap();
        assert_eq!(p.timeout, Duration::ZERO);
        let p = RunActionParams::decode(&params(json!({"command": "echo hi", "timeout": null})))
            .unwrap();
        assert_eq!(p.timeout, Duration::ZERO);
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let err = RunActionParams::decode(&params(json!({"command": "x", "timeout": -1.0})))
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn missing_command_is_rejected() {
        let err = RunActionParams::decode(&params(json!({"timeout": 0}))).unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let p = RunActionParams::decode(&params(json!({"command": "ls", "workload-context": true})))
            .unwrap();
        assert_eq!(p.command, "ls");
    }
}
