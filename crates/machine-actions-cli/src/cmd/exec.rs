use crate::output::print_json;
use anyhow::Context;
use command_exec::{run_command_with_timeout, WallClock};
use machine_actions_core::Settings;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ExecReport {
    code: i32,
    stdout: String,
    stderr: String,
    cancelled: bool,
}

pub fn run(command: &str, timeout: Duration, settings: &Settings, json: bool) -> anyhow::Result<()> {
    let mut params = settings.run_template();
    params.commands = command.to_string();

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt
        .block_on(run_command_with_timeout(&params, timeout, Arc::new(WallClock)))
        .with_context(|| format!("failed to run '{command}'"))?;

    let cancelled = outcome.is_cancelled();
    let resp = outcome.into_response();
    let report = ExecReport {
        code: resp.code,
        stdout: resp.stdout_lossy(),
        stderr: resp.stderr_lossy(),
        cancelled,
    };

    if json {
        return print_json(&report);
    }

    print!("{}", report.stdout);
    eprint!("{}", report.stderr);
    if cancelled {
        eprintln!("cancelled: timed out after {timeout:?}");
    } else if report.code != 0 {
        eprintln!("exit code {}", report.code);
    }
    Ok(())
}

/// Parse `500ms`, `2s`, `1.5m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        other => return Err(format!("unknown unit '{other}' in '{s}' (use ms, s or m)")),
    };
    Duration::try_from_secs_f64(secs).map_err(|_| format!("invalid duration '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0.25").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5h").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }
}
