pub mod exec;
pub mod run;

use anyhow::Context;
use machine_actions_core::Settings;
use std::path::Path;

/// Settings from `path`, or the defaults when no file was given.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(p) => Settings::load(p).context("failed to load settings"),
        None => Ok(Settings::default()),
    }
}
