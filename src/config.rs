//! Process configuration read from the environment.
//!
//! - `GRADEBOOKD_WORKSPACE`: workspace directory opened at startup (optional;
//!   clients can still call `workspace.select`).
//! - `GRADEBOOKD_LOG`: tracing filter directives (default `info`). Logs go to
//!   stderr because stdout carries the protocol.

use std::path::PathBuf;

pub const WORKSPACE_ENV: &str = "GRADEBOOKD_WORKSPACE";
pub const LOG_ENV: &str = "GRADEBOOKD_LOG";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace = lookup(WORKSPACE_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(LOG_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self {
            workspace,
            log_filter,
        }
    }
}
