use crate::commands::FigmaCommand;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(120);

/// How progress updates affect a pending request's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Each progress update pushes the deadline to `last_activity + timeout`.
    #[default]
    Sliding,
    /// The deadline is fixed at registration.
    Absolute,
}

impl TimeoutPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPolicy::Sliding => "sliding",
            TimeoutPolicy::Absolute => "absolute",
        }
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "sliding" => Ok(TimeoutPolicy::Sliding),
            "absolute" => Ok(TimeoutPolicy::Absolute),
            other => Err(format!("Unknown timeout policy: {other}")),
        }
    }
}

/// Default and per-command timeouts used when a caller does not pass one.
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    default: Duration,
    long_running: Duration,
    overrides: HashMap<String, Duration>,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl TimeoutTable {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            long_running: LONG_RUNNING_TIMEOUT.max(default),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, command: &str, timeout: Duration) -> Self {
        self.overrides.insert(command.to_string(), timeout);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    pub fn for_command(&self, command: &str) -> Duration {
        if let Some(timeout) = self.overrides.get(command) {
            return *timeout;
        }
        match command.parse::<FigmaCommand>() {
            Ok(known) if known.is_long_running() => self.long_running,
            _ => self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_running_commands_get_the_longer_default() {
        let table = TimeoutTable::default();
        assert_eq!(table.for_command("get_selection"), DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(table.for_command("scan_text_nodes"), LONG_RUNNING_TIMEOUT);
        assert_eq!(table.for_command("not_a_command"), DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let table = TimeoutTable::new(Duration::from_secs(5))
            .with_override("scan_text_nodes", Duration::from_secs(7));
        assert_eq!(table.for_command("scan_text_nodes"), Duration::from_secs(7));
        assert_eq!(table.for_command("get_styles"), Duration::from_secs(5));
    }

    #[test]
    fn long_running_never_shorter_than_default() {
        let table = TimeoutTable::new(Duration::from_secs(600));
        assert_eq!(
            table.for_command("scan_nodes_by_types"),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn policy_parses() {
        assert_eq!("Sliding".parse::<TimeoutPolicy>(), Ok(TimeoutPolicy::Sliding));
        assert_eq!(
            "absolute".parse::<TimeoutPolicy>(),
            Ok(TimeoutPolicy::Absolute)
        );
        assert!("eventually".parse::<TimeoutPolicy>().is_err());
    }
}
