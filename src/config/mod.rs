// Configuration manager module
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PerfError;

/// Test command to run after login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    #[default]
    Login,
    Group,
    File,
    Recipients,
    Server,
}

impl Command {
    /// Commands that need the coordinator account.
    pub fn needs_coordinator(&self) -> bool {
        matches!(self, Command::Group | Command::File)
    }
}

/// Escalating recipient probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientsConfig {
    pub start: u32,
    pub step: u32,
    pub max: u32,
    /// How long one probe may stay pending before it counts as rejected.
    pub probe_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RecipientsConfig {
    fn default() -> Self {
        Self {
            start: 25,
            step: 25,
            max: 1000,
            probe_timeout_ms: 60_000,
            poll_interval_ms: 500,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub accounts_file: String,
    /// CSV report path.
    pub output: String,
    /// Optional raw JSON dump of all results.
    pub json_output: Option<String>,
    /// Overwrite an existing report without asking.
    pub yes: bool,
    /// Seconds to wait for each phase.
    pub timeout: u64,
    /// Seconds to wait for each account's shutdown.
    pub shutdown_timeout: u64,
    pub testfile: String,
    /// Peer group messages kept per participant while its kickoff is outstanding.
    pub group_buffer: usize,
    pub recipients: RecipientsConfig,
    /// Run against the in-memory provider network instead of real servers.
    pub simulate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts_file: "testaccounts.txt".to_string(),
            output: "performance.csv".to_string(),
            json_output: None,
            yes: false,
            timeout: 90,
            shutdown_timeout: 10,
            testfile: "files/testfile.mp3".to_string(),
            group_buffer: 64,
            recipients: RecipientsConfig::default(),
            simulate: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.accounts_file.is_empty() {
            errors.push("accounts_file must not be empty".to_string());
        }
        if self.output.is_empty() {
            errors.push("output must not be empty".to_string());
        }
        if self.timeout == 0 {
            errors.push("timeout must be greater than 0".to_string());
        }
        if self.shutdown_timeout == 0 {
            errors.push("shutdown_timeout must be greater than 0".to_string());
        }
        if self.group_buffer == 0 {
            errors.push("group_buffer must be greater than 0".to_string());
        }

        let r = &self.recipients;
        if r.start == 0 {
            errors.push("recipients.start must be greater than 0".to_string());
        }
        if r.step == 0 {
            errors.push("recipients.step must be greater than 0".to_string());
        }
        if r.max < r.start {
            errors.push("recipients.max must be >= recipients.start".to_string());
        }
        if r.probe_timeout_ms == 0 {
            errors.push("recipients.probe_timeout_ms must be greater than 0".to_string());
        }
        if r.poll_interval_ms == 0 {
            errors.push("recipients.poll_interval_ms must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Checks that only make sense for a particular command.
    pub fn validate_for(&self, command: Command) -> Result<(), Vec<String>> {
        let mut errors = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        if command == Command::File && !Path::new(&self.testfile).is_file() {
            errors.push(format!("testfile '{}' does not exist", self.testfile));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Parse JSON and validate.
pub fn load_from_str(json: &str) -> Result<Config, PerfError> {
    let config: Config = serde_json::from_str(json)
        .map_err(|e| PerfError::ConfigError(format!("JSON parse error: {}", e)))?;

    config.validate().map_err(|errors| {
        PerfError::ConfigError(format!("Validation errors: {}", errors.join("; ")))
    })?;

    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<Config, PerfError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PerfError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    load_from_str(&content)
}
