use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::PerfError;

/// One account line of the accounts file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountConfig {
    pub addr: String,
    pub app_pw: String,
    pub send_server: Option<String>,
    pub mail_server: Option<String>,
    /// `spider=true`: the coordinator account.
    pub spider: bool,
    /// Any other `key=value` tokens, kept for transports that understand them.
    pub options: BTreeMap<String, String>,
}

impl AccountConfig {
    pub fn new(addr: &str, app_pw: &str) -> Self {
        Self {
            addr: addr.to_string(),
            app_pw: app_pw.to_string(),
            send_server: None,
            mail_server: None,
            spider: false,
            options: BTreeMap::new(),
        }
    }

    /// Provider domain, used as the report column heading.
    pub fn domain(&self) -> &str {
        domain_of(&self.addr)
    }
}

/// Part after the last `@`, or the whole address if there is none.
pub fn domain_of(addr: &str) -> &str {
    addr.rsplit_once('@').map(|(_, d)| d).unwrap_or(addr)
}

/// Parsed accounts file: the test accounts in file order plus the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accounts {
    pub participants: Vec<AccountConfig>,
    pub coordinator: Option<AccountConfig>,
}

impl Accounts {
    pub fn load_from_file(path: &Path) -> Result<Self, PerfError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PerfError::AccountsFile(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::load_from_str(&content)
    }

    /// Parse the accounts file. A malformed line only drops that account;
    /// the load fails when no test account is left.
    pub fn load_from_str(content: &str) -> Result<Self, PerfError> {
        let mut accounts = Accounts::default();
        for (lineno, line) in content.lines().enumerate() {
            let entry = match parse_line(line) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                // the line may hold a password, so it is not logged
                Err(_) => {
                    warn!(line = lineno + 1, "no valid addr and app_pw, account skipped");
                    continue;
                }
            };
            let duplicate = accounts.participants.iter().any(|a| a.addr == entry.addr)
                || accounts.coordinator.as_ref().is_some_and(|c| c.addr == entry.addr);
            if duplicate {
                return Err(PerfError::InvalidAccount(format!(
                    "duplicate address {}",
                    entry.addr
                )));
            }
            if entry.spider {
                if accounts.coordinator.is_some() {
                    return Err(PerfError::InvalidAccount(format!(
                        "second spider account {}",
                        entry.addr
                    )));
                }
                accounts.coordinator = Some(entry);
            } else {
                accounts.participants.push(entry);
            }
        }
        if accounts.participants.is_empty() {
            return Err(PerfError::AccountsFile("no test accounts found".to_string()));
        }
        Ok(accounts)
    }

    /// The coordinator, or `MissingCoordinator`.
    pub fn require_coordinator(&self) -> Result<&AccountConfig, PerfError> {
        self.coordinator.as_ref().ok_or(PerfError::MissingCoordinator)
    }

    /// Participant addresses in file order.
    pub fn roster(&self) -> Vec<String> {
        self.participants.iter().map(|a| a.addr.clone()).collect()
    }
}

/// Parse one line. Blank and `#` lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<AccountConfig>, PerfError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut addr = None;
    let mut app_pw = None;
    let mut entry = AccountConfig::new("", "");
    for token in trimmed.split_whitespace() {
        // tokens without '=' are ignored
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "addr" => addr = Some(value.to_string()),
            "app_pw" => app_pw = Some(value.to_string()),
            "send_server" => entry.send_server = Some(value.to_string()),
            "mail_server" => entry.mail_server = Some(value.to_string()),
            "spider" => entry.spider = value == "true",
            _ => {
                entry.options.insert(key.to_string(), value.to_string());
            }
        }
    }

    match (addr, app_pw) {
        (Some(a), Some(p)) if a.contains('@') && !p.is_empty() => {
            entry.addr = a;
            entry.app_pw = p;
            Ok(Some(entry))
        }
        _ => Err(PerfError::InvalidAccount(trimmed.to_string())),
    }
}
