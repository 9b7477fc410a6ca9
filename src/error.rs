#[derive(Debug, thiserror::Error)]
pub enum PerfError {
    #[error("Accounts file error: {0}")]
    AccountsFile(String),
    #[error("Invalid account line: {0}")]
    InvalidAccount(String),
    #[error("No coordinator account configured (add spider=true to one line)")]
    MissingCoordinator,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Login failed for {0}")]
    LoginFailed(String),
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
