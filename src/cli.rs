// CLI subcommand definitions using clap derive macros
use anyhow::bail;
use clap::{Args, Parser};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::accounts::Accounts;
use crate::config::{self, Command, Config};
use crate::error::PerfError;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::reporter::{
    build_rows, confirm_overwrite, output_path_with_size, render, write_json_result, write_report,
    WriteOutcome,
};
use crate::transport::sim::SimTransport;
use crate::transport::MailTransport;

/// Measure login, delivery and group fan-out performance of mail providers.
#[derive(Parser, Debug, PartialEq)]
#[command(name = "provider-perf", version)]
pub enum Cli {
    /// Measure how long each account takes to log in
    Login(RunArgs),
    /// Measure group join and group message fan-out between all accounts
    Group(RunArgs),
    /// Send a test file to the coordinator and time the round trip
    File {
        #[command(flatten)]
        run: RunArgs,
        /// Test file to send
        #[arg(short = 'f', long)]
        testfile: Option<PathBuf>,
    },
    /// Find how many recipients each provider accepts per message
    Recipients {
        #[command(flatten)]
        run: RunArgs,
        /// First recipient count to try
        #[arg(long)]
        start: Option<u32>,
        /// Escalation step
        #[arg(long)]
        step: Option<u32>,
        /// Largest recipient count to try
        #[arg(long)]
        max: Option<u32>,
    },
    /// Probe IMAP QUOTA and CONDSTORE support
    Server(RunArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, PartialEq, Default)]
pub struct RunArgs {
    /// File with one `addr=... app_pw=...` line per account
    #[arg(short, long)]
    pub accounts_file: Option<PathBuf>,
    /// JSON config file; command line flags take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// CSV report path
    #[arg(short, long)]
    pub output: Option<String>,
    /// Seconds after which a phase is aborted
    #[arg(short, long)]
    pub timeout: Option<u64>,
    /// Overwrite an existing report without asking
    #[arg(short, long)]
    pub yes: bool,
    /// Also dump the raw results as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,
    /// Use the in-memory provider network
    #[arg(long)]
    pub simulate: bool,
}

impl Cli {
    pub fn command(&self) -> Command {
        match self {
            Cli::Login(_) => Command::Login,
            Cli::Group(_) => Command::Group,
            Cli::File { .. } => Command::File,
            Cli::Recipients { .. } => Command::Recipients,
            Cli::Server(_) => Command::Server,
        }
    }

    pub fn run_args(&self) -> &RunArgs {
        match self {
            Cli::Login(run) | Cli::Group(run) | Cli::Server(run) => run,
            Cli::File { run, .. } | Cli::Recipients { run, .. } => run,
        }
    }
}

/// Config file (or defaults) with command line overrides applied, validated
/// for the selected command.
pub fn resolve_config(cli: &Cli) -> Result<Config, PerfError> {
    let args = cli.run_args();
    let mut cfg = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => Config::default(),
    };

    if let Some(path) = &args.accounts_file {
        cfg.accounts_file = path.display().to_string();
    }
    if let Some(output) = &args.output {
        cfg.output = output.clone();
    }
    if let Some(timeout) = args.timeout {
        cfg.timeout = timeout;
    }
    if let Some(json) = &args.json {
        cfg.json_output = Some(json.display().to_string());
    }
    cfg.yes |= args.yes;
    cfg.simulate |= args.simulate;

    match cli {
        Cli::File {
            testfile: Some(path),
            ..
        } => cfg.testfile = path.display().to_string(),
        Cli::Recipients {
            start, step, max, ..
        } => {
            if let Some(v) = start {
                cfg.recipients.start = *v;
            }
            if let Some(v) = step {
                cfg.recipients.step = *v;
            }
            if let Some(v) = max {
                cfg.recipients.max = *v;
            }
        }
        _ => {}
    }

    cfg.validate_for(cli.command()).map_err(|errors| {
        PerfError::ConfigError(format!("Validation errors: {}", errors.join("; ")))
    })?;
    Ok(cfg)
}

fn transport_for(cfg: &Config) -> anyhow::Result<Arc<dyn MailTransport>> {
    if cfg.simulate {
        return Ok(Arc::new(SimTransport::new()));
    }
    bail!("no mail transport backend is linked into this build; rerun with --simulate")
}

/// Execute one measurement run end to end.
pub async fn run_measurement(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command();
    let cfg = resolve_config(&cli)?;
    let accounts = Accounts::load_from_file(Path::new(&cfg.accounts_file))?;
    let transport = transport_for(&cfg)?;

    let mut orchestrator = Orchestrator::new(cfg.clone(), command, accounts, transport)?;
    orchestrator.setup_signal_handler()?;
    let summary = orchestrator.run().await;
    write_outputs(&summary, &cfg)?;
    Ok(())
}

/// Print the CSV report and write it (plus the optional JSON dump) to disk.
pub fn write_outputs(summary: &RunSummary, cfg: &Config) -> anyhow::Result<WriteOutcome> {
    let rows = build_rows(summary.command, &summary.snapshot, summary.file_size.as_deref());
    let csv = render(&rows);
    println!("Test results in csv format:");
    println!("{}", csv);

    let path = match &summary.file_size {
        Some(size) => output_path_with_size(&cfg.output, size),
        None => PathBuf::from(&cfg.output),
    };
    let outcome = write_report(&path, &csv, cfg.yes, |p| {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        let answer = confirm_overwrite(p, &mut stdin.lock(), &mut stdout);
        let _ = stdout.flush();
        answer
    })?;
    match &outcome {
        WriteOutcome::Written(p) => info!(path = %p.display(), "report written"),
        WriteOutcome::Declined => warn!(path = %path.display(), "report not written"),
    }

    if let Some(json) = &cfg.json_output {
        write_json_result(&summary.snapshot, Path::new(json))?;
        info!(path = %json, "raw results written");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregateSnapshot, ResultValue};
    use std::io::Write as _;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_login_with_defaults() {
        let cli = Cli::try_parse_from(["provider-perf", "login"]).unwrap();
        assert_eq!(cli.command(), Command::Login);
        assert_eq!(cli.run_args(), &RunArgs::default());
    }

    #[test]
    fn test_common_args() {
        let cli = Cli::try_parse_from([
            "provider-perf",
            "group",
            "-a", "accounts.txt",
            "-o", "out.csv",
            "-t", "30",
            "-y",
            "--json", "raw.json",
            "--simulate",
        ])
        .unwrap();
        assert_eq!(cli.command(), Command::Group);
        let args = cli.run_args();
        assert_eq!(args.accounts_file, Some(PathBuf::from("accounts.txt")));
        assert_eq!(args.output.as_deref(), Some("out.csv"));
        assert_eq!(args.timeout, Some(30));
        assert!(args.yes);
        assert!(args.simulate);
        assert_eq!(args.json, Some(PathBuf::from("raw.json")));
    }

    #[test]
    fn test_file_with_testfile() {
        let cli = Cli::try_parse_from(["provider-perf", "file", "-f", "big.bin"]).unwrap();
        match cli {
            Cli::File { testfile, .. } => assert_eq!(testfile, Some(PathBuf::from("big.bin"))),
            _ => panic!("Expected File"),
        }
    }

    #[test]
    fn test_recipients_overrides() {
        let cli = Cli::try_parse_from([
            "provider-perf", "recipients", "--start", "10", "--step", "2", "--max", "50",
        ])
        .unwrap();
        let cfg = resolve_config(&cli).unwrap();
        assert_eq!(cfg.recipients.start, 10);
        assert_eq!(cfg.recipients.step, 2);
        assert_eq!(cfg.recipients.max, 50);
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["provider-perf", "compare"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"timeout": 45, "output": "from-config.csv"}}"#).unwrap();
        let path = tmp.path().display().to_string();
        let cli = Cli::try_parse_from(["provider-perf", "login", "-c", &path, "-t", "5"]).unwrap();
        let cfg = resolve_config(&cli).unwrap();
        assert_eq!(cfg.timeout, 5);
        assert_eq!(cfg.output, "from-config.csv");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::try_parse_from(["provider-perf", "login", "-t", "0"]).unwrap();
        assert!(matches!(resolve_config(&cli), Err(PerfError::ConfigError(_))));
    }

    #[test]
    fn test_file_command_requires_existing_testfile() {
        let cli = Cli::try_parse_from(["provider-perf", "file", "-f", "/nonexistent/x.bin"]).unwrap();
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn test_real_transport_unavailable() {
        assert!(transport_for(&Config::default()).is_err());
        let cfg = Config {
            simulate: true,
            ..Default::default()
        };
        assert!(transport_for(&cfg).is_ok());
    }

    #[test]
    fn test_write_outputs_inserts_file_size() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            output: dir.path().join("performance.csv").display().to_string(),
            json_output: Some(dir.path().join("raw.json").display().to_string()),
            yes: true,
            ..Default::default()
        };
        let mut snapshot = AggregateSnapshot {
            roster: vec!["a@pa.example".to_string()],
            ..Default::default()
        };
        snapshot
            .logins
            .insert("a@pa.example".to_string(), ResultValue::Duration(1.0));
        let summary = RunSummary {
            command: Command::File,
            snapshot,
            file_size: Some("15.0MB".to_string()),
            interrupted: false,
        };
        let outcome = write_outputs(&summary, &cfg).unwrap();
        let expected = dir.path().join("performance-15.0MB.csv");
        assert_eq!(outcome, WriteOutcome::Written(expected.clone()));
        let csv = std::fs::read_to_string(expected).unwrap();
        assert!(csv.starts_with("test accounts (by provider):, pa.example"));
        assert!(csv.contains("sent 15.0MB file (in seconds):, timeout"));
        assert!(dir.path().join("raw.json").exists());
    }
}
