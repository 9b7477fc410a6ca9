// Run orchestrator module
//
// Drives one measurement run: start every account, wait for logins, run
// the selected command phase, shut every account down and hand the
// aggregated results back for reporting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::accounts::{AccountConfig, Accounts};
use crate::aggregator::{
    numeric_fraction, AggregateSnapshot, Aggregator, CompletionSignal, Phase, ResultValue,
    WaitOutcome,
};
use crate::clock::unix_now;
use crate::config::{Command, Config};
use crate::envelope::{encode, Field, COORDINATOR_SENDER};
use crate::error::PerfError;
use crate::participant::{Participant, Role};
use crate::recipients::find_recipient_limit;
use crate::reporter::human_size;
use crate::transport::MailTransport;

/// Process-wide interruption flag that every wait selects on.
#[derive(Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|v| *v).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// How a bounded phase wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Complete,
    /// Deadline passed; carries the participants that never reported.
    TimedOut(Vec<String>),
    Interrupted,
}

/// Everything the report needs once the run is over.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub command: Command,
    pub snapshot: AggregateSnapshot,
    /// Human readable test-file size for the `file` command.
    pub file_size: Option<String>,
    pub interrupted: bool,
}

pub struct Orchestrator {
    config: Config,
    command: Command,
    accounts: Accounts,
    transport: Arc<dyn MailTransport>,
    aggregator: Arc<Aggregator>,
    participants: Vec<Participant>,
    coordinator: Option<Participant>,
    interrupt: Interrupt,
    file_size: Option<String>,
}

impl Orchestrator {
    /// Fails with `MissingCoordinator` when the command needs one and the
    /// accounts file has none. Nothing is started yet.
    pub fn new(
        config: Config,
        command: Command,
        accounts: Accounts,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, PerfError> {
        if command.needs_coordinator() {
            accounts.require_coordinator()?;
        }
        let aggregator = Arc::new(Aggregator::new(accounts.roster()));
        Ok(Self {
            config,
            command,
            accounts,
            transport,
            aggregator,
            participants: Vec::new(),
            coordinator: None,
            interrupt: Interrupt::new(),
            file_size: None,
        })
    }

    /// Route Ctrl-C into the interrupt flag.
    pub fn setup_signal_handler(&self) -> Result<(), PerfError> {
        let interrupt = self.interrupt.clone();
        ctrlc::set_handler(move || {
            interrupt.trigger();
        })
        .map_err(|e| PerfError::ConfigError(format!("Failed to set signal handler: {}", e)))
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }

    /// login -> command phase -> shutdown. Shutdown runs even after an
    /// interruption or a failed phase.
    pub async fn run(&mut self) -> RunSummary {
        self.setup_accounts().await;

        let login = self
            .await_signal(Phase::Login, Instant::now() + self.phase_timeout())
            .await;
        let mut interrupted = login == PhaseOutcome::Interrupted;
        let active = self.aggregator.active();
        let snapshot = self.aggregator.snapshot();
        let success = numeric_fraction(&snapshot.logins, &snapshot.roster) * 100.0;
        info!(
            active = active.len(),
            total = snapshot.roster.len(),
            "login phase finished, {:.0}% logged in",
            success
        );

        if !interrupted {
            if active.is_empty() && self.command != Command::Login {
                warn!(command = ?self.command, "no account logged in, skipping test phase");
            } else {
                interrupted = self.run_command(&active).await == PhaseOutcome::Interrupted;
            }
        }
        if interrupted {
            warn!("interrupted, skipping remaining phases");
        }

        self.graceful_shutdown().await;
        RunSummary {
            command: self.command,
            snapshot: self.aggregator.snapshot(),
            file_size: self.file_size.clone(),
            interrupted,
        }
    }

    async fn run_command(&mut self, active: &[String]) -> PhaseOutcome {
        let deadline = Instant::now() + self.phase_timeout();
        if self.command.needs_coordinator() {
            let ready = self
                .wait(self.aggregator.coordinator_ready(), deadline)
                .await;
            match ready {
                WaitOutcome::Satisfied => {}
                WaitOutcome::Released => return PhaseOutcome::Interrupted,
                WaitOutcome::TimedOut => {
                    error!("coordinator did not log in, skipping test phase");
                    return PhaseOutcome::TimedOut(Vec::new());
                }
            }
        }
        match self.command {
            Command::Login => PhaseOutcome::Complete,
            Command::Group => self.run_group(active).await,
            Command::File => self.run_file(active).await,
            Command::Recipients => self.run_recipients(active).await,
            Command::Server => self.run_server(active).await,
        }
    }

    /// Start the coordinator (if the command needs it) and every test account.
    /// An account that cannot even be connected is recorded as a failed login.
    async fn setup_accounts(&mut self) {
        if self.command.needs_coordinator() {
            if let Some(account) = self.accounts.coordinator.clone() {
                match self.start(account.clone(), Role::Coordinator).await {
                    Ok(p) => self.coordinator = Some(p),
                    Err(e) => {
                        error!(addr = %account.addr, error = %e, "coordinator setup failed");
                        self.aggregator
                            .submit_coordinator_login(ResultValue::LoginFailed);
                    }
                }
            }
        }
        for account in self.accounts.participants.clone() {
            let addr = account.addr.clone();
            match self.start(account, Role::Tester).await {
                Ok(p) => self.participants.push(p),
                Err(e) => {
                    error!(%addr, error = %e, "account setup failed");
                    self.aggregator.submit_login(&addr, ResultValue::LoginFailed);
                }
            }
        }
    }

    async fn start(&self, account: AccountConfig, role: Role) -> Result<Participant, PerfError> {
        info!(addr = %account.addr, provider = account.domain(), ?role, "starting account");
        Participant::start(
            account,
            role,
            Arc::clone(&self.transport),
            Arc::clone(&self.aggregator),
            self.config.group_buffer,
        )
        .await
    }

    fn coordinator_addr(&self) -> Option<String> {
        self.coordinator.as_ref().map(|p| p.addr().to_string())
    }

    async fn run_group(&mut self, active: &[String]) -> PhaseOutcome {
        let Some(spider) = self.coordinator_addr() else {
            return PhaseOutcome::TimedOut(Vec::new());
        };
        let begin = unix_now();
        let name = format!("Test Group {}", begin);
        info!(group = %name, members = active.len(), "creating test group");

        let chat = match self.transport.create_group(&spider, &name, active).await {
            Ok(chat) => chat,
            Err(e) => {
                error!(error = %e, "could not create test group");
                return PhaseOutcome::TimedOut(active.to_vec());
            }
        };
        let kickoff = encode(&[
            Field::Sender(COORDINATOR_SENDER.to_string()),
            Field::Begin(begin),
        ]);
        if let Err(e) = self.transport.send_text(&spider, chat, &kickoff).await {
            error!(error = %e, "could not send group kickoff");
            return PhaseOutcome::TimedOut(active.to_vec());
        }

        let deadline = Instant::now() + self.phase_timeout();
        match self.await_signal(Phase::GroupAdd, deadline).await {
            PhaseOutcome::Interrupted => return PhaseOutcome::Interrupted,
            PhaseOutcome::TimedOut(missing) => {
                warn!(?missing, "not added to group");
            }
            PhaseOutcome::Complete => {}
        }
        self.await_signal(Phase::GroupMessages, deadline).await
    }

    async fn run_file(&mut self, active: &[String]) -> PhaseOutcome {
        let Some(spider) = self.coordinator_addr() else {
            return PhaseOutcome::TimedOut(Vec::new());
        };
        let testfile = self.config.testfile.clone();
        let path = Path::new(&testfile);
        let size = match std::fs::metadata(path) {
            Ok(meta) => human_size(meta.len()),
            Err(e) => {
                error!(file = %testfile, error = %e, "cannot read test file");
                return PhaseOutcome::TimedOut(active.to_vec());
            }
        };
        info!(%size, "sending test file to coordinator from all accounts");
        self.file_size = Some(size);

        for addr in active {
            let sent = async {
                let chat = self.transport.create_chat(addr, &spider).await?;
                let body = encode(&[Field::Sender(addr.clone()), Field::Begin(unix_now())]);
                self.transport.send_file(addr, chat, path, &body).await
            }
            .await;
            if let Err(e) = sent {
                warn!(%addr, error = %e, "file send failed");
                self.aggregator
                    .submit_file_test(addr, ResultValue::Text(e.to_string()), Vec::new());
            }
        }

        let deadline = Instant::now() + self.phase_timeout();
        match self.await_signal(Phase::FileTransfer, deadline).await {
            PhaseOutcome::Interrupted => return PhaseOutcome::Interrupted,
            PhaseOutcome::TimedOut(missing) => {
                warn!(?missing, "file did not reach the coordinator");
            }
            PhaseOutcome::Complete => {}
        }
        self.await_signal(Phase::Echo, deadline).await
    }

    async fn run_recipients(&mut self, active: &[String]) -> PhaseOutcome {
        let mut tasks = JoinSet::new();
        for addr in active {
            let transport = Arc::clone(&self.transport);
            let aggregator = Arc::clone(&self.aggregator);
            let settings = self.config.recipients.clone();
            let addr = addr.clone();
            tasks.spawn(async move {
                let result = find_recipient_limit(transport.as_ref(), &addr, &settings).await;
                aggregator.submit_recipient_limit(&addr, result);
            });
        }
        let deadline = Instant::now() + self.phase_timeout();
        if !self.drain(&mut tasks, deadline).await {
            return PhaseOutcome::Interrupted;
        }
        self.await_signal(Phase::RecipientLimit, Instant::now()).await
    }

    async fn run_server(&mut self, active: &[String]) -> PhaseOutcome {
        let mut tasks = JoinSet::new();
        for addr in active {
            let transport = Arc::clone(&self.transport);
            let aggregator = Arc::clone(&self.aggregator);
            let addr = addr.clone();
            tasks.spawn(async move {
                match transport.capabilities(&addr).await {
                    Ok(caps) => aggregator.submit_capabilities(&addr, caps),
                    Err(e) => warn!(%addr, error = %e, "capability probe failed"),
                }
            });
        }
        let deadline = Instant::now() + self.phase_timeout();
        if !self.drain(&mut tasks, deadline).await {
            return PhaseOutcome::Interrupted;
        }
        self.await_signal(Phase::Capabilities, Instant::now()).await
    }

    /// Wait for all tasks, the deadline or an interruption. Leftover tasks are
    /// aborted. Returns false when interrupted.
    async fn drain(&self, tasks: &mut JoinSet<()>, deadline: Instant) -> bool {
        let interrupt = self.interrupt.clone();
        let finished = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!(error = %e, "probe task failed");
                }
            }
        };
        let outcome = tokio::select! {
            _ = finished => true,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("phase deadline reached");
                true
            }
            _ = interrupt.triggered() => false,
        };
        tasks.abort_all();
        outcome
    }

    /// Bounded wait on one completion signal, racing the interrupt.
    async fn wait(&self, signal: &CompletionSignal, deadline: Instant) -> WaitOutcome {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            outcome = signal.wait_timeout(remaining) => outcome,
            _ = self.interrupt.triggered() => WaitOutcome::Released,
        }
    }

    /// Wait for `phase`; on timeout release its signal and log who is missing.
    pub async fn await_signal(&self, phase: Phase, deadline: Instant) -> PhaseOutcome {
        let signal = self.aggregator.signal(phase);
        match self.wait(signal, deadline).await {
            WaitOutcome::Satisfied => {
                debug!(%phase, "phase complete");
                PhaseOutcome::Complete
            }
            WaitOutcome::Released if self.interrupt.is_triggered() => {
                signal.release();
                PhaseOutcome::Interrupted
            }
            WaitOutcome::Released | WaitOutcome::TimedOut => {
                // a late submission may have landed between timeout and release
                if signal.is_satisfied() {
                    return PhaseOutcome::Complete;
                }
                signal.release();
                let missing = self.aggregator.missing(phase);
                warn!(%phase, timeout = self.config.timeout, ?missing, "phase timed out");
                self.aggregator.record_timeouts(phase);
                PhaseOutcome::TimedOut(missing)
            }
        }
    }

    /// Shut every account down, each bounded by the shutdown timeout.
    pub async fn graceful_shutdown(&mut self) {
        let timeout = Duration::from_secs(self.config.shutdown_timeout);
        let transport = Arc::clone(&self.transport);
        for p in self.participants.iter_mut() {
            p.shutdown(transport.as_ref(), timeout).await;
        }
        if let Some(c) = self.coordinator.as_mut() {
            c.shutdown(transport.as_ref(), timeout).await;
        }
        info!("all accounts shut down");
    }
}
