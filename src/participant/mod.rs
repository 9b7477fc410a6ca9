// Participant runtime
//
// One managed account: identity, role, lifecycle state and the event loop
// task that feeds its inbound events to the connectivity tracker and the
// message handler.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountConfig;
use crate::aggregator::{Aggregator, ResultValue};
use crate::clock::unix_now;
use crate::error::PerfError;
use crate::handler::{CoordinatorHandler, IncomingMessageHandler, Outbound, ParticipantHandler};
use crate::transport::{AccountEvent, MailTransport};

/// Transport log noise that is never worth printing.
const IGNORED_LOG_FRAGMENTS: &[&str] = &["Ignoring nested protected headers"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The "spider" account: creates groups and echoes file tests.
    Coordinator,
    Tester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    ShutDown,
}

/// Shared view of a participant's lifecycle state.
pub type SharedState = Arc<Mutex<ConnectionState>>;

/// Turns configure/log events into login results and log lines.
pub struct ConnectivityTracker {
    addr: String,
    role: Role,
    started: f64,
    aggregator: Arc<Aggregator>,
    state: SharedState,
}

impl ConnectivityTracker {
    pub fn new(
        addr: &str,
        role: Role,
        started: f64,
        aggregator: Arc<Aggregator>,
        state: SharedState,
    ) -> Self {
        Self {
            addr: addr.to_string(),
            role,
            started,
            aggregator,
            state,
        }
    }

    pub fn on_configure(&self, success: bool, now: f64) {
        let value = if success {
            let duration = now - self.started;
            info!(addr = %self.addr, role = ?self.role, "logged in after {:.1} seconds", duration);
            *self.state.lock() = ConnectionState::Connected;
            ResultValue::Duration(duration)
        } else {
            error!(addr = %self.addr, role = ?self.role, "login failed");
            *self.state.lock() = ConnectionState::Disconnected;
            ResultValue::LoginFailed
        };
        match self.role {
            Role::Coordinator => self.aggregator.submit_coordinator_login(value),
            Role::Tester => self.aggregator.submit_login(&self.addr, value),
        }
    }

    pub fn on_info(&self, text: &str) {
        debug!(addr = %self.addr, "{}", text);
    }

    pub fn on_warning(&self, text: &str) {
        if !is_ignored(text) {
            warn!(addr = %self.addr, "{}", text);
        }
    }

    pub fn on_error(&self, text: &str) {
        if !is_ignored(text) {
            error!(addr = %self.addr, "{}", text);
        }
    }
}

fn is_ignored(text: &str) -> bool {
    IGNORED_LOG_FRAGMENTS.iter().any(|f| text.contains(f))
}

/// Dispatch one reply without waiting for the provider.
fn send_reply(transport: &Arc<dyn MailTransport>, addr: &str, out: Outbound) {
    let transport = Arc::clone(transport);
    let addr = addr.to_string();
    tokio::spawn(async move {
        if let Err(e) = transport.send_text(&addr, out.chat, &out.body).await {
            warn!(%addr, chat = out.chat, error = %e, "reply failed");
        }
    });
}

/// Process events until the transport closes the channel.
pub async fn run_event_loop(
    addr: String,
    mut events: mpsc::Receiver<AccountEvent>,
    tracker: ConnectivityTracker,
    mut handler: Box<dyn IncomingMessageHandler>,
    transport: Arc<dyn MailTransport>,
) {
    while let Some(event) = events.recv().await {
        match event {
            AccountEvent::ConfigureCompleted { success } => tracker.on_configure(success, unix_now()),
            AccountEvent::IncomingMessage(msg) => {
                if let Some(out) = handler.handle(&msg, unix_now()) {
                    send_reply(&transport, &addr, out);
                }
            }
            AccountEvent::Info(text) => tracker.on_info(&text),
            AccountEvent::Warning(text) => tracker.on_warning(&text),
            AccountEvent::Error(text) => tracker.on_error(&text),
        }
    }
    debug!(%addr, "event loop finished");
}

/// A started account and its event loop task.
pub struct Participant {
    pub account: AccountConfig,
    pub role: Role,
    state: SharedState,
    task: Option<JoinHandle<()>>,
}

impl Participant {
    /// Connect the account and spawn its event loop. The login result is
    /// submitted later by the loop when the transport reports it.
    pub async fn start(
        account: AccountConfig,
        role: Role,
        transport: Arc<dyn MailTransport>,
        aggregator: Arc<Aggregator>,
        group_buffer: usize,
    ) -> Result<Self, PerfError> {
        let state: SharedState = Arc::new(Mutex::new(ConnectionState::Connecting));
        let started = unix_now();
        let events = match transport.connect(&account).await {
            Ok(rx) => rx,
            Err(e) => {
                *state.lock() = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let handler: Box<dyn IncomingMessageHandler> = match role {
            Role::Coordinator => Box::new(CoordinatorHandler::new(Arc::clone(&aggregator))),
            Role::Tester => Box::new(ParticipantHandler::new(
                &account.addr,
                Arc::clone(&aggregator),
                group_buffer,
            )),
        };
        let tracker = ConnectivityTracker::new(
            &account.addr,
            role,
            started,
            aggregator,
            Arc::clone(&state),
        );
        let task = tokio::spawn(run_event_loop(
            account.addr.clone(),
            events,
            tracker,
            handler,
            transport,
        ));

        Ok(Self {
            account,
            role,
            state,
            task: Some(task),
        })
    }

    pub fn addr(&self) -> &str {
        &self.account.addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Stop the account's IO and join its event loop, each bounded by `timeout`.
    pub async fn shutdown(&mut self, transport: &dyn MailTransport, timeout: Duration) {
        *self.state.lock() = ConnectionState::ShuttingDown;
        let addr = self.account.addr.clone();

        match tokio::time::timeout(timeout, transport.shutdown(&addr)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%addr, error = %e, "shutdown failed"),
            Err(_) => warn!(%addr, "shutdown timed out"),
        }

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(%addr, "event loop did not stop, aborting");
                task.abort();
            }
        }
        *self.state.lock() = ConnectionState::ShutDown;
        debug!(%addr, "participant shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Phase;
    use crate::transport::sim::{SimProfile, SimTransport};

    const A: &str = "a@pa.example";

    fn tracker(role: Role) -> (Arc<Aggregator>, SharedState, ConnectivityTracker) {
        let agg = Arc::new(Aggregator::new(vec![A.to_string()]));
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let t = ConnectivityTracker::new(A, role, 100.0, agg.clone(), state.clone());
        (agg, state, t)
    }

    #[test]
    fn successful_configure_submits_duration() {
        let (agg, state, t) = tracker(Role::Tester);
        t.on_configure(true, 102.5);
        assert_eq!(agg.snapshot().logins[A], ResultValue::Duration(2.5));
        assert_eq!(*state.lock(), ConnectionState::Connected);
        assert!(agg.signal(Phase::Login).is_satisfied());
    }

    #[test]
    fn failed_configure_submits_login_failed() {
        let (agg, state, t) = tracker(Role::Tester);
        t.on_configure(false, 102.5);
        assert_eq!(agg.snapshot().logins[A], ResultValue::LoginFailed);
        assert_eq!(*state.lock(), ConnectionState::Disconnected);
        assert!(agg.active().is_empty());
    }

    #[test]
    fn coordinator_configure_sets_readiness_only() {
        let (agg, _, t) = tracker(Role::Coordinator);
        t.on_configure(true, 101.0);
        assert!(agg.coordinator_ready().is_satisfied());
        assert!(agg.snapshot().logins.is_empty());
    }

    #[test]
    fn nested_header_noise_is_filtered() {
        assert!(is_ignored("WARNING: Ignoring nested protected headers"));
        assert!(!is_ignored("WARNING: IMAP IDLE failed"));
    }

    #[tokio::test]
    async fn participant_lifecycle_over_sim() {
        let sim = SimTransport::new();
        sim.set_profile(
            A,
            SimProfile {
                login_delay: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let transport: Arc<dyn MailTransport> = Arc::new(sim.clone());
        let agg = Arc::new(Aggregator::new(vec![A.to_string()]));

        let mut p = Participant::start(
            AccountConfig::new(A, "pw"),
            Role::Tester,
            transport.clone(),
            agg.clone(),
            8,
        )
        .await
        .unwrap();
        assert_eq!(p.role, Role::Tester);

        let outcome = agg
            .signal(Phase::Login)
            .wait_timeout(Duration::from_secs(2))
            .await;
        assert_eq!(outcome, crate::aggregator::WaitOutcome::Satisfied);
        assert_eq!(p.state(), ConnectionState::Connected);

        p.shutdown(transport.as_ref(), Duration::from_secs(1)).await;
        assert_eq!(p.state(), ConnectionState::ShutDown);
        assert!(!sim.is_connected(A));
    }

    #[tokio::test]
    async fn replies_are_sent_from_the_loop() {
        let sim = SimTransport::new();
        let transport: Arc<dyn MailTransport> = Arc::new(sim.clone());
        let spider = "spider@echo.example";
        let agg = Arc::new(Aggregator::new(vec![A.to_string()]));

        let mut coordinator = Participant::start(
            AccountConfig::new(spider, "pw"),
            Role::Coordinator,
            transport.clone(),
            agg.clone(),
            8,
        )
        .await
        .unwrap();
        let mut tester = Participant::start(
            AccountConfig::new(A, "pw"),
            Role::Tester,
            transport.clone(),
            agg.clone(),
            8,
        )
        .await
        .unwrap();
        agg.coordinator_ready()
            .wait_timeout(Duration::from_secs(2))
            .await;
        agg.signal(Phase::Login).wait_timeout(Duration::from_secs(2)).await;

        let chat = transport.create_chat(A, spider).await.unwrap();
        let body = crate::envelope::encode(&[crate::envelope::Field::Begin(unix_now())]);
        transport.send_text(A, chat, &body).await.unwrap();

        let outcome = agg.signal(Phase::Echo).wait_timeout(Duration::from_secs(2)).await;
        assert_eq!(outcome, crate::aggregator::WaitOutcome::Satisfied);
        assert!(agg.snapshot().file_tests.contains_key(A));

        coordinator.shutdown(transport.as_ref(), Duration::from_secs(1)).await;
        tester.shutdown(transport.as_ref(), Duration::from_secs(1)).await;
    }
}
