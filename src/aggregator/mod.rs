// Result aggregator module
//
// Shared store for per-phase results submitted by every account's event loop.
// All state sits behind one mutex so that "store, count, maybe signal" is a
// single critical section per submission.

pub mod signal;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

pub use signal::{CompletionSignal, SignalState, WaitOutcome};

use crate::transport::ServerCapabilities;

/// One cell of a phase result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultValue {
    /// Elapsed seconds.
    Duration(f64),
    /// Accepted recipient count.
    Count(u32),
    Timeout,
    LoginFailed,
    NoLimit,
    /// Error text or a qualitative probe result.
    Text(String),
}

impl ResultValue {
    /// True when the cell holds a measurement rather than a failure.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ResultValue::Duration(_) | ResultValue::Count(_))
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Duration(d) => write!(f, "{:.3}", d),
            ResultValue::Count(n) => write!(f, "{}", n),
            ResultValue::Timeout => f.write_str("timeout"),
            ResultValue::LoginFailed => f.write_str("login failed"),
            ResultValue::NoLimit => f.write_str("no limit"),
            ResultValue::Text(s) => f.write_str(s),
        }
    }
}

/// Test phases that own a result set and a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Login,
    GroupAdd,
    GroupMessages,
    FileTransfer,
    Echo,
    RecipientLimit,
    Capabilities,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Login => "login",
            Phase::GroupAdd => "group-add",
            Phase::GroupMessages => "group-messages",
            Phase::FileTransfer => "file-transfer",
            Phase::Echo => "echo",
            Phase::RecipientLimit => "recipient-limit",
            Phase::Capabilities => "capabilities",
        };
        f.write_str(name)
    }
}

/// Consistent copy of every result set, taken under the aggregator lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Participant addresses in report column order.
    pub roster: Vec<String>,
    pub coordinator_login: Option<ResultValue>,
    pub logins: HashMap<String, ResultValue>,
    pub group_add: HashMap<String, ResultValue>,
    /// receiver -> sender -> value
    pub group_messages: HashMap<String, HashMap<String, ResultValue>>,
    pub file_tests: HashMap<String, ResultValue>,
    pub hops: HashMap<String, Vec<String>>,
    pub receives: HashMap<String, ResultValue>,
    pub recipients: HashMap<String, ResultValue>,
    pub capabilities: HashMap<String, ServerCapabilities>,
}

impl AggregateSnapshot {
    /// Roster members whose login produced a duration.
    pub fn active(&self) -> Vec<String> {
        self.roster
            .iter()
            .filter(|addr| self.logins.get(*addr).is_some_and(ResultValue::is_numeric))
            .cloned()
            .collect()
    }

    /// Percentage of `peers` (other than `receiver`) whose group message
    /// reached `receiver` with a measurable duration.
    pub fn received_percentage(&self, receiver: &str, peers: &[String]) -> u32 {
        let others = peers.iter().filter(|p| p.as_str() != receiver).count();
        let got = match self.group_messages.get(receiver) {
            Some(row) => peers
                .iter()
                .filter(|p| p.as_str() != receiver)
                .filter(|p| row.get(*p).is_some_and(ResultValue::is_numeric))
                .count(),
            None => 0,
        };
        percentage(got, others)
    }

    /// Percentage of `peers` (other than `sender`) that received `sender`'s
    /// group message with a measurable duration.
    pub fn delivered_percentage(&self, sender: &str, peers: &[String]) -> u32 {
        let others = peers.iter().filter(|p| p.as_str() != sender).count();
        let got = peers
            .iter()
            .filter(|p| p.as_str() != sender)
            .filter(|p| {
                self.group_messages
                    .get(*p)
                    .and_then(|row| row.get(sender))
                    .is_some_and(ResultValue::is_numeric)
            })
            .count();
        percentage(got, others)
    }
}

/// Truncating integer percentage; 0 when there is nothing to divide by.
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        0
    } else {
        (part * 100 / whole) as u32
    }
}

/// Fraction of `expected` participants whose cell in `set` is numeric.
pub fn numeric_fraction(set: &HashMap<String, ResultValue>, expected: &[String]) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let numeric = expected
        .iter()
        .filter(|addr| set.get(*addr).is_some_and(ResultValue::is_numeric))
        .count();
    numeric as f64 / expected.len() as f64
}

struct Signals {
    login: CompletionSignal,
    coordinator: CompletionSignal,
    group_add: CompletionSignal,
    group_messages: CompletionSignal,
    file_transfer: CompletionSignal,
    echo: CompletionSignal,
    recipient_limit: CompletionSignal,
    capabilities: CompletionSignal,
}

/// Thread-safe collector of phase results.
pub struct Aggregator {
    inner: Mutex<AggregateSnapshot>,
    signals: Signals,
}

impl Aggregator {
    /// Create an aggregator expecting results from `roster` (coordinator excluded).
    pub fn new(roster: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(AggregateSnapshot {
                roster,
                ..Default::default()
            }),
            signals: Signals {
                login: CompletionSignal::new(),
                coordinator: CompletionSignal::new(),
                group_add: CompletionSignal::new(),
                group_messages: CompletionSignal::new(),
                file_transfer: CompletionSignal::new(),
                echo: CompletionSignal::new(),
                recipient_limit: CompletionSignal::new(),
                capabilities: CompletionSignal::new(),
            },
        }
    }

    pub fn signal(&self, phase: Phase) -> &CompletionSignal {
        match phase {
            Phase::Login => &self.signals.login,
            Phase::GroupAdd => &self.signals.group_add,
            Phase::GroupMessages => &self.signals.group_messages,
            Phase::FileTransfer => &self.signals.file_transfer,
            Phase::Echo => &self.signals.echo,
            Phase::RecipientLimit => &self.signals.recipient_limit,
            Phase::Capabilities => &self.signals.capabilities,
        }
    }

    /// Set once the coordinator account has finished its own login.
    pub fn coordinator_ready(&self) -> &CompletionSignal {
        &self.signals.coordinator
    }

    pub fn roster(&self) -> Vec<String> {
        self.inner.lock().roster.clone()
    }

    pub fn active(&self) -> Vec<String> {
        self.inner.lock().active()
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.inner.lock().clone()
    }

    pub fn submit_login(&self, addr: &str, value: ResultValue) {
        let mut inner = self.inner.lock();
        if !is_member(&inner, addr) {
            warn!(%addr, "login result for unknown participant ignored");
            return;
        }
        debug!(%addr, %value, "login result");
        inner.logins.insert(addr.to_string(), value);
        self.check(&inner, Phase::Login);
    }

    pub fn submit_coordinator_login(&self, value: ResultValue) {
        let mut inner = self.inner.lock();
        let ok = value.is_numeric();
        inner.coordinator_login = Some(value);
        if ok && self.signals.coordinator.satisfy() {
            info!("coordinator login complete");
        }
    }

    pub fn submit_group_add(&self, addr: &str, value: ResultValue) {
        self.submit_single(Phase::GroupAdd, addr, value);
    }

    /// Record how long `sender`'s group message took to reach `receiver`.
    pub fn submit_group_message(&self, receiver: &str, sender: &str, value: ResultValue) {
        let mut inner = self.inner.lock();
        if receiver == sender {
            return;
        }
        if !is_member(&inner, receiver) || !is_member(&inner, sender) {
            warn!(%receiver, %sender, "group message between unknown participants ignored");
            return;
        }
        debug!(%receiver, %sender, %value, "group message result");
        inner
            .group_messages
            .entry(receiver.to_string())
            .or_default()
            .insert(sender.to_string(), value);
        self.check(&inner, Phase::GroupMessages);
    }

    /// Record the coordinator-side measurement of a file sent by `addr`.
    pub fn submit_file_test(&self, addr: &str, value: ResultValue, hops: Vec<String>) {
        let mut inner = self.inner.lock();
        if !is_member(&inner, addr) {
            warn!(%addr, "file test result for unknown participant ignored");
            return;
        }
        debug!(%addr, %value, hops = hops.len(), "file test result");
        inner.file_tests.insert(addr.to_string(), value);
        inner.hops.insert(addr.to_string(), hops);
        self.check(&inner, Phase::FileTransfer);
    }

    /// Record how long the coordinator's echo took to reach `addr`.
    pub fn submit_receive(&self, addr: &str, value: ResultValue) {
        self.submit_single(Phase::Echo, addr, value);
    }

    pub fn submit_recipient_limit(&self, addr: &str, value: ResultValue) {
        self.submit_single(Phase::RecipientLimit, addr, value);
    }

    pub fn submit_capabilities(&self, addr: &str, caps: ServerCapabilities) {
        let mut inner = self.inner.lock();
        if !is_member(&inner, addr) {
            warn!(%addr, "capabilities for unknown participant ignored");
            return;
        }
        debug!(%addr, ?caps, "capability result");
        inner.capabilities.insert(addr.to_string(), caps);
        self.check(&inner, Phase::Capabilities);
    }

    /// Participants expected in `phase` that have not completed it yet.
    pub fn missing(&self, phase: Phase) -> Vec<String> {
        let inner = self.inner.lock();
        let expected = expected_for(&inner, phase);
        match phase {
            Phase::GroupMessages => expected
                .iter()
                .filter(|r| matrix_row_count(&inner, r, &expected) + 1 < expected.len())
                .cloned()
                .collect(),
            _ => {
                let set = single_set(&inner, phase);
                expected
                    .into_iter()
                    .filter(|addr| !set.contains(addr))
                    .collect()
            }
        }
    }

    /// Fill every entry still missing in `phase` with `Timeout`. Capability
    /// results carry no `ResultValue` and are left alone. Late submissions
    /// still overwrite these entries.
    pub fn record_timeouts(&self, phase: Phase) {
        let mut inner = self.inner.lock();
        let expected = expected_for(&inner, phase);
        let set = match phase {
            Phase::Login => &mut inner.logins,
            Phase::GroupAdd => &mut inner.group_add,
            Phase::FileTransfer => &mut inner.file_tests,
            Phase::Echo => &mut inner.receives,
            Phase::RecipientLimit => &mut inner.recipients,
            Phase::Capabilities => return,
            Phase::GroupMessages => {
                for receiver in &expected {
                    let row = inner.group_messages.entry(receiver.clone()).or_default();
                    for sender in expected.iter().filter(|s| *s != receiver) {
                        row.entry(sender.clone()).or_insert(ResultValue::Timeout);
                    }
                }
                return;
            }
        };
        for addr in expected {
            set.entry(addr).or_insert(ResultValue::Timeout);
        }
    }

    fn submit_single(&self, phase: Phase, addr: &str, value: ResultValue) {
        let mut inner = self.inner.lock();
        if !is_member(&inner, addr) {
            warn!(%addr, %phase, "result for unknown participant ignored");
            return;
        }
        debug!(%addr, %phase, %value, "result");
        let set = match phase {
            Phase::GroupAdd => &mut inner.group_add,
            Phase::Echo => &mut inner.receives,
            Phase::RecipientLimit => &mut inner.recipients,
            Phase::Login => &mut inner.logins,
            Phase::FileTransfer => &mut inner.file_tests,
            Phase::GroupMessages | Phase::Capabilities => return,
        };
        set.insert(addr.to_string(), value);
        self.check(&inner, phase);
    }

    /// Recompute completion of `phase`. Caller holds the lock.
    fn check(&self, inner: &AggregateSnapshot, phase: Phase) {
        if is_complete(inner, phase) && self.signal(phase).satisfy() {
            info!(%phase, "phase complete");
        }
    }
}

fn is_member(inner: &AggregateSnapshot, addr: &str) -> bool {
    inner.roster.iter().any(|a| a == addr)
}

fn expected_for(inner: &AggregateSnapshot, phase: Phase) -> Vec<String> {
    match phase {
        Phase::Login => inner.roster.clone(),
        _ => inner.active(),
    }
}

fn single_set(inner: &AggregateSnapshot, phase: Phase) -> Vec<String> {
    match phase {
        Phase::Login => inner.logins.keys().cloned().collect(),
        Phase::GroupAdd => inner.group_add.keys().cloned().collect(),
        Phase::FileTransfer => inner.file_tests.keys().cloned().collect(),
        Phase::Echo => inner.receives.keys().cloned().collect(),
        Phase::RecipientLimit => inner.recipients.keys().cloned().collect(),
        Phase::Capabilities => inner.capabilities.keys().cloned().collect(),
        Phase::GroupMessages => inner.group_messages.keys().cloned().collect(),
    }
}

/// Entries in `receiver`'s matrix row that come from other expected senders.
fn matrix_row_count(inner: &AggregateSnapshot, receiver: &str, expected: &[String]) -> usize {
    match inner.group_messages.get(receiver) {
        Some(row) => expected
            .iter()
            .filter(|s| s.as_str() != receiver && row.contains_key(*s))
            .count(),
        None => 0,
    }
}

/// Completion is judged from cardinality alone, so duplicates cannot overcount.
fn is_complete(inner: &AggregateSnapshot, phase: Phase) -> bool {
    let expected = expected_for(inner, phase);
    if expected.is_empty() {
        return false;
    }
    match phase {
        Phase::GroupMessages => expected
            .iter()
            .all(|r| matrix_row_count(inner, r, &expected) == expected.len() - 1),
        _ => {
            let set = single_set(inner, phase);
            expected.iter().all(|addr| set.contains(addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn roster(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{}@provider{}.example", i, i)).collect()
    }

    fn logged_in(n: usize) -> (Aggregator, Vec<String>) {
        let addrs = roster(n);
        let agg = Aggregator::new(addrs.clone());
        for a in &addrs {
            agg.submit_login(a, ResultValue::Duration(1.0));
        }
        (agg, addrs)
    }

    #[test]
    fn result_value_display() {
        assert_eq!(ResultValue::Duration(1.23456).to_string(), "1.235");
        assert_eq!(ResultValue::Count(37).to_string(), "37");
        assert_eq!(ResultValue::Timeout.to_string(), "timeout");
        assert_eq!(ResultValue::LoginFailed.to_string(), "login failed");
        assert_eq!(ResultValue::NoLimit.to_string(), "no limit");
        assert_eq!(ResultValue::Text("552 rejected".into()).to_string(), "552 rejected");
    }

    #[test]
    fn result_value_numeric() {
        assert!(ResultValue::Duration(0.0).is_numeric());
        assert!(ResultValue::Count(0).is_numeric());
        assert!(!ResultValue::Timeout.is_numeric());
        assert!(!ResultValue::Text("3.0".into()).is_numeric());
    }

    #[test]
    fn login_completes_with_failures_counted() {
        let addrs = roster(3);
        let agg = Aggregator::new(addrs.clone());
        agg.submit_login(&addrs[0], ResultValue::Duration(2.0));
        agg.submit_login(&addrs[1], ResultValue::LoginFailed);
        assert!(!agg.signal(Phase::Login).is_satisfied());
        agg.submit_login(&addrs[2], ResultValue::Duration(3.0));
        assert!(agg.signal(Phase::Login).is_satisfied());
        assert_eq!(agg.active(), vec![addrs[0].clone(), addrs[2].clone()]);
    }

    #[test]
    fn unknown_participant_is_ignored() {
        let (agg, _) = logged_in(2);
        agg.submit_group_add("stranger@nowhere.example", ResultValue::Duration(1.0));
        assert!(agg.snapshot().group_add.is_empty());
    }

    #[test]
    fn group_add_waits_for_active_only() {
        let addrs = roster(3);
        let agg = Aggregator::new(addrs.clone());
        agg.submit_login(&addrs[0], ResultValue::Duration(1.0));
        agg.submit_login(&addrs[1], ResultValue::Duration(1.0));
        agg.submit_login(&addrs[2], ResultValue::LoginFailed);
        agg.submit_group_add(&addrs[0], ResultValue::Duration(4.0));
        assert!(!agg.signal(Phase::GroupAdd).is_satisfied());
        agg.submit_group_add(&addrs[1], ResultValue::Duration(5.0));
        assert!(agg.signal(Phase::GroupAdd).is_satisfied());
    }

    #[test]
    fn no_vacuous_completion_without_active_participants() {
        let addrs = roster(1);
        let agg = Aggregator::new(addrs.clone());
        agg.submit_login(&addrs[0], ResultValue::LoginFailed);
        agg.submit_group_add(&addrs[0], ResultValue::Duration(1.0));
        assert!(!agg.signal(Phase::GroupAdd).is_satisfied());
    }

    #[test]
    fn duplicate_submission_does_not_change_cardinality() {
        let (agg, addrs) = logged_in(2);
        agg.submit_group_add(&addrs[0], ResultValue::Duration(1.0));
        agg.submit_group_add(&addrs[0], ResultValue::Duration(1.0));
        assert_eq!(agg.snapshot().group_add.len(), 1);
        assert!(!agg.signal(Phase::GroupAdd).is_satisfied());
    }

    #[test]
    fn satisfied_signal_survives_overwrite() {
        let (agg, addrs) = logged_in(2);
        agg.submit_receive(&addrs[0], ResultValue::Duration(1.0));
        agg.submit_receive(&addrs[1], ResultValue::Duration(1.0));
        assert!(agg.signal(Phase::Echo).is_satisfied());
        agg.submit_receive(&addrs[1], ResultValue::Text("late duplicate".into()));
        assert!(agg.signal(Phase::Echo).is_satisfied());
        assert_eq!(agg.snapshot().receives.len(), 2);
    }

    #[test]
    fn matrix_does_not_fire_at_n_minus_two() {
        let (agg, addrs) = logged_in(3);
        // every receiver gets one peer message only
        agg.submit_group_message(&addrs[0], &addrs[1], ResultValue::Duration(1.0));
        agg.submit_group_message(&addrs[1], &addrs[2], ResultValue::Duration(1.0));
        agg.submit_group_message(&addrs[2], &addrs[0], ResultValue::Duration(1.0));
        assert!(!agg.signal(Phase::GroupMessages).is_satisfied());
        assert_eq!(agg.missing(Phase::GroupMessages).len(), 3);

        agg.submit_group_message(&addrs[0], &addrs[2], ResultValue::Duration(1.0));
        agg.submit_group_message(&addrs[1], &addrs[0], ResultValue::Duration(1.0));
        assert!(!agg.signal(Phase::GroupMessages).is_satisfied());
        assert_eq!(agg.missing(Phase::GroupMessages), vec![addrs[2].clone()]);

        agg.submit_group_message(&addrs[2], &addrs[1], ResultValue::Duration(1.0));
        assert!(agg.signal(Phase::GroupMessages).is_satisfied());
        assert!(agg.missing(Phase::GroupMessages).is_empty());
    }

    #[test]
    fn matrix_ignores_self_messages() {
        let (agg, addrs) = logged_in(2);
        agg.submit_group_message(&addrs[0], &addrs[0], ResultValue::Duration(1.0));
        assert!(agg.snapshot().group_messages.is_empty());
    }

    #[test]
    fn file_test_stores_hops() {
        let (agg, addrs) = logged_in(1);
        agg.submit_file_test(
            &addrs[0],
            ResultValue::Duration(12.0),
            vec!["mx1".to_string(), "mx2".to_string()],
        );
        let snap = agg.snapshot();
        assert_eq!(snap.hops[&addrs[0]], vec!["mx1", "mx2"]);
        assert!(agg.signal(Phase::FileTransfer).is_satisfied());
    }

    #[test]
    fn coordinator_login_sets_ready() {
        let agg = Aggregator::new(roster(1));
        agg.submit_coordinator_login(ResultValue::LoginFailed);
        assert!(!agg.coordinator_ready().is_satisfied());
        agg.submit_coordinator_login(ResultValue::Duration(0.5));
        assert!(agg.coordinator_ready().is_satisfied());
    }

    #[test]
    fn missing_lists_non_reporting_participants() {
        let (agg, addrs) = logged_in(3);
        agg.submit_recipient_limit(&addrs[1], ResultValue::Count(50));
        assert_eq!(agg.missing(Phase::RecipientLimit), vec![addrs[0].clone(), addrs[2].clone()]);
    }

    #[test]
    fn timeouts_fill_only_missing_entries() {
        let (agg, addrs) = logged_in(3);
        agg.submit_group_add(&addrs[1], ResultValue::Duration(2.0));
        agg.record_timeouts(Phase::GroupAdd);
        let snap = agg.snapshot();
        assert_eq!(snap.group_add[&addrs[0]], ResultValue::Timeout);
        assert_eq!(snap.group_add[&addrs[1]], ResultValue::Duration(2.0));
        assert!(agg.missing(Phase::GroupAdd).is_empty());

        // a late result still wins
        agg.submit_group_add(&addrs[0], ResultValue::Duration(9.0));
        assert_eq!(agg.snapshot().group_add[&addrs[0]], ResultValue::Duration(9.0));
    }

    #[test]
    fn matrix_timeouts_skip_diagonal_and_keep_percentages() {
        let (agg, addrs) = logged_in(3);
        agg.submit_group_message(&addrs[0], &addrs[1], ResultValue::Duration(1.0));
        agg.record_timeouts(Phase::GroupMessages);
        let snap = agg.snapshot();
        for receiver in &addrs {
            let row = &snap.group_messages[receiver];
            assert_eq!(row.len(), 2);
            assert!(!row.contains_key(receiver));
        }
        assert_eq!(snap.group_messages[&addrs[0]][&addrs[2]], ResultValue::Timeout);
        assert_eq!(snap.received_percentage(&addrs[0], &addrs), 50);
        assert_eq!(snap.received_percentage(&addrs[1], &addrs), 0);
    }

    #[test]
    fn percentages_over_matrix() {
        let (agg, addrs) = logged_in(4);
        agg.submit_group_message(&addrs[0], &addrs[1], ResultValue::Duration(1.0));
        agg.submit_group_message(&addrs[0], &addrs[2], ResultValue::Duration(1.0));
        agg.submit_group_message(&addrs[1], &addrs[0], ResultValue::Duration(1.0));
        let snap = agg.snapshot();
        assert_eq!(snap.received_percentage(&addrs[0], &addrs), 66);
        assert_eq!(snap.received_percentage(&addrs[3], &addrs), 0);
        assert_eq!(snap.delivered_percentage(&addrs[0], &addrs), 33);
        assert_eq!(snap.delivered_percentage(&addrs[1], &addrs), 33);
    }

    #[test]
    fn numeric_fraction_counts_only_measurements() {
        let addrs = roster(4);
        let mut set = HashMap::new();
        set.insert(addrs[0].clone(), ResultValue::Duration(1.0));
        set.insert(addrs[1].clone(), ResultValue::Timeout);
        set.insert(addrs[2].clone(), ResultValue::Count(3));
        assert_eq!(numeric_fraction(&set, &addrs), 0.5);
        assert_eq!(numeric_fraction(&set, &[]), 0.0);
    }

    #[test]
    fn concurrent_matrix_submissions_complete_once() {
        let (agg, addrs) = logged_in(6);
        let agg = Arc::new(agg);
        let mut handles = vec![];
        for receiver in addrs.clone() {
            let agg = Arc::clone(&agg);
            let senders = addrs.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..3 {
                    for s in &senders {
                        agg.submit_group_message(&receiver, s, ResultValue::Duration(0.5));
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(agg.signal(Phase::GroupMessages).is_satisfied());
        let snap = agg.snapshot();
        for r in &addrs {
            assert_eq!(snap.group_messages[r].len(), 5);
        }
    }

    proptest! {
        #[test]
        fn prop_duplicates_leave_cardinality_unchanged(
            n in 1usize..8,
            picks in proptest::collection::vec(0usize..8, 0..40),
        ) {
            let (agg, addrs) = logged_in(n);
            for p in &picks {
                let addr = &addrs[p % n];
                agg.submit_group_add(addr, ResultValue::Duration(1.0));
                agg.submit_group_add(addr, ResultValue::Duration(2.0));
            }
            let mut distinct: Vec<usize> = picks.iter().map(|p| p % n).collect();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(agg.snapshot().group_add.len(), distinct.len());
            prop_assert_eq!(agg.signal(Phase::GroupAdd).is_satisfied(), distinct.len() == n);
        }

        #[test]
        fn prop_matrix_complete_iff_every_row_full(
            n in 2usize..6,
            mask in proptest::collection::vec(any::<bool>(), 36),
        ) {
            let (agg, addrs) = logged_in(n);
            let mut full_rows = 0;
            for (ri, r) in addrs.iter().enumerate() {
                let mut row = 0;
                for (si, s) in addrs.iter().enumerate() {
                    if ri != si && mask[ri * 6 + si] {
                        agg.submit_group_message(r, s, ResultValue::Duration(1.0));
                        row += 1;
                    }
                }
                if row == n - 1 {
                    full_rows += 1;
                }
            }
            prop_assert_eq!(agg.signal(Phase::GroupMessages).is_satisfied(), full_rows == n);
        }
    }
}
