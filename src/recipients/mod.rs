// Recipient-limit search
//
// Escalate the recipient count by a fixed step until the provider rejects a
// send (or the ceiling is reached), then bisect inside the last
// (accepted, rejected) bracket down to a single recipient.

use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::accounts::domain_of;
use crate::aggregator::ResultValue;
use crate::config::RecipientsConfig;
use crate::error::PerfError;
use crate::transport::{DeliveryStatus, MailTransport};

/// Final answer of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientLimit {
    /// Largest accepted recipient count (0 when even the smallest probe failed).
    Limit(u32),
    /// The ceiling itself was accepted.
    NoLimit,
}

impl From<RecipientLimit> for ResultValue {
    fn from(limit: RecipientLimit) -> Self {
        match limit {
            RecipientLimit::Limit(n) => ResultValue::Count(n),
            RecipientLimit::NoLimit => ResultValue::NoLimit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    Escalating,
    Bisecting,
    Done,
}

/// Deterministic probe sequence. Call `next` for the count to try, then
/// `report` whether the provider accepted it.
#[derive(Debug, Clone)]
pub struct LimitSearch {
    step: u32,
    max: u32,
    phase: SearchPhase,
    /// Next escalation count.
    cursor: u32,
    /// Largest accepted count so far.
    low: u32,
    /// Smallest rejected count so far.
    high: Option<u32>,
    pending: Option<u32>,
}

impl LimitSearch {
    /// `start` and `step` are clamped to at least 1; `start` to at most `max`.
    pub fn new(start: u32, step: u32, max: u32) -> Self {
        let max = max.max(1);
        Self {
            step: step.max(1),
            max,
            phase: SearchPhase::Escalating,
            cursor: start.clamp(1, max),
            low: 0,
            high: None,
            pending: None,
        }
    }

    /// Count to probe next, or `None` once the search has converged.
    /// Returns the same count again until it is reported.
    pub fn next(&mut self) -> Option<u32> {
        if let Some(p) = self.pending {
            return Some(p);
        }
        let candidate = match self.phase {
            SearchPhase::Done => return None,
            SearchPhase::Escalating => self.cursor,
            SearchPhase::Bisecting => {
                let high = self.high?;
                if high - self.low <= 1 {
                    self.phase = SearchPhase::Done;
                    return None;
                }
                self.low + (high - self.low) / 2
            }
        };
        self.pending = Some(candidate);
        Some(candidate)
    }

    /// Record the provider's answer for the count last returned by `next`.
    pub fn report(&mut self, accepted: bool) {
        let Some(count) = self.pending.take() else {
            return;
        };
        match (self.phase, accepted) {
            (SearchPhase::Escalating, true) => {
                self.low = count;
                if count >= self.max {
                    self.phase = SearchPhase::Done;
                } else {
                    self.cursor = count.saturating_add(self.step).min(self.max);
                }
            }
            (SearchPhase::Escalating, false) => {
                self.high = Some(count);
                self.phase = SearchPhase::Bisecting;
            }
            (SearchPhase::Bisecting, true) => self.low = count,
            (SearchPhase::Bisecting, false) => self.high = Some(count),
            (SearchPhase::Done, _) => {}
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == SearchPhase::Done
    }

    /// Result so far; final once `is_done`.
    pub fn outcome(&self) -> RecipientLimit {
        match self.high {
            None if self.low >= self.max => RecipientLimit::NoLimit,
            _ => RecipientLimit::Limit(self.low),
        }
    }
}

/// Synthetic recipients on the sender's own domain via sub-addressing, so
/// probes never reach third parties.
pub fn synthetic_recipients(addr: &str, nonce: u32, count: u32) -> Vec<String> {
    let local = addr.rsplit_once('@').map(|(l, _)| l).unwrap_or(addr);
    let domain = domain_of(addr);
    (0..count)
        .map(|i| format!("{}+rcpt{:08x}.{}@{}", local, nonce, i, domain))
        .collect()
}

fn nonce() -> u32 {
    rand::thread_rng().gen()
}

/// Send one probe to `count` recipients and wait for the provider's verdict.
/// A probe still pending after the probe timeout counts as rejected.
pub async fn probe_once(
    transport: &dyn MailTransport,
    addr: &str,
    count: u32,
    settings: &RecipientsConfig,
) -> Result<bool, PerfError> {
    let members = synthetic_recipients(addr, nonce(), count);
    let name = format!("Recipient probe {}", count);
    let chat = transport.create_group(addr, &name, &members).await?;
    let msg = transport.send_text(addr, chat, &name).await?;

    let deadline = Instant::now() + Duration::from_millis(settings.probe_timeout_ms);
    loop {
        match transport.delivery_status(addr, msg).await? {
            DeliveryStatus::Delivered => return Ok(true),
            DeliveryStatus::Failed(reason) => {
                debug!(%addr, count, %reason, "recipient probe rejected");
                return Ok(false);
            }
            DeliveryStatus::Pending => {}
        }
        if Instant::now() >= deadline {
            warn!(%addr, count, "recipient probe still pending at timeout, counting as rejected");
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(settings.poll_interval_ms)).await;
    }
}

/// Run the whole search for one account.
///
/// Transport errors abort the search; the error text becomes the result.
pub async fn find_recipient_limit(
    transport: &dyn MailTransport,
    addr: &str,
    settings: &RecipientsConfig,
) -> ResultValue {
    let mut search = LimitSearch::new(settings.start, settings.step, settings.max);
    while let Some(count) = search.next() {
        match probe_once(transport, addr, count, settings).await {
            Ok(accepted) => {
                debug!(%addr, count, accepted, "recipient probe");
                search.report(accepted);
            }
            Err(e) => {
                warn!(%addr, count, error = %e, "recipient search aborted");
                return ResultValue::Text(e.to_string());
            }
        }
    }
    let outcome = search.outcome();
    info!(%addr, ?outcome, "recipient limit found");
    outcome.into()
}
