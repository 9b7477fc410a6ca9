// In-memory multi-provider network implementing `MailTransport`.
//
// Each account gets a behaviour profile (login outcome, delays, recipient
// limit, silence, capabilities). Delivery is asynchronous: `send_*` returns a
// message id right away and spawned tasks push `IncomingMessage` events into
// the recipients' channels later.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    AccountEvent, ChatId, ChatInfo, DeliveryStatus, IncomingMessage, MailTransport, MessageId,
    ServerCapabilities, TransportFuture,
};
use crate::accounts::{domain_of, AccountConfig};
use crate::clock::{unix_now, EnvelopeTime};
use crate::error::PerfError;

const INBOX_CAPACITY: usize = 1024;

/// Behaviour of one simulated account.
#[derive(Debug, Clone, PartialEq)]
pub struct SimProfile {
    pub login_ok: bool,
    pub login_delay: Duration,
    /// Time a message takes to reach this account.
    pub delivery_delay: Duration,
    /// Largest recipient count the account's provider accepts.
    pub recipient_limit: Option<u32>,
    /// Logs in but never sees inbound messages.
    pub silent: bool,
    pub capabilities: ServerCapabilities,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            login_ok: true,
            login_delay: Duration::from_millis(10),
            delivery_delay: Duration::from_millis(10),
            recipient_limit: None,
            silent: false,
            capabilities: ServerCapabilities {
                quota: Some("1048576 KiB".to_string()),
                condstore: true,
            },
        }
    }
}

impl SimProfile {
    /// Build a profile from `sim_*` tokens of an accounts-file line.
    ///
    /// Recognised: `sim_login=fail`, `sim_login_ms`, `sim_delay_ms`,
    /// `sim_limit`, `sim_silent=true`, `sim_quota` (`none` disables),
    /// `sim_condstore=false`. Unparsable values keep the default.
    pub fn from_options(options: &BTreeMap<String, String>) -> Self {
        let mut profile = SimProfile::default();
        let ms = |key: &str| {
            options
                .get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        if options.get("sim_login").map(String::as_str) == Some("fail") {
            profile.login_ok = false;
        }
        if let Some(d) = ms("sim_login_ms") {
            profile.login_delay = d;
        }
        if let Some(d) = ms("sim_delay_ms") {
            profile.delivery_delay = d;
        }
        if let Some(limit) = options.get("sim_limit").and_then(|v| v.parse().ok()) {
            profile.recipient_limit = Some(limit);
        }
        if options.get("sim_silent").map(String::as_str) == Some("true") {
            profile.silent = true;
        }
        match options.get("sim_quota").map(String::as_str) {
            Some("none") => profile.capabilities.quota = None,
            Some(q) => profile.capabilities.quota = Some(q.replace('_', " ")),
            None => {}
        }
        if options.get("sim_condstore").map(String::as_str) == Some("false") {
            profile.capabilities.condstore = false;
        }
        profile
    }
}

#[derive(Debug, Clone)]
struct SimChat {
    name: String,
    is_group: bool,
    members: Vec<String>,
}

/// One accepted `send_*` call, recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub id: MessageId,
    pub from: String,
    pub chat: ChatId,
    pub text: String,
    pub attachment: Option<String>,
}

#[derive(Default)]
struct Network {
    profiles: DashMap<String, SimProfile>,
    inboxes: DashMap<String, mpsc::Sender<AccountEvent>>,
    chats: DashMap<ChatId, SimChat>,
    statuses: DashMap<MessageId, DeliveryStatus>,
    next_id: AtomicU64,
    sent: Mutex<Vec<SentRecord>>,
}

impl Network {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn profile(&self, addr: &str) -> SimProfile {
        self.profiles
            .get(addr)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    fn inbox(&self, addr: &str) -> Option<mpsc::Sender<AccountEvent>> {
        self.inboxes.get(addr).map(|tx| tx.value().clone())
    }
}

/// Cheaply cloneable handle to a shared simulated network.
#[derive(Clone, Default)]
pub struct SimTransport {
    net: Arc<Network>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the profile of `addr`. Takes precedence over accounts-file tokens.
    pub fn set_profile(&self, addr: &str, profile: SimProfile) {
        self.net.profiles.insert(addr.to_string(), profile);
    }

    pub fn sent_messages(&self) -> Vec<SentRecord> {
        self.net.sent.lock().clone()
    }

    pub fn is_connected(&self, addr: &str) -> bool {
        self.net.inboxes.contains_key(addr)
    }

    fn submit(
        &self,
        from: &str,
        chat: ChatId,
        text: &str,
        attachment: Option<String>,
    ) -> Result<MessageId, PerfError> {
        let chat_entry = self
            .net
            .chats
            .get(&chat)
            .map(|c| c.value().clone())
            .ok_or_else(|| PerfError::Transport(format!("unknown chat {}", chat)))?;
        if !chat_entry.members.iter().any(|m| m == from) {
            return Err(PerfError::Transport(format!(
                "{} is not a member of chat {}",
                from, chat
            )));
        }
        if self.net.inbox(from).is_none() {
            return Err(PerfError::UnknownAccount(from.to_string()));
        }

        let id = self.net.next_id();
        let sender_profile = self.net.profile(from);
        let recipients: Vec<String> = chat_entry
            .members
            .iter()
            .filter(|m| m.as_str() != from)
            .cloned()
            .collect();
        self.net.statuses.insert(id, DeliveryStatus::Pending);
        self.net.sent.lock().push(SentRecord {
            id,
            from: from.to_string(),
            chat,
            text: text.to_string(),
            attachment: attachment.clone(),
        });

        let net = Arc::clone(&self.net);
        let over_limit = sender_profile
            .recipient_limit
            .is_some_and(|limit| recipients.len() as u32 > limit);
        if over_limit {
            debug!(%from, recipients = recipients.len(), "sim: rejecting oversized send");
            tokio::spawn(async move {
                tokio::time::sleep(sender_profile.delivery_delay).await;
                net.statuses.insert(
                    id,
                    DeliveryStatus::Failed("552 5.5.3 too many recipients".to_string()),
                );
            });
            return Ok(id);
        }

        let time_sent = unix_now();
        {
            let net = Arc::clone(&net);
            let delay = sender_profile.delivery_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                net.statuses.insert(id, DeliveryStatus::Delivered);
            });
        }
        for recipient in recipients {
            let net = Arc::clone(&net);
            let from = from.to_string();
            let text = text.to_string();
            let attachment = attachment.clone();
            let chat_entry = chat_entry.clone();
            tokio::spawn(async move {
                let profile = net.profile(&recipient);
                tokio::time::sleep(profile.delivery_delay).await;
                if profile.silent {
                    trace!(%recipient, "sim: silent account drops message");
                    return;
                }
                // synthetic and shut-down recipients just vanish
                let Some(inbox) = net.inbox(&recipient) else {
                    return;
                };
                let time_received = unix_now();
                let msg = IncomingMessage {
                    id,
                    sender: from.clone(),
                    chat: ChatInfo {
                        id: chat,
                        is_group: chat_entry.is_group,
                        name: if chat_entry.is_group {
                            chat_entry.name.clone()
                        } else {
                            from.clone()
                        },
                        can_send: true,
                    },
                    is_system: false,
                    text,
                    attachment,
                    message_info: message_info(&from, &recipient, time_sent, time_received),
                    time_sent: Some(time_sent),
                    time_received: Some(time_received),
                };
                let _ = inbox.send(AccountEvent::IncomingMessage(msg)).await;
            });
        }
        Ok(id)
    }
}

/// Transport-info text in the layout real clients produce.
fn message_info(from: &str, to: &str, sent: f64, received: f64) -> String {
    let sent = EnvelopeTime::from_unix_f64(sent).unwrap_or(EnvelopeTime::MIN);
    let received = EnvelopeTime::from_unix_f64(received).unwrap_or(EnvelopeTime::MIN);
    let from_domain = domain_of(from);
    let to_domain = domain_of(to);
    format!(
        "Sent: {} by {}\nReceived: {}\nHop: From: smtp.{}; By: mx.{}; Date: {}\nHop: From: mx.{}; By: imap.{}; Date: {}",
        sent,
        from,
        received,
        from_domain,
        to_domain,
        sent,
        to_domain,
        to_domain,
        received,
    )
}

impl MailTransport for SimTransport {
    fn connect<'a>(
        &'a self,
        account: &'a AccountConfig,
    ) -> TransportFuture<'a, mpsc::Receiver<AccountEvent>> {
        Box::pin(async move {
            let profile = match self.net.profiles.get(&account.addr) {
                Some(p) => p.value().clone(),
                None => {
                    let p = SimProfile::from_options(&account.options);
                    self.net.profiles.insert(account.addr.clone(), p.clone());
                    p
                }
            };
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            self.net.inboxes.insert(account.addr.clone(), tx.clone());

            let addr = account.addr.clone();
            tokio::spawn(async move {
                tokio::time::sleep(profile.login_delay).await;
                if profile.login_ok {
                    let _ = tx
                        .send(AccountEvent::Info(format!("sim: IMAP connected for {}", addr)))
                        .await;
                } else {
                    let _ = tx
                        .send(AccountEvent::Error(format!(
                            "sim: authentication failed for {}",
                            addr
                        )))
                        .await;
                }
                let _ = tx
                    .send(AccountEvent::ConfigureCompleted {
                        success: profile.login_ok,
                    })
                    .await;
            });
            Ok(rx)
        })
    }

    fn create_chat<'a>(&'a self, from: &'a str, to: &'a str) -> TransportFuture<'a, ChatId> {
        Box::pin(async move {
            let id = self.net.next_id();
            self.net.chats.insert(
                id,
                SimChat {
                    name: to.to_string(),
                    is_group: false,
                    members: vec![from.to_string(), to.to_string()],
                },
            );
            Ok(id)
        })
    }

    fn create_group<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
        members: &'a [String],
    ) -> TransportFuture<'a, ChatId> {
        Box::pin(async move {
            let id = self.net.next_id();
            let mut all = Vec::with_capacity(members.len() + 1);
            all.push(owner.to_string());
            all.extend(members.iter().filter(|m| m.as_str() != owner).cloned());
            self.net.chats.insert(
                id,
                SimChat {
                    name: name.to_string(),
                    is_group: true,
                    members: all,
                },
            );
            Ok(id)
        })
    }

    fn send_text<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId> {
        Box::pin(async move { self.submit(from, chat, text, None) })
    }

    fn send_file<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        path: &'a Path,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId> {
        Box::pin(async move {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            self.submit(from, chat, text, Some(name))
        })
    }

    fn delivery_status<'a>(
        &'a self,
        _from: &'a str,
        msg: MessageId,
    ) -> TransportFuture<'a, DeliveryStatus> {
        Box::pin(async move {
            self.net
                .statuses
                .get(&msg)
                .map(|s| s.value().clone())
                .ok_or_else(|| PerfError::Transport(format!("unknown message {}", msg)))
        })
    }

    fn capabilities<'a>(&'a self, addr: &'a str) -> TransportFuture<'a, ServerCapabilities> {
        Box::pin(async move {
            if !self.net.inboxes.contains_key(addr) {
                return Err(PerfError::UnknownAccount(addr.to_string()));
            }
            Ok(self.net.profile(addr).capabilities)
        })
    }

    fn shutdown<'a>(&'a self, addr: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.net.inboxes.remove(addr);
            Ok(())
        })
    }
}
