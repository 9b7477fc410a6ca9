// Mail transport abstraction
//
// The engine never talks SMTP/IMAP itself. Every account operation goes
// through `MailTransport`, and every inbound happening arrives as an
// `AccountEvent` on the per-account channel returned by `connect`.

pub mod sim;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::sync::mpsc;

use crate::accounts::AccountConfig;
use crate::error::PerfError;

pub type ChatId = u64;
pub type MessageId = u64;

/// Boxed future returned by every transport operation.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PerfError>> + Send + 'a>>;

/// Chat a message arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub is_group: bool,
    pub name: String,
    /// False for read-only chats (device chat, mailing lists, left groups).
    pub can_send: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub sender: String,
    pub chat: ChatInfo,
    /// Info/system messages (member added, encryption notices, ...).
    pub is_system: bool,
    pub text: String,
    pub attachment: Option<String>,
    /// Transport-info text: `Sent:`/`Received:`/`Hop:` lines.
    pub message_info: String,
    pub time_sent: Option<f64>,
    pub time_received: Option<f64>,
}

impl IncomingMessage {
    /// Messages that must never be answered.
    pub fn is_replyable(&self) -> bool {
        self.chat.can_send && !self.is_system
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    /// Result of the login/configure step started by `connect`.
    ConfigureCompleted { success: bool },
    IncomingMessage(IncomingMessage),
    Info(String),
    Warning(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    /// Rejected by the provider; carries the server's reason.
    Failed(String),
}

/// Results of the server capability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Human readable quota, e.g. `"102400 KiB"`; `None` when QUOTA is unsupported.
    pub quota: Option<String>,
    pub condstore: bool,
}

/// Operations on provider accounts. Implementations must be shareable
/// between the orchestrator and all event loops.
pub trait MailTransport: Send + Sync {
    /// Start logging in `account`. The outcome arrives later as
    /// `AccountEvent::ConfigureCompleted` on the returned channel, which closes
    /// after `shutdown`.
    fn connect<'a>(
        &'a self,
        account: &'a AccountConfig,
    ) -> TransportFuture<'a, mpsc::Receiver<AccountEvent>>;

    /// One-to-one chat from `from` to `to`.
    fn create_chat<'a>(&'a self, from: &'a str, to: &'a str) -> TransportFuture<'a, ChatId>;

    /// Group owned by `owner`; `members` must not include the owner.
    fn create_group<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
        members: &'a [String],
    ) -> TransportFuture<'a, ChatId>;

    fn send_text<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId>;

    fn send_file<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        path: &'a Path,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId>;

    fn delivery_status<'a>(
        &'a self,
        from: &'a str,
        msg: MessageId,
    ) -> TransportFuture<'a, DeliveryStatus>;

    fn capabilities<'a>(&'a self, addr: &'a str) -> TransportFuture<'a, ServerCapabilities>;

    /// Stop the account's IO. Closes its event channel.
    fn shutdown<'a>(&'a self, addr: &'a str) -> TransportFuture<'a, ()>;
}
