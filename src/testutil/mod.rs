use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::accounts::AccountConfig;
use crate::error::PerfError;
use crate::transport::{
    AccountEvent, ChatId, DeliveryStatus, MailTransport, MessageId, ServerCapabilities,
    TransportFuture,
};
use tokio::sync::mpsc;

/// Shared mock transport for tests
/// - records every accepted send
/// - counts send attempts
/// - optional failure injection for sends and for connecting
///
/// Every account logs in successfully right away and nothing is ever
/// delivered; tests push events with `inject`.
pub struct MockTransport {
    pub sent: Mutex<Vec<(String, ChatId, String)>>,
    pub send_count: AtomicUsize,
    pub should_fail: AtomicBool,
    pub connect_fails: AtomicBool,
    inboxes: Mutex<HashMap<String, mpsc::Sender<AccountEvent>>>,
    next_id: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            connect_fails: AtomicBool::new(false),
            inboxes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Push an event into a connected account's channel.
    pub async fn inject(&self, addr: &str, event: AccountEvent) -> bool {
        let tx = self.inboxes.lock().get(addr).cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, from: &str, chat: ChatId, text: &str) -> Result<MessageId, PerfError> {
        self.send_count.fetch_add(1, Ordering::Relaxed);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(PerfError::Transport("mock failure".to_string()));
        }
        self.sent
            .lock()
            .push((from.to_string(), chat, text.to_string()));
        Ok(self.id())
    }

    fn fail_or<T>(&self, value: T) -> Result<T, PerfError> {
        if self.should_fail.load(Ordering::Relaxed) {
            Err(PerfError::Transport("mock failure".to_string()))
        } else {
            Ok(value)
        }
    }
}

impl MailTransport for MockTransport {
    fn connect<'a>(
        &'a self,
        account: &'a AccountConfig,
    ) -> TransportFuture<'a, mpsc::Receiver<AccountEvent>> {
        Box::pin(async move {
            if self.connect_fails.load(Ordering::Relaxed) {
                return Err(PerfError::LoginFailed(account.addr.clone()));
            }
            let (tx, rx) = mpsc::channel(64);
            let _ = tx.send(AccountEvent::ConfigureCompleted { success: true }).await;
            self.inboxes.lock().insert(account.addr.clone(), tx);
            Ok(rx)
        })
    }

    fn create_chat<'a>(&'a self, _from: &'a str, _to: &'a str) -> TransportFuture<'a, ChatId> {
        Box::pin(async move { self.fail_or(self.id()) })
    }

    fn create_group<'a>(
        &'a self,
        _owner: &'a str,
        _name: &'a str,
        _members: &'a [String],
    ) -> TransportFuture<'a, ChatId> {
        Box::pin(async move { self.fail_or(self.id()) })
    }

    fn send_text<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId> {
        Box::pin(async move { self.record(from, chat, text) })
    }

    fn send_file<'a>(
        &'a self,
        from: &'a str,
        chat: ChatId,
        _path: &'a Path,
        text: &'a str,
    ) -> TransportFuture<'a, MessageId> {
        Box::pin(async move { self.record(from, chat, text) })
    }

    fn delivery_status<'a>(
        &'a self,
        _from: &'a str,
        _msg: MessageId,
    ) -> TransportFuture<'a, DeliveryStatus> {
        Box::pin(async move { self.fail_or(DeliveryStatus::Pending) })
    }

    fn capabilities<'a>(&'a self, _addr: &'a str) -> TransportFuture<'a, ServerCapabilities> {
        Box::pin(async move { self.fail_or(ServerCapabilities::default()) })
    }

    fn shutdown<'a>(&'a self, addr: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.inboxes.lock().remove(addr);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn mock_transport_records_sent_message() {
        let transport = MockTransport::new();
        transport.send_text("a@pa.example", 3, "Begin: 1.0").await.unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("a@pa.example".to_string(), 3, "Begin: 1.0".to_string()));
    }

    #[tokio::test]
    async fn mock_transport_returns_error_when_should_fail_is_true() {
        let transport = MockTransport::new();
        transport.set_should_fail(true);

        assert!(transport.send_text("a@pa.example", 1, "x").await.is_err());
        assert!(transport.create_chat("a@pa.example", "b@pb.example").await.is_err());
        // failures are counted but not recorded
        assert_eq!(transport.send_count.load(Ordering::Relaxed), 1);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn connect_reports_login_then_closes_on_shutdown() {
        let transport = MockTransport::new();
        let mut rx = transport
            .connect(&AccountConfig::new("a@pa.example", "pw"))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(AccountEvent::ConfigureCompleted { success: true })
        );
        assert!(transport.inject("a@pa.example", AccountEvent::Info("x".into())).await);
        transport.shutdown("a@pa.example").await.unwrap();
        assert_eq!(rx.recv().await, Some(AccountEvent::Info("x".into())));
        assert_eq!(rx.recv().await, None);
        assert!(!transport.inject("a@pa.example", AccountEvent::Info("y".into())).await);
    }

    #[test]
    fn mock_transport_implements_mail_transport() {
        let transport = Arc::new(MockTransport::new());
        let _: Arc<dyn MailTransport> = transport;
    }
}
