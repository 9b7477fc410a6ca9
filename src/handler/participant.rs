use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{IncomingMessageHandler, Outbound};
use crate::aggregator::{Aggregator, ResultValue};
use crate::envelope::{decode, encode, Envelope, Field};
use crate::transport::IncomingMessage;

/// Peer group message seen before this account got the kickoff.
#[derive(Debug, Clone)]
struct EarlyPeer {
    group: String,
    sender: String,
    elapsed: f64,
}

/// Handler for an ordinary test account.
pub struct ParticipantHandler {
    addr: String,
    aggregator: Arc<Aggregator>,
    /// Group joined via a coordinator kickoff; replied to exactly once.
    group: Option<String>,
    early: VecDeque<EarlyPeer>,
    early_capacity: usize,
}

impl ParticipantHandler {
    pub fn new(addr: &str, aggregator: Arc<Aggregator>, early_capacity: usize) -> Self {
        Self {
            addr: addr.to_string(),
            aggregator,
            group: None,
            early: VecDeque::new(),
            early_capacity,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn handle_kickoff(&mut self, msg: &IncomingMessage, env: &Envelope, now: f64) -> Option<Outbound> {
        let group = &msg.chat.name;
        if self.group.as_deref() == Some(group.as_str()) {
            debug!(addr = %self.addr, %group, "duplicate kickoff ignored");
            return None;
        }
        let Some(elapsed) = env.elapsed_since_begin(now) else {
            warn!(addr = %self.addr, %group, "kickoff without Begin dropped");
            return None;
        };

        self.aggregator
            .submit_group_add(&self.addr, ResultValue::Duration(elapsed));
        self.group = Some(group.clone());

        let buffered = std::mem::take(&mut self.early);
        for peer in buffered {
            if &peer.group == group {
                self.aggregator.submit_group_message(
                    &self.addr,
                    &peer.sender,
                    ResultValue::Duration(peer.elapsed),
                );
            }
        }

        Some(Outbound {
            chat: msg.chat.id,
            body: encode(&[Field::Sender(self.addr.clone()), Field::Begin(now)]),
        })
    }

    fn handle_peer(&mut self, msg: &IncomingMessage, env: &Envelope, now: f64) {
        let sender = env.sender.as_deref().unwrap_or(&msg.sender);
        if sender == self.addr {
            return;
        }
        let Some(elapsed) = env.elapsed_since_begin(now) else {
            warn!(addr = %self.addr, %sender, "group message without Begin dropped");
            return;
        };
        let group = &msg.chat.name;
        match self.group.as_deref() {
            Some(joined) if joined == group => {
                self.aggregator.submit_group_message(
                    &self.addr,
                    sender,
                    ResultValue::Duration(elapsed),
                );
            }
            Some(joined) => {
                debug!(addr = %self.addr, %group, %joined, "message for another group ignored");
            }
            None if self.early.len() < self.early_capacity => {
                debug!(addr = %self.addr, %sender, "peer message before kickoff buffered");
                self.early.push_back(EarlyPeer {
                    group: group.clone(),
                    sender: sender.to_string(),
                    elapsed,
                });
            }
            None => {
                warn!(addr = %self.addr, %sender, "early peer buffer full, message dropped");
            }
        }
    }
}

impl IncomingMessageHandler for ParticipantHandler {
    fn handle(&mut self, msg: &IncomingMessage, now: f64) -> Option<Outbound> {
        if !msg.is_replyable() {
            debug!(addr = %self.addr, sender = %msg.sender, "ignoring unreplyable message");
            return None;
        }
        let env = decode(&msg.text);

        if msg.chat.is_group {
            if env.is_from_coordinator() {
                return self.handle_kickoff(msg, &env, now);
            }
            self.handle_peer(msg, &env, now);
            return None;
        }

        match env.elapsed_since_begin(now) {
            Some(elapsed) => {
                self.aggregator
                    .submit_receive(&self.addr, ResultValue::Duration(elapsed));
            }
            None => {
                warn!(addr = %self.addr, sender = %msg.sender, "direct message without Begin dropped");
            }
        }
        None
    }
}
