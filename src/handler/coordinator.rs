use std::sync::Arc;
use tracing::{debug, warn};

use super::{IncomingMessageHandler, Outbound};
use crate::aggregator::{Aggregator, ResultValue};
use crate::envelope::{decode, encode, Envelope, COORDINATOR_SENDER};
use crate::transport::IncomingMessage;

/// Echo bot run by the coordinator ("spider") account.
///
/// Every direct message is answered with the time the message took to
/// arrive, the relay trace, and a fresh `Begin` so the sender can time the
/// echo leg.
pub struct CoordinatorHandler {
    aggregator: Arc<Aggregator>,
}

impl CoordinatorHandler {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

impl IncomingMessageHandler for CoordinatorHandler {
    fn handle(&mut self, msg: &IncomingMessage, now: f64) -> Option<Outbound> {
        if !msg.is_replyable() {
            debug!(sender = %msg.sender, "coordinator ignoring unreplyable message");
            return None;
        }
        if msg.chat.is_group {
            return None;
        }

        let info = decode(&msg.message_info);
        let duration = info.tdelta.or_else(|| match (msg.time_sent, msg.time_received) {
            (Some(sent), Some(received)) => Some(received - sent),
            _ => None,
        });

        let mut reply = Envelope {
            begin: Some(now),
            sender: Some(COORDINATOR_SENDER.to_string()),
            ..Default::default()
        };
        let value = match duration {
            Some(d) => {
                reply.test_duration = Some(d);
                ResultValue::Duration(d)
            }
            None => {
                warn!(sender = %msg.sender, "no timing information in incoming message");
                let text = "no timing information".to_string();
                reply.error = Some(text.clone());
                ResultValue::Text(text)
            }
        };
        for hop in &info.hops {
            reply.push_hop(hop.as_str());
        }

        self.aggregator.submit_file_test(&msg.sender, value, info.hops);

        Some(Outbound {
            chat: msg.chat.id,
            body: encode(&reply.to_fields()),
        })
    }
}
