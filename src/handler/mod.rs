// Inbound message correlation
//
// One handler per account. The event loop calls `handle` for every incoming
// message with the arrival time; the handler decodes the envelope, submits
// results to the aggregator and may ask for one reply to be sent.

pub mod coordinator;
pub mod participant;

pub use coordinator::CoordinatorHandler;
pub use participant::ParticipantHandler;

use crate::transport::{ChatId, IncomingMessage};

/// Reply requested by a handler. Sent fire-and-forget by the event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub chat: ChatId,
    pub body: String,
}

pub trait IncomingMessageHandler: Send {
    /// Process one message that arrived at unix time `now`.
    fn handle(&mut self, msg: &IncomingMessage, now: f64) -> Option<Outbound>;
}
