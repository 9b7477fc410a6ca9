// Test envelope: line-based metadata carried inside message bodies and
// message-info blobs.

pub mod formatter;
pub mod parser;

use crate::clock::EnvelopeTime;

pub use formatter::encode;
pub use parser::decode;

/// `Sender` value used by the coordinator account.
pub const COORDINATOR_SENDER: &str = "spider";

/// One encodable envelope line.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Seconds the measured leg took, as computed by the coordinator.
    TestDuration(f64),
    /// Unix seconds at which the sender started the measured leg.
    Begin(f64),
    Sender(String),
    Received(EnvelopeTime),
    Sent(EnvelopeTime),
    Error(String),
    Hop(String),
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::TestDuration(_) => "TestDuration",
            Field::Begin(_) => "Begin",
            Field::Sender(_) => "Sender",
            Field::Received(_) => "Received",
            Field::Sent(_) => "Sent",
            Field::Error(_) => "Error",
            Field::Hop(_) => "Hop",
        }
    }
}

/// Decoded envelope. Every scalar field is `None` when its line was missing
/// or malformed; callers must treat `None` as "unknown", never as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub test_duration: Option<f64>,
    pub begin: Option<f64>,
    pub sender: Option<String>,
    pub received: Option<EnvelopeTime>,
    pub sent: Option<EnvelopeTime>,
    pub error: Option<String>,
    /// Relay trace in arrival order.
    pub hops: Vec<String>,
    /// `received - sent`, present only when both timestamps decoded.
    pub tdelta: Option<f64>,
}

impl Envelope {
    /// True when the sender field names the coordinator.
    pub fn is_from_coordinator(&self) -> bool {
        self.sender.as_deref() == Some(COORDINATOR_SENDER)
    }

    /// Seconds elapsed between `Begin` and `now`, if `Begin` decoded.
    pub fn elapsed_since_begin(&self, now: f64) -> Option<f64> {
        self.begin.map(|begin| now - begin)
    }

    /// Append one hop annotation to the end of the trace.
    pub fn push_hop(&mut self, hop: impl Into<String>) {
        self.hops.push(hop.into());
    }

    /// Fields in canonical order, suitable for `encode`.
    pub fn to_fields(&self) -> Vec<Field> {
        let mut fields = Vec::with_capacity(6 + self.hops.len());
        if let Some(d) = self.test_duration {
            fields.push(Field::TestDuration(d));
        }
        if let Some(b) = self.begin {
            fields.push(Field::Begin(b));
        }
        if let Some(s) = &self.sender {
            fields.push(Field::Sender(s.clone()));
        }
        if let Some(s) = self.sent {
            fields.push(Field::Sent(s));
        }
        if let Some(r) = self.received {
            fields.push(Field::Received(r));
        }
        if let Some(e) = &self.error {
            fields.push(Field::Error(e.clone()));
        }
        fields.extend(self.hops.iter().cloned().map(Field::Hop));
        fields
    }
}
