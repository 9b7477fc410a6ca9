// Envelope encoder: one `Key: value` line per field, in the order given.

use std::fmt::Write;

use super::Field;

/// Line breaks inside a value would start a new (bogus) line on the wire.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Encode fields into a message body fragment.
pub fn encode(fields: &[Field]) -> String {
    let mut buf = String::with_capacity(fields.len() * 32);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        let _ = match field {
            Field::TestDuration(v) | Field::Begin(v) => write!(buf, "{}: {:.6}", field.key(), v),
            Field::Received(ts) | Field::Sent(ts) => {
                write!(buf, "{}: {}", field.key(), ts)
            }
            Field::Sender(s) | Field::Error(s) | Field::Hop(s) => {
                write!(buf, "{}: {}", field.key(), single_line(s))
            }
        };
    }
    buf
}
