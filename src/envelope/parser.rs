// Envelope decoder using nom combinators for the `Key: value` line shape.

use nom::{
    bytes::complete::{tag, take_while1},
    combinator::rest,
    IResult,
};

use super::Envelope;
use crate::clock::EnvelopeTime;

/// Split one line into `(key, value)`. Lines that are not `Key: value` fail.
fn key_value_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, key) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    let (input, _) = tag(": ")(input)?;
    let (input, value) = rest(input)?;
    Ok((input, (key, value)))
}

fn parse_seconds(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Decode an envelope out of arbitrary text.
///
/// Every line is looked at on its own; unknown keys and malformed values are
/// skipped. This never fails: empty or unrelated text yields an envelope with
/// no fields and an empty hop trace.
pub fn decode(text: &str) -> Envelope {
    let mut env = Envelope::default();

    for line in text.lines() {
        let (key, value) = match key_value_line(line.trim_end_matches('\r')) {
            Ok((_, kv)) => kv,
            Err(_) => continue,
        };
        match key {
            "TestDuration" => env.test_duration = parse_seconds(value),
            "Begin" => env.begin = parse_seconds(value),
            "Sender" => env.sender = Some(value.trim().to_string()),
            "Received" => env.received = EnvelopeTime::parse(value),
            "Sent" => {
                // "Sent: 2021.05.03 12:00:00 by Name <addr>"
                let stamp = value.split(" by ").next().unwrap_or(value);
                env.sent = EnvelopeTime::parse(stamp);
            }
            "Error" => env.error = Some(value.trim().to_string()),
            "Hop" => env.hops.push(value.to_string()),
            _ => {}
        }
    }

    if let (Some(sent), Some(received)) = (env.sent, env.received) {
        env.tdelta = Some(sent.seconds_until(received));
    }
    env
}
