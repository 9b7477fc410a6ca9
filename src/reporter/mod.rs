// Reporter module - CSV report rows and JSON dump of the aggregated results
use anyhow::Context;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::accounts::domain_of;
use crate::aggregator::{AggregateSnapshot, ResultValue};
use crate::config::Command;

const TIMEOUT: &str = "timeout";
const SUPPORTED: &str = "Supported";
const NOT_SUPPORTED: &str = "Not Supported";

/// One report row: heading followed by one cell per participant.
pub type Row = Vec<String>;

fn row_of(heading: &str, roster: &[String], cell: impl Fn(&str) -> String) -> Row {
    let mut row = Vec::with_capacity(roster.len() + 1);
    row.push(heading.to_string());
    row.extend(roster.iter().map(|addr| cell(addr)));
    row
}

fn cell(set: &HashMap<String, ResultValue>, addr: &str) -> String {
    set.get(addr)
        .map(ResultValue::to_string)
        .unwrap_or_else(|| TIMEOUT.to_string())
}

/// Hop annotations lose their separators so they fit in one CSV cell.
fn hop_cell(hop: &str) -> String {
    hop.replace([',', ';'], "")
}

/// Cell of a post-login phase. Participants that never became active show
/// their login outcome instead of a phase result.
fn phase_cell(
    snap: &AggregateSnapshot,
    active: &[String],
    addr: &str,
    value: impl FnOnce() -> String,
) -> String {
    if active.iter().any(|a| a == addr) {
        value()
    } else {
        cell(&snap.logins, addr)
    }
}

/// Build all rows for `command`. Participants appear in roster order;
/// entries without a result render as `timeout`. Group percentages count
/// active peers only.
pub fn build_rows(command: Command, snap: &AggregateSnapshot, file_size: Option<&str>) -> Vec<Row> {
    let roster = &snap.roster;
    let active = snap.active();
    let mut rows = Vec::new();

    rows.push(row_of("test accounts (by provider):", roster, |a| {
        domain_of(a).to_string()
    }));
    rows.push(row_of("time to login (in seconds):", roster, |a| {
        cell(&snap.logins, a)
    }));

    match command {
        Command::Login => {}
        Command::Group => {
            rows.push(row_of("added to group (in seconds):", roster, |a| {
                phase_cell(snap, &active, a, || cell(&snap.group_add, a))
            }));
            for receiver in roster {
                let heading = format!("received by {} (in seconds):", domain_of(receiver));
                let received = snap.group_messages.get(receiver);
                rows.push(row_of(&heading, roster, |sender| {
                    if sender == receiver {
                        return "self".to_string();
                    }
                    // an inactive sender marks its own column, an inactive receiver its row
                    let excluded = if active.iter().any(|a| a == sender) {
                        receiver.as_str()
                    } else {
                        sender
                    };
                    phase_cell(snap, &active, excluded, || {
                        received
                            .and_then(|r| r.get(sender))
                            .map(ResultValue::to_string)
                            .unwrap_or_else(|| TIMEOUT.to_string())
                    })
                }));
            }
            rows.push(row_of("received messages from other providers:", roster, |a| {
                phase_cell(snap, &active, a, || {
                    format!("{}%", snap.received_percentage(a, &active))
                })
            }));
            rows.push(row_of("delivered messages to other providers:", roster, |a| {
                phase_cell(snap, &active, a, || {
                    format!("{}%", snap.delivered_percentage(a, &active))
                })
            }));
        }
        Command::File => {
            let heading = format!("sent {} file (in seconds):", file_size.unwrap_or("test"));
            rows.push(row_of(&heading, roster, |a| {
                phase_cell(snap, &active, a, || cell(&snap.file_tests, a))
            }));
            rows.push(row_of("received echo (in seconds):", roster, |a| {
                phase_cell(snap, &active, a, || cell(&snap.receives, a))
            }));
            let depth = roster
                .iter()
                .filter_map(|a| snap.hops.get(a).map(Vec::len))
                .max()
                .unwrap_or(0);
            for i in 0..depth {
                rows.push(row_of(&format!("hop {}:", i + 1), roster, |a| {
                    snap.hops
                        .get(a)
                        .and_then(|h| h.get(i))
                        .map(|h| hop_cell(h))
                        .unwrap_or_default()
                }));
            }
        }
        Command::Recipients => {
            rows.push(row_of("maximum recipients:", roster, |a| {
                phase_cell(snap, &active, a, || cell(&snap.recipients, a))
            }));
        }
        Command::Server => {
            rows.push(row_of("IMAP QUOTA:", roster, |a| {
                phase_cell(snap, &active, a, || match snap.capabilities.get(a) {
                    Some(caps) => caps.quota.clone().unwrap_or_else(|| NOT_SUPPORTED.to_string()),
                    None => TIMEOUT.to_string(),
                })
            }));
            rows.push(row_of("CONDSTORE:", roster, |a| {
                phase_cell(snap, &active, a, || match snap.capabilities.get(a) {
                    Some(caps) if caps.condstore => SUPPORTED.to_string(),
                    Some(_) => NOT_SUPPORTED.to_string(),
                    None => TIMEOUT.to_string(),
                })
            }));
        }
    }
    rows
}

/// Cells joined with `", "`, rows with newlines.
pub fn render(rows: &[Row]) -> String {
    rows.iter()
        .map(|r| r.join(", "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `15728640` -> `"15.0MB"`, `2048` -> `"2.0KB"`. Three decimals at most.
pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let (value, unit) = if bytes as f64 > MIB {
        (bytes as f64 / MIB, "MB")
    } else {
        (bytes as f64 / KIB, "KB")
    };
    let rounded = (value * 1000.0).round() / 1000.0;
    let mut text = rounded.to_string();
    if !text.contains('.') {
        text.push_str(".0");
    }
    text + unit
}

/// Insert `-<size>` before the extension: `performance.csv` -> `performance-15.0MB.csv`.
pub fn output_path_with_size(output: &str, size: &str) -> PathBuf {
    let path = Path::new(output);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path.with_file_name(format!(
            "{}-{}.{}",
            stem.to_string_lossy(),
            size,
            ext.to_string_lossy()
        )),
        _ => PathBuf::from(format!("{}-{}", output, size)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// The file existed and overwriting was declined.
    Declined,
}

/// Write `content` to `path`. An existing file is replaced only if
/// `overwrite` is set or `confirm` agrees.
pub fn write_report(
    path: &Path,
    content: &str,
    overwrite: bool,
    confirm: impl FnOnce(&Path) -> bool,
) -> anyhow::Result<WriteOutcome> {
    if path.exists() && !overwrite && !confirm(path) {
        return Ok(WriteOutcome::Declined);
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(WriteOutcome::Written(path.to_path_buf()))
}

/// Interactive `[Y/n]` prompt. Anything but `n` means yes.
pub fn confirm_overwrite<R: BufRead, W: Write>(path: &Path, input: &mut R, output: &mut W) -> bool {
    let _ = write!(
        output,
        "{} already exists. Do you want to overwrite it? [Y/n] ",
        path.display()
    );
    let _ = output.flush();
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    !answer.trim().eq_ignore_ascii_case("n")
}

/// Dump the raw aggregated results as pretty JSON.
pub fn write_json_result(snapshot: &AggregateSnapshot, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    Ok(())
}
