//! Status line format and message batching.
//!
//! Each stat row is one text line:
//!
//! ```text
//! ^<dataset>^ <xferred> <remaining> <errors> <elapsed> <Y|N>\n
//! ```
//!
//! Lines are packed into messages of at most `capacity` bytes. Every message
//! but the last of a cycle is tagged [`MessageKind::Partial`]; the last is
//! [`MessageKind::Final`], so a listener knows when a batch is complete.
//! A row whose line alone exceeds `capacity` is left out of the cycle.

use crate::error::{ChannelError, ChannelResult};
use crate::registry::MigrationStat;
use tracing::warn;

/// Dataset token of the line sent when nothing is migrating.
pub const NO_MIGRATIONS: &str = "SHADOWD_NOMIGRATIONS";

/// Message type tag carried with every status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Partial,
    Final,
}

impl MessageKind {
    /// Message-queue type value (must be positive).
    pub fn as_mtype(self) -> i64 {
        match self {
            MessageKind::Partial => 1,
            MessageKind::Final => 2,
        }
    }

    pub fn from_mtype(mtype: i64) -> Option<Self> {
        match mtype {
            1 => Some(MessageKind::Partial),
            2 => Some(MessageKind::Final),
            _ => None,
        }
    }
}

/// One buffer of a publish cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: MessageKind,
    pub payload: String,
}

/// Serialize one row.
pub fn format_row(stat: &MigrationStat) -> String {
    format!(
        "^{}^ {} {} {} {} {}\n",
        stat.dataset,
        stat.xferred,
        stat.remaining,
        stat.errors,
        stat.elapsed,
        if stat.complete { 'Y' } else { 'N' }
    )
}

fn sentinel_line() -> String {
    format!("^{NO_MIGRATIONS}^ 0 0 0 0 Y\n")
}

/// Pack rows into the messages of one publish cycle.
///
/// A line never straddles two messages and no payload exceeds `capacity`.
/// If every row is skipped the FINAL message is empty.
pub fn build_batch(rows: &[MigrationStat], capacity: usize) -> Vec<StatusMessage> {
    if rows.is_empty() {
        return vec![StatusMessage {
            kind: MessageKind::Final,
            payload: sentinel_line(),
        }];
    }

    let mut messages = Vec::new();
    let mut current = String::with_capacity(capacity);
    for row in rows {
        let line = format_row(row);
        if line.len() > capacity {
            warn!(
                dataset = %row.dataset,
                len = line.len(),
                capacity,
                "Status line does not fit in one message, skipping"
            );
            continue;
        }
        if !current.is_empty() && current.len() + line.len() > capacity {
            messages.push(StatusMessage {
                kind: MessageKind::Partial,
                payload: std::mem::replace(&mut current, String::with_capacity(capacity)),
            });
        }
        current.push_str(&line);
    }
    messages.push(StatusMessage {
        kind: MessageKind::Final,
        payload: current,
    });
    messages
}

/// Parse one line. The sentinel yields `Ok(None)`.
pub fn parse_row(line: &str) -> ChannelResult<Option<MigrationStat>> {
    let malformed = || ChannelError::Malformed {
        line: line.to_string(),
    };

    let rest = line.trim_end_matches('\n').strip_prefix('^').ok_or_else(malformed)?;
    let split = rest.rfind("^ ").ok_or_else(malformed)?;
    let dataset = &rest[..split];
    let fields: Vec<&str> = rest[split + 2..].split(' ').collect();
    if fields.len() != 5 {
        return Err(malformed());
    }

    if dataset == NO_MIGRATIONS {
        return Ok(None);
    }

    let complete = match fields[4] {
        "Y" => true,
        "N" => false,
        _ => return Err(malformed()),
    };
    Ok(Some(MigrationStat {
        dataset: dataset.to_string(),
        xferred: fields[0].parse().map_err(|_| malformed())?,
        remaining: fields[1].parse().map_err(|_| malformed())?,
        errors: fields[2].parse().map_err(|_| malformed())?,
        elapsed: fields[3].parse().map_err(|_| malformed())?,
        complete,
    }))
}

/// Parse the concatenated payloads of one batch.
pub fn parse_batch(text: &str) -> ChannelResult<Vec<MigrationStat>> {
    let mut rows = Vec::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        if let Some(row) = parse_row(line)? {
            rows.push(row);
        }
    }
    Ok(rows)
}
