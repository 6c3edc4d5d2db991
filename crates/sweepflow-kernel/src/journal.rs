//! Transition journal
//!
//! Append-only log of every record state change in a run. Each entry is
//! chained to its predecessor by SHA-256, so editing, dropping or reordering
//! entries in an exported journal is detected by [`verify_chain`].

use crate::error::JournalError;
use crate::types::{NodeId, NodeState};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const GENESIS: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub node: NodeId,
    pub rule: String,
    pub from: NodeState,
    pub to: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Hex SHA-256 of the previous entry
    pub prev_hash: String,
    /// Hex SHA-256 of this entry
    pub hash: String,
}

#[derive(Debug, Default)]
pub struct RunJournal {
    inner: Mutex<Vec<TransitionEvent>>,
}

impl RunJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition, returning its sequence number
    pub fn append(
        &self,
        node: NodeId,
        rule: &str,
        from: NodeState,
        to: NodeState,
        detail: Option<String>,
    ) -> u64 {
        let mut guard = self.inner.lock();
        let seq = guard.len() as u64;
        let prev_hash = guard.last().map_or_else(|| hex::encode(GENESIS), |e| e.hash.clone());
        let mut event = TransitionEvent {
            seq,
            timestamp: Utc::now(),
            node,
            rule: rule.to_string(),
            from,
            to,
            detail,
            prev_hash,
            hash: String::new(),
        };
        event.hash = hex::encode(compute_hash(&event));
        guard.push(event);
        seq
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn verify_integrity(&self) -> Result<(), JournalError> {
        verify_chain(&self.inner.lock())
    }

    /// Write the journal as JSON lines
    pub fn write_jsonl(&self, path: &Path) -> Result<(), JournalError> {
        write_jsonl(path, &self.inner.lock())
    }
}

/// Write events as JSON lines, one entry per line
pub fn write_jsonl(path: &Path, events: &[TransitionEvent]) -> Result<(), JournalError> {
    let mut out = BufWriter::new(File::create(path)?);
    for event in events {
        serde_json::to_writer(&mut out, event).map_err(std::io::Error::from)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Read a journal written by [`RunJournal::write_jsonl`]
pub fn read_jsonl(path: &Path) -> Result<Vec<TransitionEvent>, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| JournalError::Parse {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Check sequence numbers and the hash chain
pub fn verify_chain(events: &[TransitionEvent]) -> Result<(), JournalError> {
    let mut prev = hex::encode(GENESIS);
    for (idx, e) in events.iter().enumerate() {
        let violation = JournalError::IntegrityViolation { seq: idx as u64 };
        if e.seq != idx as u64 || e.prev_hash != prev {
            return Err(violation);
        }
        if e.hash != hex::encode(compute_hash(e)) {
            return Err(violation);
        }
        prev = e.hash.clone();
    }
    Ok(())
}

fn compute_hash(event: &TransitionEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.seq.to_le_bytes());
    hasher.update(event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update([0]);
    hasher.update((event.node.index() as u64).to_le_bytes());
    hasher.update(event.rule.as_bytes());
    hasher.update([0]);
    hasher.update(event.from.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.to.as_str().as_bytes());
    hasher.update([0]);
    if let Some(detail) = &event.detail {
        hasher.update([1]);
        hasher.update(detail.as_bytes());
    }
    hasher.update([0]);
    hasher.update(event.prev_hash.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use NodeState::*;

    fn journal() -> RunJournal {
        let j = RunJournal::new();
        j.append(NodeId(0), "sim", Pending, Running, None);
        j.append(NodeId(0), "sim", Running, Done, None);
        j.append(NodeId(1), "plot", Pending, Failed, Some("upstream".into()));
        j
    }

    #[test]
    fn chain_verifies() {
        let j = journal();
        assert_eq!(j.len(), 3);
        assert!(j.verify_integrity().is_ok());
        let events = j.events();
        assert_eq!(events[1].prev_hash, events[0].hash);
    }

    #[test]
    fn tampering_is_detected() {
        let mut events = journal().events();
        events[1].to = Failed;
        assert!(matches!(
            verify_chain(&events),
            Err(JournalError::IntegrityViolation { seq: 1 })
        ));
    }

    #[test]
    fn dropped_entry_is_detected() {
        let mut events = journal().events();
        events.remove(0);
        assert!(verify_chain(&events).is_err());
    }

    #[test]
    fn jsonl_round_trip_still_verifies() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("journal.jsonl");
        journal().write_jsonl(&path).unwrap();
        let events = read_jsonl(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(verify_chain(&events).is_ok());
    }

    #[test]
    fn malformed_line_reports_position() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("journal.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        assert!(matches!(read_jsonl(&path), Err(JournalError::Parse { line: 2, .. })));
    }
}
