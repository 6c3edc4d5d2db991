//! Execution records
//!
//! One [`ExecutionRecord`] per node, stored in an arena indexed by
//! [`NodeId`]. Every status change goes through [`RecordTable::transition`],
//! which validates it against the state machine and appends it to the
//! journal.

use crate::error::{NodeError, StateMachineError};
use crate::graph::DependencyGraph;
use crate::journal::RunJournal;
use crate::state_machine::validate_transition;
use crate::types::{NodeId, NodeState};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable per-node run state
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// Graph node this record tracks
    pub node: NodeId,
    /// Instance name
    pub rule: String,
    /// Current lifecycle state
    pub status: NodeState,
    /// Exit code of the script, once it has exited
    pub exit_code: Option<i32>,
    /// Why the node failed, for FAILED records
    pub failure: Option<NodeError>,
    /// Output tail of a successful run, when the runner kept one
    pub diagnostics: Option<String>,
    /// When the node entered RUNNING
    pub started: Option<Instant>,
    /// Wall time from RUNNING to a terminal state
    pub duration: Option<Duration>,
}

impl ExecutionRecord {
    fn new(node: NodeId, rule: String) -> Self {
        Self {
            node,
            rule,
            status: NodeState::Pending,
            exit_code: None,
            failure: None,
            diagnostics: None,
            started: None,
            duration: None,
        }
    }

    /// Whether the rule's script was started in this run
    #[must_use]
    pub fn executed(&self) -> bool {
        match self.status {
            NodeState::Done => true,
            NodeState::Failed => self.failure.as_ref().is_some_and(NodeError::executed),
            _ => false,
        }
    }
}

/// Tally of node states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    /// Not yet dispatched
    pub pending: usize,
    /// Executing now
    pub running: usize,
    /// Executed and produced every output
    pub done: usize,
    /// Failed, including nodes blocked by a failed producer
    pub failed: usize,
    /// Outputs were already current
    pub skipped_cached: usize,
}

impl StateCounts {
    /// Sum over every state
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed + self.skipped_cached
    }
}

/// Records for every node of one run, indexed by node id
///
/// Every status change is validated and appended to the run journal.
#[derive(Debug)]
pub struct RecordTable {
    records: Vec<ExecutionRecord>,
    journal: Arc<RunJournal>,
}

impl RecordTable {
    /// One PENDING record per node of `graph`
    pub fn for_graph(graph: &DependencyGraph, journal: Arc<RunJournal>) -> Self {
        let records = graph
            .node_ids()
            .map(|id| ExecutionRecord::new(id, graph.instance(id).name.clone()))
            .collect();
        Self { records, journal }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table tracks no nodes
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for `node`, if it belongs to this run
    pub fn get(&self, node: NodeId) -> Option<&ExecutionRecord> {
        self.records.get(node.index())
    }

    /// Current status; unknown ids read as PENDING
    pub fn status(&self, node: NodeId) -> NodeState {
        self.get(node).map_or(NodeState::Pending, |r| r.status)
    }

    /// Records in node order
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    /// Journal receiving this table's transitions
    pub fn journal(&self) -> &Arc<RunJournal> {
        &self.journal
    }

    /// Whether every node reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.records.iter().all(|r| r.status.is_terminal())
    }

    /// Tally of current states
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for r in &self.records {
            match r.status {
                NodeState::Pending => counts.pending += 1,
                NodeState::Running => counts.running += 1,
                NodeState::Done => counts.done += 1,
                NodeState::Failed => counts.failed += 1,
                NodeState::SkippedCached => counts.skipped_cached += 1,
            }
        }
        counts
    }

    /// The single mutation path for statuses
    fn transition(
        &mut self,
        node: NodeId,
        to: NodeState,
        detail: Option<String>,
    ) -> Result<&mut ExecutionRecord, StateMachineError> {
        let record = self
            .records
            .get_mut(node.index())
            .ok_or(StateMachineError::UnknownNode(node))?;
        validate_transition(node, record.status, to)?;
        self.journal.append(node, &record.rule, record.status, to, detail);
        record.status = to;
        Ok(record)
    }

    /// PENDING -> RUNNING, before dispatch
    pub fn claim(&mut self, node: NodeId) -> Result<(), StateMachineError> {
        let record = self.transition(node, NodeState::Running, None)?;
        record.started = Some(Instant::now());
        Ok(())
    }

    /// PENDING -> SKIPPED_CACHED
    pub fn skip_cached(&mut self, node: NodeId) -> Result<(), StateMachineError> {
        self.transition(node, NodeState::SkippedCached, None)?;
        Ok(())
    }

    /// RUNNING -> DONE
    pub fn complete(&mut self, node: NodeId, diagnostics: Option<String>) -> Result<(), StateMachineError> {
        let record = self.transition(node, NodeState::Done, None)?;
        record.exit_code = Some(0);
        record.diagnostics = diagnostics;
        record.duration = record.started.map(|s| s.elapsed());
        Ok(())
    }

    /// RUNNING or PENDING -> FAILED
    pub fn fail(&mut self, node: NodeId, error: NodeError) -> Result<(), StateMachineError> {
        let record = self.transition(node, NodeState::Failed, Some(error.to_string()))?;
        record.exit_code = error.exit_code();
        record.duration = record.started.map(|s| s.elapsed());
        record.failure = Some(error);
        Ok(())
    }
}
