//! Run and plan reports

use crate::cache::{PlannedNode, Verdict};
use crate::graph::DependencyGraph;
use crate::journal::TransitionEvent;
use crate::records::{RecordTable, StateCounts};
use crate::types::{exit_codes, NodeState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

/// Final state of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub state: NodeState,
    /// Whether the script was started in this run
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StateCounts,
    /// Nodes in topological order
    pub nodes: Vec<NodeReport>,
    pub journal: Vec<TransitionEvent>,
}

impl RunReport {
    pub fn new(graph: &DependencyGraph, records: &RecordTable, started_at: DateTime<Utc>) -> Self {
        let nodes = graph
            .topological_order()
            .iter()
            .filter_map(|&node| records.get(node))
            .map(|r| NodeReport {
                name: r.rule.clone(),
                state: r.status,
                executed: r.executed(),
                exit_code: r.exit_code,
                error: r.failure.as_ref().map(ToString::to_string),
                diagnostics: r
                    .failure
                    .as_ref()
                    .and_then(|f| f.diagnostics().map(str::to_string))
                    .or_else(|| r.diagnostics.clone()),
                duration_ms: r.duration.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            })
            .collect();

        Self {
            started_at,
            finished_at: Utc::now(),
            counts: records.counts(),
            nodes,
            journal: records.journal().events(),
        }
    }

    /// No node ended FAILED
    pub fn succeeded(&self) -> bool {
        self.counts.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            exit_codes::SUCCESS
        } else {
            exit_codes::NODE_FAILED
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn executed_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.executed)
            .map(|n| n.name.as_str())
            .collect()
    }

    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let elapsed = self.finished_at - self.started_at;

        report.push_str("=== sweepflow Run Report ===\n\n");
        let _ = writeln!(report, "Nodes: {}", self.nodes.len());
        let _ = writeln!(report, "Done: {}", self.counts.done);
        let _ = writeln!(report, "Skipped (cached): {}", self.counts.skipped_cached);
        let _ = writeln!(report, "Failed: {}", self.counts.failed);
        let _ = writeln!(report, "Elapsed: {:.3}s", elapsed.num_milliseconds() as f64 / 1000.0);

        report.push_str("\n=== Nodes ===\n");
        for node in &self.nodes {
            let _ = write!(report, "{:<15} {}", node.state.as_str(), node.name);
            if let Some(ms) = node.duration_ms {
                let _ = write!(report, " ({ms} ms)");
            }
            report.push('\n');
            if let Some(error) = &node.error {
                let _ = writeln!(report, "    {error}");
            }
        }

        let failed: Vec<_> = self
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Failed && n.diagnostics.is_some())
            .collect();
        if !failed.is_empty() {
            report.push_str("\n=== Diagnostics ===\n");
            for node in failed {
                let _ = writeln!(report, "--- {} ---", node.name);
                if let Some(diag) = &node.diagnostics {
                    let _ = writeln!(report, "{diag}");
                }
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.succeeded() { "SUCCESS" } else { "FAILED" }
        );
        report
    }
}

/// Dry-run verdicts
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub nodes: Vec<PlannedNode>,
}

impl PlanReport {
    pub fn new(nodes: Vec<PlannedNode>) -> Self {
        Self { nodes }
    }

    pub fn to_run(&self) -> usize {
        self.nodes.iter().filter(|n| !n.verdict.is_cached()).count()
    }

    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== sweepflow Plan ===\n\n");
        let _ = writeln!(report, "Nodes: {}", self.nodes.len());
        let _ = writeln!(report, "To run: {}", self.to_run());
        let _ = writeln!(report, "Cached: {}", self.nodes.len() - self.to_run());
        report.push_str("\n=== Nodes ===\n");
        for node in &self.nodes {
            match &node.verdict {
                Verdict::Cached => {
                    let _ = writeln!(report, "{:<7} {}", "CACHED", node.name);
                }
                Verdict::Run(reason) => {
                    let _ = writeln!(report, "{:<7} {} ({reason})", "RUN", node.name);
                }
            }
        }
        report
    }
}
