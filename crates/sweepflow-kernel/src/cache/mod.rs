//! Cache / staleness oracle
//!
//! Decides per rule instance whether its outputs can be reused. The rule is
//! coarse and existence based:
//! - `cache = false` always runs
//! - `cache = true` is skipped iff every producer ended SKIPPED_CACHED in this
//!   run and every declared output is present
//!
//! With a [`StampStore`] attached, a skip additionally needs a current
//! completion stamp.

mod stamp;

pub use stamp::StampStore;

use crate::error::BuildError;
use crate::graph::DependencyGraph;
use crate::rule::RuleInstance;
use crate::types::{NodeId, NodeState};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sweepflow_artifact::{Artifact, ArtifactPath, Presence};
use tracing::debug;

/// Read-only view of artifact state
///
/// The oracle, the preflight and the executor's output check all go through
/// this trait so tests can substitute an in-memory filesystem.
pub trait ArtifactProbe: Send + Sync + fmt::Debug {
    fn presence(&self, artifact: &Artifact) -> Presence;

    fn is_present(&self, artifact: &Artifact) -> bool {
        self.presence(artifact).is_present()
    }
}

/// Probe the real filesystem, resolving relative paths against `root`
#[derive(Debug, Clone)]
pub struct FsProbe {
    root: PathBuf,
}

impl FsProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactProbe for FsProbe {
    fn presence(&self, artifact: &Artifact) -> Presence {
        artifact.probe(&self.root)
    }
}

/// Why an instance must execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RunReason {
    /// `cache = false`
    CacheDisabled,
    /// A producer executed (or is predicted to) in this run
    UpstreamChanged(String),
    /// A declared output is absent
    OutputMissing(ArtifactPath),
    /// No completion stamp, or one for a different declaration
    StampStale,
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheDisabled => f.write_str("cache disabled"),
            Self::UpstreamChanged(rule) => write!(f, "upstream '{rule}' changed"),
            Self::OutputMissing(path) => write!(f, "output '{path}' missing"),
            Self::StampStale => f.write_str("completion stamp missing or stale"),
        }
    }
}

/// Oracle decision for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Cached,
    Run(RunReason),
}

impl Verdict {
    #[inline]
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => f.write_str("cached"),
            Self::Run(reason) => write!(f, "run ({reason})"),
        }
    }
}

/// Predicted verdict for one node
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNode {
    pub node: NodeId,
    pub name: String,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Decides skip-or-run for rule instances
#[derive(Debug, Clone)]
pub struct CacheOracle {
    probe: Arc<dyn ArtifactProbe>,
    stamps: Option<StampStore>,
}

impl CacheOracle {
    pub fn new(probe: Arc<dyn ArtifactProbe>) -> Self {
        Self { probe, stamps: None }
    }

    /// Also require a current completion stamp
    #[must_use]
    pub fn with_stamps(mut self, stamps: StampStore) -> Self {
        self.stamps = Some(stamps);
        self
    }

    #[must_use]
    pub fn probe(&self) -> &Arc<dyn ArtifactProbe> {
        &self.probe
    }

    #[must_use]
    pub fn stamps(&self) -> Option<&StampStore> {
        self.stamps.as_ref()
    }

    /// Verdict for `instance` given the final states of its producers
    #[must_use]
    pub fn verdict(&self, instance: &RuleInstance, producers: &[(&str, NodeState)]) -> Verdict {
        let verdict = self.decide(instance, producers);
        debug!(rule = %instance.name, %verdict, "cache verdict");
        verdict
    }

    fn decide(&self, instance: &RuleInstance, producers: &[(&str, NodeState)]) -> Verdict {
        if !instance.cache {
            return Verdict::Run(RunReason::CacheDisabled);
        }
        if let Some((name, _)) = producers
            .iter()
            .find(|(_, state)| *state != NodeState::SkippedCached)
        {
            return Verdict::Run(RunReason::UpstreamChanged((*name).to_string()));
        }
        if let Some(missing) = instance.outputs.iter().find(|o| !self.probe.is_present(o)) {
            return Verdict::Run(RunReason::OutputMissing(missing.path.clone()));
        }
        if let Some(stamps) = &self.stamps {
            if !stamps.is_current(instance) {
                return Verdict::Run(RunReason::StampStale);
            }
        }
        Verdict::Cached
    }

    /// Check that every external input exists before anything runs
    ///
    /// # Errors
    /// [`BuildError::DanglingInput`] for the first missing input, in
    /// topological order
    pub fn preflight(&self, graph: &DependencyGraph) -> Result<(), BuildError> {
        for &node in graph.topological_order() {
            if let Some(missing) = graph
                .external_inputs(node)
                .iter()
                .find(|input| !self.probe.is_present(input))
            {
                return Err(BuildError::DanglingInput {
                    rule: graph.instance(node).name.clone(),
                    input: missing.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Predict verdicts for the whole graph without executing anything
    ///
    /// A node predicted to run is assumed to end DONE, so its consumers are
    /// predicted to run as well.
    #[must_use]
    pub fn plan(&self, graph: &DependencyGraph) -> Vec<PlannedNode> {
        let mut predicted = vec![NodeState::Pending; graph.len()];
        let mut plan = Vec::with_capacity(graph.len());
        for &node in graph.topological_order() {
            let instance = graph.instance(node);
            let producers: Vec<(&str, NodeState)> = graph
                .producers(node)
                .into_iter()
                .map(|p| (graph.instance(p).name.as_str(), predicted[p.index()]))
                .collect();
            let verdict = self.decide(instance, &producers);
            predicted[node.index()] = if verdict.is_cached() {
                NodeState::SkippedCached
            } else {
                NodeState::Done
            };
            plan.push(PlannedNode {
                node,
                name: instance.name.clone(),
                verdict,
            });
        }
        plan
    }
}
