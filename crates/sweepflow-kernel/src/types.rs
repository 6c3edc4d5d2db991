use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a rule instance in the dependency graph
///
/// Ids are dense (`0..n`) and double as indices into the record arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Arena index
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a rule instance within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Pending,
    Running,
    Done,
    Failed,
    SkippedCached,
}

impl NodeState {
    /// DONE, FAILED and SKIPPED_CACHED are final for the run
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::SkippedCached)
    }

    /// Whether consumers may proceed past this node
    #[inline]
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Done | Self::SkippedCached)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::SkippedCached => "SKIPPED_CACHED",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named execution environment (a conda environment, typically)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvRef(pub String);

impl fmt::Display for EnvRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exit statuses of the `sweepflow` binary
pub mod exit_codes {
    /// Every node DONE or SKIPPED_CACHED
    pub const SUCCESS: i32 = 0;
    /// At least one node FAILED
    pub const NODE_FAILED: i32 = 1;
    /// Graph construction failed before anything ran
    pub const BUILD_ERROR: i32 = 2;
    /// Unreadable or invalid configuration
    pub const CONFIG_ERROR: i32 = 3;
}
