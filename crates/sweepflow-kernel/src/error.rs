//! Error types for the sweepflow kernel
//!
//! Errors fall in two families:
//! - build-time errors ([`SweepError`], [`BuildError`], [`ConfigError`]) abort
//!   the run before any script executes
//! - node errors ([`NodeError`]) fail one rule instance and its consumers
//!   while independent parts of the graph keep going

use crate::types::{exit_codes, NodeId, NodeState};
use std::fmt;
use std::io;
use std::path::PathBuf;
use sweepflow_artifact::{ArtifactPath, PathError};

/// Top-level kernel error
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Pipeline file could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template expansion failed
    #[error("sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// Dependency graph could not be built
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Record table rejected a transition
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Journal could not be written or verified
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

impl KernelError {
    /// Whether the error happened while building the graph
    #[inline]
    #[must_use]
    pub fn is_build_time(&self) -> bool {
        matches!(self, Self::Sweep(_) | Self::Build(_))
    }

    /// Process exit status for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_build_time() {
            exit_codes::BUILD_ERROR
        } else {
            exit_codes::CONFIG_ERROR
        }
    }
}

/// What two declarations collided on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Two instances share a name
    RuleName,
    /// Two instances write the same path
    OutputPath,
}

impl fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RuleName => f.write_str("rule name"),
            Self::OutputPath => f.write_str("output path"),
        }
    }
}

/// Template expansion errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweepError {
    /// Two axis combinations derive the same instance name
    #[error("sweep of '{template}' derives '{name}' from both [{first}] and [{second}]")]
    NameCollision {
        template: String,
        name: String,
        first: String,
        second: String,
    },

    /// Co-varied axes of unequal length
    #[error("co-varied group '{group}': axis '{axis}' has {found} values, expected {expected}")]
    RaggedGroup {
        group: String,
        axis: String,
        expected: usize,
        found: usize,
    },

    /// Placeholder refers to no axis
    #[error("placeholder '{{{placeholder}}}' in '{text}' names no sweep axis")]
    UnknownPlaceholder { placeholder: String, text: String },

    /// `{` without a closing `}`
    #[error("unterminated placeholder in '{0}'")]
    UnterminatedPlaceholder(String),

    /// Axis name used twice
    #[error("sweep axis '{0}' declared more than once")]
    DuplicateAxis(String),

    /// Rendered path cannot be parsed
    #[error("rule '{rule}' renders an invalid path: {source}")]
    InvalidPath {
        rule: String,
        #[source]
        source: PathError,
    },
}

/// Graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Duplicate rule name or output path (single-writer violation)
    #[error("{kind} '{name}' is declared by both '{first}' and '{second}'")]
    NameCollision {
        kind: CollisionKind,
        name: String,
        first: String,
        second: String,
    },

    /// Producer/consumer relation loops back on itself
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Input neither produced by a rule nor present on disk
    #[error("rule '{rule}' needs '{input}', which no rule produces and which does not exist")]
    DanglingInput { rule: String, input: ArtifactPath },
}

/// Failure of a single rule instance
///
/// Kept `Clone` so the record table can hold it next to the node's status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Script exited unsuccessfully
    #[error("script exited with {}", describe_exit(.code))]
    NonZeroExit {
        code: Option<i32>,
        diagnostics: String,
    },

    /// Script exited 0 but declared outputs are missing
    #[error("script exited 0 but did not produce: {}", join_paths(.missing))]
    OutputNotProduced { missing: Vec<ArtifactPath> },

    /// Process could not be started
    #[error("failed to launch '{program}': {message}")]
    Launch { program: String, message: String },

    /// Never executed because a producer failed
    #[error("not run: upstream rule '{upstream}' failed")]
    UpstreamFailed { upstream: String },

    /// Never executed because the run was cancelled
    #[error("not run: cancelled before dispatch")]
    Cancelled,

    /// Worker task panicked
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

impl NodeError {
    /// Whether the rule's script was actually started
    #[inline]
    #[must_use]
    pub fn executed(&self) -> bool {
        matches!(
            self,
            Self::NonZeroExit { .. } | Self::OutputNotProduced { .. } | Self::WorkerPanicked(_)
        )
    }

    /// Exit status to report, if the process produced one
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => *code,
            Self::OutputNotProduced { .. } => Some(0),
            _ => None,
        }
    }

    /// Captured stderr/stdout tail, if any
    #[must_use]
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::NonZeroExit { diagnostics, .. } if !diagnostics.is_empty() => {
                Some(diagnostics.as_str())
            }
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn join_paths(paths: &[ArtifactPath]) -> String {
    paths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pipeline configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File unreadable
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// YAML syntax or schema error
    #[error("invalid YAML in '{}': {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// TOML syntax or schema error
    #[error("invalid TOML in '{}': {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Unknown file extension
    #[error("unsupported pipeline format '{0}' (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    /// Rule fails a declaration check
    #[error("rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Engine setting out of range
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Record table transition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the state machine
    #[error("illegal transition {from} -> {to} for node {node}")]
    IllegalTransition {
        node: NodeId,
        from: NodeState,
        to: NodeState,
    },

    /// Id outside the arena
    #[error("node {0} is not in the record table")]
    UnknownNode(NodeId),
}

/// Transition journal errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Hash chain broken at an entry
    #[error("journal integrity violation at entry {seq}")]
    IntegrityViolation { seq: u64 },

    /// Journal file unreadable or unwritable
    #[error("journal I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed journal line
    #[error("malformed journal line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
