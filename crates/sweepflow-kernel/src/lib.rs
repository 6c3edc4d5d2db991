//! sweepflow Kernel
//!
//! Declarative rule orchestration for parameterized simulation pipelines.
//!
//! Data flow:
//! 1. **Expansion**: rule definitions plus sweep specs render into rule instances
//! 2. **Linking**: instances are joined into a DAG by matching inputs to outputs
//! 3. **Scheduling**: ready nodes are checked against the cache oracle and either
//!    skipped or executed, at most `max_concurrency` at a time
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sweepflow_kernel::prelude::*;
//!
//! let pipeline = Pipeline::load(Path::new("pipeline.yaml"))?;
//! let engine = Engine::new(pipeline.settings.clone());
//! let report = engine.run(&pipeline.rules).await?;
//! println!("{}", report.generate_text());
//! std::process::exit(report.exit_code());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod journal;
pub mod logging;
pub mod records;
pub mod report;
pub mod rule;
pub mod scheduler;
pub mod state_machine;
pub mod sweep;
pub mod types;

pub use error::*;
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::cache::{ArtifactProbe, CacheOracle, FsProbe, RunReason, StampStore, Verdict};
    pub use crate::config::{EngineSettings, Pipeline, PipelineFormat, RuleEntry};
    pub use crate::engine::Engine;
    pub use crate::error::{BuildError, ConfigError, KernelError, NodeError, SweepError};
    pub use crate::executor::{
        ExecutionSuccess, Executor, Invocation, ProcessRunner, ScriptOutcome, ScriptRunner,
    };
    pub use crate::graph::DependencyGraph;
    pub use crate::journal::{RunJournal, TransitionEvent};
    pub use crate::report::{NodeReport, PlanReport, RunReport};
    pub use crate::rule::{ArtifactDecl, Params, RuleDefinition, RuleInstance, ScriptRef};
    pub use crate::scheduler::{cancellation, CancelHandle, CancelSignal, Scheduler};
    pub use crate::sweep::{expand, MigrationSweep, ParameterSweepSpec, SweepAxis};
    pub use crate::types::{exit_codes, EnvRef, NodeId, NodeState};
    pub use sweepflow_artifact::{Artifact, ArtifactKind, ArtifactPath};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
