//! Engine facade
//!
//! Wires expansion, graph construction, the cache oracle, the executor and
//! the scheduler together for one run.

use crate::cache::{ArtifactProbe, CacheOracle, FsProbe, StampStore};
use crate::config::{EngineSettings, RuleEntry};
use crate::error::KernelError;
use crate::executor::{Executor, ExecutorSettings, ProcessRunner, ScriptRunner};
use crate::graph::DependencyGraph;
use crate::journal::RunJournal;
use crate::report::{PlanReport, RunReport};
use crate::rule::RuleInstance;
use crate::scheduler::{cancellation, CancelHandle, CancelSignal, Scheduler};
use crate::sweep;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Runs rule declarations end to end
///
/// Owns the script runner, the artifact probe and the cancellation pair, so
/// one engine can plan and run the same pipeline repeatedly.
pub struct Engine {
    settings: EngineSettings,
    runner: Arc<dyn ScriptRunner>,
    probe: Arc<dyn ArtifactProbe>,
    cancel_handle: CancelHandle,
    cancel_signal: CancelSignal,
}

impl Engine {
    /// Engine running real processes against the filesystem
    pub fn new(settings: EngineSettings) -> Self {
        let (cancel_handle, cancel_signal) = cancellation();
        Self {
            runner: Arc::new(ProcessRunner::new(settings.diagnostic_tail_bytes)),
            probe: Arc::new(FsProbe::new(settings.working_dir.clone())),
            settings,
            cancel_handle,
            cancel_signal,
        }
    }

    /// Replace the script runner
    pub fn with_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replace the artifact probe
    pub fn with_probe(mut self, probe: Arc<dyn ArtifactProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Settings the engine was built with
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Handle that cancels runs started by this engine
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Render every rule entry into instances, in declaration order
    pub fn expand(&self, rules: &[RuleEntry]) -> Result<Vec<RuleInstance>, KernelError> {
        let mut instances = Vec::new();
        for entry in rules {
            entry.definition.validate()?;
            match &entry.sweep {
                Some(spec) => instances.extend(sweep::expand(&entry.definition, spec)?),
                None => instances.push(entry.definition.instantiate()?),
            }
        }
        Ok(instances)
    }

    /// Expand and link
    pub fn build(&self, rules: &[RuleEntry]) -> Result<DependencyGraph, KernelError> {
        let graph = DependencyGraph::build(self.expand(rules)?)?;
        info!(nodes = graph.len(), edges = graph.edge_count(), "graph built");
        Ok(graph)
    }

    fn stamps(&self) -> Option<StampStore> {
        self.settings
            .stamps
            .then(|| StampStore::new(self.settings.resolved_state_dir()))
    }

    /// Cache oracle over this engine's probe, with stamps when enabled
    pub fn oracle(&self) -> CacheOracle {
        let oracle = CacheOracle::new(Arc::clone(&self.probe));
        match self.stamps() {
            Some(stamps) => oracle.with_stamps(stamps),
            None => oracle,
        }
    }

    /// Executor for this engine's runner, working directory and launcher
    pub fn executor(&self) -> Executor {
        let executor = Executor::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.probe),
            ExecutorSettings {
                working_dir: self.settings.working_dir.clone(),
                launcher: self.settings.launcher.clone(),
            },
        );
        match self.stamps() {
            Some(stamps) => executor.with_stamps(stamps),
            None => executor,
        }
    }

    /// Dry run: predicted verdicts in topological order
    pub fn plan(&self, rules: &[RuleEntry]) -> Result<PlanReport, KernelError> {
        self.plan_graph(&self.build(rules)?)
    }

    /// Dry run over an already built graph
    pub fn plan_graph(&self, graph: &DependencyGraph) -> Result<PlanReport, KernelError> {
        let oracle = self.oracle();
        oracle.preflight(graph)?;
        Ok(PlanReport::new(oracle.plan(graph)))
    }

    /// Build and execute
    pub async fn run(&self, rules: &[RuleEntry]) -> Result<RunReport, KernelError> {
        let graph = self.build(rules)?;
        self.run_graph(graph).await
    }

    /// Execute an already built graph
    ///
    /// Fails before anything executes if settings are invalid or an external
    /// input is missing.
    pub async fn run_graph(&self, graph: DependencyGraph) -> Result<RunReport, KernelError> {
        self.settings.validate()?;
        let oracle = self.oracle();
        oracle.preflight(&graph)?;

        let started_at = Utc::now();
        let graph = Arc::new(graph);
        let journal = Arc::new(RunJournal::new());
        let scheduler = Scheduler::new(
            Arc::new(self.executor()),
            Arc::new(oracle),
            self.settings.max_concurrency,
        )
        .with_cancel(self.cancel_signal.clone());

        let records = scheduler.run(Arc::clone(&graph), journal).await?;
        Ok(RunReport::new(&graph, &records, started_at))
    }
}
