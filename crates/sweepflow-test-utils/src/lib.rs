//! Testing utilities for the sweepflow workspace
//!
//! Shared fixtures: a scratch working directory and a scripted runner that
//! fabricates outputs instead of launching processes.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sweepflow_kernel::config::{EngineSettings, RuleEntry};
use sweepflow_kernel::engine::Engine;
use sweepflow_kernel::executor::{Invocation, ScriptOutcome, ScriptRunner};
use sweepflow_kernel::rule::{ArtifactDecl, RuleDefinition, ScriptRef};
use sweepflow_kernel::NodeError;
use tempfile::TempDir;

/// File written into fabricated directory outputs
pub const PAYLOAD_FILE: &str = "payload";

/// Scratch working directory, removed on drop
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a file (and its parents) relative to the workspace
    pub fn touch(&self, rel: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, "fixture").unwrap();
        path
    }

    /// Create a non-empty directory relative to the workspace
    pub fn fill_dir(&self, rel: &str) -> PathBuf {
        let path = self.path().join(rel);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(PAYLOAD_FILE), "fixture").unwrap();
        path
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path().join(rel).exists()
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings::new()
            .with_working_dir(self.path())
            .with_max_concurrency(4)
    }

    /// Engine rooted here, running scripts through `runner`
    pub fn engine(&self, runner: Arc<ScriptedRunner>) -> Engine {
        self.engine_with(self.settings(), runner)
    }

    pub fn engine_with(&self, settings: EngineSettings, runner: Arc<ScriptedRunner>) -> Engine {
        Engine::new(settings).with_runner(runner)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// What a scripted rule does when run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Exit 0 after creating every declared output
    #[default]
    Produce,
    /// Exit with this code, creating nothing
    ExitWith(i32),
    /// Exit 0 without creating outputs
    SkipOutputs,
    /// Panic inside the runner
    Panic,
}

/// In-process [`ScriptRunner`]
///
/// Outputs whose file name ends in `.vice` or has no extension are created
/// as directories holding [`PAYLOAD_FILE`]; everything else as a file.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every run for `delay` so overlapping runs are observable
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_behavior(self, rule: &str, behavior: Behavior) -> Self {
        self.set_behavior(rule, behavior);
        self
    }

    pub fn set_behavior(&self, rule: &str, behavior: Behavior) {
        self.behaviors.lock().insert(rule.to_string(), behavior);
    }

    /// Rule names in launch order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|inv| inv.rule.clone()).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, rule: &str) -> usize {
        self.calls.lock().iter().filter(|inv| inv.rule == rule).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Highest number of runs observed at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior(&self, rule: &str) -> Behavior {
        self.behaviors.lock().get(rule).copied().unwrap_or_default()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(runner: &'a ScriptedRunner) -> Self {
        let now = runner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        runner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(&runner.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn is_directory_output(path: &Path) -> bool {
    match path.extension() {
        None => true,
        Some(ext) => ext == "vice",
    }
}

fn produce(invocation: &Invocation) -> std::io::Result<()> {
    for output in &invocation.outputs {
        if is_directory_output(output) {
            std::fs::create_dir_all(output)?;
            std::fs::write(output.join(PAYLOAD_FILE), &invocation.rule)?;
        } else {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, &invocation.rule)?;
        }
    }
    Ok(())
}

#[async_trait]
impl ScriptRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ScriptOutcome, NodeError> {
        let _guard = InFlight::enter(self);
        self.calls.lock().push(invocation.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rule = &invocation.rule;
        match self.behavior(rule) {
            Behavior::Produce => {
                produce(invocation).map_err(|e| NodeError::Launch {
                    program: invocation.program.clone(),
                    message: e.to_string(),
                })?;
                Ok(ScriptOutcome {
                    exit_code: Some(0),
                    stdout_tail: format!("{rule} done"),
                    stderr_tail: String::new(),
                })
            }
            Behavior::ExitWith(code) => Ok(ScriptOutcome {
                exit_code: Some(code),
                stdout_tail: String::new(),
                stderr_tail: format!("{rule} exploded"),
            }),
            Behavior::SkipOutputs => Ok(ScriptOutcome {
                exit_code: Some(0),
                ..ScriptOutcome::default()
            }),
            Behavior::Panic => panic!("scripted panic in {rule}"),
        }
    }
}

pub fn file(path: &str) -> ArtifactDecl {
    ArtifactDecl::file(path)
}

pub fn dir(path: &str) -> ArtifactDecl {
    ArtifactDecl::directory(path)
}

/// Rule definition running a placeholder script
pub fn rule(name: &str) -> RuleDefinition {
    RuleDefinition::new(name, ScriptRef::new("run", [name]))
}

/// Rule `name` reading `inputs` and writing one file output
pub fn chain_rule(name: &str, inputs: &[&str], output: &str) -> RuleEntry {
    let def = inputs
        .iter()
        .fold(rule(name), |def, input| def.with_input(file(input)))
        .with_output(file(output));
    RuleEntry::plain(def)
}
