//! Executor
//!
//! Turns a [`RuleInstance`] into an [`Invocation`], hands it to a
//! [`ScriptRunner`] and checks the result. Success needs exit status 0 and
//! every declared output present afterwards. There are no retries.
//!
//! Script contract:
//! - params arrive as flat `--key=value` flags (see [`flatten_params`]),
//!   followed by the instance's extra flags
//! - `SWEEPFLOW_RULE` holds the instance name, `SWEEPFLOW_PARAMS` the params
//!   as JSON
//! - parent directories of declared outputs already exist

mod args;
mod process;

pub use args::flatten_params;
pub use process::ProcessRunner;

use crate::cache::{ArtifactProbe, StampStore};
use crate::error::NodeError;
use crate::rule::RuleInstance;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Env var carrying the instance name
pub const RULE_ENV: &str = "SWEEPFLOW_RULE";
/// Env var carrying the params as JSON
pub const PARAMS_ENV: &str = "SWEEPFLOW_PARAMS";
/// Launcher element replaced by the environment name
pub const ENV_PLACEHOLDER: &str = "{env}";

/// Fully resolved command for one rule instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub rule: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    /// Declared outputs, resolved against `working_dir`
    pub outputs: Vec<PathBuf>,
}

impl Invocation {
    /// Shell-like rendering for logs and dry runs
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// What a runner observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl ScriptOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr tail followed by stdout tail, empty if both are
    #[must_use]
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr_tail.trim_end();
        let stdout = self.stdout_tail.trim_end();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (false, false) => format!("{stderr}\n--- stdout ---\n{stdout}"),
        }
    }
}

/// Capability that runs an external computation
///
/// [`ProcessRunner`] is the production implementation; tests substitute
/// runners that fabricate outputs.
#[async_trait::async_trait]
pub trait ScriptRunner: Send + Sync + fmt::Debug {
    /// Run to completion
    ///
    /// # Errors
    /// [`NodeError::Launch`] if the computation could not be started. A
    /// non-zero exit is reported through [`ScriptOutcome::exit_code`].
    async fn run(&self, invocation: &Invocation) -> Result<ScriptOutcome, NodeError>;
}

/// Result of a successful execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionSuccess {
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub working_dir: PathBuf,
    /// Prefix for instances with an environment
    pub launcher: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Executor {
    runner: Arc<dyn ScriptRunner>,
    probe: Arc<dyn ArtifactProbe>,
    stamps: Option<StampStore>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(runner: Arc<dyn ScriptRunner>, probe: Arc<dyn ArtifactProbe>, settings: ExecutorSettings) -> Self {
        Self {
            runner,
            probe,
            stamps: None,
            settings,
        }
    }

    /// Maintain completion stamps for cache-enabled instances
    #[must_use]
    pub fn with_stamps(mut self, stamps: StampStore) -> Self {
        self.stamps = Some(stamps);
        self
    }

    /// Build the command for `instance`
    #[must_use]
    pub fn invocation(&self, instance: &RuleInstance) -> Invocation {
        let mut argv: Vec<String> = Vec::new();
        if let Some(env) = &instance.env {
            let mut substituted = false;
            for part in &self.settings.launcher {
                if part.contains(ENV_PLACEHOLDER) {
                    substituted = true;
                    argv.push(part.replace(ENV_PLACEHOLDER, &env.0));
                } else {
                    argv.push(part.clone());
                }
            }
            if !substituted {
                argv.push(env.0.clone());
            }
        }
        argv.push(instance.script.program().to_string());
        argv.extend(instance.script.args().iter().cloned());
        argv.extend(flatten_params(&instance.params));
        argv.extend(instance.extra_flags.iter().cloned());

        let program = argv.remove(0);
        let params_json = serde_json::to_string(&instance.params).unwrap_or_else(|_| "{}".to_string());
        Invocation {
            rule: instance.name.clone(),
            program,
            args: argv,
            env: vec![
                (RULE_ENV.to_string(), instance.name.clone()),
                (PARAMS_ENV.to_string(), params_json),
            ],
            working_dir: self.settings.working_dir.clone(),
            outputs: instance
                .outputs
                .iter()
                .map(|o| o.path.resolve(&self.settings.working_dir))
                .collect(),
        }
    }

    /// Run `instance` and verify its outputs
    ///
    /// # Errors
    /// - [`NodeError::Launch`] if output directories or the stamp cannot be
    ///   prepared, or the runner cannot start the script
    /// - [`NodeError::NonZeroExit`] on an unsuccessful exit
    /// - [`NodeError::OutputNotProduced`] if outputs are missing after exit 0
    pub async fn execute(&self, instance: &RuleInstance) -> Result<ExecutionSuccess, NodeError> {
        let invocation = self.invocation(instance);
        self.prepare(instance, &invocation).await?;

        info!(rule = %instance.name, command = %invocation.command_line(), "launching");
        let outcome = self.runner.run(&invocation).await?;
        if !outcome.success() {
            return Err(NodeError::NonZeroExit {
                code: outcome.exit_code,
                diagnostics: outcome.diagnostics(),
            });
        }

        let missing: Vec<_> = instance
            .outputs
            .iter()
            .filter(|o| !self.probe.is_present(o))
            .map(|o| o.path.clone())
            .collect();
        if !missing.is_empty() {
            return Err(NodeError::OutputNotProduced { missing });
        }

        if let (Some(stamps), true) = (&self.stamps, instance.cache) {
            if let Err(e) = stamps.record(instance) {
                warn!(rule = %instance.name, error = %e, "failed to write completion stamp");
            }
        }

        let diagnostics = outcome.diagnostics();
        Ok(ExecutionSuccess {
            diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
        })
    }

    async fn prepare(&self, instance: &RuleInstance, invocation: &Invocation) -> Result<(), NodeError> {
        let launch_error = |message: String| NodeError::Launch {
            program: invocation.program.clone(),
            message,
        };

        for output in &invocation.outputs {
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    launch_error(format!("cannot create '{}': {e}", parent.display()))
                })?;
            }
        }

        if let Some(stamps) = &self.stamps {
            stamps
                .invalidate(instance)
                .map_err(|e| launch_error(format!("cannot clear completion stamp: {e}")))?;
        }
        Ok(())
    }
}
