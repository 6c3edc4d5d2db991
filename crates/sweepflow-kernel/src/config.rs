//! Pipeline files and engine settings
//!
//! A pipeline file is YAML (`.yaml`, `.yml`) or TOML (`.toml`):
//!
//! ```yaml
//! settings:
//!   max_concurrency: 4
//! rules:
//!   - name: "gaussian/{sfh}/{dtd_name}"
//!     output: "data/migration/gaussian/{sfh}/{dtd_name}.vice/"
//!     script: python scripts/migration.py
//!     conda: vice
//!     cache: true
//!     params: { evolution: "{sfh}", RIa: "{dtd}" }
//!     sweep:
//!       axes:
//!         - { name: sfh, values: [insideout, lateburst] }
//!         - { name: dtd, values: [powerlaw, plateau], group: dtd }
//!         - { name: dtd_name, values: [powerlaw_slope11, plateau_width300_slope11], group: dtd }
//! ```

use crate::error::ConfigError;
use crate::rule::RuleDefinition;
use crate::sweep::ParameterSweepSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bytes of stdout/stderr kept for diagnostics
pub const DEFAULT_TAIL_BYTES: usize = 4096;
/// Directory for engine state, relative to the working directory
pub const DEFAULT_STATE_DIR: &str = ".sweepflow";

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_launcher() -> Vec<String> {
    ["conda", "run", "--no-capture-output", "-n", "{env}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tail_bytes() -> usize {
    DEFAULT_TAIL_BYTES
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum scripts running at once
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Directory scripts run in and relative artifact paths resolve against
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Engine state (completion stamps); relative to `working_dir`
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Require completion stamps for cache hits
    #[serde(default)]
    pub stamps: bool,
    /// Prefix for rules with an environment; `{env}` is replaced by its name
    #[serde(default = "default_launcher")]
    pub launcher: Vec<String>,
    /// Bytes of stdout and stderr kept per script
    #[serde(default = "default_tail_bytes")]
    pub diagnostic_tail_bytes: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            working_dir: default_working_dir(),
            state_dir: default_state_dir(),
            stamps: false,
            launcher: default_launcher(),
            diagnostic_tail_bytes: default_tail_bytes(),
        }
    }
}

impl EngineSettings {
    /// Defaults: one worker per available core
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker bound
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set the directory scripts run in
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set where completion stamps live
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Require completion stamps for cache hits
    pub fn with_stamps(mut self, stamps: bool) -> Self {
        self.stamps = stamps;
        self
    }

    /// Set the environment launcher prefix
    pub fn with_launcher(mut self, launcher: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    /// Set how much script output is kept for diagnostics
    pub fn with_diagnostic_tail_bytes(mut self, bytes: usize) -> Self {
        self.diagnostic_tail_bytes = bytes;
        self
    }

    /// State directory resolved against the working directory
    pub fn resolved_state_dir(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.working_dir.join(&self.state_dir)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.launcher.is_empty() {
            return Err(ConfigError::InvalidSetting("launcher must not be empty".into()));
        }
        Ok(())
    }
}

/// One rule entry: a definition plus an optional sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    #[serde(flatten)]
    pub definition: RuleDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<ParameterSweepSpec>,
}

impl RuleEntry {
    pub fn plain(definition: RuleDefinition) -> Self {
        Self {
            definition,
            sweep: None,
        }
    }

    pub fn swept(definition: RuleDefinition, sweep: ParameterSweepSpec) -> Self {
        Self {
            definition,
            sweep: Some(sweep),
        }
    }
}

/// Parsed pipeline file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFormat {
    Yaml,
    Toml,
}

impl PipelineFormat {
    /// Format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

impl Pipeline {
    /// Load and validate a pipeline file
    ///
    /// A relative `working_dir` is taken relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = PipelineFormat::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut pipeline = Self::parse(&text, format, path)?;

        if pipeline.settings.working_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            pipeline.settings.working_dir = base.join(&pipeline.settings.working_dir);
        }
        Ok(pipeline)
    }

    /// Parse pipeline text; `origin` is only used in error messages
    pub fn parse(text: &str, format: PipelineFormat, origin: &Path) -> Result<Self, ConfigError> {
        let pipeline: Self = match format {
            PipelineFormat::Yaml => serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
                path: origin.to_path_buf(),
                source,
            })?,
            PipelineFormat::Toml => toml::from_str(text).map_err(|source| ConfigError::Toml {
                path: origin.to_path_buf(),
                source,
            })?,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        for entry in &self.rules {
            entry.definition.validate()?;
        }
        Ok(())
    }
}
