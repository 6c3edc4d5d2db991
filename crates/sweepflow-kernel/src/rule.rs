//! Rule declarations and concrete rule instances
//!
//! A [`RuleDefinition`] is what a pipeline file declares. Its strings may carry
//! `{axis}` placeholders, so artifact paths stay unparsed until a
//! [`Binding`] is applied. Rendering produces a [`RuleInstance`] whose
//! artifacts are concrete.

use crate::error::{ConfigError, SweepError};
use crate::sweep::{render_str, render_value, Binding};
use crate::types::EnvRef;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use sweepflow_artifact::{Artifact, ArtifactKind, ArtifactPath};

/// Parameter dictionary, declaration order preserved
pub type Params = IndexMap<String, serde_json::Value>;

/// Command that implements a rule: program plus leading arguments
///
/// Declared either as a command line (`"python -m sim"`, split on
/// whitespace) or as an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ScriptDecl", into = "Vec<String>")]
pub struct ScriptRef {
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptDecl {
    Line(String),
    Argv(Vec<String>),
}

impl TryFrom<ScriptDecl> for ScriptRef {
    type Error = String;

    fn try_from(decl: ScriptDecl) -> Result<Self, Self::Error> {
        let argv = match decl {
            ScriptDecl::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            ScriptDecl::Argv(argv) => argv,
        };
        Self::from_argv(argv).ok_or_else(|| "script must name a program".to_string())
    }
}

impl From<ScriptRef> for Vec<String> {
    fn from(script: ScriptRef) -> Self {
        std::iter::once(script.program).chain(script.args).collect()
    }
}

impl ScriptRef {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace; `None` if it is blank
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        Self::from_argv(line.split_whitespace().map(str::to_string).collect())
    }

    fn from_argv(mut argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return None;
        }
        let program = argv.remove(0);
        Some(Self { program, args: argv })
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[inline]
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn render(&self, binding: &Binding) -> Result<Self, SweepError> {
        Ok(Self {
            program: render_str(&self.program, binding)?,
            args: self
                .args
                .iter()
                .map(|arg| render_str(arg, binding))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Artifact as declared, before placeholders are rendered
///
/// The short form is a plain string, where a trailing `/` marks a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ArtifactDeclRepr")]
pub struct ArtifactDecl {
    pub path: String,
    pub kind: ArtifactKind,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactDeclRepr {
    Short(String),
    Full {
        path: String,
        #[serde(default)]
        kind: ArtifactKind,
    },
}

impl From<ArtifactDeclRepr> for ArtifactDecl {
    fn from(repr: ArtifactDeclRepr) -> Self {
        match repr {
            ArtifactDeclRepr::Short(raw) => match raw.strip_suffix('/') {
                Some(dir) => Self::directory(dir),
                None => Self::file(raw),
            },
            ArtifactDeclRepr::Full { path, kind } => Self { path, kind },
        }
    }
}

impl ArtifactDecl {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::Directory,
        }
    }

    fn render(&self, binding: &Binding, rule: &str) -> Result<Artifact, SweepError> {
        let raw = render_str(&self.path, binding)?;
        Self { path: raw, kind: self.kind }.concrete(rule)
    }

    fn concrete(&self, rule: &str) -> Result<Artifact, SweepError> {
        let path = ArtifactPath::parse(&self.path).map_err(|source| SweepError::InvalidPath {
            rule: rule.to_string(),
            source,
        })?;
        Ok(Artifact::new(path, self.kind))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<ArtifactDecl>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(ArtifactDecl),
        Many(Vec<ArtifactDecl>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(decl) => vec![decl],
        OneOrMany::Many(decls) => decls,
    })
}

/// Declared rule, possibly a sweep template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(
        default,
        rename = "input",
        alias = "inputs",
        deserialize_with = "one_or_many"
    )]
    pub inputs: Vec<ArtifactDecl>,
    #[serde(rename = "output", alias = "outputs", deserialize_with = "one_or_many")]
    pub outputs: Vec<ArtifactDecl>,
    #[serde(default)]
    pub params: Params,
    /// Environment name handed to the launcher
    #[serde(default, rename = "conda", alias = "env")]
    pub env: Option<String>,
    /// Skip execution when outputs already exist
    #[serde(default)]
    pub cache: bool,
    pub script: ScriptRef,
    /// Verbatim arguments appended after the param flags
    #[serde(default, rename = "flags")]
    pub extra_flags: Vec<String>,
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>, script: ScriptRef) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Params::new(),
            env: None,
            cache: false,
            script,
            extra_flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: ArtifactDecl) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: ArtifactDecl) -> Self {
        self.outputs.push(output);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    /// Declaration checks that do not depend on other rules
    ///
    /// # Errors
    /// [`ConfigError::InvalidRule`] for a blank name or a rule with no outputs
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            rule: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.outputs.is_empty() {
            return Err(invalid("at least one output is required"));
        }
        if self.inputs.iter().chain(&self.outputs).any(|a| a.path.trim().is_empty()) {
            return Err(invalid("artifact paths must not be empty"));
        }
        Ok(())
    }

    /// Render every placeholder against `binding`
    ///
    /// # Errors
    /// [`SweepError`] if a placeholder is unbound or a path is invalid
    pub fn render(&self, binding: &Binding) -> Result<RuleInstance, SweepError> {
        let name = render_str(&self.name, binding)?;
        let inputs = self
            .inputs
            .iter()
            .map(|decl| decl.render(binding, &name))
            .collect::<Result<_, _>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|decl| decl.render(binding, &name))
            .collect::<Result<_, _>>()?;

        let mut params = Params::with_capacity(self.params.len());
        for (key, value) in &self.params {
            params.insert(key.clone(), render_value(value, binding)?);
        }

        Ok(RuleInstance {
            template: self.name.clone(),
            binding: binding.clone(),
            inputs,
            outputs,
            params,
            env: self
                .env
                .as_deref()
                .map(|env| render_str(env, binding))
                .transpose()?
                .map(EnvRef),
            cache: self.cache,
            script: self.script.render(binding)?,
            extra_flags: self
                .extra_flags
                .iter()
                .map(|flag| render_str(flag, binding))
                .collect::<Result<_, _>>()?,
            name,
        })
    }

    /// Concrete instance of a rule without a sweep
    ///
    /// Nothing is rendered: braces in names, params, script arguments and
    /// flags are kept verbatim.
    ///
    /// # Errors
    /// [`SweepError::InvalidPath`] if an artifact path is invalid
    pub fn instantiate(&self) -> Result<RuleInstance, SweepError> {
        let inputs = self
            .inputs
            .iter()
            .map(|decl| decl.concrete(&self.name))
            .collect::<Result<_, _>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|decl| decl.concrete(&self.name))
            .collect::<Result<_, _>>()?;

        Ok(RuleInstance {
            name: self.name.clone(),
            template: self.name.clone(),
            binding: Binding::new(),
            inputs,
            outputs,
            params: self.params.clone(),
            env: self.env.clone().map(EnvRef),
            cache: self.cache,
            script: self.script.clone(),
            extra_flags: self.extra_flags.clone(),
        })
    }
}

/// Rule with all placeholders rendered and paths concretized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleInstance {
    pub name: String,
    /// Name of the declaration this instance was rendered from
    pub template: String,
    #[serde(skip_serializing_if = "Binding::is_empty")]
    pub binding: Binding,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub params: Params,
    pub env: Option<EnvRef>,
    pub cache: bool,
    pub script: ScriptRef,
    pub extra_flags: Vec<String>,
}

impl fmt::Display for RuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
