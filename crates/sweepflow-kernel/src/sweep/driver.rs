//! Migration sweep driver
//!
//! Batch mode for the chemical-evolution grid: evolution models crossed with
//! co-varied (DTD kind, DTD parameters, name fragment) triples. Every
//! combination runs the migration script once, writing
//! `<output_root>/<migration>/<evolution>/<dtd_name>.vice`.

use super::{escape, expand, ParameterSweepSpec, SweepAxis};
use crate::error::SweepError;
use crate::rule::{ArtifactDecl, RuleDefinition, RuleInstance, ScriptRef};
use serde_json::Value;

/// Radial migration model used when none is given
pub const DEFAULT_MIGRATION: &str = "gaussian";
/// Directory the `.vice` outputs are written under
pub const DEFAULT_OUTPUT_ROOT: &str = "data/migration";
/// Star particles per zone per timestep
pub const DEFAULT_NSTARS: u64 = 2;
/// Minimum SN Ia delay time in Gyr
pub const DEFAULT_MINIMUM_DELAY: f64 = 0.04;

const DTD_GROUP: &str = "dtd";

/// Parameters of one migration sweep
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSweep {
    pub script: ScriptRef,
    pub migration: String,
    pub nstars: u64,
    pub minimum_delay: f64,
    pub evolutions: Vec<String>,
    /// DTD kinds, parallel to `dtd_params` and `dtd_names`
    pub dtd_kinds: Vec<String>,
    pub dtd_params: Vec<String>,
    pub dtd_names: Vec<String>,
    pub output_root: String,
    pub env: Option<String>,
    /// Pass `-f` so existing outputs are overwritten
    pub force: bool,
    pub cache: bool,
}

impl MigrationSweep {
    pub fn new(script: ScriptRef) -> Self {
        Self {
            script,
            migration: DEFAULT_MIGRATION.to_string(),
            nstars: DEFAULT_NSTARS,
            minimum_delay: DEFAULT_MINIMUM_DELAY,
            evolutions: Vec::new(),
            dtd_kinds: Vec::new(),
            dtd_params: Vec::new(),
            dtd_names: Vec::new(),
            output_root: DEFAULT_OUTPUT_ROOT.to_string(),
            env: None,
            force: true,
            cache: false,
        }
    }

    #[must_use]
    pub fn with_evolutions(mut self, evolutions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evolutions = evolutions.into_iter().map(Into::into).collect();
        self
    }

    /// Append one DTD triple
    #[must_use]
    pub fn with_dtd(
        mut self,
        kind: impl Into<String>,
        params: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.dtd_kinds.push(kind.into());
        self.dtd_params.push(params.into());
        self.dtd_names.push(name.into());
        self
    }

    #[must_use]
    pub fn with_migration(mut self, migration: impl Into<String>) -> Self {
        self.migration = migration.into();
        self
    }

    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<String>) -> Self {
        self.output_root = root.into();
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Rule template, one placeholder per axis
    #[must_use]
    pub fn definition(&self) -> RuleDefinition {
        let migration = escape(&self.migration);
        let root = escape(self.output_root.trim_end_matches('/'));
        let name = format!("{migration}/{{evolution}}/{{dtd_name}}");

        let mut def = RuleDefinition::new(name.clone(), self.script.clone())
            .with_output(ArtifactDecl::directory(format!("{root}/{name}.vice")))
            .with_param("nstars", self.nstars)
            .with_param("migration", migration)
            .with_param("evolution", "{evolution}")
            .with_param("RIa", "{dtd}")
            .with_param("RIa-params", "{dtd_params}")
            .with_param("minimum-delay", self.minimum_delay)
            .with_param("name", format!("{root}/{name}"))
            .with_cache(self.cache);
        if self.force {
            def = def.with_flag("-f");
        }
        if let Some(env) = &self.env {
            def = def.with_env(escape(env));
        }
        def
    }

    /// Evolution axis crossed with the co-varied DTD group
    #[must_use]
    pub fn sweep_spec(&self) -> ParameterSweepSpec {
        let strings = |values: &[String]| -> Vec<Value> {
            values.iter().cloned().map(Value::String).collect()
        };
        ParameterSweepSpec::new()
            .with_axis(SweepAxis::new("evolution", strings(&self.evolutions)))
            .with_axis(SweepAxis::new("dtd", strings(&self.dtd_kinds)).in_group(DTD_GROUP))
            .with_axis(SweepAxis::new("dtd_params", strings(&self.dtd_params)).in_group(DTD_GROUP))
            .with_axis(SweepAxis::new("dtd_name", strings(&self.dtd_names)).in_group(DTD_GROUP))
    }

    /// Render every combination
    ///
    /// # Errors
    /// [`SweepError::RaggedGroup`] if the DTD lists differ in length,
    /// [`SweepError::NameCollision`] if two DTD names repeat
    pub fn instances(&self) -> Result<Vec<RuleInstance>, SweepError> {
        expand(&self.definition(), &self.sweep_spec())
    }
}
