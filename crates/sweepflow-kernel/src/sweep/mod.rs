//! Sweep expansion
//!
//! A [`ParameterSweepSpec`] is an ordered list of axes. Axes that share a
//! `group` are co-varied by index; every group (an ungrouped axis forms its
//! own) is crossed with the others, first group outermost. Each combination
//! renders the rule template once.

mod driver;
mod template;

pub use driver::{
    MigrationSweep, DEFAULT_MIGRATION, DEFAULT_MINIMUM_DELAY, DEFAULT_NSTARS, DEFAULT_OUTPUT_ROOT,
};
pub use template::{escape, render_str, render_value, value_text, Binding};

use crate::error::SweepError;
use crate::rule::{RuleDefinition, RuleInstance};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One swept parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    /// Placeholder name used in templates
    pub name: String,
    /// Values in sweep order
    pub values: Vec<Value>,
    /// Axes with the same group advance together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl SweepAxis {
    /// Ungrouped axis over `values`
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            group: None,
        }
    }

    /// Co-vary this axis with every other axis of `group`
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Co-varied axes, resolved from a spec
#[derive(Debug)]
pub struct AxisGroup<'a> {
    /// Group name, or the axis name for an ungrouped axis
    pub label: String,
    /// Member axes in declaration order
    pub axes: Vec<&'a SweepAxis>,
}

impl AxisGroup<'_> {
    /// Number of index positions; every axis in the group has this length
    #[must_use]
    pub fn len(&self) -> usize {
        self.axes.first().map_or(0, |axis| axis.values.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Axes to expand a template over
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSweepSpec {
    /// Axes in declaration order
    #[serde(default)]
    pub axes: Vec<SweepAxis>,
}

impl ParameterSweepSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `axis` as declared
    #[must_use]
    pub fn with_axis(mut self, axis: SweepAxis) -> Self {
        self.axes.push(axis);
        self
    }

    /// Add an independent axis
    #[must_use]
    pub fn axis(self, name: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.with_axis(SweepAxis::new(name, values))
    }

    /// Add an axis co-varied with the rest of `group`
    #[must_use]
    pub fn covaried(
        self,
        group: impl Into<String>,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        self.with_axis(SweepAxis::new(name, values).in_group(group))
    }

    /// Resolve axes into groups, in order of first appearance
    ///
    /// # Errors
    /// [`SweepError::DuplicateAxis`] or [`SweepError::RaggedGroup`]
    pub fn groups(&self) -> Result<Vec<AxisGroup<'_>>, SweepError> {
        let mut seen = HashSet::new();
        let mut groups: Vec<AxisGroup<'_>> = Vec::new();
        let mut named: HashMap<&str, usize> = HashMap::new();

        for axis in &self.axes {
            if !seen.insert(axis.name.as_str()) {
                return Err(SweepError::DuplicateAxis(axis.name.clone()));
            }
            match axis.group.as_deref() {
                Some(group) => match named.get(group) {
                    Some(&idx) => {
                        let expected = groups[idx].len();
                        if axis.values.len() != expected {
                            return Err(SweepError::RaggedGroup {
                                group: group.to_string(),
                                axis: axis.name.clone(),
                                expected,
                                found: axis.values.len(),
                            });
                        }
                        groups[idx].axes.push(axis);
                    }
                    None => {
                        named.insert(group, groups.len());
                        groups.push(AxisGroup {
                            label: group.to_string(),
                            axes: vec![axis],
                        });
                    }
                },
                None => groups.push(AxisGroup {
                    label: axis.name.clone(),
                    axes: vec![axis],
                }),
            }
        }
        Ok(groups)
    }

    /// Every axis binding, first group outermost
    ///
    /// A spec without axes yields a single empty binding; any empty group
    /// yields none.
    ///
    /// # Errors
    /// Same as [`ParameterSweepSpec::groups`]
    pub fn combinations(&self) -> Result<Vec<Binding>, SweepError> {
        let mut combos = vec![Binding::new()];
        for group in self.groups()? {
            let mut next = Vec::with_capacity(combos.len() * group.len());
            for base in &combos {
                for idx in 0..group.len() {
                    let mut binding = base.clone();
                    for axis in &group.axes {
                        binding.insert(axis.name.clone(), axis.values[idx].clone());
                    }
                    next.push(binding);
                }
            }
            combos = next;
        }
        Ok(combos)
    }
}

/// Expand `definition` over every combination of `spec`
///
/// # Errors
/// Any [`SweepError`]; in particular [`SweepError::NameCollision`] when two
/// combinations render the same instance name.
pub fn expand(
    definition: &RuleDefinition,
    spec: &ParameterSweepSpec,
) -> Result<Vec<RuleInstance>, SweepError> {
    let combos = spec.combinations()?;
    if combos.is_empty() {
        warn!(template = %definition.name, "sweep has an empty axis; no instances generated");
        return Ok(Vec::new());
    }

    let mut names: HashMap<String, usize> = HashMap::with_capacity(combos.len());
    let mut instances: Vec<RuleInstance> = Vec::with_capacity(combos.len());
    for binding in &combos {
        let instance = definition.render(binding)?;
        if let Some(&prev) = names.get(&instance.name) {
            return Err(SweepError::NameCollision {
                template: definition.name.clone(),
                name: instance.name,
                first: instances[prev].binding.to_string(),
                second: binding.to_string(),
            });
        }
        names.insert(instance.name.clone(), instances.len());
        instances.push(instance);
    }

    debug!(template = %definition.name, instances = instances.len(), "expanded sweep");
    Ok(instances)
}
