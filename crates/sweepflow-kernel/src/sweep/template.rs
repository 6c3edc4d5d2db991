//! `{axis}` placeholder rendering
//!
//! Names, artifact paths, environment names, script arguments and string
//! params may contain `{axis}` placeholders. `{{` and `}}` are literal braces.

use crate::error::SweepError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Axis values selected for one sweep combination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Binding(IndexMap<String, Value>);

impl Binding {
    /// Empty binding, used for rules without a sweep
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, axis: impl Into<String>, value: Value) {
        self.0.insert(axis.into(), value);
    }

    #[must_use]
    pub fn get(&self, axis: &str) -> Option<&Value> {
        self.0.get(axis)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (axis, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{axis}={}", value_text(value))?;
        }
        Ok(())
    }
}

/// Text form of a value when spliced into a string
///
/// Strings are inserted without quotes; everything else uses its JSON form.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape braces so `text` renders to itself
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Literal(String),
    Placeholder(&'a str),
}

fn pieces(text: &str) -> Result<Vec<Piece<'_>>, SweepError> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            literal.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            literal.push('}');
            rest = after;
        } else if tail.starts_with('{') {
            let close = tail
                .find('}')
                .ok_or_else(|| SweepError::UnterminatedPlaceholder(text.to_string()))?;
            if !literal.is_empty() {
                out.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            out.push(Piece::Placeholder(tail[1..close].trim()));
            rest = &tail[close + 1..];
        } else {
            // stray '}' is kept as-is
            literal.push('}');
            rest = &tail[1..];
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        out.push(Piece::Literal(literal));
    }
    Ok(out)
}

fn lookup<'b>(binding: &'b Binding, name: &str, text: &str) -> Result<&'b Value, SweepError> {
    binding
        .get(name)
        .ok_or_else(|| SweepError::UnknownPlaceholder {
            placeholder: name.to_string(),
            text: text.to_string(),
        })
}

/// Substitute every placeholder in `text`
///
/// # Errors
/// [`SweepError::UnknownPlaceholder`] if a placeholder names no bound axis,
/// [`SweepError::UnterminatedPlaceholder`] on a dangling `{`
pub fn render_str(text: &str, binding: &Binding) -> Result<String, SweepError> {
    let mut rendered = String::with_capacity(text.len());
    for piece in pieces(text)? {
        match piece {
            Piece::Literal(s) => rendered.push_str(&s),
            Piece::Placeholder(name) => rendered.push_str(&value_text(lookup(binding, name, text)?)),
        }
    }
    Ok(rendered)
}

/// Substitute placeholders inside a param value, recursing into arrays and maps
///
/// A string consisting of exactly one placeholder becomes the raw axis value,
/// so numeric and boolean axes keep their type.
///
/// # Errors
/// Same as [`render_str`]
pub fn render_value(value: &Value, binding: &Binding) -> Result<Value, SweepError> {
    match value {
        Value::String(text) => {
            let parts = pieces(text)?;
            if let [Piece::Placeholder(name)] = parts.as_slice() {
                return lookup(binding, name, text).cloned();
            }
            render_str(text, binding).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, binding))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, binding)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}
