//! Param dictionary to command-line flags
//!
//! - `{"nstars": 2}` becomes `--nstars=2`
//! - nested maps join keys with `.`: `{"dtd": {"slope": -1.1}}` becomes `--dtd.slope=-1.1`
//! - arrays are comma-joined: `{"zones": [1, 2]}` becomes `--zones=1,2`
//! - `null` becomes a bare `--key`
//!
//! Declaration order is preserved.

use crate::rule::Params;
use crate::sweep::value_text;
use serde_json::Value;

pub fn flatten_params(params: &Params) -> Vec<String> {
    let mut flags = Vec::with_capacity(params.len());
    for (key, value) in params {
        push_flags(&mut flags, key, value);
    }
    flags
}

fn push_flags(flags: &mut Vec<String>, key: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (child, nested) in map {
                push_flags(flags, &format!("{key}.{child}"), nested);
            }
        }
        Value::Array(items) => {
            let joined = items.iter().map(value_text).collect::<Vec<_>>().join(",");
            flags.push(format!("--{key}={joined}"));
        }
        Value::Null => flags.push(format!("--{key}")),
        scalar => flags.push(format!("--{key}={}", value_text(scalar))),
    }
}
