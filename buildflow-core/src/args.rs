//! Argument normalization and command-directed merging.
//!
//! Config args arrive in several shapes (scalar, sequence, nested mapping);
//! everything is normalized into a flat `BTreeMap<String, String>` so node
//! identity keys stay stable. Globals are merged selectively: only the
//! variables a command actually references are pulled in, so unrelated
//! globals never force spurious node identities.

use crate::expand::referenced_vars;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Normalize an arbitrary config value into a flat arg map.
///
/// - a sequence becomes `arg1, arg2, …`
/// - a scalar becomes `arg1`
/// - a mapping is flattened with `_`-joined paths; nested sequences are
///   rendered as `[a,b,c]` with elements sorted
pub fn read_args(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Null => {}
        Value::Sequence(seq) => {
            for (i, item) in seq.iter().enumerate() {
                out.insert(format!("arg{}", i + 1), scalar_string(item));
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = scalar_string(k);
                flatten_into(&key, v, &mut out);
            }
        }
        other => {
            out.insert("arg1".to_string(), scalar_string(other));
        }
    }
    out
}

/// Merge args for a node: node-local bindings win over parent bindings, and
/// globals referenced by `command` fill the remaining gaps.
///
/// Dotted references (`${db.host}`) traverse nested global mappings and land
/// under the flattened key (`db_host`).
pub fn merge_args(
    command: Option<&str>,
    node_args: &BTreeMap<String, String>,
    parent_args: &BTreeMap<String, String>,
    globals: &BTreeMap<String, Value>,
) -> BTreeMap<String, String> {
    let mut merged = node_args.clone();

    for (k, v) in parent_args {
        merged.entry(k.clone()).or_insert_with(|| v.clone());
    }

    if let Some(cmd) = command {
        for reference in referenced_vars(cmd) {
            let flat = reference.replace('.', "_");
            if merged.contains_key(&reference) || merged.contains_key(&flat) {
                continue;
            }
            if let Some(value) = lookup_global(globals, &reference) {
                merged.insert(flat, value);
            }
        }
    }

    merged
}

/// Resolve a possibly-dotted path against the globals pool. Returns the
/// scalar rendering of the value found, or `None`.
pub fn lookup_global(globals: &BTreeMap<String, Value>, path: &str) -> Option<String> {
    let mut parts = path.split('.');
    let head = parts.next()?;
    let mut current = globals.get(head)?;
    for part in parts {
        match current {
            Value::Mapping(map) => {
                current = map.get(Value::String(part.to_string()))?;
            }
            _ => return None,
        }
    }
    match current {
        Value::Mapping(_) => None,
        Value::Sequence(_) => Some(sequence_string(current)),
        v => Some(scalar_string(v)),
    }
}

/// Flatten one value under `prefix` into the arg map. Nested mapping keys
/// join with `_`; sequences render as `[sorted,csv]`.
fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = format!("{}_{}", prefix, scalar_string(k));
                flatten_into(&key, v, out);
            }
        }
        Value::Sequence(_) => {
            out.insert(prefix.to_string(), sequence_string(value));
        }
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        v => {
            out.insert(prefix.to_string(), scalar_string(v));
        }
    }
}

fn sequence_string(value: &Value) -> String {
    let Value::Sequence(seq) = value else {
        return scalar_string(value);
    };
    let mut items: Vec<String> = seq.iter().map(scalar_string).collect();
    items.sort();
    format!("[{}]", items.join(","))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}
