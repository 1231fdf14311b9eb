// src/config/document.rs

//! Generic access to the parsed configuration tree.
//!
//! The free-form parts of the config (task entries, plugin declarations)
//! are traversed as a plain `toml::Value` tree rather than a fixed serde
//! schema, so unknown keys pass through untouched and the query surface
//! can expose raw values by path.

use toml::Value;

/// A parsed configuration document.
#[derive(Debug, Clone)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        let root: Value = toml::from_str(text)?;
        Ok(Self { root })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Slash-delimited traversal through nested tables and arrays; numeric
    /// segments index into arrays. Empty segments are skipped, so leading
    /// or doubled slashes are harmless.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_value(&self.root, path)
    }
}

pub fn lookup_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Table(table) => table.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form of a scalar value; tables and arrays return `None`.
pub fn scalar_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    }
}

/// Collapse a possibly-multiply-declared value down to a single one: the
/// first element of a list, or the value itself.
pub fn collapse_multi(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

/// Accept one string or a list of strings.
pub fn string_list(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => return Err("expected a string or a list of strings".to_string()),
                }
            }
            Ok(out)
        }
        _ => Err("expected a string or a list of strings".to_string()),
    }
}

/// `enabled` normalization: case-insensitive `"no"` or boolean `false`
/// disables; anything else, including absence, enables.
pub fn enabled_from_value(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Boolean(b)) => *b,
        Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("no"),
        _ => true,
    }
}
