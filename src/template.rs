// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! `%(var)` template interpolation over layered variable maps.
//!
//! Every message template and action argument in the rule DSL is expanded
//! against a merged variable map assembled at invocation time: config
//! defaults, then per-rule variables, then record fields, then
//! invocation-time arguments, later layers winning. Undefined names expand
//! to the empty string; list values expand by space-joining their elements.

use std::collections::BTreeMap;

use serde::Serialize;

/// A scalar or list setting/variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    /// Render the value as a single string; lists join with spaces.
    pub fn render(&self) -> String {
        match self {
            Value::Scalar(s) => s.clone(),
            Value::List(items) => items.join(" "),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

/// An ordered variable map. `BTreeMap` keeps dump output key-sorted.
pub type VarMap = BTreeMap<String, Value>;

/// Merge variable layers into one map; later layers win.
pub fn merge(layers: &[&VarMap]) -> VarMap {
    let mut out = VarMap::new();
    for layer in layers {
        for (k, v) in layer.iter() {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Expand every `%(name)` in `template` from `vars`.
///
/// Single pass: substituted text is never re-scanned, so expansion is
/// idempotent whenever no binding itself contains `%(…)`. An unterminated
/// `%(` is copied through literally.
pub fn expand(template: &str, vars: &VarMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find(')') {
            Some(end) => {
                let name = &after[..end];
                if let Some(val) = vars.get(name) {
                    out.push_str(&val.render());
                }
                rest = &after[end + 1..];
            }
            None => {
                // No closing paren: emit the rest verbatim.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}
