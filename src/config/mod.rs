// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Configuration settings and the rule-DSL front end.
//!
//! [`Settings`] is an open map of scalar and list values: every `set KEY
//! VAL` lands here, recognized or not, and the whole map doubles as the
//! base layer for `%(var)` templating. Typed accessors perform boolean and
//! duration coercion at read time.

pub mod lexer;
pub mod parser;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::template::{Value, VarMap};
use crate::util::{coerce_bool, dur2sec};

/// Default location consulted when no `-c` option is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/logvigil/logvigil.conf";

/// Scalar and list settings with documented defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    map: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        for (k, v) in [
            ("duration", "600"),
            ("threshold", "10"),
            ("window", "30"),
            ("flush", "yes"),
            ("hit", "client"),
            ("multitrigger", "no"),
            ("syslog", "no"),
            ("verbose", "no"),
            ("debug", "no"),
            ("daemon", "no"),
            (
                "threshold.message",
                "%(date) %(time) VIOLATION %(client) %(port) -- %(count) requests in %(interval) seconds for %(url)",
            ),
            (
                "trigger.message",
                "%(date) %(time) VIOLATION %(client) %(port) -- %(url) matches %(trigger)",
            ),
            ("control.message", "%(date) %(time) VIOLATION %(client) %(port)"),
            ("whitelist.message", "%(date) %(time) WHITELIST %(client) %(class)"),
        ] {
            map.insert(k.to_string(), Value::from(v));
        }
        Settings { map }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
    }

    /// Rendered value, empty string when unset.
    pub fn get_str(&self, key: &str) -> String {
        self.map.get(key).map(|v| v.render()).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        coerce_bool(&self.get_str(key))
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.map
            .get(key)
            .and_then(|v| v.render().parse().ok())
            .unwrap_or(default)
    }

    /// Duration-coerced value; trailing junk is reported for the caller to
    /// log a warning about.
    pub fn get_duration(&self, key: &str, default: u32) -> (u32, Option<String>) {
        match self.map.get(key) {
            Some(v) => dur2sec(&v.render()),
            None => (default, None),
        }
    }

    /// The `interval` reporting value defaults to the threshold.
    pub fn interval(&self) -> u32 {
        self.get_u32("interval", self.get_u32("threshold", 10))
    }

    /// The full map, used as the base templating layer.
    pub fn vars(&self) -> &VarMap {
        &self.map
    }

    /// Apply one `-D KEY=VAL` command-line override.
    pub fn apply_define(&mut self, def: &str) -> Result<()> {
        let (key, val) = def
            .split_once('=')
            .ok_or_else(|| anyhow!("bad --define '{}': expected KEY=VAL", def))?;
        if key.is_empty() {
            return Err(anyhow!("bad --define '{}': empty key", def));
        }
        self.set(key, Value::from(val));
        Ok(())
    }

    /// Log files from the `logfile`/`logfiles` settings.
    pub fn logfiles(&self) -> Vec<String> {
        let mut files = Vec::new();
        for key in ["logfile", "logfiles"] {
            match self.map.get(key) {
                Some(Value::Scalar(s)) if !s.is_empty() => files.push(s.clone()),
                Some(Value::List(items)) => files.extend(items.iter().cloned()),
                _ => {}
            }
        }
        files
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
