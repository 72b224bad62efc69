// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Per-record trigger predicates.
//!
//! A trigger selects one record field and compares it against a literal or
//! regex operand. Triggers are evaluated in configuration order; a trigger
//! carrying its own threshold routes through a private sliding-window
//! counter instead of firing immediately.

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::engine::counter::HitCounter;
use crate::record::LogRecord;
use crate::template::VarMap;

/// Comparison operator: `=`, `!=`, `~`, `!~`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Eq,
    Ne,
    Match,
    NoMatch,
}

impl TriggerOp {
    pub fn parse(tok: &str) -> Option<Self> {
        match tok {
            "=" => Some(TriggerOp::Eq),
            "!=" => Some(TriggerOp::Ne),
            "~" | "=~" => Some(TriggerOp::Match),
            "!~" => Some(TriggerOp::NoMatch),
            _ => None,
        }
    }
}

/// Literal or compiled-regex operand.
#[derive(Debug, Clone)]
pub enum Operand {
    Literal(String),
    Pattern(Regex),
}

/// One trigger predicate with its variable map and optional threshold.
#[derive(Debug)]
pub struct Trigger {
    pub field: String,
    pub op: TriggerOp,
    pub operand: Operand,
    /// Source text of the operand, exposed to `%(trigger)` templating.
    pub display: String,
    pub vars: VarMap,
    pub threshold: Option<u32>,
    /// Private window counter for threshold-bearing triggers.
    pub counter: HitCounter,
}

impl Trigger {
    /// Build a trigger from its parsed parts. Regex operands compile once
    /// here; an unsupported pattern is a configuration error.
    pub fn new(
        field: &str,
        op: TriggerOp,
        operand: &str,
        vars: VarMap,
        threshold: Option<u32>,
    ) -> Result<Self> {
        let compiled = match op {
            TriggerOp::Match | TriggerOp::NoMatch => Operand::Pattern(
                Regex::new(operand)
                    .map_err(|e| anyhow!("bad trigger pattern '{}': {}", operand, e))?,
            ),
            TriggerOp::Eq | TriggerOp::Ne => Operand::Literal(operand.to_string()),
        };
        Ok(Trigger {
            field: field.to_string(),
            op,
            operand: compiled,
            display: operand.to_string(),
            vars,
            threshold,
            counter: HitCounter::new(),
        })
    }

    /// A bare regex in the config is implicitly `$url ~ REGEX`.
    pub fn url_pattern(operand: &str, vars: VarMap, threshold: Option<u32>) -> Result<Self> {
        Trigger::new("url", TriggerOp::Match, operand, vars, threshold)
    }

    /// Evaluate the predicate against a record. A missing field compares as
    /// the empty string.
    pub fn matches(&self, rec: &LogRecord) -> bool {
        let value = rec.field(&self.field).unwrap_or("");
        match (&self.op, &self.operand) {
            (TriggerOp::Eq, Operand::Literal(lit)) => value == lit,
            (TriggerOp::Ne, Operand::Literal(lit)) => value != lit,
            (TriggerOp::Match, Operand::Pattern(re)) => re.is_match(value),
            (TriggerOp::NoMatch, Operand::Pattern(re)) => !re.is_match(value),
            // Construction pairs op and operand; these cannot meet.
            _ => false,
        }
    }
}
