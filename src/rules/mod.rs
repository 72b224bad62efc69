// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! The compiled rule tables driving record evaluation.
//!
//! Built once at config load (and rebuilt wholesale on reload, so the
//! engine never observes a half-parsed rule set). Evaluation order per record:
//! skip → whitelist → trigger → threshold.

pub mod trigger;
pub mod whitelist;

use std::collections::HashMap;

use regex::Regex;

use crate::actions::ActionDef;
use trigger::Trigger;
use whitelist::Whitelist;

/// Every rule table from the config, read-only during the main loop except
/// for the per-trigger window counters.
#[derive(Debug, Default)]
pub struct RuleSet {
    /// One compiled alternation per `skip { … }` block.
    pub skips: Vec<Regex>,
    pub whitelists: Vec<Whitelist>,
    pub triggers: Vec<Trigger>,
    pub actions: HashMap<String, ActionDef>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet::default()
    }

    /// A record whose URL matches any skip regex is dropped before any
    /// other evaluation.
    pub fn skip_matches(&self, url: &str) -> bool {
        self.skips.iter().any(|re| re.is_match(url))
    }
}
