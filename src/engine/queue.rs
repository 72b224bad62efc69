// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Timed violation queue with deduplication.
//!
//! A time-sorted sequence of pending expiries keyed by
//! `vkey = client "=" action-name`, with a perpetual sentinel at
//! `expire_at = NEVER` so the front deadline is always defined. The side
//! index guarantees at most one live entry per vkey: the first observation
//! of a key is a *first* violation (the caller fires the violation action),
//! subsequent observations only push the expiry deadline forward.

use std::collections::HashSet;

use serde::Serialize;

use crate::template::{Value, VarMap};
use crate::util::format_expiration;

/// The sentinel deadline: `2^32 - 1`, i.e. never.
pub const NEVER: u32 = u32::MAX;

/// One scheduled expiry.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationEntry {
    pub expire_at: u32,
    pub expire_action: String,
    /// Snapshot of the merged variable map at violation time, used to
    /// template-expand the expiry action's arguments.
    pub args: VarMap,
    pub vkey: String,
}

impl ViolationEntry {
    fn sentinel() -> Self {
        ViolationEntry {
            expire_at: NEVER,
            expire_action: "quit".to_string(),
            args: VarMap::new(),
            vkey: String::new(),
        }
    }

    fn is_sentinel(&self) -> bool {
        self.vkey.is_empty()
    }

    /// Render the entry for `DUMP` output: the argument map (keys sorted)
    /// plus a human-readable `expiration` field.
    pub fn dump_line(&self) -> String {
        let mut obj = serde_json::Map::new();
        for (k, v) in &self.args {
            let jv = match v {
                Value::Scalar(s) => serde_json::Value::String(s.clone()),
                Value::List(items) => serde_json::Value::Array(
                    items
                        .iter()
                        .map(|s| serde_json::Value::String(s.clone()))
                        .collect(),
                ),
            };
            obj.insert(k.clone(), jv);
        }
        obj.insert(
            "expiration".to_string(),
            serde_json::Value::String(format_expiration(self.expire_at)),
        );
        serde_json::Value::Object(obj).to_string()
    }
}

/// Outcome of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// First observation of this vkey: the violation action fires now.
    First,
    /// Already in flight: only the deadline moved.
    Refreshed,
}

/// Deadline-ordered violation queue plus vkey index.
#[derive(Debug)]
pub struct ViolationQueue {
    /// Ascending by `expire_at`; the sentinel is always last.
    entries: Vec<ViolationEntry>,
    index: HashSet<String>,
}

impl ViolationQueue {
    pub fn new() -> Self {
        ViolationQueue {
            entries: vec![ViolationEntry::sentinel()],
            index: HashSet::new(),
        }
    }

    /// Number of live (non-sentinel) entries.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The earliest pending deadline (the sentinel's `NEVER` when idle).
    pub fn next_deadline(&self) -> u32 {
        self.entries[0].expire_at
    }

    /// Insert or refresh an entry, keeping the sequence deadline-sorted.
    ///
    /// A vkey already in flight has its old occurrence removed and its
    /// deadline replaced by the new entry's; the caller must only fire the
    /// violation action on [`Enqueue::First`].
    pub fn enqueue(&mut self, mut entry: ViolationEntry) -> Enqueue {
        // Keep real deadlines strictly below the sentinel's.
        entry.expire_at = entry.expire_at.min(NEVER - 1);

        let outcome = if self.index.contains(&entry.vkey) {
            let pos = self
                .entries
                .iter()
                .position(|e| e.vkey == entry.vkey)
                .expect("indexed vkey present in queue");
            self.entries.remove(pos);
            Enqueue::Refreshed
        } else {
            self.index.insert(entry.vkey.clone());
            Enqueue::First
        };

        // Bisect by deadline; equal deadlines keep FIFO order.
        let at = self
            .entries
            .partition_point(|e| e.expire_at <= entry.expire_at);
        self.entries.insert(at, entry);
        outcome
    }

    /// Pop every entry whose deadline has passed, in deadline order.
    /// The caller fires each entry's expire action exactly once.
    pub fn due(&mut self, now: u32) -> Vec<ViolationEntry> {
        let mut fired = Vec::new();
        while !self.entries[0].is_sentinel() && self.entries[0].expire_at <= now {
            let entry = self.entries.remove(0);
            self.index.remove(&entry.vkey);
            fired.push(entry);
        }
        fired
    }

    /// Remove and return every live entry whose argument map is a superset
    /// of `filter`. An empty filter drains the whole queue. The sentinel
    /// stays in place.
    pub fn flush(&mut self, filter: &[(String, String)]) -> Vec<ViolationEntry> {
        let matches = |entry: &ViolationEntry| {
            filter.iter().all(|(k, v)| {
                entry
                    .args
                    .get(k)
                    .map(|val| val.render() == *v)
                    .unwrap_or(false)
            })
        };

        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if !entry.is_sentinel() && matches(&entry) {
                self.index.remove(&entry.vkey);
                drained.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        drained
    }

    /// Live entries in deadline order.
    pub fn iter_live(&self) -> impl Iterator<Item = &ViolationEntry> {
        self.entries.iter().filter(|e| !e.is_sentinel())
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        // Ordering: deadlines ascend, sentinel last.
        for pair in self.entries.windows(2) {
            assert!(pair[0].expire_at <= pair[1].expire_at, "queue out of order");
        }
        assert!(self.entries.last().unwrap().is_sentinel());
        // Index/queue coherence, sentinel excluded.
        let live: Vec<&str> = self.iter_live().map(|e| e.vkey.as_str()).collect();
        assert_eq!(live.len(), self.index.len());
        for vkey in &live {
            assert!(self.index.contains(*vkey), "queue entry missing from index");
        }
        let unique: HashSet<&str> = live.iter().copied().collect();
        assert_eq!(unique.len(), live.len(), "duplicate vkey in queue");
    }
}

impl Default for ViolationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience constructor used by the engine and tests.
pub fn entry(expire_at: u32, expire_action: &str, args: VarMap, vkey: &str) -> ViolationEntry {
    ViolationEntry {
        expire_at,
        expire_action: expire_action.to_string(),
        args,
        vkey: vkey.to_string(),
    }
}
