// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Sliding-window hit counter.
//!
//! Counts per-key hits bucketed by second-of-day. The counting window for a
//! record at second `s` spans `[s - threshold, s]`; buckets older than the
//! window are kept for another `window` seconds (the grace buffer, default
//! 30) so a slightly late record can still contribute to its own second,
//! then purged. Log streams are not strictly monotonic, which is the whole
//! reason the buffer exists: a late record is retained but never counts
//! buckets newer than itself.

use std::collections::{BTreeMap, HashMap};

/// Per-key hit counts bucketed by second.
#[derive(Debug, Default)]
pub struct HitCounter {
    hits: BTreeMap<u32, HashMap<String, u32>>,
}

impl HitCounter {
    pub fn new() -> Self {
        HitCounter {
            hits: BTreeMap::new(),
        }
    }

    /// Record one hit for `key` at second `sec` and check for a threshold
    /// crossing.
    ///
    /// Returns `Some(count)` with the in-window total when the total
    /// exceeds `threshold`; the just-recorded hit is then backed out so the
    /// same record cannot re-fire on the next line. Returns `None` below
    /// the threshold.
    pub fn record(&mut self, sec: u32, key: &str, threshold: u32, window: u32) -> Option<u32> {
        let count_window = sec.saturating_sub(threshold);
        let buffer_window = count_window.saturating_sub(window);

        // Purge buckets at or below the buffer horizon.
        self.hits = self.hits.split_off(&(buffer_window.saturating_add(1)));

        *self
            .hits
            .entry(sec)
            .or_default()
            .entry(key.to_string())
            .or_insert(0) += 1;

        // Buckets in (buffer_window, count_window) are retained for
        // out-of-order tolerance but excluded from the sum; buckets newer
        // than the record itself are likewise excluded.
        let count: u32 = self
            .hits
            .range(count_window..=sec)
            .filter_map(|(_, keys)| keys.get(key))
            .sum();

        if count > threshold {
            if let Some(keys) = self.hits.get_mut(&sec) {
                match keys.get_mut(key) {
                    Some(n) if *n > 1 => *n -= 1,
                    Some(_) => {
                        keys.remove(key);
                    }
                    None => {}
                }
                if keys.is_empty() {
                    self.hits.remove(&sec);
                }
            }
            Some(count)
        } else {
            None
        }
    }

    /// Drop all buckets (date/timezone rollover, reload).
    pub fn clear(&mut self) {
        self.hits.clear();
    }

    /// The oldest retained bucket second, if any.
    pub fn oldest_bucket(&self) -> Option<u32> {
        self.hits.keys().next().copied()
    }

    #[cfg(test)]
    fn bucket_seconds(&self) -> Vec<u32> {
        self.hits.keys().copied().collect()
    }
}
