// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Shared utility functions used across multiple modules.

use crate::engine::queue::NEVER;

/// Parse a duration string into seconds.
///
/// Accepts a concatenation of `N{w,d,h,m,s}` segments plus an optional
/// trailing bare integer interpreted as seconds. Returns the total and any
/// trailing junk the parse stopped at (the caller logs a warning for it).
///
/// # Examples
/// ```ignore
/// assert_eq!(dur2sec("1w2d3h4m5s").0, 9 * 86400 + 3 * 3600 + 4 * 60 + 5);
/// assert_eq!(dur2sec("90").0, 90);
/// ```
pub fn dur2sec(s: &str) -> (u32, Option<String>) {
    let mut total: u64 = 0;
    let mut pending: u64 = 0;
    let mut have_digits = false;

    for (i, c) in s.char_indices() {
        match c {
            '0'..='9' => {
                pending = pending.saturating_mul(10).saturating_add(c as u64 - '0' as u64);
                have_digits = true;
            }
            'w' | 'd' | 'h' | 'm' | 's' if have_digits => {
                let mult = match c {
                    'w' => 604_800,
                    'd' => 86_400,
                    'h' => 3_600,
                    'm' => 60,
                    _ => 1,
                };
                total = total.saturating_add(pending.saturating_mul(mult));
                pending = 0;
                have_digits = false;
            }
            _ => {
                // Trailing junk: keep what parsed so far, report the rest.
                total = total.saturating_add(pending);
                return (clamp_secs(total), Some(s[i..].to_string()));
            }
        }
    }

    // A trailing bare integer counts as seconds.
    total = total.saturating_add(pending);
    (clamp_secs(total), None)
}

fn clamp_secs(total: u64) -> u32 {
    total.min(NEVER as u64 - 1) as u32
}

/// Coerce a boolean setting. `yes`, `true`, `on` and `1` (case-insensitive)
/// are true; anything else is false.
pub fn coerce_bool(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1"
    )
}

/// Split a whitespace-separated `k=v` argument string into pairs.
///
/// Tokens without a `=` are dropped; only the first `=` splits, so values
/// may themselves contain `=`.
pub fn parse_kv_args(s: &str) -> Vec<(String, String)> {
    s.split_whitespace()
        .filter_map(|tok| {
            tok.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Render a queue deadline as a human-readable timestamp for `DUMP` output.
///
/// The sentinel deadline renders as `never`.
pub fn format_expiration(epoch: u32) -> String {
    if epoch == NEVER {
        return "never".to_string();
    }
    match chrono::DateTime::from_timestamp(epoch as i64, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => epoch.to_string(),
    }
}
