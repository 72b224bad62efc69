// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! CIDR whitelist matching, tagged by class.
//!
//! Each whitelist holds separate IPv4 and IPv6 span lists; every span
//! carries a class label (default `whitelisted`, or the `@name` given in
//! the config). A lookup answers with the union of class labels of all
//! matching spans. A small hard-coded *silent* whitelist (loopback)
//! short-circuits evaluation without even a log message.
//!
//! Clients containing a letter in `[G-Zg-z]` are not plausible numeric
//! address literals and skip whitelist evaluation entirely. This is a
//! heuristic: hostname or scoped-address clients still hit triggers but
//! are never whitelisted.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::{anyhow, Result};

use crate::template::VarMap;

/// The default class label for spans without an explicit `@class`.
pub const DEFAULT_CLASS: &str = "whitelisted";

#[derive(Debug, Clone)]
struct Span<A> {
    base: A,
    prefix: u8,
    class: String,
}

/// One `whitelist { … }` block: v4 and v6 CIDR spans plus rule variables.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    v4: Vec<Span<u32>>,
    v6: Vec<Span<u128>>,
    pub vars: VarMap,
}

/// Which address family a config entry is forced into, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Auto,
    V4,
    V6,
}

impl Whitelist {
    pub fn new(vars: VarMap) -> Self {
        Whitelist {
            v4: Vec::new(),
            v6: Vec::new(),
            vars,
        }
    }

    /// Add one CIDR entry. `family` comes from an `ipv4=`/`ipv6=` prefix in
    /// the config; with `Auto`, the presence of `:` selects IPv6.
    pub fn add(&mut self, cidr: &str, class: Option<&str>, family: Family) -> Result<()> {
        let class = class.unwrap_or(DEFAULT_CLASS).to_string();
        let v6 = match family {
            Family::V4 => false,
            Family::V6 => true,
            Family::Auto => cidr.contains(':'),
        };

        let (addr, prefix) = match cidr.split_once('/') {
            Some((a, p)) => (
                a,
                p.parse::<u8>()
                    .map_err(|_| anyhow!("bad prefix length in CIDR '{}'", cidr))?,
            ),
            None => (cidr, if v6 { 128 } else { 32 }),
        };

        if v6 {
            if prefix > 128 {
                return Err(anyhow!("prefix /{} out of range for IPv6 '{}'", prefix, cidr));
            }
            let base: Ipv6Addr = addr
                .parse()
                .map_err(|_| anyhow!("bad IPv6 address '{}'", addr))?;
            self.v6.push(Span {
                base: u128::from(base),
                prefix,
                class,
            });
        } else {
            if prefix > 32 {
                return Err(anyhow!("prefix /{} out of range for IPv4 '{}'", prefix, cidr));
            }
            let base: Ipv4Addr = addr
                .parse()
                .map_err(|_| anyhow!("bad IPv4 address '{}'", addr))?;
            self.v4.push(Span {
                base: u32::from(base),
                prefix,
                class,
            });
        }
        Ok(())
    }

    /// Class labels of every span containing `ip`, in config order.
    pub fn classes_for(&self, ip: &IpAddr) -> Vec<&str> {
        let mut classes = Vec::new();
        match ip {
            IpAddr::V4(a) => {
                let addr = u32::from(*a);
                for span in &self.v4 {
                    if masked32(addr, span.prefix) == masked32(span.base, span.prefix)
                        && !classes.contains(&span.class.as_str())
                    {
                        classes.push(span.class.as_str());
                    }
                }
            }
            IpAddr::V6(a) => {
                let addr = u128::from(*a);
                for span in &self.v6 {
                    if masked128(addr, span.prefix) == masked128(span.base, span.prefix)
                        && !classes.contains(&span.class.as_str())
                    {
                        classes.push(span.class.as_str());
                    }
                }
            }
        }
        classes
    }
}

fn masked32(addr: u32, prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        addr & (u32::MAX << (32 - prefix as u32))
    }
}

fn masked128(addr: u128, prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        addr & (u128::MAX << (128 - prefix as u32))
    }
}

/// True for clients the hard-coded silent whitelist covers.
pub fn is_silent(client: &str) -> bool {
    client == "127.0.0.1" || client == "::1"
}

/// Heuristic for "plausible numeric address literal": anything containing a
/// letter outside the hex range cannot be one, and skips whitelisting.
pub fn looks_numeric(client: &str) -> bool {
    !client
        .chars()
        .any(|c| matches!(c, 'G'..='Z' | 'g'..='z'))
}

/// Evaluate a client against every whitelist in order; the first list with
/// any matching span answers with its index and comma-joined class union.
pub fn lookup(whitelists: &[Whitelist], client: &str) -> Option<(usize, String)> {
    let ip: IpAddr = client.parse().ok()?;
    for (idx, wl) in whitelists.iter().enumerate() {
        let classes = wl.classes_for(&ip);
        if !classes.is_empty() {
            return Some((idx, classes.join(",")));
        }
    }
    None
}
