// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Tokenizer for the rule DSL.
//!
//! Splits config text into bare words, quoted strings (double or single,
//! no escapes, no nesting), the braces `{` `}`, and expands `<path>`
//! include directives inline. Comments run from `#` to end of line.
//!
//! Include resolution is relative to the including file's directory. A
//! path naming a directory includes every entry immediately inside it
//! once, lexicographically. A missing literal file is a fatal parse
//! error; a wildcard pattern that matches nothing is silently empty.

use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Nested includes deeper than this indicate a cycle.
const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    LBrace,
    RBrace,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
        }
    }
}

/// Tokenize a config file, expanding includes.
pub fn tokenize_file(path: &Path) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    include_file(path, &mut out, 0)?;
    Ok(out)
}

fn include_file(path: &Path, out: &mut Vec<Token>, depth: usize) -> Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
        bail!("includes nested deeper than {} at {}", MAX_INCLUDE_DEPTH, path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokenize_str(&text, dir, out, depth)
}

fn tokenize_str(input: &str, dir: &Path, out: &mut Vec<Token>, depth: usize) -> Result<()> {
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '{' => {
                out.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                out.push(Token::RBrace);
                i += 1;
            }
            '"' | '\'' => {
                let quote = bytes[i];
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    bail!("unterminated {} quote in config", c);
                }
                out.push(Token::Word(input[start..j].to_string()));
                i = j + 1;
            }
            '<' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'>' {
                    j += 1;
                }
                if j >= bytes.len() {
                    bail!("unterminated <include> directive in config");
                }
                let spec = input[start..j].trim();
                resolve_include(dir, spec, out, depth)?;
                i = j + 1;
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i];
                    if (b as char).is_whitespace()
                        || b == b'{'
                        || b == b'}'
                        || b == b'#'
                        || b == b'"'
                        || b == b'\''
                    {
                        break;
                    }
                    i += 1;
                }
                out.push(Token::Word(input[start..i].to_string()));
            }
        }
    }
    Ok(())
}

fn resolve_include(dir: &Path, spec: &str, out: &mut Vec<Token>, depth: usize) -> Result<()> {
    if spec.is_empty() {
        bail!("empty <include> directive");
    }
    let path = dir.join(spec);

    if path.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(&path)
            .with_context(|| format!("cannot read include directory {}", path.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for entry in entries {
            include_file(&entry, out, depth + 1)?;
        }
        return Ok(());
    }

    if spec.contains('*') || spec.contains('?') {
        // Wildcards apply to the filename component; a pattern matching
        // nothing expands to nothing.
        let parent = path.parent().unwrap_or(dir).to_path_buf();
        let pattern = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut matches: Vec<_> = match std::fs::read_dir(&parent) {
            Ok(iter) => iter
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.file_name()
                            .map(|n| glob_match(&n.to_string_lossy(), &pattern))
                            .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        matches.sort();
        for m in matches {
            include_file(&m, out, depth + 1)?;
        }
        return Ok(());
    }

    if !path.exists() {
        bail!("include file not found: {}", path.display());
    }
    include_file(&path, out, depth + 1)
}

/// Minimal filename glob: `*` matches any run, `?` any single character.
fn glob_match(name: &str, pattern: &str) -> bool {
    fn matches(n: &[u8], p: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(n, &p[1..]) || (!n.is_empty() && matches(&n[1..], p))
            }
            (Some(b'?'), Some(_)) => matches(&n[1..], &p[1..]),
            (Some(pc), Some(nc)) if pc == nc => matches(&n[1..], &p[1..]),
            _ => false,
        }
    }
    matches(name.as_bytes(), pattern.as_bytes())
}
