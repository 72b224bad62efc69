// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Parser for the rule DSL.
//!
//! Top-level productions:
//!
//! ```text
//! set KEY VAL | set KEY { v1 v2 … }
//! action NAME [k:v …] { TYPE ARGS… }        TYPE ∈ print exec exit null
//! whitelist [k:v …] { CIDR [@class] … }
//! skip { regex … }
//! trigger [k:v …] { TRIGGER … }
//! ```
//!
//! A syntax error is fatal: the error message carries the offending token
//! and up to nine following tokens for context.

use std::path::Path;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::actions::{Action, ActionDef};
use crate::rules::trigger::{Trigger, TriggerOp};
use crate::rules::whitelist::{Family, Whitelist};
use crate::rules::RuleSet;
use crate::template::{Value, VarMap};

use super::lexer::{tokenize_file, Token};
use super::Settings;

/// Parse one config file into the accumulating settings and rule tables.
pub fn parse_into(path: &Path, settings: &mut Settings, rules: &mut RuleSet) -> Result<()> {
    let tokens = tokenize_file(path)?;
    Parser { tokens, pos: 0 }.run(settings, rules)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn run(&mut self, settings: &mut Settings, rules: &mut RuleSet) -> Result<()> {
        while self.pos < self.tokens.len() {
            let keyword = self.expect_word("top-level keyword")?;
            match keyword.as_str() {
                "set" => self.parse_set(settings)?,
                "action" => self.parse_action(rules)?,
                "whitelist" => self.parse_whitelist(rules)?,
                "skip" => self.parse_skip(rules)?,
                "trigger" => self.parse_trigger(rules)?,
                _ => {
                    self.pos -= 1;
                    return Err(self.syntax_error("unknown keyword"));
                }
            }
        }
        Ok(())
    }

    // ── Token plumbing ─────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(_) => {
                self.pos -= 1;
                Err(self.syntax_error(&format!("expected {}", what)))
            }
            None => Err(anyhow!("unexpected end of config: expected {}", what)),
        }
    }

    fn expect_lbrace(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::LBrace) => Ok(()),
            Some(_) => {
                self.pos -= 1;
                Err(self.syntax_error("expected '{'"))
            }
            None => Err(anyhow!("unexpected end of config: expected '{{'")),
        }
    }

    /// Words up to the closing brace of the current block.
    fn block_words(&mut self) -> Result<Vec<String>> {
        let mut words = Vec::new();
        loop {
            match self.next() {
                Some(Token::Word(w)) => words.push(w),
                Some(Token::RBrace) => return Ok(words),
                Some(Token::LBrace) => {
                    self.pos -= 1;
                    return Err(self.syntax_error("nested '{' inside block"));
                }
                None => return Err(anyhow!("unexpected end of config: unclosed block")),
            }
        }
    }

    /// The offending token plus the next ≤ 9 tokens, for fatal errors.
    fn syntax_error(&self, msg: &str) -> anyhow::Error {
        let end = (self.pos + 10).min(self.tokens.len());
        let context: Vec<String> = self.tokens[self.pos..end]
            .iter()
            .map(|t| t.to_string())
            .collect();
        anyhow!("config syntax error: {} at: {}", msg, context.join(" "))
    }

    /// Parse the optional `k:v …` preamble before a block's `{`.
    ///
    /// Both `key:value` and `key: value` spellings are accepted.
    fn parse_var_preamble(&mut self) -> Result<VarMap> {
        let mut vars = VarMap::new();
        while let Some(Token::Word(w)) = self.peek() {
            if !w.contains(':') {
                break;
            }
            let w = self.expect_word("variable")?;
            if let Some(key) = w.strip_suffix(':') {
                let key = key.to_string();
                let val = self.expect_word("variable value")?;
                vars.insert(key, Value::from(val));
            } else if let Some((key, val)) = w.split_once(':') {
                vars.insert(key.to_string(), Value::from(val));
            }
        }
        Ok(vars)
    }

    // ── Productions ────────────────────────────────────────────────────

    fn parse_set(&mut self, settings: &mut Settings) -> Result<()> {
        let key = self.expect_word("setting name")?;
        match self.next() {
            Some(Token::Word(v)) => {
                settings.set(&key, Value::from(v));
                Ok(())
            }
            Some(Token::LBrace) => {
                let items = self.block_words()?;
                settings.set(&key, Value::List(items));
                Ok(())
            }
            Some(Token::RBrace) => {
                self.pos -= 1;
                Err(self.syntax_error("expected setting value"))
            }
            None => Err(anyhow!("unexpected end of config: expected value for '{}'", key)),
        }
    }

    fn parse_action(&mut self, rules: &mut RuleSet) -> Result<()> {
        let name = self.expect_word("action name")?;
        let vars = self.parse_var_preamble()?;
        self.expect_lbrace()?;
        let body = self.block_words()?;

        let (kind, args) = match body.split_first() {
            Some((kind, args)) => (kind.clone(), args.to_vec()),
            None => return Err(anyhow!("config syntax error: empty action '{}'", name)),
        };

        let action = match kind.as_str() {
            "print" => Action::Print(args),
            "exec" => Action::Exec(args),
            "null" => Action::Null,
            "exit" => {
                let (status, msg) = match args.split_first() {
                    Some((first, rest)) => match first.parse::<i32>() {
                        Ok(code) => (code, rest.to_vec()),
                        Err(_) => (0, args.clone()),
                    },
                    None => (0, Vec::new()),
                };
                Action::Exit { status, msg }
            }
            _ => {
                return Err(anyhow!(
                    "config syntax error: unknown action type '{}' in action '{}'",
                    kind,
                    name
                ))
            }
        };

        rules.actions.insert(name, ActionDef { vars, action });
        Ok(())
    }

    fn parse_whitelist(&mut self, rules: &mut RuleSet) -> Result<()> {
        let vars = self.parse_var_preamble()?;
        self.expect_lbrace()?;
        let words = self.block_words()?;

        let mut wl = Whitelist::new(vars);
        let mut i = 0;
        while i < words.len() {
            let entry = &words[i];
            if entry.starts_with('@') {
                return Err(anyhow!(
                    "config syntax error: class '{}' without preceding address",
                    entry
                ));
            }
            let (family, cidr) = if let Some(rest) = entry.strip_prefix("ipv6=") {
                (Family::V6, rest)
            } else if let Some(rest) = entry.strip_prefix("ipv4=") {
                (Family::V4, rest)
            } else {
                (Family::Auto, entry.as_str())
            };

            let class = match words.get(i + 1) {
                Some(next) if next.starts_with('@') => {
                    i += 1;
                    Some(&next[1..])
                }
                _ => None,
            };

            wl.add(cidr, class, family)?;
            i += 1;
        }

        rules.whitelists.push(wl);
        Ok(())
    }

    fn parse_skip(&mut self, rules: &mut RuleSet) -> Result<()> {
        self.expect_lbrace()?;
        let patterns = self.block_words()?;
        if patterns.is_empty() {
            return Ok(());
        }
        let joined = patterns.join("|");
        let re = Regex::new(&joined)
            .map_err(|e| anyhow!("bad skip pattern '{}': {}", joined, e))?;
        rules.skips.push(re);
        Ok(())
    }

    fn parse_trigger(&mut self, rules: &mut RuleSet) -> Result<()> {
        let vars = self.parse_var_preamble()?;
        let threshold = match vars.get("threshold") {
            Some(v) => Some(
                v.render()
                    .parse::<u32>()
                    .map_err(|_| anyhow!("bad trigger threshold '{}'", v.render()))?,
            ),
            None => None,
        };
        self.expect_lbrace()?;
        let words = self.block_words()?;

        let mut i = 0;
        while i < words.len() {
            let first = &words[i];
            // Three-token form: $FIELD OP OPERAND.
            if let Some(field) = first.strip_prefix('$') {
                let op = words
                    .get(i + 1)
                    .and_then(|w| TriggerOp::parse(w))
                    .ok_or_else(|| {
                        anyhow!("config syntax error: expected operator after ${}", field)
                    })?;
                let operand = words
                    .get(i + 2)
                    .ok_or_else(|| anyhow!("config syntax error: expected operand after ${}", field))?;
                rules
                    .triggers
                    .push(Trigger::new(field, op, operand, vars.clone(), threshold)?);
                i += 3;
            } else {
                // Bare regex: implicitly $url ~ REGEX.
                rules
                    .triggers
                    .push(Trigger::url_pattern(first, vars.clone(), threshold)?);
                i += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn parse(conf: &str) -> Result<(Settings, RuleSet)> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(conf.as_bytes()).unwrap();
        drop(f);
        let mut settings = Settings::new();
        let mut rules = RuleSet::new();
        parse_into(&path, &mut settings, &mut rules)?;
        Ok((settings, rules))
    }

    #[test]
    fn test_set_scalar() {
        let (settings, _) = parse("set threshold 5\nset duration 1h\n").unwrap();
        assert_eq!(settings.get_u32("threshold", 0), 5);
        assert_eq!(settings.get_duration("duration", 0).0, 3600);
    }

    #[test]
    fn test_set_list() {
        let (settings, _) = parse("set logfiles { /var/log/a /var/log/b }\n").unwrap();
        assert_eq!(settings.logfiles(), vec!["/var/log/a", "/var/log/b"]);
    }

    #[test]
    fn test_action_exec() {
        let (_, rules) =
            parse("action block { exec /sbin/iptables -I INPUT -s %(client) -j DROP }\n").unwrap();
        let def = rules.actions.get("block").expect("block defined");
        match &def.action {
            Action::Exec(args) => {
                assert_eq!(args[0], "/sbin/iptables");
                assert!(args.contains(&"%(client)".to_string()));
            }
            other => panic!("expected exec, got {:?}", other),
        }
    }

    #[test]
    fn test_action_print_with_vars() {
        let (_, rules) = parse("action note subject: probe { print %(subject) from %(client) }\n")
            .unwrap();
        let def = rules.actions.get("note").unwrap();
        assert_eq!(def.vars.get("subject"), Some(&Value::from("probe")));
        assert!(matches!(def.action, Action::Print(_)));
    }

    #[test]
    fn test_action_exit_with_status() {
        let (_, rules) = parse("action bail { exit 3 shutting down }\n").unwrap();
        match &rules.actions.get("bail").unwrap().action {
            Action::Exit { status, msg } => {
                assert_eq!(*status, 3);
                assert_eq!(msg, &vec!["shutting".to_string(), "down".to_string()]);
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[test]
    fn test_action_exit_bare() {
        let (_, rules) = parse("action bail { exit }\n").unwrap();
        match &rules.actions.get("bail").unwrap().action {
            Action::Exit { status, msg } => {
                assert_eq!(*status, 0);
                assert!(msg.is_empty());
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[test]
    fn test_action_null() {
        let (_, rules) = parse("action nop { null }\n").unwrap();
        assert!(matches!(
            rules.actions.get("nop").unwrap().action,
            Action::Null
        ));
    }

    #[test]
    fn test_unknown_action_type_fatal() {
        assert!(parse("action x { launch missiles }\n").is_err());
    }

    #[test]
    fn test_whitelist_classes() {
        let (_, rules) =
            parse("whitelist { 192.168.0.0/16 @office 127.0.0.0/8 2001:db8::/32 @docnet }\n")
                .unwrap();
        assert_eq!(rules.whitelists.len(), 1);
        let wl = &rules.whitelists[0];
        assert_eq!(
            wl.classes_for(&"192.168.5.7".parse().unwrap()),
            vec!["office"]
        );
        assert_eq!(
            wl.classes_for(&"127.0.0.2".parse().unwrap()),
            vec!["whitelisted"]
        );
        assert_eq!(
            wl.classes_for(&"2001:db8::1".parse().unwrap()),
            vec!["docnet"]
        );
    }

    #[test]
    fn test_whitelist_forced_families() {
        let (_, rules) = parse("whitelist { ipv4=10.0.0.0/8 ipv6=::1 }\n").unwrap();
        let wl = &rules.whitelists[0];
        assert!(!wl.classes_for(&"10.1.1.1".parse().unwrap()).is_empty());
        assert!(!wl.classes_for(&"::1".parse().unwrap()).is_empty());
    }

    #[test]
    fn test_whitelist_orphan_class_fatal() {
        assert!(parse("whitelist { @office 10.0.0.0/8 }\n").is_err());
    }

    #[test]
    fn test_skip_block_joined_alternation() {
        let (_, rules) = parse("skip { \\.css$ \\.js$ ^/healthz }\n").unwrap();
        assert_eq!(rules.skips.len(), 1);
        assert!(rules.skip_matches("/style.css"));
        assert!(rules.skip_matches("/app.js"));
        assert!(rules.skip_matches("/healthz"));
        assert!(!rules.skip_matches("/login"));
    }

    #[test]
    fn test_trigger_bare_regex_is_url_match() {
        let (_, rules) = parse("trigger action: notify port: 80 { ^/w00tw00t }\n").unwrap();
        assert_eq!(rules.triggers.len(), 1);
        let t = &rules.triggers[0];
        assert_eq!(t.field, "url");
        assert_eq!(t.vars.get("action"), Some(&Value::from("notify")));
        assert_eq!(t.vars.get("port"), Some(&Value::from("80")));
        assert!(t.threshold.is_none());
    }

    #[test]
    fn test_trigger_three_token_form() {
        let (_, rules) = parse("trigger action: block { $status = 404 $method != GET }\n").unwrap();
        assert_eq!(rules.triggers.len(), 2);
        assert_eq!(rules.triggers[0].field, "status");
        assert_eq!(rules.triggers[0].op, TriggerOp::Eq);
        assert_eq!(rules.triggers[1].field, "method");
        assert_eq!(rules.triggers[1].op, TriggerOp::Ne);
    }

    #[test]
    fn test_trigger_regex_ops() {
        let (_, rules) =
            parse("trigger { $user_agent ~ (?i)sqlmap $url !~ ^/static/ }\n").unwrap();
        assert_eq!(rules.triggers.len(), 2);
        assert_eq!(rules.triggers[0].op, TriggerOp::Match);
        assert_eq!(rules.triggers[1].op, TriggerOp::NoMatch);
    }

    #[test]
    fn test_trigger_with_threshold() {
        let (_, rules) =
            parse("trigger action: block threshold: 5 { $status = 404 }\n").unwrap();
        assert_eq!(rules.triggers[0].threshold, Some(5));
    }

    #[test]
    fn test_trigger_bad_threshold_fatal() {
        assert!(parse("trigger threshold: lots { ^/x }\n").is_err());
    }

    #[test]
    fn test_kv_preamble_joined_spelling() {
        let (_, rules) = parse("trigger action:notify { ^/probe }\n").unwrap();
        assert_eq!(
            rules.triggers[0].vars.get("action"),
            Some(&Value::from("notify"))
        );
    }

    #[test]
    fn test_unknown_keyword_error_has_context() {
        let err = parse("bogus one two three\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown keyword"), "{}", msg);
        assert!(msg.contains("bogus"), "{}", msg);
        assert!(msg.contains("three"), "{}", msg);
    }

    #[test]
    fn test_error_context_capped_at_ten_tokens() {
        let err = parse("bogus a b c d e f g h i j k l m\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("i"), "{}", msg);
        assert!(!msg.contains(" j k"), "{}", msg);
    }

    #[test]
    fn test_unclosed_block_fatal() {
        assert!(parse("skip { \\.css$\n").is_err());
    }

    #[test]
    fn test_bad_trigger_regex_fatal() {
        assert!(parse("trigger { $url ~ ( }\n").is_err());
    }

    #[test]
    fn test_multiple_files_accumulate() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.conf");
        let b = dir.path().join("b.conf");
        std::fs::write(&a, "set threshold 5\nskip { \\.css$ }\n").unwrap();
        std::fs::write(&b, "set threshold 7\nskip { \\.js$ }\n").unwrap();
        let mut settings = Settings::new();
        let mut rules = RuleSet::new();
        parse_into(&a, &mut settings, &mut rules).unwrap();
        parse_into(&b, &mut settings, &mut rules).unwrap();
        // Later files override scalars and append rules.
        assert_eq!(settings.get_u32("threshold", 0), 7);
        assert_eq!(rules.skips.len(), 2);
    }
}
