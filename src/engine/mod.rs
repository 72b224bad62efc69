// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! The correlation engine.
//!
//! One [`Engine`] value owns every piece of mutable state: the parsed
//! settings and rule tables, the global hit counter, the per-trigger
//! counters (inside the rule set), the timed violation queue, the
//! whitelist class cache, and the per-file date/timezone table. The main
//! loop feeds it lines and clock ticks; nothing else mutates it.
//!
//! Per-record evaluation order: silent whitelist → skip → whitelist →
//! triggers → global threshold.

pub mod counter;
pub mod queue;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::actions::{self, Outcome};
use crate::config::{parser, Settings};
use crate::logging::Logger;
use crate::record::{ControlCommand, LogRecord, Parsed, RecordParser};
use crate::rules::{whitelist, RuleSet};
use crate::template::{expand, merge, Value, VarMap};
use crate::util::dur2sec;
use counter::HitCounter;
use queue::{Enqueue, ViolationQueue};

/// Quiet-period ceiling on the main-loop wait, so periodic work still
/// happens when the queue is idle.
const MAX_TIMEOUT: u32 = 60;

/// What the main loop should do after an engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Shut down with this status.
    Exit(i32),
}

pub struct Engine {
    pub settings: Settings,
    pub rules: RuleSet,
    pub logger: Logger,
    pub reload_requested: bool,
    parser: RecordParser,
    counter: HitCounter,
    queue: ViolationQueue,
    /// Memoized first whitelist match per client, as (whitelist index,
    /// class union); cleared on CLEAR and reload.
    wl_cache: HashMap<String, Option<(usize, String)>>,
    /// Previous (date, tz) per input file; a rollover clears counters.
    file_state: HashMap<String, (String, String)>,
    dry_run: bool,
    config_paths: Vec<PathBuf>,
    cli_defines: Vec<String>,
    /// Action invocations observed by tests: (action name, client).
    #[cfg(test)]
    pub fired: Vec<(String, String)>,
}

impl Engine {
    pub fn new(settings: Settings, rules: RuleSet, logger: Logger, dry_run: bool) -> Self {
        Engine {
            settings,
            rules,
            logger,
            reload_requested: false,
            parser: RecordParser::new(),
            counter: HitCounter::new(),
            queue: ViolationQueue::new(),
            wl_cache: HashMap::new(),
            file_state: HashMap::new(),
            dry_run,
            config_paths: Vec::new(),
            cli_defines: Vec::new(),
            #[cfg(test)]
            fired: Vec::new(),
        }
    }

    /// Remember where the config came from so `*HUP`/SIGHUP can re-parse
    /// it and re-apply command-line overrides.
    pub fn set_reload_sources(&mut self, paths: Vec<PathBuf>, defines: Vec<String>) {
        self.config_paths = paths;
        self.cli_defines = defines;
    }

    // ── Main-loop entry points ─────────────────────────────────────────

    /// Feed one input line through classification.
    pub async fn handle_line(&mut self, line: &str, now: u32) -> Flow {
        match self.parser.parse_line(line) {
            Parsed::Control(cmd) => self.handle_control(cmd, now).await,
            Parsed::Record(rec) => self.process_record(rec, now).await,
            Parsed::Ignored => Flow::Continue,
        }
    }

    /// Fire every expiry whose deadline has passed, in deadline order.
    pub async fn tick(&mut self, now: u32) -> Flow {
        for entry in self.queue.due(now) {
            if entry.expire_action.is_empty() {
                continue;
            }
            if let Flow::Exit(status) = self.dispatch(&entry.expire_action, &entry.args).await {
                return Flow::Exit(status);
            }
        }
        Flow::Continue
    }

    /// How long the loop may wait for input before the next tick:
    /// `clamp(front deadline − now, 0, 60)`.
    pub fn next_wakeup(&self, now: u32) -> Duration {
        let secs = self
            .queue
            .next_deadline()
            .saturating_sub(now)
            .min(MAX_TIMEOUT);
        Duration::from_secs(secs as u64)
    }

    /// Graceful shutdown: drain the queue (unless `flush` is off), release
    /// the logging facility, hand back the exit status.
    pub async fn quit(&mut self, status: i32) -> i32 {
        if self.settings.get_bool("flush") {
            // Expire actions run to completion; a nested exit action
            // cannot preempt shutdown that is already underway.
            let _ = self.flush(&[]).await;
        }
        self.logger.close();
        status
    }

    /// Re-parse every config file into a fresh rule set and swap it in
    /// whole. A parse error here is fatal to the daemon: it must never
    /// run a half-parsed ruleset.
    pub fn reload(&mut self) -> Result<()> {
        self.reload_requested = false;
        let mut settings = Settings::new();
        let mut rules = RuleSet::new();
        for path in &self.config_paths {
            parser::parse_into(path, &mut settings, &mut rules)?;
        }
        for define in &self.cli_defines {
            settings.apply_define(define)?;
        }
        self.logger.set_flags(
            settings.get_bool("verbose"),
            settings.get_bool("debug"),
            settings.get_bool("syslog"),
        );
        self.settings = settings;
        self.rules = rules;
        self.counter.clear();
        self.wl_cache.clear();
        self.logger.verbose("configuration reloaded");
        Ok(())
    }

    // ── Record pipeline ────────────────────────────────────────────────

    async fn process_record(&mut self, rec: LogRecord, now: u32) -> Flow {
        self.check_rollover(&rec);

        // Loopback is silently whitelisted: no actions, no log output.
        if whitelist::is_silent(&rec.client) {
            return Flow::Continue;
        }

        if self.rules.skip_matches(&rec.url) {
            return Flow::Continue;
        }

        // Whitelist evaluation is skipped for clients that cannot be
        // numeric address literals.
        if whitelist::looks_numeric(&rec.client) {
            if let Some((wl_idx, classes)) = self.whitelist_classes(&rec.client) {
                let mut extra = VarMap::new();
                extra.insert("class".to_string(), Value::from(classes));
                let wl_vars = self.rules.whitelists[wl_idx].vars.clone();
                let vars = merge(&[self.settings.vars(), &wl_vars, &rec.vars(), &extra]);
                let msg = expand(&self.settings.get_str("whitelist.message"), &vars);
                self.logger.verbose(&msg);
                return Flow::Continue;
            }
        }

        let multitrigger = self.settings.get_bool("multitrigger");
        let window = self.settings.get_u32("window", 30);
        let hit_field = self.settings.get_str("hit");
        let key = rec
            .field(&hit_field)
            .unwrap_or(&rec.client)
            .to_string();

        // First pass: which triggers hit, and which of those cross their
        // own threshold. Firing is deferred so the counters settle first.
        let mut pending: Vec<(usize, Option<u32>)> = Vec::new();
        for idx in 0..self.rules.triggers.len() {
            let (matched, threshold) = {
                let t = &self.rules.triggers[idx];
                (t.matches(&rec), t.threshold)
            };
            if !matched {
                continue;
            }
            match threshold {
                None => pending.push((idx, None)),
                Some(limit) => {
                    let t = &mut self.rules.triggers[idx];
                    if let Some(count) = t.counter.record(rec.sec, &key, limit, window) {
                        pending.push((idx, Some(count)));
                    }
                }
            }
            if !multitrigger {
                break;
            }
        }

        for (idx, count) in pending {
            let (tvars, display) = {
                let t = &self.rules.triggers[idx];
                (t.vars.clone(), t.display.clone())
            };
            let mut extra = VarMap::new();
            extra.insert("trigger".to_string(), Value::from(display));
            let message_key = match count {
                Some(n) => {
                    extra.insert("count".to_string(), Value::from(n.to_string()));
                    extra.insert(
                        "interval".to_string(),
                        Value::from(self.settings.interval().to_string()),
                    );
                    "threshold.message"
                }
                None => "trigger.message",
            };
            let flow = self
                .fire_violation(message_key, &tvars, Some(&rec), extra, now)
                .await;
            if let Flow::Exit(status) = flow {
                return Flow::Exit(status);
            }
        }

        // Global threshold keyed by the configured hit field.
        let threshold = self.settings.get_u32("threshold", 10);
        if let Some(count) = self.counter.record(rec.sec, &key, threshold, window) {
            let mut extra = VarMap::new();
            extra.insert("count".to_string(), Value::from(count.to_string()));
            extra.insert(
                "interval".to_string(),
                Value::from(self.settings.interval().to_string()),
            );
            return self
                .fire_violation("threshold.message", &VarMap::new(), Some(&rec), extra, now)
                .await;
        }

        Flow::Continue
    }

    /// A date or timezone change on a given input file flushes the global
    /// counter and the whitelist cache without affecting other files.
    fn check_rollover(&mut self, rec: &LogRecord) {
        let state = (rec.date.clone(), rec.tz.clone());
        match self.file_state.get(&rec.file) {
            Some(prev) if *prev != state => {
                self.counter.clear();
                self.wl_cache.clear();
                self.logger.verbose(&format!(
                    "date/tz rollover on '{}': counters cleared",
                    rec.file
                ));
                self.file_state.insert(rec.file.clone(), state);
            }
            Some(_) => {}
            None => {
                self.file_state.insert(rec.file.clone(), state);
            }
        }
    }

    fn whitelist_classes(&mut self, client: &str) -> Option<(usize, String)> {
        if let Some(cached) = self.wl_cache.get(client) {
            return cached.clone();
        }
        let result = whitelist::lookup(&self.rules.whitelists, client);
        self.wl_cache.insert(client.to_string(), result.clone());
        result
    }

    // ── Violations ─────────────────────────────────────────────────────

    /// Common violation path: log the message template, then enqueue with
    /// dedup. The action fires only on the first observation of a vkey;
    /// refreshes just push the expiry deadline to `now + duration`.
    async fn fire_violation(
        &mut self,
        message_key: &str,
        rule_vars: &VarMap,
        rec: Option<&LogRecord>,
        extra: VarMap,
        now: u32,
    ) -> Flow {
        let rec_vars = rec.map(|r| r.vars()).unwrap_or_default();
        let merged = merge(&[self.settings.vars(), rule_vars, &rec_vars, &extra]);

        let msg = expand(&self.settings.get_str(message_key), &merged);
        self.logger.verbose(&msg);

        let action = merged.get("action").map(|v| v.render()).unwrap_or_default();
        if action.is_empty() {
            return Flow::Continue;
        }

        let client = merged.get("client").map(|v| v.render()).unwrap_or_default();
        let vkey = format!("{}={}", client, action);

        let (duration, junk) = match merged.get("duration") {
            Some(v) => dur2sec(&v.render()),
            None => (600, None),
        };
        if let Some(junk) = junk {
            self.logger
                .warning(&format!("ignoring trailing '{}' in duration", junk));
        }
        let expire_action = merged.get("expire").map(|v| v.render()).unwrap_or_default();

        let entry = queue::entry(
            now.saturating_add(duration),
            &expire_action,
            merged.clone(),
            &vkey,
        );
        if self.queue.enqueue(entry) == Enqueue::First {
            return self.dispatch(&action, &merged).await;
        }
        Flow::Continue
    }

    /// Resolve a named action and run it over the merged variable map.
    async fn dispatch(&mut self, name: &str, vars: &VarMap) -> Flow {
        #[cfg(test)]
        self.fired.push((
            name.to_string(),
            vars.get("client").map(|v| v.render()).unwrap_or_default(),
        ));

        let Some(def) = self.rules.actions.get(name) else {
            self.logger.error(&format!("undefined action '{}'", name));
            return Flow::Continue;
        };
        let merged = merge(&[&def.vars, vars]);
        match actions::run(name, def, &merged, &self.logger, self.dry_run).await {
            Outcome::Done => Flow::Continue,
            Outcome::Exit(status) => Flow::Exit(status),
        }
    }

    // ── Control lines ──────────────────────────────────────────────────

    async fn handle_control(&mut self, cmd: ControlCommand, now: u32) -> Flow {
        match cmd.name.as_str() {
            "HUP" => {
                self.reload_requested = true;
                Flow::Continue
            }
            "FLUSH" => self.flush(&cmd.kv_args()).await,
            "EXIT" => {
                let status = cmd
                    .args()
                    .first()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                Flow::Exit(status)
            }
            "DUMP" => {
                let kv = cmd.kv_args();
                let path = kv
                    .iter()
                    .find(|(k, _)| k == "file")
                    .map(|(_, v)| v.as_str());
                self.dump(path);
                Flow::Continue
            }
            "VIOL" => {
                let mut extra = VarMap::new();
                for (k, v) in cmd.kv_args() {
                    extra.insert(k, Value::from(v));
                }
                self.fire_violation("control.message", &VarMap::new(), None, extra, now)
                    .await
            }
            other => {
                // Unknown control names consult the user action table and
                // are otherwise ignored.
                if self.rules.actions.contains_key(other) {
                    let mut extra = VarMap::new();
                    for (k, v) in cmd.kv_args() {
                        extra.insert(k, Value::from(v));
                    }
                    let vars = merge(&[self.settings.vars(), &extra]);
                    let name = other.to_string();
                    self.dispatch(&name, &vars).await
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Fire and remove every entry whose argument map is a superset of
    /// `filter`; an empty filter drains the queue.
    pub async fn flush(&mut self, filter: &[(String, String)]) -> Flow {
        for entry in self.queue.flush(filter) {
            if entry.expire_action.is_empty() {
                continue;
            }
            if let Flow::Exit(status) = self.dispatch(&entry.expire_action, &entry.args).await {
                return Flow::Exit(status);
            }
        }
        Flow::Continue
    }

    /// Write every live queue entry to `path` (or stdout) as one JSON
    /// object per line, sorted keys plus a human-readable `expiration`.
    pub fn dump(&self, path: Option<&str>) {
        let mut sink: Box<dyn Write> = match path {
            Some(p) => match std::fs::File::create(p) {
                Ok(f) => Box::new(f),
                Err(e) => {
                    self.logger.error(&format!("cannot dump to {}: {}", p, e));
                    return;
                }
            },
            None => Box::new(std::io::stdout()),
        };
        for entry in self.queue.iter_live() {
            if writeln!(sink, "{}", entry.dump_line()).is_err() {
                self.logger.error("dump write failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionDef};
    use crate::rules::whitelist::{Family, Whitelist};

    /// A fresh engine with null `block`/`unblock`/`notify` actions, quiet
    /// logger, and the given settings overrides.
    fn test_engine(overrides: &[(&str, &str)]) -> Engine {
        let mut settings = Settings::new();
        for (k, v) in overrides {
            settings.set(k, Value::from(*v));
        }
        let mut rules = RuleSet::new();
        for name in ["block", "unblock", "notify"] {
            rules.actions.insert(
                name.to_string(),
                ActionDef {
                    vars: VarMap::new(),
                    action: Action::Null,
                },
            );
        }
        Engine::new(settings, rules, Logger::new(false, false, false), false)
    }

    fn line(client: &str, time: &str, url: &str) -> String {
        format!(
            r#"{} - - [05/Feb/2026:{}] "GET {} HTTP/1.1" 404 0"#,
            client, time, url
        )
    }

    fn count_fired(engine: &Engine, action: &str, client: &str) -> usize {
        engine
            .fired
            .iter()
            .filter(|(a, c)| a == action && c == client)
            .count()
    }

    // S1: threshold crossing fires block once, unblock once at expiry.
    #[tokio::test]
    async fn test_scenario_threshold_enter_and_leave_once() {
        let mut e = test_engine(&[
            ("threshold", "2"),
            ("window", "30"),
            ("duration", "60s"),
            ("action", "block"),
            ("expire", "unblock"),
        ]);

        // Seconds of day 100..102 → 00:01:40 .. 00:01:42.
        let inputs = [
            (100, "00:01:40 +0000"),
            (100, "00:01:40 +0000"),
            (101, "00:01:41 +0000"),
            (101, "00:01:41 +0000"),
            (102, "00:01:42 +0000"),
        ];
        for (now, time) in inputs {
            let flow = e.handle_line(&line("10.1.1.1", time, "/foo"), now).await;
            assert_eq!(flow, Flow::Continue);
        }

        // block fired exactly once, after the third line.
        assert_eq!(count_fired(&e, "block", "10.1.1.1"), 1);
        // Refreshes pushed the deadline to 102 + 60.
        assert_eq!(e.queue.next_deadline(), 162);

        assert_eq!(e.tick(161).await, Flow::Continue);
        assert_eq!(count_fired(&e, "unblock", "10.1.1.1"), 0);
        assert_eq!(e.tick(162).await, Flow::Continue);
        assert_eq!(count_fired(&e, "unblock", "10.1.1.1"), 1);
        // Leave is exactly-once: further ticks fire nothing.
        assert_eq!(e.tick(300).await, Flow::Continue);
        assert_eq!(count_fired(&e, "unblock", "10.1.1.1"), 1);
        assert!(e.queue.is_empty());
    }

    // S2: silent whitelist suppresses everything.
    #[tokio::test]
    async fn test_scenario_silent_whitelist() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "block")]);
        e.handle_line(&line("127.0.0.1", "00:01:40 +0000", "/foo"), 100)
            .await;
        assert!(e.fired.is_empty());
        assert!(e.queue.is_empty());
        assert!(e.wl_cache.is_empty());
    }

    // S3: whitelist class match short-circuits and is cached.
    #[tokio::test]
    async fn test_scenario_whitelist_class_cached() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "block")]);
        let mut wl = Whitelist::new(VarMap::new());
        wl.add("192.168.0.0/16", Some("office"), Family::Auto).unwrap();
        e.rules.whitelists.push(wl);

        e.handle_line(&line("192.168.5.7", "00:01:40 +0000", "/foo"), 100)
            .await;
        assert!(e.fired.is_empty());
        assert_eq!(
            e.wl_cache.get("192.168.5.7"),
            Some(&Some((0, "office".to_string())))
        );

        // Second line served from the cache, still no violation.
        e.handle_line(&line("192.168.5.7", "00:01:41 +0000", "/bar"), 101)
            .await;
        assert!(e.fired.is_empty());
    }

    // S4: literal trigger fires its action with the rule's variables.
    #[tokio::test]
    async fn test_scenario_literal_trigger() {
        let mut e = test_engine(&[]);
        let mut tvars = VarMap::new();
        tvars.insert("action".to_string(), Value::from("notify"));
        tvars.insert("port".to_string(), Value::from("80"));
        e.rules.triggers.push(
            crate::rules::trigger::Trigger::url_pattern("^/w00tw00t", tvars, None).unwrap(),
        );

        e.handle_line(
            &line("1.2.3.4", "00:01:40 +0000", "/w00tw00t.at.ISC.SANS"),
            100,
        )
        .await;
        assert_eq!(count_fired(&e, "notify", "1.2.3.4"), 1);

        let entry = e.queue.iter_live().next().expect("entry queued");
        assert_eq!(entry.vkey, "1.2.3.4=notify");
        assert_eq!(entry.args.get("port"), Some(&Value::from("80")));
        assert_eq!(entry.args.get("client"), Some(&Value::from("1.2.3.4")));
    }

    // S5: a skipped URL touches no counters.
    #[tokio::test]
    async fn test_scenario_skip_before_counters() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "block")]);
        e.rules
            .skips
            .push(regex::Regex::new(r"\.css$").unwrap());
        e.handle_line(&line("9.9.9.9", "00:01:40 +0000", "/style.css"), 100)
            .await;
        assert!(e.fired.is_empty());
        assert!(e.counter.oldest_bucket().is_none());
        assert!(e.queue.is_empty());
    }

    // S6: control FLUSH with a filter drains only matching entries.
    #[tokio::test]
    async fn test_scenario_control_flush_filtered() {
        let mut e = test_engine(&[
            ("threshold", "0"),
            ("action", "block"),
            ("expire", "unblock"),
            ("duration", "600"),
        ]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        e.handle_line(&line("5.6.7.8", "00:01:41 +0000", "/b"), 101)
            .await;
        assert_eq!(e.queue.len(), 2);

        e.handle_line("*FLUSH client=1.2.3.4", 102).await;
        assert_eq!(count_fired(&e, "unblock", "1.2.3.4"), 1);
        assert_eq!(count_fired(&e, "unblock", "5.6.7.8"), 0);
        assert_eq!(e.queue.len(), 1);
    }

    // S7 routes through the counter; covered in counter tests. Here:
    // whitelist precedence. A whitelisted client never reaches triggers
    // or thresholds in the same iteration.
    #[tokio::test]
    async fn test_whitelist_precedence_over_triggers() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "block")]);
        let mut wl = Whitelist::new(VarMap::new());
        wl.add("10.0.0.0/8", None, Family::Auto).unwrap();
        e.rules.whitelists.push(wl);
        let mut tvars = VarMap::new();
        tvars.insert("action".to_string(), Value::from("notify"));
        e.rules
            .triggers
            .push(crate::rules::trigger::Trigger::url_pattern(".", tvars, None).unwrap());

        e.handle_line(&line("10.1.1.1", "00:01:40 +0000", "/x"), 100)
            .await;
        assert!(e.fired.is_empty());
        assert!(e.counter.oldest_bucket().is_none());
    }

    #[tokio::test]
    async fn test_hostname_client_skips_whitelist_but_triggers_apply() {
        let mut e = test_engine(&[]);
        let mut wl = Whitelist::new(VarMap::new());
        wl.add("0.0.0.0/0", None, Family::Auto).unwrap();
        e.rules.whitelists.push(wl);
        let mut tvars = VarMap::new();
        tvars.insert("action".to_string(), Value::from("notify"));
        e.rules
            .triggers
            .push(crate::rules::trigger::Trigger::url_pattern(".", tvars, None).unwrap());

        // A hostname client bypasses the whitelist (heuristic) yet still
        // hits the trigger.
        e.handle_line(&line("evil.example.com", "00:01:40 +0000", "/x"), 100)
            .await;
        assert_eq!(count_fired(&e, "notify", "evil.example.com"), 1);
    }

    #[tokio::test]
    async fn test_per_trigger_threshold_routes_through_counter() {
        let mut e = test_engine(&[("threshold", "1000"), ("window", "30")]);
        let mut tvars = VarMap::new();
        tvars.insert("action".to_string(), Value::from("notify"));
        e.rules.triggers.push(
            crate::rules::trigger::Trigger::url_pattern("^/login", tvars, Some(2)).unwrap(),
        );

        for (i, now) in [100u32, 100, 101].iter().enumerate() {
            let time = format!("00:01:{:02} +0000", 40 + (now - 100));
            e.handle_line(&line("1.2.3.4", &time, "/login"), *now).await;
            if i < 2 {
                assert_eq!(count_fired(&e, "notify", "1.2.3.4"), 0, "hit {}", i + 1);
            }
        }
        assert_eq!(count_fired(&e, "notify", "1.2.3.4"), 1);
    }

    #[tokio::test]
    async fn test_multitrigger_off_stops_at_first_hit() {
        let mut e = test_engine(&[]);
        for action in ["block", "notify"] {
            let mut tvars = VarMap::new();
            tvars.insert("action".to_string(), Value::from(action));
            e.rules
                .triggers
                .push(crate::rules::trigger::Trigger::url_pattern(".", tvars, None).unwrap());
        }
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/x"), 100)
            .await;
        assert_eq!(count_fired(&e, "block", "1.2.3.4"), 1);
        assert_eq!(count_fired(&e, "notify", "1.2.3.4"), 0);
    }

    #[tokio::test]
    async fn test_multitrigger_on_evaluates_all() {
        let mut e = test_engine(&[("multitrigger", "yes")]);
        for action in ["block", "notify"] {
            let mut tvars = VarMap::new();
            tvars.insert("action".to_string(), Value::from(action));
            e.rules
                .triggers
                .push(crate::rules::trigger::Trigger::url_pattern(".", tvars, None).unwrap());
        }
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/x"), 100)
            .await;
        assert_eq!(count_fired(&e, "block", "1.2.3.4"), 1);
        assert_eq!(count_fired(&e, "notify", "1.2.3.4"), 1);
    }

    #[tokio::test]
    async fn test_control_exit_with_status() {
        let mut e = test_engine(&[]);
        assert_eq!(e.handle_line("*EXIT 4", 100).await, Flow::Exit(4));
        assert_eq!(e.handle_line("*EXIT", 100).await, Flow::Exit(0));
    }

    #[tokio::test]
    async fn test_control_hup_sets_reload_flag() {
        let mut e = test_engine(&[]);
        assert!(!e.reload_requested);
        e.handle_line("*HUP", 100).await;
        assert!(e.reload_requested);
    }

    #[tokio::test]
    async fn test_control_viol_synthetic_violation() {
        let mut e = test_engine(&[("duration", "600")]);
        e.handle_line("*VIOL client=6.6.6.6 action=block port=80", 100)
            .await;
        assert_eq!(count_fired(&e, "block", "6.6.6.6"), 1);
        let entry = e.queue.iter_live().next().unwrap();
        assert_eq!(entry.vkey, "6.6.6.6=block");
        assert_eq!(entry.expire_at, 700);
    }

    #[tokio::test]
    async fn test_unknown_control_ignored() {
        let mut e = test_engine(&[]);
        assert_eq!(e.handle_line("*BOGUS whatever", 100).await, Flow::Continue);
        assert!(e.fired.is_empty());
    }

    #[tokio::test]
    async fn test_control_named_user_action() {
        let mut e = test_engine(&[]);
        // NOTIFY resolves through the user action table.
        e.rules.actions.insert(
            "NOTIFY".to_string(),
            ActionDef {
                vars: VarMap::new(),
                action: Action::Null,
            },
        );
        e.handle_line("*NOTIFY client=1.2.3.4", 100).await;
        assert_eq!(count_fired(&e, "NOTIFY", "1.2.3.4"), 1);
    }

    #[tokio::test]
    async fn test_control_dump_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.dump");
        let mut e = test_engine(&[
            ("threshold", "0"),
            ("action", "block"),
            ("duration", "60"),
        ]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        e.handle_line(&format!("*DUMP file={}", path.display()), 101)
            .await;
        let dumped = std::fs::read_to_string(&path).unwrap();
        assert_eq!(dumped.lines().count(), 1);
        assert!(dumped.contains("\"client\":\"1.2.3.4\""));
        assert!(dumped.contains("\"expiration\""));
    }

    #[tokio::test]
    async fn test_quit_flushes_when_enabled() {
        let mut e = test_engine(&[
            ("threshold", "0"),
            ("action", "block"),
            ("expire", "unblock"),
        ]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        let status = e.quit(0).await;
        assert_eq!(status, 0);
        assert_eq!(count_fired(&e, "unblock", "1.2.3.4"), 1);
        assert!(e.queue.is_empty());
    }

    #[tokio::test]
    async fn test_quit_no_flush_when_disabled() {
        let mut e = test_engine(&[
            ("threshold", "0"),
            ("action", "block"),
            ("expire", "unblock"),
            ("flush", "no"),
        ]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        e.quit(0).await;
        assert_eq!(count_fired(&e, "unblock", "1.2.3.4"), 0);
    }

    #[tokio::test]
    async fn test_date_rollover_clears_counters() {
        let mut e = test_engine(&[("threshold", "2"), ("action", "block")]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        assert!(e.counter.oldest_bucket().is_some());

        // Next day, same file: counters and cache reset, no stale firing.
        let next_day =
            r#"1.2.3.4 - - [06/Feb/2026:00:01:40 +0000] "GET /a HTTP/1.1" 404 0"#;
        e.handle_line(next_day, 86500).await;
        assert!(e.fired.is_empty());
    }

    #[tokio::test]
    async fn test_undefined_action_logged_not_fatal() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "no-such-action")]);
        let flow = e
            .handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn test_violation_without_action_is_message_only() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "")]);
        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        assert!(e.fired.is_empty());
        assert!(e.queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_wakeup_clamped() {
        let mut e = test_engine(&[
            ("threshold", "0"),
            ("action", "block"),
            ("duration", "600"),
        ]);
        // Idle queue: sentinel deadline clamps to the 60s ceiling.
        assert_eq!(e.next_wakeup(100), Duration::from_secs(60));

        e.handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        // Deadline at 700: still clamped to 60.
        assert_eq!(e.next_wakeup(100), Duration::from_secs(60));
        // Close to the deadline the wait shrinks.
        assert_eq!(e.next_wakeup(695), Duration::from_secs(5));
        // Past deadline: zero, never negative.
        assert_eq!(e.next_wakeup(1000), Duration::from_secs(0));
    }

    #[tokio::test]
    async fn test_exit_action_propagates_flow() {
        let mut e = test_engine(&[("threshold", "0"), ("action", "die")]);
        e.rules.actions.insert(
            "die".to_string(),
            ActionDef {
                vars: VarMap::new(),
                action: Action::Exit {
                    status: 7,
                    msg: Vec::new(),
                },
            },
        );
        let flow = e
            .handle_line(&line("1.2.3.4", "00:01:40 +0000", "/a"), 100)
            .await;
        assert_eq!(flow, Flow::Exit(7));
    }
}
