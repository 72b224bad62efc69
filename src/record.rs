// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Access-log line parsing.
//!
//! Converts NCSA-combined log lines into structured [`LogRecord`]s,
//! recognizes in-band `*NAME [args]` control lines, and tracks the
//! `==> path <==` file-switch markers emitted by the external tail
//! subprocess when more than one file is followed. Lines matching none of
//! these are dropped silently: log-stream input is untrusted and noisy, and
//! the daemon must never abort on junk.

use regex::Regex;

use crate::template::{Value, VarMap};

/// One parsed access-log record. Immutable after parse.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Which input file the line came from (tail marker identity).
    pub file: String,
    /// The verbatim input line.
    pub logline: String,
    pub client: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM:SS`.
    pub time: String,
    /// Seconds of day: `H*3600 + M*60 + S`.
    pub sec: u32,
    pub tz: String,
    pub method: String,
    pub url: String,
    pub protocol: String,
    /// Three-digit status, kept as a string for exact matching.
    pub status: String,
    pub bytes: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

impl LogRecord {
    /// Look up a field by its selector name (as used in trigger rules).
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "file" => Some(&self.file),
            "logline" => Some(&self.logline),
            "client" => Some(&self.client),
            "date" => Some(&self.date),
            "time" => Some(&self.time),
            "tz" => Some(&self.tz),
            "method" => Some(&self.method),
            "url" => Some(&self.url),
            "protocol" => Some(&self.protocol),
            "status" => Some(&self.status),
            "bytes" => Some(&self.bytes),
            "referrer" => self.referrer.as_deref(),
            "user_agent" => self.user_agent.as_deref(),
            _ => None,
        }
    }

    /// Record fields as a template variable layer.
    pub fn vars(&self) -> VarMap {
        let mut vars = VarMap::new();
        for key in [
            "file", "client", "date", "time", "tz", "method", "url", "protocol", "status",
            "bytes", "referrer", "user_agent",
        ] {
            if let Some(val) = self.field(key) {
                vars.insert(key.to_string(), Value::from(val));
            }
        }
        vars.insert("sec".to_string(), Value::from(self.sec.to_string()));
        vars
    }
}

/// An in-band `*NAME [args]` control directive.
#[derive(Debug, Clone)]
pub struct ControlCommand {
    pub name: String,
    raw_args: String,
}

impl ControlCommand {
    pub fn new(name: &str, raw_args: &str) -> Self {
        ControlCommand {
            name: name.to_string(),
            raw_args: raw_args.to_string(),
        }
    }

    /// Whitespace-split positional arguments.
    pub fn args(&self) -> Vec<&str> {
        self.raw_args.split_whitespace().collect()
    }

    /// `k=v` argument pairs (tokens without `=` are dropped).
    pub fn kv_args(&self) -> Vec<(String, String)> {
        crate::util::parse_kv_args(&self.raw_args)
    }
}

/// Outcome of feeding one line to the parser.
#[derive(Debug)]
pub enum Parsed {
    Record(LogRecord),
    Control(ControlCommand),
    /// Dropped: junk, a consumed marker, or the line following a marker.
    Ignored,
}

fn month_number(name: &str) -> Option<&'static str> {
    match name {
        "Jan" => Some("01"),
        "Feb" => Some("02"),
        "Mar" => Some("03"),
        "Apr" => Some("04"),
        "May" => Some("05"),
        "Jun" => Some("06"),
        "Jul" => Some("07"),
        "Aug" => Some("08"),
        "Sep" => Some("09"),
        "Oct" => Some("10"),
        "Nov" => Some("11"),
        "Dec" => Some("12"),
        _ => None,
    }
}

/// Stateful line parser: tracks the current input file across tail
/// file-switch markers.
pub struct RecordParser {
    ncsa: Regex,
    control: Regex,
    file_switch: Regex,
    current_file: String,
    /// The tail marker is followed by one line we must consume.
    skip_next: bool,
}

impl RecordParser {
    pub fn new() -> Self {
        RecordParser {
            ncsa: Regex::new(
                r#"^(\S+) \S+ \S+ \[(\d+)/(\w+)/(\d+):(\d+):(\d+):(\d+) ([^\]]+)\] "([^"]*)" (\d\d\d) (\S+)(?: "([^"]*)" "([^"]*)")?"#,
            )
            .expect("NCSA pattern is valid"),
            control: Regex::new(r"^\*([A-Z]+)(?:\s+(.+))?$").expect("control pattern is valid"),
            file_switch: Regex::new(r"^==> (.*) <==$").expect("marker pattern is valid"),
            current_file: String::new(),
            skip_next: false,
        }
    }

    /// The input file subsequent records are attributed to.
    pub fn current_file(&self) -> &str {
        &self.current_file
    }

    pub fn parse_line(&mut self, line: &str) -> Parsed {
        if self.skip_next {
            self.skip_next = false;
            return Parsed::Ignored;
        }

        if let Some(caps) = self.control.captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let raw = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            return Parsed::Control(ControlCommand::new(name, raw));
        }

        if let Some(caps) = self.file_switch.captures(line) {
            self.current_file = caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
            self.skip_next = true;
            return Parsed::Ignored;
        }

        match self.parse_record(line) {
            Some(rec) => Parsed::Record(rec),
            None => Parsed::Ignored,
        }
    }

    fn parse_record(&self, line: &str) -> Option<LogRecord> {
        let caps = self.ncsa.captures(line)?;

        let client = caps.get(1)?.as_str().to_string();
        let day: u32 = caps.get(2)?.as_str().parse().ok()?;
        let month = month_number(caps.get(3)?.as_str())?;
        let year = caps.get(4)?.as_str();
        let hour: u32 = caps.get(5)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(6)?.as_str().parse().ok()?;
        let second: u32 = caps.get(7)?.as_str().parse().ok()?;
        let tz = caps.get(8)?.as_str().to_string();
        let request = caps.get(9)?.as_str();
        let status = caps.get(10)?.as_str().to_string();
        let bytes = caps.get(11)?.as_str().to_string();
        let referrer = caps.get(12).map(|m| m.as_str().to_string());
        let user_agent = caps.get(13).map(|m| m.as_str().to_string());

        let (method, url, protocol) = split_request(request);

        Some(LogRecord {
            file: self.current_file.clone(),
            logline: line.to_string(),
            client,
            date: format!("{}-{}-{:02}", year, month, day),
            time: format!("{:02}:{:02}:{:02}", hour, minute, second),
            sec: hour * 3600 + minute * 60 + second,
            tz,
            method,
            url,
            protocol,
            status,
            bytes,
            referrer,
            user_agent,
        })
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `METHOD SP URL SP PROTOCOL`; a request that does not split into
/// three parts is treated as all-URL with empty method and protocol.
fn split_request(request: &str) -> (String, String, String) {
    let parts: Vec<&str> = request.splitn(3, ' ').collect();
    if parts.len() == 3 && !parts[0].is_empty() && !parts[1].is_empty() {
        (
            parts[0].to_string(),
            parts[1].to_string(),
            parts[2].to_string(),
        )
    } else {
        (String::new(), request.to_string(), String::new())
    }
}
