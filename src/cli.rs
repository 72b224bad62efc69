// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Command-line option surface.
//!
//! Most options are sugar for config settings and are re-applied after
//! every reload so the command line keeps winning over the config file;
//! [`Cli::setting_overrides`] renders them as `KEY=VAL` defines.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "logvigil",
    about = "Log-driven intrusion-response daemon for HTTP access logs",
    disable_version_flag = true
)]
pub struct Cli {
    /// Append a config file; repeatable.
    #[arg(short = 'c', long = "config-file", value_name = "PATH")]
    pub config_file: Vec<PathBuf>,

    /// Override one config setting.
    #[arg(short = 'D', long = "define", value_name = "KEY=VAL")]
    pub define: Vec<String>,

    /// Redirect stdout to stderr; exec actions prepend echo.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Parse config, report OK per file, exit. Implies --verbose.
    #[arg(short = 't', long = "check-config")]
    pub check_config: bool,

    /// Log through syslog.
    #[arg(short = 's', long = "syslog")]
    pub syslog: bool,

    /// Do not log through syslog.
    #[arg(short = 'S', long = "nosyslog")]
    pub nosyslog: bool,

    /// Emit info-level messages.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Do not emit info-level messages.
    #[arg(short = 'V', long = "noverbose")]
    pub noverbose: bool,

    /// Verbose plus variable dumps on action failures.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Override the interval setting (seconds).
    #[arg(short = 'i', long = "interval", value_name = "N")]
    pub interval: Option<u32>,

    /// Override the window setting (seconds).
    #[arg(short = 'k', long = "window", value_name = "N")]
    pub window: Option<u32>,

    /// Override the threshold setting.
    #[arg(short = 'l', long = "threshold", value_name = "N")]
    pub threshold: Option<u32>,

    /// Do not drain expiries on exit.
    #[arg(short = 'F', long = "no-flush")]
    pub no_flush: bool,

    /// Detach: fork, new session, redirect std streams.
    #[arg(short = 'b', long = "daemon")]
    pub daemon: bool,

    /// Log files to follow; with none, config logfiles or stdin.
    #[arg(value_name = "LOGFILE")]
    pub logfiles: Vec<String>,
}

impl Cli {
    /// Render every option that shadows a config setting as a `KEY=VAL`
    /// define, `-D` defines first, flag options after (so the specific
    /// flags win).
    pub fn setting_overrides(&self) -> Vec<String> {
        let mut defines = self.define.clone();
        if self.syslog {
            defines.push("syslog=yes".to_string());
        }
        if self.nosyslog {
            defines.push("syslog=no".to_string());
        }
        if self.verbose || self.check_config {
            defines.push("verbose=yes".to_string());
        }
        if self.noverbose {
            defines.push("verbose=no".to_string());
        }
        if self.debug {
            defines.push("debug=yes".to_string());
        }
        if let Some(n) = self.interval {
            defines.push(format!("interval={}", n));
        }
        if let Some(n) = self.window {
            defines.push(format!("window={}", n));
        }
        if let Some(n) = self.threshold {
            defines.push(format!("threshold={}", n));
        }
        if self.no_flush {
            defines.push("flush=no".to_string());
        }
        if self.daemon {
            defines.push("daemon=yes".to_string());
        }
        defines
    }
}
