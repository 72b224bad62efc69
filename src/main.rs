// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! logvigil — log-driven intrusion-response daemon.
//!
//! This is the entry point. It parses the command line, loads and checks
//! the rule config, optionally daemonizes, then hands a fully constructed
//! [`engine::Engine`] to the single-threaded main loop.
//!
//! Data flows one way:
//! tail/stdin → line → record/control → skip → whitelist → trigger →
//! threshold → violation enqueue → (later) expiry dispatch.

mod actions;
mod cli;
mod config;
mod engine;
mod logging;
mod record;
mod rules;
mod source;
mod template;
mod util;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use cli::Cli;
use config::{parser, Settings, DEFAULT_CONFIG_PATH};
use engine::{Engine, Flow};
use logging::Logger;
use rules::RuleSet;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let status = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(status);
        }
    };

    let config_paths: Vec<PathBuf> = if cli.config_file.is_empty() {
        vec![PathBuf::from(DEFAULT_CONFIG_PATH)]
    } else {
        cli.config_file.clone()
    };

    let mut settings = Settings::new();
    let mut rules = RuleSet::new();

    if cli.check_config {
        for path in &config_paths {
            match parser::parse_into(path, &mut settings, &mut rules) {
                Ok(()) => eprintln!("{}: OK", path.display()),
                Err(e) => {
                    eprintln!("logvigil: {:#}", e);
                    std::process::exit(2);
                }
            }
        }
        std::process::exit(0);
    }

    for path in &config_paths {
        if let Err(e) = parser::parse_into(path, &mut settings, &mut rules) {
            eprintln!("logvigil: {:#}", e);
            std::process::exit(2);
        }
    }

    let defines = cli.setting_overrides();
    for define in &defines {
        if let Err(e) = settings.apply_define(define) {
            eprintln!("logvigil: {:#}", e);
            std::process::exit(1);
        }
    }

    if cli.dry_run {
        // Everything meant for stdout goes to stderr instead.
        unsafe {
            libc::dup2(2, 1);
        }
    }

    if settings.get_bool("daemon") {
        if let Err(e) = daemonize() {
            eprintln!("logvigil: {:#}", e);
            std::process::exit(2);
        }
    }

    let logger = Logger::new(
        settings.get_bool("verbose"),
        settings.get_bool("debug"),
        settings.get_bool("syslog"),
    );

    let logfiles = if cli.logfiles.is_empty() {
        settings.logfiles()
    } else {
        cli.logfiles.clone()
    };

    let mut engine = Engine::new(settings, rules, logger, cli.dry_run);
    engine.set_reload_sources(config_paths, defines);

    // All engine state is owned by one task; the runtime stays
    // single-threaded by design.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("logvigil: cannot start runtime: {}", e);
            std::process::exit(2);
        }
    };

    let status = runtime.block_on(async move {
        let lines = if logfiles.is_empty() {
            engine.logger.verbose("reading from standard input");
            source::stdin_lines()
        } else {
            engine
                .logger
                .verbose(&format!("following {}", logfiles.join(", ")));
            match source::tail_lines(&logfiles) {
                Ok(rx) => rx,
                Err(e) => {
                    engine.logger.error(&format!("{:#}", e));
                    return 2;
                }
            }
        };
        run(engine, lines).await
    });
    std::process::exit(status);
}

/// The main loop: reload check, expiry tick, bounded wait for input,
/// classification. Signals only flip flags; the loop does the work.
async fn run(mut engine: Engine, mut lines: mpsc::Receiver<String>) -> i32 {
    let (mut hup, mut term, mut int) = match (
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(h), Ok(t), Ok(i)) => (h, t, i),
        _ => {
            engine.logger.error("cannot install signal handlers");
            return 2;
        }
    };

    loop {
        if engine.reload_requested {
            if let Err(e) = engine.reload() {
                // A live daemon must not run a half-parsed ruleset.
                engine.logger.error(&format!("reload failed: {:#}", e));
                return engine.quit(2).await;
            }
        }

        let now = unix_now();
        if let Flow::Exit(status) = engine.tick(now).await {
            return engine.quit(status).await;
        }
        let wakeup = engine.next_wakeup(now);

        tokio::select! {
            _ = hup.recv() => {
                engine.reload_requested = true;
            }
            _ = term.recv() => {
                return engine.quit(0).await;
            }
            _ = int.recv() => {
                return engine.quit(0).await;
            }
            res = tokio::time::timeout(wakeup, lines.recv()) => {
                match res {
                    Ok(Some(line)) => {
                        let now = unix_now();
                        if let Flow::Exit(status) = engine.handle_line(&line, now).await {
                            return engine.quit(status).await;
                        }
                    }
                    // Source EOF: the tail child died or stdin closed.
                    Ok(None) => {
                        return engine.quit(0).await;
                    }
                    // Quiet period elapsed; loop for the next tick.
                    Err(_) => {}
                }
            }
        }
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32
}

/// Detach from the controlling terminal: fork, new session, std streams
/// onto /dev/null.
fn daemonize() -> Result<()> {
    unsafe {
        match libc::fork() {
            -1 => bail!("fork failed"),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::setsid() == -1 {
            bail!("setsid failed");
        }
        let devnull = std::ffi::CString::new("/dev/null").expect("static path");
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, 0);
            libc::dup2(fd, 1);
            libc::dup2(fd, 2);
            if fd > 2 {
                libc::close(fd);
            }
        }
    }
    Ok(())
}
