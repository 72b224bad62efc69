// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Named actions and their dispatch.
//!
//! Actions are tagged variants, not closures: interpretation is a pure
//! function of the variant over the merged argument map. Four types exist:
//! `print` emits through the logging facility, `exec` spawns an opaque
//! command (the firewall/notification side effects the daemon does not
//! own), `exit` runs the graceful shutdown path, and `null` does nothing.

use std::process::Stdio;

use crate::logging::Logger;
use crate::template::{expand, VarMap};

/// One action body from an `action NAME { TYPE ARGS… }` block.
#[derive(Debug, Clone)]
pub enum Action {
    /// Template-expand and space-join the args, emit at info priority.
    Print(Vec<String>),
    /// Template-expand each arg, spawn the command. Dry-run prepends `echo`.
    Exec(Vec<String>),
    /// Optionally log a message, then shut down with the given status.
    Exit { status: i32, msg: Vec<String> },
    /// No-op.
    Null,
}

/// A named action plus the `k:v` variable preamble from its block.
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub vars: VarMap,
    pub action: Action,
}

/// What the caller should do after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// An `exit` action requested shutdown with this status.
    Exit(i32),
}

/// Dispatch one action invocation. `vars` is the fully merged variable map
/// (config defaults, rule vars, record fields, invocation args).
pub async fn run(
    name: &str,
    def: &ActionDef,
    vars: &VarMap,
    logger: &Logger,
    dry_run: bool,
) -> Outcome {
    match &def.action {
        Action::Null => Outcome::Done,
        Action::Print(args) => {
            let line = args
                .iter()
                .map(|a| expand(a, vars))
                .collect::<Vec<_>>()
                .join(" ");
            logger.info(&line);
            Outcome::Done
        }
        Action::Exit { status, msg } => {
            if !msg.is_empty() {
                let line = msg
                    .iter()
                    .map(|a| expand(a, vars))
                    .collect::<Vec<_>>()
                    .join(" ");
                logger.info(&line);
            }
            Outcome::Exit(*status)
        }
        Action::Exec(args) => {
            let mut argv: Vec<String> = args.iter().map(|a| expand(a, vars)).collect();
            if dry_run {
                argv.insert(0, "echo".to_string());
            }
            exec(name, &argv, vars, logger).await;
            Outcome::Done
        }
    }
}

async fn exec(name: &str, argv: &[String], vars: &VarMap, logger: &Logger) {
    let Some(program) = argv.first().filter(|p| !p.is_empty()) else {
        logger.error(&format!("action '{}': empty command after expansion", name));
        return;
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&argv[1..]).stdin(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            logger.error(&format!(
                "action '{}': failed to spawn {}: {}",
                name,
                argv.join(" "),
                e
            ));
            log_bindings(name, vars, logger);
            return;
        }
    };

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            logger.error(&format!(
                "action '{}': {} exited with {}",
                name,
                argv.join(" "),
                status.code().unwrap_or(-1)
            ));
            log_bindings(name, vars, logger);
        }
        Err(e) => {
            logger.error(&format!("action '{}': wait failed: {}", name, e));
        }
    }
}

/// In debug mode, append the variable bindings that were in scope when an
/// action failed.
fn log_bindings(name: &str, vars: &VarMap, logger: &Logger) {
    if !logger.debug_enabled() {
        return;
    }
    let bindings = vars
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.render()))
        .collect::<Vec<_>>()
        .join(" ");
    logger.debug(&format!("action '{}' bindings: {}", name, bindings));
}
