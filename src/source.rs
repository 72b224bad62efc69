// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Input line sources.
//!
//! The daemon reads either its standard input or the stdout of an external
//! follow-from-end tail subprocess (which emits `==> path <==` markers on
//! file switches). Either way the main loop sees one bounded mpsc channel
//! of lines; channel EOF means the source is gone and the daemon shuts
//! down. The tail child is spawned with `kill_on_drop` so shutdown
//! terminates it; tokio reaps the exit status.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 1000;

/// Resolve the absolute path of the tail binary.
///
/// Tries `/usr/bin/tail` first (most distros), then `/bin/tail`.
fn find_tail_path() -> Result<&'static str> {
    for path in ["/usr/bin/tail", "/bin/tail"] {
        if std::path::Path::new(path).exists() {
            return Ok(path);
        }
    }
    Err(anyhow!("tail binary not found at /usr/bin/tail or /bin/tail"))
}

/// Stream lines from standard input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                return;
            }
        }
        // EOF: dropping tx closes the channel and the main loop exits.
    });
    rx
}

/// Spawn the external follow-from-end tail over `files` and stream its
/// stdout. The child starts at end-of-file so only new records are seen.
pub fn tail_lines(files: &[String]) -> Result<mpsc::Receiver<String>> {
    let tail = find_tail_path()?;
    let mut cmd = tokio::process::Command::new(tail);
    cmd.arg("-n")
        .arg("0")
        .arg("-F")
        .args(files)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("cannot spawn {} for {:?}", tail, files))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("tail child has no stdout"))?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
        // The tail died or we are shutting down; reap it either way.
        let _ = child.wait().await;
    });
    Ok(rx)
}
