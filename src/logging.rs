// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Severity-tagged logging to stderr or syslog.
//!
//! The daemon logs through one [`Logger`] value owned by the engine.
//! Info-level messages honor the `verbose` gate, debug messages the `debug`
//! gate; warnings and errors always emit. With `syslog` enabled, messages
//! route to the system logger via `libc` (facility `daemon`, ident
//! `logvigil`) instead of stderr.

use std::ffi::CString;

/// Message priority, mapped onto syslog levels when syslog is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    fn syslog_priority(self) -> libc::c_int {
        match self {
            Severity::Debug => libc::LOG_DEBUG,
            Severity::Info => libc::LOG_INFO,
            Severity::Warning => libc::LOG_WARNING,
            Severity::Error => libc::LOG_ERR,
        }
    }
}

/// The daemon's logging facility.
pub struct Logger {
    verbose: bool,
    debug: bool,
    syslog: bool,
    // Keeps the ident string alive for the lifetime of the openlog session.
    ident: Option<CString>,
}

impl Logger {
    pub fn new(verbose: bool, debug: bool, syslog: bool) -> Self {
        let mut logger = Logger {
            verbose: verbose || debug,
            debug,
            syslog: false,
            ident: None,
        };
        if syslog {
            logger.open_syslog();
        }
        logger
    }

    /// Reconfigure gates after a config reload.
    pub fn set_flags(&mut self, verbose: bool, debug: bool, syslog: bool) {
        self.verbose = verbose || debug;
        self.debug = debug;
        if syslog && !self.syslog {
            self.open_syslog();
        } else if !syslog && self.syslog {
            self.close();
        }
    }

    pub fn verbose_enabled(&self) -> bool {
        self.verbose
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    fn open_syslog(&mut self) {
        let ident = CString::new("logvigil").expect("static ident");
        unsafe {
            libc::openlog(ident.as_ptr(), libc::LOG_PID, libc::LOG_DAEMON);
        }
        self.ident = Some(ident);
        self.syslog = true;
    }

    /// Close the syslog session if one is open.
    pub fn close(&mut self) {
        if self.syslog {
            unsafe {
                libc::closelog();
            }
            self.syslog = false;
            self.ident = None;
        }
    }

    fn emit(&self, severity: Severity, msg: &str) {
        if self.syslog {
            let cmsg = match CString::new(msg) {
                Ok(c) => c,
                Err(_) => CString::new(msg.replace('\0', "?")).unwrap_or_default(),
            };
            let fmt = b"%s\0";
            unsafe {
                libc::syslog(
                    severity.syslog_priority(),
                    fmt.as_ptr() as *const libc::c_char,
                    cmsg.as_ptr(),
                );
            }
        } else {
            eprintln!("logvigil: {}: {}", severity.label(), msg);
        }
    }

    /// Info-priority message, unconditional (used by the `print` action).
    pub fn info(&self, msg: &str) {
        self.emit(Severity::Info, msg);
    }

    /// Info-priority message gated by the `verbose` setting.
    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            self.emit(Severity::Info, msg);
        }
    }

    pub fn warning(&self, msg: &str) {
        self.emit(Severity::Warning, msg);
    }

    pub fn error(&self, msg: &str) {
        self.emit(Severity::Error, msg);
    }

    /// Debug message gated by the `debug` setting.
    pub fn debug(&self, msg: &str) {
        if self.debug {
            self.emit(Severity::Debug, msg);
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_implies_verbose() {
        let logger = Logger::new(false, true, false);
        assert!(logger.verbose_enabled());
        assert!(logger.debug_enabled());
    }

    #[test]
    fn test_default_gates_off() {
        let logger = Logger::new(false, false, false);
        assert!(!logger.verbose_enabled());
        assert!(!logger.debug_enabled());
    }

    #[test]
    fn test_set_flags_updates_gates() {
        let mut logger = Logger::new(false, false, false);
        logger.set_flags(true, false, false);
        assert!(logger.verbose_enabled());
        assert!(!logger.debug_enabled());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::Info.label(), "INFO");
        assert_eq!(Severity::Error.label(), "ERROR");
    }
}
