//! Diagnostic reporting and the compiler's single error taxonomy.
//!
//! Grounded on the `self.msg.error(caller, msg, detail)` call-site contract used
//! throughout the teacher's `runtime.rs` and `internals/*.rs` — the defining `Msg` type
//! itself is not present anywhere in the retrieval pack, so this module authors it from
//! that implied contract, unified under one import path.

use std::fmt;
use crate::entity::SourceLoc;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One error taxonomy, five kinds. `Eof` is non-fatal and terminates the current `run`
/// (e.g. an `include`d file ran out of lines); the rest are fatal to the whole compile.
#[derive(Clone, Debug)]
pub enum CompilerError {
    Eof,
    Fatal(String),
    Unimplemented(String),
    Internal(String),
    Compilation { msg: String, at: SourceLoc },
}

impl CompilerError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        CompilerError::Fatal(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        CompilerError::Unimplemented(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompilerError::Internal(msg.into())
    }

    pub fn compilation(msg: impl Into<String>, at: SourceLoc) -> Self {
        CompilerError::Compilation { msg: msg.into(), at }
    }

    /// Whether this error should abort the whole compilation (everything except Eof).
    pub fn is_fatal_to_compile(&self) -> bool {
        !matches!(self, CompilerError::Eof)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::Eof => write!(f, "end of input"),
            CompilerError::Fatal(msg) => write!(f, "{}", msg),
            CompilerError::Unimplemented(msg) => write!(f, "not implemented: {}", msg),
            CompilerError::Internal(msg) => write!(f, "internal error: {}", msg),
            CompilerError::Compilation { msg, at } => write!(f, "{}: {}", at, msg),
        }
    }
}

impl std::error::Error for CompilerError {}

/// Severity-gated reporter. Mirrors the `DebugLevel`-driven message filtering of the
/// interactive interpreter this compiler descends from, but speaks its own
/// `ERROR:`/`WARNING:` print convention rather than that interpreter's trace format.
pub struct Msg {
    threshold: Severity,
    error_count: usize,
    warning_count: usize,
}

impl Default for Msg {
    fn default() -> Self {
        Msg { threshold: Severity::Warning, error_count: 0, warning_count: 0 }
    }
}

impl Msg {
    pub fn new() -> Self {
        Msg::default()
    }

    pub fn set_level(&mut self, level: Severity) {
        self.threshold = level;
    }

    pub fn level(&self) -> Severity {
        self.threshold
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Reports a fatal-looking diagnostic without raising; callers that want to abort
    /// still return a `CompilerError` themselves. This just prints and counts.
    pub fn error(&mut self, caller: &str, text: &str) {
        self.error_count += 1;
        eprintln!("ERROR: {}: {}", caller, text);
    }

    pub fn warning(&mut self, caller: &str, text: &str) {
        if self.threshold <= Severity::Warning {
            self.warning_count += 1;
            eprintln!("WARNING: {}: {}", caller, text);
        }
    }

    pub fn info(&mut self, caller: &str, text: &str) {
        if self.threshold <= Severity::Info {
            eprintln!("INFO: {}: {}", caller, text);
        }
    }

    pub fn debug(&mut self, caller: &str, text: &str) {
        if self.threshold <= Severity::Debug {
            eprintln!("DEBUG: {}: {}", caller, text);
        }
    }

    /// Prints a `CompilerError` the way the top-level driver does on a fatal abort.
    pub fn report(&mut self, err: &CompilerError) {
        self.error_count += 1;
        eprintln!("ERROR: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compilation_error_displays_location_prefixed() {
        let err = CompilerError::compilation("unknown word: foo", SourceLoc { file: "main.fs".into(), line: 3 });
        assert_eq!(err.to_string(), "main.fs:3: unknown word: foo");
    }

    #[test]
    fn eof_is_not_fatal_to_compile() {
        assert!(!CompilerError::Eof.is_fatal_to_compile());
        assert!(CompilerError::fatal("x").is_fatal_to_compile());
    }

    #[test]
    fn warning_respects_threshold() {
        let mut msg = Msg::new();
        msg.set_level(Severity::Error);
        msg.warning("test", "should be suppressed");
        assert_eq!(msg.warning_count(), 0);
        msg.set_level(Severity::Warning);
        msg.warning("test", "should print");
        assert_eq!(msg.warning_count(), 1);
    }
}
