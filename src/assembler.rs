//! Downstream assembler invocation: after a successful emission, spawn the configured
//! assembler binary against the emitted file and adopt its exit status as the
//! compiler's own.
//!
//! Grounded on `internals/console.rs`'s `f_system_p` (`std::process::Command`, argv
//! split, spawn-and-wait), generalized here to inherit stdout/stderr directly rather
//! than capture-then-replay them, since this isn't itself a Forth word printing through
//! the compiler's own I/O layer.

use std::path::Path;
use std::process::Command;

use crate::messages::CompilerError;

/// Invokes `argv0` (normally `gpasm`, resolved via `PATH`) with `output_file` as its
/// only argument. Returns the child's exit code; a signal-killed child with no exit
/// code is reported as a fatal error rather than silently treated as success.
pub fn assemble(argv0: &str, output_file: &Path) -> Result<i32, CompilerError> {
    let status = Command::new(argv0)
        .arg(output_file)
        .status()
        .map_err(|e| CompilerError::fatal(format!("failed to run assembler '{}': {}", argv0, e)))?;
    status
        .code()
        .ok_or_else(|| CompilerError::fatal(format!("assembler '{}' terminated by signal", argv0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_assembler_binary_is_a_fatal_error() {
        let result = assemble("definitely-not-a-real-assembler-binary", &PathBuf::from("out.asm"));
        assert!(result.is_err());
    }

    #[test]
    fn a_real_binary_that_exits_zero_reports_zero() {
        let result = assemble("true", &PathBuf::from("/dev/null"));
        assert_eq!(result.unwrap(), 0);
    }
}
