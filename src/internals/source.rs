//! Source-level primitives that act directly on the reader rather than the opcode
//! stream: the `( ... )` comment body and the `include`/`needs` file operations.
//!
//! Grounded on `rforth.py`'s `primitive_op` (`compiler.parse(')')`), `primitive_include`
//! and `primitive_needs` (`compiler.parse_word()` followed by `compiler.include`/
//! `compiler.needs`).

use crate::compiler::CompilerState;
use crate::messages::CompilerError;

/// `( ... )` — discards everything up to and including the next `)` on the current
/// line. Unterminated comments (no closing paren before end of input) are a fatal
/// error rather than silently swallowing the rest of the file.
pub fn paren_comment(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.reader.parse_delim(')').map(|_| ()).map_err(|_| {
        CompilerError::fatal("unterminated ( comment")
    })
}

fn next_name(state: &mut CompilerState) -> Result<String, CompilerError> {
    state.reader.next_token().map_err(|_| CompilerError::fatal("expected a filename, found end of input"))
}

/// `include FILE` — unconditionally pushes `FILE` onto the input stack.
pub fn include(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = next_name(state)?;
    state.reader.include(&name)
}

/// `needs FILE` — `include`, guarded by the loaded-files set.
pub fn needs(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = next_name(state)?;
    state.reader.needs(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn paren_comment_discards_up_to_close_paren() {
        let mut state = CompilerState::new("t", vec!["( this is ignored ) 42".to_string()]);
        state.run().unwrap();
        assert_eq!(state.pop_int().unwrap(), 42);
    }

    #[test]
    fn include_runs_the_included_file_then_resumes() {
        let dir = std::env::temp_dir().join(format!("rforth1-source-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let inc = dir.join("inc.fs");
        std::fs::write(&inc, "7\n").unwrap();
        let mut state =
            CompilerState::new("t", vec![format!("include {}", inc.display()), "1".to_string()]);
        state.run().unwrap();
        assert_eq!(state.pop_int().unwrap(), 1);
        assert_eq!(state.pop_int().unwrap(), 7);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn needs_does_not_reload_an_already_loaded_file() {
        let dir = std::env::temp_dir().join(format!("rforth1-needs-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let inc = dir.join("inc.fs");
        std::fs::write(&inc, "7\n").unwrap();
        let mut state = CompilerState::new(
            "t",
            vec![format!("needs {p} needs {p}", p = inc.display())],
        );
        state.run().unwrap();
        assert_eq!(state.pop_int().unwrap(), 7);
        assert!(state.data_stack.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
