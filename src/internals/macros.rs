//! The compile-time macro facility: `macro NAME ... ;macro` records the raw token
//! sequence between the two keywords, and every later occurrence of `NAME` re-runs
//! those tokens through `interpret_token` in whatever mode the call site is currently in,
//! then discards the macro's private state. It is a textual, zero-argument expansion
//! restricted to the vocabulary already available to the compiler — there is no escape
//! to a host-language interpreter.

use crate::compiler::CompilerState;
use crate::entity::{EntityKind, Section};
use crate::messages::CompilerError;

/// `macro NAME` — collects tokens verbatim until `;macro` and stores them, unexpanded,
/// on a new dictionary entry. Nested `macro ... ;macro` is not supported: the first
/// `;macro` token found always closes the definition being collected.
pub fn macro_start(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = state
        .reader
        .next_token()
        .map_err(|_| CompilerError::fatal("macro: expected a name, found end of input"))?;
    let mut tokens = Vec::new();
    loop {
        let tok = state.reader.next_token()?;
        if tok == ";macro" {
            break;
        }
        tokens.push(tok);
    }
    state.define(&name, Section::Undefined, EntityKind::Macro { tokens });
    Ok(())
}

/// `;macro` is only ever consumed by `macro_start`'s collection loop; reaching this
/// primitive directly means it appeared with no matching open `macro`.
pub fn macro_end(_state: &mut CompilerState) -> Result<(), CompilerError> {
    Err(CompilerError::fatal(";macro with no matching macro"))
}

/// Re-interprets a macro word's stored tokens in whatever mode the call site is
/// currently in — Compile mode so each token compiles into the surrounding word exactly
/// as if it had been pasted inline, Interpret mode so it runs immediately against the
/// compile-time data stack. This is what makes it a textual expansion rather than a
/// single compiled call: the macro itself never owns opcodes of its own.
pub fn expand(state: &mut CompilerState, id: crate::entity::EntityId) -> Result<(), CompilerError> {
    let tokens = match &state.arena.get(id).kind {
        EntityKind::Macro { tokens } => tokens.clone(),
        _ => return Err(CompilerError::internal("expand called on a non-macro entity")),
    };
    for tok in &tokens {
        state.interpret_token(tok)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn macro_body_runs_at_every_call_site() {
        let mut state = CompilerState::new(
            "t",
            vec!["macro double-it dup + ;macro : w 3 double-it ;".to_string()],
        );
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        // `double-it` expands to `dup +`, both ordinary words compiled in Compile mode.
        assert!(w.opcodes.len() > 1);
    }

    #[test]
    fn macro_definition_itself_emits_nothing() {
        let mut state = CompilerState::new("t", vec!["macro noop-macro ;macro".to_string()]);
        state.run().unwrap();
        assert!(state.lookup("noop-macro").is_some());
    }
}
