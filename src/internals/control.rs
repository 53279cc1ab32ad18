//! Control-flow primitives. All of them stash labels on the compile-time data stack,
//! matching `rforth.py`'s `w_begin`/`w_again`/`w_until`/`w_if`/`w_then` family.
//!
//! Convention used throughout this module (an implementation choice the source made only
//! implicitly): a preceding word is expected to have left a Z-flag-style boolean in the
//! processor flags; `Bz` branches when that condition is false, `Bnz` when it is true.
//! `?if` is the one primitive that instead tests the carry flag, giving source programs a
//! second, independent condition to branch on without consuming a data-stack cell.

use crate::compiler::CompilerState;
use crate::entity::EntityId;
use crate::messages::CompilerError;
use crate::opcode::{AddrAccessOp, Access, JumpOp, Opcode};
use crate::value::Value;

/// Placeholder special-function-register offsets standing in for the FSR2 indirect
/// addressing pair used to implement the `cfor`/`cnext` byte-counted loop's counter.
const POSTDEC2_ADDR: i64 = 0xfe6;
const POSTINC2_ADDR: i64 = 0xfe8;

fn here_label(state: &mut CompilerState) -> EntityId {
    let loc = state.reader.current_location();
    state.alloc_label(loc)
}

pub fn begin(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = here_label(state);
    state.emit(Opcode::Label(label))?;
    state.push_entity(label);
    Ok(())
}

pub fn again(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = state.pop_entity()?;
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(label)))
}

/// `until`: loops back while the preceding condition is false (Z set), falls through
/// when true.
pub fn until(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = state.pop_entity()?;
    state.emit(Opcode::Jump(JumpOp::Bz, Value::reference(label)))
}

/// `while`: tests the condition now (exits the loop when false) and leaves both the
/// `begin` label and the new forward exit label on the stack for `repeat`.
pub fn while_(state: &mut CompilerState) -> Result<(), CompilerError> {
    let begin_label = state.pop_entity()?;
    let exit_label = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bz, Value::reference(exit_label)))?;
    state.push_entity(begin_label);
    state.push_entity(exit_label);
    Ok(())
}

pub fn repeat(state: &mut CompilerState) -> Result<(), CompilerError> {
    let exit_label = state.pop_entity()?;
    let begin_label = state.pop_entity()?;
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(begin_label)))?;
    state.emit(Opcode::Label(exit_label))
}

/// `if`: skips the following body when the condition is false. When the condition was a
/// statically known push (e.g. a literal), the branch folds away entirely: a zero
/// constant skips the body unconditionally (becomes an `ahead`), a non-zero constant
/// falls through unconditionally (the body just runs, with only a bookkeeping label left
/// for `then`/`else` to resolve).
pub fn if_(state: &mut CompilerState) -> Result<(), CompilerError> {
    let pending = match state.last_instruction() {
        Some(Opcode::Push(v)) => v.static_value(&state.arena),
        _ => None,
    };
    if let Some(known) = pending {
        state.rewind(1)?;
        if known == 0 {
            state.msg.warning("if", "constant 0 will never execute");
            return ahead(state);
        } else {
            state.msg.warning("if", "constant non-zero will always execute");
            let label = here_label(state);
            state.push_entity(label);
            return Ok(());
        }
    }
    let fwd = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bz, Value::reference(fwd)))?;
    state.push_entity(fwd);
    Ok(())
}

/// `?if`: the carry-flag-testing counterpart of `if`.
pub fn qif(state: &mut CompilerState) -> Result<(), CompilerError> {
    let fwd = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bnc, Value::reference(fwd)))?;
    state.push_entity(fwd);
    Ok(())
}

pub fn else_(state: &mut CompilerState) -> Result<(), CompilerError> {
    let if_fwd = state.pop_entity()?;
    let else_fwd = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(else_fwd)))?;
    state.emit(Opcode::Label(if_fwd))?;
    state.push_entity(else_fwd);
    Ok(())
}

pub fn then(state: &mut CompilerState) -> Result<(), CompilerError> {
    let fwd = state.pop_entity()?;
    state.emit(Opcode::Label(fwd))
}

/// `ahead`: an unconditional forward branch, closed by a later `then`.
pub fn ahead(state: &mut CompilerState) -> Result<(), CompilerError> {
    let fwd = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(fwd)))?;
    state.push_entity(fwd);
    Ok(())
}

/// `[[`: opens a scoped early-exit block; `exit` inside it jumps to the matching `]]`.
pub fn early_exit_open(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = here_label(state);
    state.early_exit_stack.push(label);
    Ok(())
}

pub fn early_exit_close(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = state
        .early_exit_stack
        .pop()
        .ok_or_else(|| CompilerError::fatal("]] with no matching [["))?;
    state.emit(Opcode::Label(label))
}

/// `exit`: jumps to the innermost open `[[ ]]` block's exit point, or to the current
/// word's own `end_label` if no early-exit block is open (an early `;`-equivalent).
pub fn exit(state: &mut CompilerState) -> Result<(), CompilerError> {
    let target = if let Some(&label) = state.early_exit_stack.last() {
        label
    } else {
        let id = state
            .current_object
            .ok_or_else(|| CompilerError::fatal("exit used outside of a word definition"))?;
        state
            .arena
            .get(id)
            .word()
            .ok_or_else(|| CompilerError::internal("current object is not a Word in exit"))?
            .end_label
    };
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(target)))
}

/// `cfor`: begins a byte-counted loop, moving the top of the virtual data stack into the
/// FSR2-indexed counter.
pub fn cfor(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::PopW)?;
    state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(POSTDEC2_ADDR), Access::Access))?;
    let label = here_label(state);
    state.emit(Opcode::Label(label))?;
    state.push_entity(label);
    Ok(())
}

/// `cnext`: decrements the counter; loops back unless it just reached zero.
pub fn cnext(state: &mut CompilerState) -> Result<(), CompilerError> {
    let label = state.pop_entity()?;
    state.emit(Opcode::AddrAccess(AddrAccessOp::DecFsz, Value::number(POSTINC2_ADDR), Access::Access))?;
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(label)))
}

/// `switchw`: begins a jump table dispatching on W. Leaves a marker (the shared exit
/// label) on the data stack for `casew`/`defaultw`/`endcasew` to find and `endswitchw`
/// to close.
pub fn switchw(state: &mut CompilerState) -> Result<(), CompilerError> {
    let end_label = here_label(state);
    state.push_entity(end_label);
    Ok(())
}

/// `casew` ( n -- ): compares W against `n`; on mismatch, skips to the next case.
pub fn casew(state: &mut CompilerState) -> Result<(), CompilerError> {
    let n = state.pop_value()?;
    state.emit(Opcode::Jump(JumpOp::XorLw, n))?;
    let skip = here_label(state);
    state.emit(Opcode::Jump(JumpOp::Bnz, Value::reference(skip)))?;
    state.push_entity(skip);
    Ok(())
}

/// `defaultw`: the unconditional fallthrough arm. Pushes a self-labeled no-op skip
/// target so `endcasew` can treat every arm uniformly.
pub fn defaultw(state: &mut CompilerState) -> Result<(), CompilerError> {
    let skip = here_label(state);
    state.emit(Opcode::Label(skip))?;
    state.push_entity(skip);
    Ok(())
}

/// `endcasew`: closes one arm by branching to the switch's shared exit, then resolving
/// this arm's skip-to-next-case target.
pub fn endcasew(state: &mut CompilerState) -> Result<(), CompilerError> {
    let skip = state.pop_entity()?;
    let end_label = state
        .data_stack
        .last()
        .and_then(|item| item.as_entity())
        .ok_or_else(|| CompilerError::fatal("endcasew outside of switchw"))?;
    state.emit(Opcode::Jump(JumpOp::Bra, Value::reference(end_label)))?;
    state.emit(Opcode::Label(skip))
}

pub fn endswitchw(state: &mut CompilerState) -> Result<(), CompilerError> {
    let end_label = state.pop_entity()?;
    state.emit(Opcode::Label(end_label))
}

/// `recurse`: calls the word currently being defined.
pub fn recurse(state: &mut CompilerState) -> Result<(), CompilerError> {
    let id = state
        .current_object
        .ok_or_else(|| CompilerError::fatal("recurse used outside of a word definition"))?;
    state.emit(Opcode::AddrFast(crate::opcode::AddrFastOp::Call, Value::reference(id), crate::opcode::Fast::NoFast))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::JumpOp;

    #[test]
    fn begin_until_loops_back_to_its_own_label() {
        let mut state = crate::compiler::CompilerState::new("t", vec![": loop begin until ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("loop").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let label = w.opcodes[1].as_label().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::Bz, v) if v.makes_reference_to(label))));
    }

    #[test]
    fn if_then_resolves_its_own_forward_label() {
        let mut state = crate::compiler::CompilerState::new("t", vec![": w if then ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let fwd = match &w.opcodes[1] {
            Opcode::Jump(JumpOp::Bz, v) => match v {
                Value::Reference(id) => *id,
                _ => panic!("expected a reference"),
            },
            _ => panic!("expected the if's conditional branch"),
        };
        assert!(w.opcodes.iter().any(|op| op.as_label() == Some(fwd)));
    }

    #[test]
    fn if_on_a_nonzero_constant_folds_away_the_branch() {
        let mut state = crate::compiler::CompilerState::new("t", vec![": main 1 if 42 then ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("main").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::Bz, _))));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Push(v) if v.static_value(&state.arena) == Some(42))));
        assert_eq!(state.msg.warning_count(), 1);
    }

    #[test]
    fn if_on_a_zero_constant_folds_to_an_unconditional_skip() {
        let mut state = crate::compiler::CompilerState::new("t", vec![": main 0 if 42 then ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("main").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::Bz, _))));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::Bra, _))));
        assert_eq!(state.msg.warning_count(), 1);
    }

    #[test]
    fn exit_targets_the_word_end_label_without_an_open_early_exit_block() {
        let mut state = crate::compiler::CompilerState::new("t", vec![": w exit ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::Bra, v) if v.makes_reference_to(w.end_label))));
    }
}
