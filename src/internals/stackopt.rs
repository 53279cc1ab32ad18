//! Stack-optimization primitives: `dup`, `drop`, `>w`, `w>`, `>r`, `r>`, `keep`, `bi`.
//!
//! Grounded on `rforth.py`'s `w_to_w`/`w_drop` peephole-style rewrites, which inspect the
//! last one or two emitted opcodes and collapse a pending push into a cheaper real
//! instruction rather than emitting a separate pop. Spec §4.4: "Each inspects the most
//! recently emitted opcode(s)... and rewrites them in place (by popping the tail via
//! `rewind` and re-emitting)."

use crate::compiler::CompilerState;
use crate::messages::CompilerError;
use crate::opcode::{AddrAccessOp, AddrFastOp, Access, Fast, Opcode};
use crate::value::Value;

/// Placeholder FSR0/FSR2 indirect-addressing offsets (see `control.rs` for the FSR2
/// counterpart used by `cfor`/`cnext`).
const PREINC0_ADDR: i64 = 0xfe1;
const PREINC2_ADDR: i64 = 0xfe4;
const POSTDEC2_ADDR: i64 = 0xfe6;

fn is_foldable_push(op: &Opcode) -> bool {
    matches!(op, Opcode::Push(_) | Opcode::Fetch(_) | Opcode::CFetch(_) | Opcode::PushW(_))
}

/// `dup` ( n -- n n ): if the top is still a pending push-like pseudo-op, re-emit a copy
/// of it (cheaper than a real stack duplicate); otherwise fall back to the generic `Dup`
/// pseudo-op which the expander turns into an indexed-copy sequence.
pub fn dup(state: &mut CompilerState) -> Result<(), CompilerError> {
    match state.last_instruction() {
        Some(op) if is_foldable_push(op) => {
            let op = op.clone();
            state.emit(op)
        }
        _ => state.emit(Opcode::Dup),
    }
}

/// `drop` ( n -- ): cancels a still-pending push outright; otherwise emits a real
/// stack-discard.
pub fn drop_(state: &mut CompilerState) -> Result<(), CompilerError> {
    match state.last_instruction() {
        Some(op) if is_foldable_push(op) => {
            state.rewind(1)?;
            Ok(())
        }
        _ => state.emit(Opcode::DropTos),
    }
}

/// `>w` ( n -- ): moves the top of the stack into W, specializing when the value is a
/// still-pending literal (becomes `movlw`) or RAM fetch (becomes `movf addr,W`).
pub fn to_w(state: &mut CompilerState) -> Result<(), CompilerError> {
    match state.last_instruction().cloned() {
        Some(Opcode::Push(v)) => {
            state.rewind(1)?;
            state.emit(Opcode::PushW(v))
        }
        Some(Opcode::Fetch(addr)) => {
            state.rewind(1)?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::MovF, addr, Access::Access))
        }
        _ => state.emit(Opcode::PopW),
    }
}

/// `w>` ( -- n ): pushes the current value of W onto the data stack.
pub fn w_from(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(PREINC0_ADDR), Access::Access))
}

/// `>r` ( n -- ): moves the top of the data stack to the return stack.
pub fn to_r(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::PopW)?;
    state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(PREINC2_ADDR), Access::Access))
}

/// `r>` ( -- n ): moves the top of the return stack to the data stack.
pub fn r_from(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::AddrAccess(AddrAccessOp::MovF, Value::number(POSTDEC2_ADDR), Access::Access))?;
    state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(PREINC0_ADDR), Access::Access))
}

/// `keep` ( n -- n ): re-pushes a copy of the value just produced, identical in effect to
/// `dup` for this compiler's purposes (both collapse to re-emitting a pending push).
pub fn keep(state: &mut CompilerState) -> Result<(), CompilerError> {
    dup(state)
}

/// `bi` ( a b -- a b ): applies two previously-referenced words to a shared, duplicated
/// value. `a` and `b` must already be on the data stack as entity references (pushed by
/// naming them in Interpret mode before entering `bi`).
pub fn bi(state: &mut CompilerState) -> Result<(), CompilerError> {
    let b = state.pop_entity()?;
    let a = state.pop_entity()?;
    state.emit(Opcode::Dup)?;
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(a), Fast::NoFast))?;
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(b), Fast::NoFast))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn drop_cancels_a_pending_push() {
        let mut state = CompilerState::new("t", vec![": w 5 drop ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::Push(_))));
    }

    #[test]
    fn dup_after_a_pending_push_re_emits_it() {
        let mut state = CompilerState::new("t", vec![": w 5 dup ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let pushes = w.opcodes.iter().filter(|op| matches!(op, Opcode::Push(_))).count();
        assert_eq!(pushes, 2);
    }

    #[test]
    fn to_w_after_a_pending_push_becomes_movlw() {
        let mut state = CompilerState::new("t", vec![": w 5 >w ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::PushW(_))));
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::Push(_))));
    }
}
