//! Interrupt-related primitives: `intr-protect`/`intr-unprotect` (paired save/restore
//! of the global interrupt-enable bit) and `low-interrupt`/`high-interrupt` (mark the
//! current word as an ISR entry point).
//!
//! The protect/unprotect pair emits pseudo-ops that vanish entirely when interrupts were
//! never enabled for this compile (`optimizer::expand_word` drops them), and the ISR
//! markers swap the word's trailing `return` for `retfie` (already handled by
//! `definition::semicolon`, which reads `WordBody::isr`).

use crate::compiler::CompilerState;
use crate::entity::{EntityKind, IsrKind};
use crate::messages::CompilerError;
use crate::opcode::Opcode;

pub fn intr_protect(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::IntrProtect)
}

pub fn intr_unprotect(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.emit(Opcode::IntrUnprotect)
}

fn mark_isr(state: &mut CompilerState, kind: IsrKind) -> Result<(), CompilerError> {
    let id = state
        .current_object
        .ok_or_else(|| CompilerError::fatal("low-interrupt/high-interrupt used outside of a word definition"))?;
    match &mut state.arena.get_mut(id).kind {
        EntityKind::Word(w) => w.isr = kind,
        _ => return Err(CompilerError::internal("current object is not a Word in mark_isr")),
    }
    match kind {
        IsrKind::Low => state.low_interrupt = Some(id),
        IsrKind::High => state.high_interrupt = Some(id),
        IsrKind::None => {}
    }
    Ok(())
}

pub fn low_interrupt(state: &mut CompilerState) -> Result<(), CompilerError> {
    mark_isr(state, IsrKind::Low)
}

pub fn high_interrupt(state: &mut CompilerState) -> Result<(), CompilerError> {
    mark_isr(state, IsrKind::High)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn low_interrupt_marks_the_word_and_binds_the_isr_slot() {
        let mut state = CompilerState::new("t", vec![": isr low-interrupt ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("isr").unwrap();
        assert_eq!(state.low_interrupt, Some(id));
        match &state.arena.get(id).kind {
            EntityKind::Word(w) => assert_eq!(w.isr, IsrKind::Low),
            _ => panic!("expected a Word"),
        }
    }

    #[test]
    fn isr_word_ends_in_retfie_not_return() {
        let mut state = CompilerState::new("t", vec![": isr low-interrupt ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("isr").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w
            .opcodes
            .iter()
            .any(|op| matches!(op, Opcode::Fast(crate::opcode::FastOp::RetFie, _))));
        assert!(!w
            .opcodes
            .iter()
            .any(|op| matches!(op, Opcode::Fast(crate::opcode::FastOp::Return, _))));
    }
}
