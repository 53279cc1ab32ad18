//! Bit-manipulation primitives: `bit-set`, `bit-clr`, `bit-toggle`, `bit-set?`,
//! `bit-clr?`, `bit-mask`.
//!
//! Grounded on `rforth.py`'s bit-test dispatch inside `primitive_if` (the `OP_BIT_SET?`/
//! `OP_BIT_CLR?` pseudo-op path) and the general "fold when both operands are static and
//! short-addressable, else fall back to a helper" shape shared with `memory.rs`.

use crate::compiler::{CompilerState, Mode};
use crate::messages::CompilerError;
use crate::opcode::{AddrFastOp, Access, BitOp, Fast, Opcode};
use crate::value::{access_bit, short_addr, Value};

fn access_of(addr: i64) -> Access {
    if access_bit(addr) {
        Access::Access
    } else {
        Access::NoAccess
    }
}

fn pending_value(op: &Opcode) -> Option<Value> {
    match op {
        Opcode::Push(v) => Some(v.clone()),
        _ => None,
    }
}

/// `bit-set`/`bit-clr`/`bit-toggle` ( bit addr -- ): when both operands are still
/// pending static pushes and the address is short (access bank or bank 1), collapses
/// directly to `bsf`/`bcf`/`btg`; otherwise calls a runtime helper that uses FSR1 as a
/// latched indirect pointer.
fn mutate(state: &mut CompilerState, op: BitOp, helper: &str) -> Result<(), CompilerError> {
    let last_two = (state.before_last_instruction().cloned(), state.last_instruction().cloned());
    if let (Some(bit_op), Some(addr_op)) = last_two {
        if let (Some(bit), Some(addr)) = (pending_value(&bit_op), pending_value(&addr_op)) {
            if let Some(a) = addr.static_value(&state.arena) {
                if bit.static_value(&state.arena).is_some() && short_addr(a) {
                    state.rewind(2)?;
                    return state.emit(Opcode::Bit(op, addr, bit, access_of(a)));
                }
            }
        }
    }
    let helper_id = state.runtime_helper(helper);
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper_id), Fast::NoFast))
}

pub fn bit_set(state: &mut CompilerState) -> Result<(), CompilerError> {
    mutate(state, BitOp::Bsf, "runtime-bit-set")
}

pub fn bit_clr(state: &mut CompilerState) -> Result<(), CompilerError> {
    mutate(state, BitOp::Bcf, "runtime-bit-clr")
}

pub fn bit_toggle(state: &mut CompilerState) -> Result<(), CompilerError> {
    mutate(state, BitOp::Btg, "runtime-bit-toggle")
}

/// `bit-set?`/`bit-clr?` ( bit addr -- flag ): same fold condition as `mutate`, but
/// emits the `OP_BIT_SET?`/`OP_BIT_CLR?` pseudo-op (a flag-producing test, expanded by
/// `optimizer::expand_word` into the real `btfss`/`btfsc` plus flag normalization) rather
/// than a direct mutate instruction.
fn test(state: &mut CompilerState, clr: bool, helper: &str) -> Result<(), CompilerError> {
    let last_two = (state.before_last_instruction().cloned(), state.last_instruction().cloned());
    if let (Some(bit_op), Some(addr_op)) = last_two {
        if let (Some(bit), Some(addr)) = (pending_value(&bit_op), pending_value(&addr_op)) {
            if let Some(a) = addr.static_value(&state.arena) {
                if bit.static_value(&state.arena).is_some() && short_addr(a) {
                    state.rewind(2)?;
                    return state.emit(if clr {
                        Opcode::BitClrQ(addr, bit, access_of(a))
                    } else {
                        Opcode::BitSetQ(addr, bit, access_of(a))
                    });
                }
            }
        }
    }
    let helper_id = state.runtime_helper(helper);
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper_id), Fast::NoFast))
}

pub fn bit_set_q(state: &mut CompilerState) -> Result<(), CompilerError> {
    test(state, false, "runtime-bit-set?")
}

pub fn bit_clr_q(state: &mut CompilerState) -> Result<(), CompilerError> {
    test(state, true, "runtime-bit-clr?")
}

/// `bit-mask` ( bit -- mask ): `1 << (bit & 7)`, folded when the bit index is static.
pub fn bit_mask(state: &mut CompilerState) -> Result<(), CompilerError> {
    if state.mode == Mode::Interpret {
        let n = state.pop_int()?;
        state.push_value(Value::number(1i64 << (n & 7)));
        return Ok(());
    }
    match state.last_instruction().cloned() {
        Some(op) if pending_value(&op).and_then(|v| v.static_value(&state.arena)).is_some() => {
            let n = pending_value(&op).unwrap().static_value(&state.arena).unwrap();
            state.rewind(1)?;
            state.emit(Opcode::Push(Value::number(1i64 << (n & 7))))
        }
        _ => {
            let helper = state.runtime_helper("runtime-bit-mask");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn bit_set_on_a_short_known_address_folds_to_bsf() {
        let mut state = CompilerState::new("t", vec![": w 3 0x20 bit-set ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Bit(BitOp::Bsf, _, _, _))));
    }

    #[test]
    fn bit_set_on_a_bank_1_address_uses_no_access() {
        let mut state = CompilerState::new("t", vec![": w 3 0x0120 bit-set ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Bit(BitOp::Bsf, _, _, Access::NoAccess))));
    }

    #[test]
    fn bit_mask_folds_a_static_index() {
        let mut state = CompilerState::new("t", vec![": w 3 bit-mask ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w
            .opcodes
            .iter()
            .any(|op| matches!(op, Opcode::Push(v) if v.static_value(&state.arena) == Some(8))));
    }
}
