//! Arithmetic-folding primitives: `+`, `-`, `*`, `lshift`, `1+`, `1-`.
//!
//! Grounded on `rforth.py`'s `w_plus`/`w_minus` constant-folding dispatch: when the two
//! most recently pending pushes are both still unexpanded, they're replaced by one
//! symbolic `Push` instead of two pushes plus a runtime combine. When only the operand
//! just pushed (the right-hand side) is a compile-time constant, `+` still avoids a
//! runtime helper call by inlining a short sequence that adds the constant straight
//! into the cell on top of the data stack (`primitive_plus`'s `elif v == ...` chain);
//! `-` reduces to this same path by negating the constant and delegating to `+`
//! (`primitive_minus`'s `compiler.push(Negated(value)); compiler.eval('+')`). When
//! neither fold applies, falls back to a call to a stdlib runtime helper (see
//! `CompilerState::runtime_helper`), mirroring the EEPROM/bit-test fallback pattern used
//! elsewhere in the primitive catalogue.

use crate::compiler::{CompilerState, Mode};
use crate::messages::CompilerError;
use crate::opcode::{self, AddrAccessOp, AddrFastOp, Access, Fast, JumpOp, Opcode};
use crate::value::{high, low, BinaryOp, UnaryOp, Value};

fn pending_value(op: &Opcode) -> Option<Value> {
    match op {
        Opcode::Push(v) => Some(v.clone()),
        _ => None,
    }
}

fn call_helper(state: &mut CompilerState, helper: &str) -> Result<(), CompilerError> {
    let helper_id = state.runtime_helper(helper);
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper_id), Fast::NoFast))
}

/// Inlines `*(fsr0) += v` directly into the data stack's top cell, per
/// `primitive_plus`'s constant special cases: a no-op for zero, the `runtime-1+` helper
/// for one (the same helper `1+` itself falls back on), a single `incf`/`decf` of the
/// high byte for `+0x0100`/`-0x0100`, a single `addwf` of the high byte when the low
/// byte is zero, and the general four-instruction low/high add-with-carry otherwise.
fn add_constant_to_tos(state: &mut CompilerState, v: Value) -> Result<(), CompilerError> {
    let indf0 = Value::number(opcode::INDF0);
    match v.static_value16(&state.arena) {
        Some(0) => Ok(()),
        Some(1) => call_helper(state, "runtime-1+"),
        Some(0x0100) => state.emit(Opcode::AddrAccess(AddrAccessOp::IncF, indf0, Access::Access)),
        Some(0xff00) => state.emit(Opcode::AddrAccess(AddrAccessOp::DecF, indf0, Access::Access)),
        Some(n) if n & 0xff == 0 => {
            state.emit(Opcode::Jump(JumpOp::MovLw, high(v, &state.arena)))?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::AddWf, indf0, Access::Access))
        }
        _ => {
            state.emit(Opcode::Jump(JumpOp::MovLw, low(v.clone(), &state.arena)))?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::MovF, Value::number(opcode::POSTDEC0), Access::Access))?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::AddWf, Value::number(opcode::POSTINC0), Access::Access))?;
            state.emit(Opcode::Jump(JumpOp::MovLw, high(v, &state.arena)))?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::AddWfC, indf0, Access::Access))
        }
    }
}

/// `+` ( a b -- sum ): full constant fold when both operands are still pending
/// literals; inline constant-add when only `b` is; otherwise a runtime helper call.
pub fn plus(state: &mut CompilerState) -> Result<(), CompilerError> {
    if state.mode == Mode::Interpret {
        let b = state.pop_value()?;
        let a = state.pop_value()?;
        state.push_value(Value::Binary(BinaryOp::Add, Box::new(a), Box::new(b)));
        return Ok(());
    }
    if let Some(b_op) = state.last_instruction().cloned() {
        if let Some(b) = pending_value(&b_op) {
            state.rewind(1)?;
            if let Some(a_op) = state.last_instruction().cloned() {
                if let Some(a) = pending_value(&a_op) {
                    state.rewind(1)?;
                    return state.emit(Opcode::Push(Value::Binary(BinaryOp::Add, Box::new(a), Box::new(b))));
                }
            }
            return add_constant_to_tos(state, b);
        }
    }
    call_helper(state, "runtime+")
}

/// `-` ( a b -- diff ): full constant fold when both operands are pending literals;
/// otherwise negates a pending `b` and delegates to `+`'s constant-add inlining;
/// otherwise a runtime helper call.
pub fn minus(state: &mut CompilerState) -> Result<(), CompilerError> {
    if state.mode == Mode::Interpret {
        let b = state.pop_value()?;
        let a = state.pop_value()?;
        state.push_value(Value::Binary(BinaryOp::Sub, Box::new(a), Box::new(b)));
        return Ok(());
    }
    if let Some(b_op) = state.last_instruction().cloned() {
        if let Some(b) = pending_value(&b_op) {
            state.rewind(1)?;
            if let Some(a_op) = state.last_instruction().cloned() {
                if let Some(a) = pending_value(&a_op) {
                    state.rewind(1)?;
                    return state.emit(Opcode::Push(Value::Binary(BinaryOp::Sub, Box::new(a), Box::new(b))));
                }
            }
            return add_constant_to_tos(state, Value::Unary(UnaryOp::Neg, Box::new(b)));
        }
    }
    call_helper(state, "runtime-")
}

fn binary(state: &mut CompilerState, op: BinaryOp, helper: &str) -> Result<(), CompilerError> {
    if state.mode == Mode::Interpret {
        let b = state.pop_value()?;
        let a = state.pop_value()?;
        state.push_value(Value::Binary(op, Box::new(a), Box::new(b)));
        return Ok(());
    }
    let last_two = (state.before_last_instruction().cloned(), state.last_instruction().cloned());
    if let (Some(a_op), Some(b_op)) = last_two {
        if let (Some(a), Some(b)) = (pending_value(&a_op), pending_value(&b_op)) {
            state.rewind(2)?;
            return state.emit(Opcode::Push(Value::Binary(op, Box::new(a), Box::new(b))));
        }
    }
    call_helper(state, helper)
}

pub fn times(state: &mut CompilerState) -> Result<(), CompilerError> {
    binary(state, BinaryOp::Mul, "runtime*")
}

pub fn lshift(state: &mut CompilerState) -> Result<(), CompilerError> {
    binary(state, BinaryOp::Shl, "runtime-lshift")
}

fn unary_increment(state: &mut CompilerState, delta: i64, helper: &str) -> Result<(), CompilerError> {
    if state.mode == Mode::Interpret {
        let a = state.pop_value()?;
        state.push_value(a.add(Value::number(delta)));
        return Ok(());
    }
    if let Some(op) = state.last_instruction().cloned() {
        if let Some(v) = pending_value(&op) {
            state.rewind(1)?;
            let folded = if delta >= 0 { v.add(Value::number(delta)) } else { v.sub(Value::number(-delta)) };
            return state.emit(Opcode::Push(folded));
        }
    }
    let helper_id = state.runtime_helper(helper);
    state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper_id), Fast::NoFast))
}

pub fn one_plus(state: &mut CompilerState) -> Result<(), CompilerError> {
    unary_increment(state, 1, "runtime-1+")
}

pub fn one_minus(state: &mut CompilerState) -> Result<(), CompilerError> {
    unary_increment(state, -1, "runtime-1-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn plus_folds_two_pending_literals() {
        let mut state = CompilerState::new("t", vec![": w 3 4 + ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let pushes: Vec<_> = w.opcodes.iter().filter_map(pending_value).collect();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].static_value(&state.arena), Some(7));
    }

    #[test]
    fn plus_in_interpret_mode_acts_on_the_data_stack() {
        let mut state = CompilerState::new("t", vec!["3 4 +".to_string()]);
        state.run().unwrap();
        assert_eq!(state.pop_int().unwrap(), 7);
    }

    #[test]
    fn one_plus_folds_a_pending_literal() {
        let mut state = CompilerState::new("t", vec![": w 41 1+ ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let pushes: Vec<_> = w.opcodes.iter().filter_map(pending_value).collect();
        assert_eq!(pushes[0].static_value(&state.arena), Some(42));
    }

    #[test]
    fn plus_without_pending_literals_calls_a_runtime_helper() {
        let mut state = CompilerState::new("t", vec![": w dup dup + ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, _))));
    }

    #[test]
    fn plus_with_a_static_0x0100_rhs_emits_a_single_incf() {
        let mut state = CompilerState::new("t", vec![": w dup 0x0100 + ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::IncF, _, _))));
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, _))));
    }

    #[test]
    fn plus_with_an_arbitrary_static_rhs_inlines_the_add_with_carry_sequence() {
        let mut state = CompilerState::new("t", vec![": w dup 5 + ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::AddWfC, _, _))));
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, _))));
    }

    #[test]
    fn minus_with_a_static_rhs_delegates_to_the_plus_inline_path() {
        let mut state = CompilerState::new("t", vec![": w dup 1 - ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::AddWfC, _, _))));
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, _))));
    }

    #[test]
    fn minus_without_any_pending_literal_calls_a_runtime_helper() {
        let mut state = CompilerState::new("t", vec![": w dup dup - ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, _))));
    }
}
