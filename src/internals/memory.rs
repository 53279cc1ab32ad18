//! Memory-access primitives: `!`, `c!`, `@`, `c@`, `1+!`.
//!
//! Grounded on `rforth.py`'s `w_store`/`w_fetch`, which branch on whether the address
//! operand is a statically-known constant: a known RAM address compiles to direct
//! `movff`/`movwf`/`clrf` sequences, a known EEPROM address compiles to a call into the
//! EEPROM runtime helper, and an address that isn't known at compile time falls back to
//! an indirect (FSR1-based) runtime helper call.

use crate::compiler::CompilerState;
use crate::messages::CompilerError;
use crate::opcode::{AddrAccessOp, AddrFastOp, AddrPairOp, Access, Fast, JumpOp, Opcode};
use crate::value::{access_bit, eeprom_addr, ram_addr, Value};

fn access_of(state: &CompilerState, addr: &Value) -> Access {
    match addr.static_value(&state.arena) {
        Some(a) if access_bit(a) => Access::Access,
        Some(_) => Access::NoAccess,
        None => Access::Access,
    }
}

fn pending_address(state: &mut CompilerState) -> Result<Option<Value>, CompilerError> {
    match state.last_instruction() {
        Some(Opcode::Push(v)) if v.static_value(&state.arena).is_some() => {
            let v = v.clone();
            state.rewind(1)?;
            Ok(Some(v))
        }
        _ => Ok(None),
    }
}

/// Writes one literal byte to `addr`: `clrf` for a known-zero byte, otherwise
/// `movlw`/`movwf`.
fn write_literal(state: &mut CompilerState, byte: Value, addr: Value) -> Result<(), CompilerError> {
    let access = access_of(state, &addr);
    if byte.static_value(&state.arena) == Some(0) {
        state.emit(Opcode::AddrAccess(AddrAccessOp::ClrF, addr, access))
    } else {
        state.emit(Opcode::Jump(JumpOp::MovLw, byte))?;
        state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, addr, access))
    }
}

/// `!` to a statically-known RAM cell at `addr`/`addr+1`. Inspects what produced the
/// value being stored: a pending constant folds straight into `movlw`/`movwf` (or
/// `clrf` for a zero byte) with no data-stack traffic at all; a pending fetch from
/// another known RAM address folds into a direct `movff` pair; anything else falls
/// back to popping the two pushed bytes off the data stack.
fn store_cell(state: &mut CompilerState, addr: Value) -> Result<(), CompilerError> {
    let addr1 = addr.clone().add(Value::number(1));
    match state.last_instruction().cloned() {
        Some(Opcode::Push(v)) if v.static_value(&state.arena).is_some() => {
            state.rewind(1)?;
            let lo = crate::value::low(v.clone(), &state.arena);
            let hi = crate::value::high(v, &state.arena);
            write_literal(state, hi, addr1)?;
            write_literal(state, lo, addr)
        }
        Some(Opcode::Fetch(src)) if src.static_value(&state.arena).is_some_and(ram_addr) => {
            state.rewind(1)?;
            let src1 = src.clone().add(Value::number(1));
            state.emit(Opcode::AddrPair(AddrPairOp::MovFf, src1, addr1))?;
            state.emit(Opcode::AddrPair(AddrPairOp::MovFf, src, addr))
        }
        _ => {
            let access1 = access_of(state, &addr1);
            let access = access_of(state, &addr);
            state.emit(Opcode::PopW)?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, addr1, access1))?;
            state.emit(Opcode::PopW)?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, addr, access))
        }
    }
}

/// `!` ( n addr -- ): store a two-byte cell.
pub fn store(state: &mut CompilerState) -> Result<(), CompilerError> {
    match pending_address(state)? {
        Some(addr) => {
            let known = addr.static_value(&state.arena).unwrap();
            if eeprom_addr(known) {
                let helper = state.runtime_helper("runtime-ee!");
                state.emit(Opcode::Push(addr))?;
                state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
            } else {
                store_cell(state, addr)
            }
        }
        None => {
            let helper = state.runtime_helper("runtime-!");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

/// `c!` to a statically-known RAM byte at `addr`. Same producer-inspection as
/// `store_cell`, for one byte instead of a cell: a pending constant folds into
/// `write_literal`; a pending fetch/cfetch from another known RAM address folds into a
/// single `movff`; anything else falls back to popping one byte off the data stack.
fn store_byte(state: &mut CompilerState, addr: Value) -> Result<(), CompilerError> {
    match state.last_instruction().cloned() {
        Some(Opcode::Push(v)) if v.static_value(&state.arena).is_some() => {
            state.rewind(1)?;
            write_literal(state, crate::value::low(v, &state.arena), addr)
        }
        Some(Opcode::Fetch(src) | Opcode::CFetch(src)) if src.static_value(&state.arena).is_some_and(ram_addr) => {
            state.rewind(1)?;
            state.emit(Opcode::AddrPair(AddrPairOp::MovFf, src, addr))
        }
        _ => {
            let access = access_of(state, &addr);
            state.emit(Opcode::PopW)?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::MovWf, addr, access))
        }
    }
}

/// `c!` ( n addr -- ): store a single byte; otherwise identical to `!`.
pub fn c_store(state: &mut CompilerState) -> Result<(), CompilerError> {
    match pending_address(state)? {
        Some(addr) => {
            let known = addr.static_value(&state.arena).unwrap();
            if eeprom_addr(known) {
                let helper = state.runtime_helper("runtime-eec!");
                state.emit(Opcode::Push(addr))?;
                state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
            } else {
                store_byte(state, addr)
            }
        }
        None => {
            let helper = state.runtime_helper("runtime-c!");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

/// `@` ( addr -- n ): fetch a two-byte cell.
pub fn fetch(state: &mut CompilerState) -> Result<(), CompilerError> {
    match pending_address(state)? {
        Some(addr) => {
            let known = addr.static_value(&state.arena).unwrap();
            if eeprom_addr(known) {
                let helper = state.runtime_helper("runtime-ee@");
                state.emit(Opcode::Push(addr))?;
                state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
            } else if ram_addr(known) {
                state.emit(Opcode::Fetch(addr))
            } else {
                let helper = state.runtime_helper("runtime-@");
                state.emit(Opcode::Push(addr))?;
                state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
            }
        }
        None => {
            let helper = state.runtime_helper("runtime-@");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

/// `c@` ( addr -- n ): fetch a single byte.
pub fn c_fetch(state: &mut CompilerState) -> Result<(), CompilerError> {
    match pending_address(state)? {
        Some(addr) => {
            let known = addr.static_value(&state.arena).unwrap();
            if eeprom_addr(known) {
                let helper = state.runtime_helper("runtime-eec@");
                state.emit(Opcode::Push(addr))?;
                state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
            } else {
                state.emit(Opcode::CFetch(addr))
            }
        }
        None => {
            let helper = state.runtime_helper("runtime-c@");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

/// `1+!` ( addr -- ): increments the cell at `addr` in place. When `addr` is a known RAM
/// address this specializes to the classic `infsnz addr ; incf addr+1` two-byte
/// increment idiom (the low byte at `addr`, the high byte at the next cell up) rather
/// than a fetch-add-store round trip.
pub fn one_plus_store(state: &mut CompilerState) -> Result<(), CompilerError> {
    match pending_address(state)? {
        Some(addr) if ram_addr(addr.static_value(&state.arena).unwrap()) => {
            let addr1 = addr.clone().add(Value::number(1));
            state.emit(Opcode::AddrAccess(AddrAccessOp::InFsnz, addr, Access::Access))?;
            state.emit(Opcode::AddrAccess(AddrAccessOp::IncF, addr1, Access::Access))?;
            Ok(())
        }
        Some(addr) => {
            let helper = state.runtime_helper("runtime-1+!");
            state.emit(Opcode::Push(addr))?;
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
        None => {
            let helper = state.runtime_helper("runtime-1+!");
            state.emit(Opcode::AddrFast(AddrFastOp::Call, Value::reference(helper), Fast::NoFast))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn store_to_a_known_ram_address_emits_direct_movwf() {
        let mut state = CompilerState::new("t", vec!["variable x : w 5 x ! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::MovWf, _, _))));
    }

    #[test]
    fn fetch_from_a_known_ram_address_emits_the_fetch_pseudo_op() {
        let mut state = CompilerState::new("t", vec!["variable x : w x @ ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Fetch(_))));
    }

    #[test]
    fn store_of_a_non_constant_value_pops_two_bytes_off_the_data_stack() {
        let mut state =
            CompilerState::new("t", vec!["variable x : w dup + x ! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let pops = w.opcodes.iter().filter(|op| matches!(op, Opcode::PopW)).count();
        assert_eq!(pops, 2, "expected two PopW opcodes, got {:?}", w.opcodes);
        let movwfs = w
            .opcodes
            .iter()
            .filter(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::MovWf, _, _)))
            .count();
        assert_eq!(movwfs, 2);
    }

    #[test]
    fn store_to_a_bank_1_variable_uses_no_access() {
        let mut state = CompilerState::new("t", vec!["variable x : w 5 x ! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w
            .opcodes
            .iter()
            .any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::MovWf, _, Access::NoAccess))));
    }

    #[test]
    fn c_store_of_a_constant_folds_to_write_literal() {
        let mut state = CompilerState::new("t", vec!["cvariable x : w 5 x c! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::PopW)));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrAccess(AddrAccessOp::MovWf, _, _))));
    }

    #[test]
    fn c_store_of_a_known_ram_fetch_folds_to_movff() {
        let mut state =
            CompilerState::new("t", vec!["cvariable x cvariable y : w x c@ y c! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::AddrPair(AddrPairOp::MovFf, _, _))));
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::PopW)));
    }

    #[test]
    fn one_plus_store_to_a_known_ram_address_emits_infsnz_then_incf() {
        let mut state = CompilerState::new("t", vec!["variable x : w x 1+! ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let w = state.arena.get(id).word().unwrap();
        let found = w
            .opcodes
            .windows(2)
            .any(|pair| match (&pair[0], &pair[1]) {
                (
                    Opcode::AddrAccess(AddrAccessOp::InFsnz, _, _),
                    Opcode::AddrAccess(AddrAccessOp::IncF, _, _),
                ) => true,
                _ => false,
            });
        assert!(found, "expected infsnz followed by incf, got {:?}", w.opcodes);
    }
}
