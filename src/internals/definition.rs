//! Definition-family primitives: `:`/`;`, the named-data words (`constant`, `variable`,
//! `cvariable`, `eevariable`, `eecvariable`, `value`, `bit`), `create`/`,`/`c,`/`allot`,
//! and `forward`.
//!
//! Grounded on `rforth.py`'s `w_colon`/`w_semicolon`/`w_constant`/`w_variable`/`w_create`
//! functions and the `make_word`/`make_variable` dictionary-construction idiom in
//! `runtime.rs`.

use crate::compiler::{CompilerState, Mode};
use crate::entity::{EntityKind, Flags, Section, WordBody};
use crate::messages::CompilerError;
use crate::opcode::{Fast, FastOp, Opcode};
use crate::value::Value;

fn expect_name(state: &mut CompilerState) -> Result<String, CompilerError> {
    state.reader.next_token().map_err(|_| CompilerError::fatal("expected a name, found end of input"))
}

/// `: NAME` — begins a new Word definition and switches to Compile mode.
pub fn colon(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = expect_name(state)?;
    let id = state.define(&name, Section::Code, EntityKind::Word(WordBody::new(0)));
    let end_label = state.alloc_label(state.reader.current_location());
    if let EntityKind::Word(w) = &mut state.arena.get_mut(id).kind {
        w.end_label = end_label;
    }
    state.current_object = Some(id);
    state.mode = Mode::Compile;
    state.emit(Opcode::Label(id))?;
    Ok(())
}

/// `;` — closes the current Word: appends its `end_label` and a plain return, then
/// returns to Interpret mode. If the word was marked as an interrupt service routine
/// the return is `retfie` instead of a plain `return`.
pub fn semicolon(state: &mut CompilerState) -> Result<(), CompilerError> {
    let id = state
        .current_object
        .ok_or_else(|| CompilerError::fatal("; with no matching :"))?;
    let (end_label, isr) = {
        let w = state
            .arena
            .get(id)
            .word()
            .ok_or_else(|| CompilerError::internal("current object is not a Word in ;"))?;
        (w.end_label, w.isr)
    };
    state.emit(Opcode::Label(end_label))?;
    match isr {
        crate::entity::IsrKind::None => state.emit(Opcode::Fast(FastOp::Return, Fast::NoFast))?,
        _ => state.emit(Opcode::Fast(FastOp::RetFie, Fast::NoFast))?,
    }
    state.current_object = None;
    state.mode = Mode::Interpret;
    Ok(())
}

/// `constant` ( n "name" -- ): binds the top of the data stack as a named compile-time
/// integer.
pub fn constant(state: &mut CompilerState) -> Result<(), CompilerError> {
    let v = state.pop_value()?;
    let name = expect_name(state)?;
    state.define(&name, Section::Constants, EntityKind::Constant(v));
    Ok(())
}

fn define_cell(
    state: &mut CompilerState,
    size: i64,
    eeprom: bool,
    initializer: Option<Value>,
) -> Result<(), CompilerError> {
    let name = expect_name(state)?;
    let addr = if eeprom { state.allot_eeprom(size) } else { state.allot_ram(size) };
    let id = state.define(
        &name,
        if eeprom { Section::Memory } else { Section::Memory },
        EntityKind::Variable { address: Value::number(addr) },
    );
    if state.initialize_variables {
        if let Some(init) = initializer {
            emit_initializer(state, id, init, eeprom, size)?;
        }
    }
    Ok(())
}

/// Emits `init := 0` (or the given initial value) into `init_runtime` by pushing the
/// value and the address and dispatching through the same store primitive an ordinary
/// `!`/`c!` call site would use, so a known RAM address specializes to a direct
/// `movwf`/two-byte store exactly as it would for hand-written source.
fn emit_initializer(
    state: &mut CompilerState,
    var_id: crate::entity::EntityId,
    init: Value,
    eeprom: bool,
    size: i64,
) -> Result<(), CompilerError> {
    let init_runtime = state
        .init_runtime
        .ok_or_else(|| CompilerError::internal("init_runtime not yet allocated"))?;
    state.switch_object(init_runtime, Mode::Compile);
    let addr = Value::reference(var_id);
    state.emit(Opcode::Push(init))?;
    state.emit(Opcode::Push(addr))?;
    if eeprom {
        if size == 1 {
            crate::internals::memory::c_store(state)?;
        } else {
            crate::internals::memory::store(state)?;
        }
    } else if size == 1 {
        crate::internals::memory::c_store(state)?;
    } else {
        crate::internals::memory::store(state)?;
    }
    state.restore_object()
}

pub fn variable(state: &mut CompilerState) -> Result<(), CompilerError> {
    define_cell(state, 2, false, Some(Value::number(0)))
}

pub fn cvariable(state: &mut CompilerState) -> Result<(), CompilerError> {
    define_cell(state, 1, false, Some(Value::number(0)))
}

pub fn eevariable(state: &mut CompilerState) -> Result<(), CompilerError> {
    define_cell(state, 2, true, Some(Value::number(0)))
}

pub fn eecvariable(state: &mut CompilerState) -> Result<(), CompilerError> {
    define_cell(state, 1, true, Some(Value::number(0)))
}

/// `value` ( n "name" -- ): a named value cell, initialized from the stack rather than
/// defaulting to zero.
pub fn value_word(state: &mut CompilerState) -> Result<(), CompilerError> {
    let init = state.pop_value()?;
    let name = expect_name(state)?;
    let addr = state.allot_ram(2);
    let id = state.define(&name, Section::Memory, EntityKind::ValueCell { address: Value::number(addr) });
    if state.initialize_variables {
        emit_initializer(state, id, init, false, 2)?;
    }
    Ok(())
}

/// `create` ( "name" -- ): begins a static-data block; subsequent `,`/`c,`/`allot`
/// append to it until the next definition.
pub fn create(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = expect_name(state)?;
    let id = state.define(
        &name,
        Section::StaticData,
        EntityKind::FlashData { data: Vec::new(), original: String::new() },
    );
    state.current_object = Some(id);
    Ok(())
}

fn current_flash_data(state: &mut CompilerState) -> Result<&mut Vec<u8>, CompilerError> {
    let id = state
        .current_object
        .ok_or_else(|| CompilerError::fatal(", / c, / allot used outside of a create block"))?;
    match &mut state.arena.get_mut(id).kind {
        EntityKind::FlashData { data, .. } => Ok(data),
        _ => Err(CompilerError::fatal(", / c, / allot used outside of a create block")),
    }
}

/// `,` ( n -- ): append a two-byte (little-endian) cell to the current `create` block.
pub fn comma(state: &mut CompilerState) -> Result<(), CompilerError> {
    let n = state.pop_int()?;
    let data = current_flash_data(state)?;
    data.push((n & 0xff) as u8);
    data.push(((n >> 8) & 0xff) as u8);
    Ok(())
}

/// `c,` ( n -- ): append a single byte to the current `create` block.
pub fn c_comma(state: &mut CompilerState) -> Result<(), CompilerError> {
    let n = state.pop_int()?;
    let data = current_flash_data(state)?;
    data.push((n & 0xff) as u8);
    Ok(())
}

/// `allot` ( n -- ): reserve n zero bytes after the current `create` block.
pub fn allot(state: &mut CompilerState) -> Result<(), CompilerError> {
    let n = state.pop_int()?;
    let data = current_flash_data(state)?;
    data.extend(std::iter::repeat(0u8).take(n.max(0) as usize));
    Ok(())
}

/// `bit` ( addr bit-index "name" -- ): defines a named bit on a byte address.
pub fn bit_word(state: &mut CompilerState) -> Result<(), CompilerError> {
    let bit = state.pop_value()?;
    let address = state.pop_value()?;
    let name = expect_name(state)?;
    state.define(&name, Section::Constants, EntityKind::Bit { address, bit });
    Ok(())
}

/// `forward` ( "name" -- ): declares an unresolved placeholder. A later redefinition of
/// the same name triggers the Forward-resolution rewrite once the new entity is known.
pub fn forward(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = expect_name(state)?;
    state.define(&name, Section::Undefined, EntityKind::Forward { resolved: None });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_semicolon_roundtrip_defines_a_word_ending_in_return() {
        let mut state = CompilerState::new("t", vec![": noop ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("noop").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(matches!(w.opcodes.first(), Some(Opcode::Label(_))));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Fast(FastOp::Return, Fast::NoFast))));
    }

    #[test]
    fn constant_folds_to_a_static_value() {
        let mut state = CompilerState::new("t", vec!["5 constant five".to_string()]);
        state.run().unwrap();
        let id = state.lookup("five").unwrap();
        match &state.arena.get(id).kind {
            EntityKind::Constant(v) => assert_eq!(v.static_value(&state.arena), Some(5)),
            _ => panic!("expected a Constant entity"),
        }
    }

    #[test]
    fn variable_allots_two_bytes_starting_at_here() {
        let mut state = CompilerState::new("t", vec!["variable x variable y".to_string()]);
        let start = state.here;
        state.run().unwrap();
        let x = state.lookup("x").unwrap();
        let y = state.lookup("y").unwrap();
        match &state.arena.get(x).kind {
            EntityKind::Variable { address } => {
                assert_eq!(address.static_value(&state.arena), Some(start))
            }
            _ => panic!(),
        }
        match &state.arena.get(y).kind {
            EntityKind::Variable { address } => {
                assert_eq!(address.static_value(&state.arena), Some(start + 2))
            }
            _ => panic!(),
        }
    }

    #[test]
    fn forward_resolution_keeps_occurrence_zero_and_replaces_the_placeholder() {
        let mut state = CompilerState::new("t", vec!["forward later : later 7 ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("later").unwrap();
        assert_eq!(state.arena.get(id).occurrence, 0);
        assert!(matches!(state.arena.get(id).kind, EntityKind::Word(_)));
    }
}
