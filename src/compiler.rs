//! The interpreter core: compiler-wide state, the compile-time data stack, and the
//! token-dispatch loop that drives everything else.
//!
//! Grounded on `examples/original_source/rforth.py`'s `Compiler` class (`interpret`,
//! `data_stack`, `object_stack`, `current`, `here`/`eehere`) and on this crate's own
//! `ForthRuntime` state-struct shape in `runtime.rs`.

use std::collections::{HashMap, HashSet};

use crate::entity::{Entity, EntityArena, EntityId, EntityKind, Flags, IsrKind, Section, SourceLoc, WordBody};
use crate::internals;
use crate::mangle;
use crate::messages::{CompilerError, Msg};
use crate::opcode::{Access, Fast, Opcode};
use crate::reader::Reader;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Interpret,
    Compile,
}

/// The compile-time data stack element: a single tagged variant covering every shape a
/// primitive might push (a symbolic Value, an entity reference, or a raw integer).
#[derive(Clone, Debug, PartialEq)]
pub enum StackItem {
    Value(Value),
    Entity(EntityId),
    Int(i64),
}

impl StackItem {
    pub fn as_value(&self) -> Value {
        match self {
            StackItem::Value(v) => v.clone(),
            StackItem::Int(n) => Value::number(*n),
            StackItem::Entity(id) => Value::reference(*id),
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            StackItem::Entity(id) => Some(*id),
            _ => None,
        }
    }
}

/// Sticky suffix-modifier state inside a `code ... ;code` block. `prefix` mode attaches a
/// modifier to the token just parsed; `postfix` (the default) attaches it to the next
/// token parsed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsmModifiers {
    pub dst_f: bool,
    pub access: Access,
    pub fast: Fast,
    pub postfix: bool,
}

impl Default for AsmModifiers {
    fn default() -> Self {
        AsmModifiers { dst_f: false, access: Access::Access, fast: Fast::NoFast, postfix: true }
    }
}

/// One saved frame of "what was I compiling before I had to switch" — object-stack
/// save/restore for nested current-object switches, e.g. diverting into `init_runtime`
/// mid-definition.
struct ObjectFrame {
    current_object: Option<EntityId>,
    mode: Mode,
}

pub struct CompilerState {
    pub arena: EntityArena,
    pub dict: HashMap<String, EntityId>,
    pub first_dict: HashMap<String, EntityId>,
    pub data_stack: Vec<StackItem>,
    object_stack: Vec<ObjectFrame>,
    pub current_object: Option<EntityId>,
    pub mode: Mode,
    pub reader: Reader,
    pub here: i64,
    pub eehere: i64,
    pub initialize_variables: bool,
    pub init_runtime: Option<EntityId>,
    pub low_interrupt: Option<EntityId>,
    pub high_interrupt: Option<EntityId>,
    pub interrupts_enabled: bool,
    pub main_name: String,
    pub inline_list: HashSet<SourceLoc>,
    pub asm_modifiers: AsmModifiers,
    pub in_code_block: bool,
    pub early_exit_stack: Vec<EntityId>,
    pub msg: Msg,
}

const HERE_START: i64 = 0x00;
const HERE_AFTER_BUILTINS: i64 = 0x60;
const EEHERE_START: i64 = 0x1000;

impl CompilerState {
    pub fn new(main_file: impl Into<String>, main_lines: Vec<String>) -> Self {
        let mut state = CompilerState {
            arena: EntityArena::new(),
            dict: HashMap::new(),
            first_dict: HashMap::new(),
            data_stack: Vec::new(),
            object_stack: Vec::new(),
            current_object: None,
            mode: Mode::Interpret,
            reader: Reader::new(main_file, main_lines),
            here: HERE_AFTER_BUILTINS,
            eehere: EEHERE_START,
            initialize_variables: false,
            init_runtime: None,
            low_interrupt: None,
            high_interrupt: None,
            interrupts_enabled: false,
            main_name: "main".to_string(),
            inline_list: HashSet::new(),
            asm_modifiers: AsmModifiers::default(),
            in_code_block: false,
            early_exit_stack: Vec::new(),
            msg: Msg::new(),
        };
        internals::register_all(&mut state);
        state.here = HERE_AFTER_BUILTINS;
        let init_id = state.define("init_runtime", Section::Code, EntityKind::Word(WordBody::new(0)));
        state.arena.get_mut(init_id).flags.not_inlinable = true;
        let end_label = state.alloc_label(SourceLoc::unknown());
        if let EntityKind::Word(w) = &mut state.arena.get_mut(init_id).kind {
            w.end_label = end_label;
            w.opcodes.push(Opcode::Label(init_id));
        }
        state.init_runtime = Some(init_id);
        state
    }

    pub fn alloc_label(&mut self, at: SourceLoc) -> EntityId {
        self.arena.alloc(Entity::new("L", Section::Code, at, EntityKind::Label))
    }

    /// Defines a new named entity. If `name` is currently bound to an unresolved
    /// `Forward`, this is forward resolution: every existing reference to the Forward
    /// placeholder is atomically rewritten to the new entity, and the occurrence counter
    /// is left untouched, since this is the Forward's first real definition, not a
    /// redefinition. Otherwise, if `name` is already bound to anything else, `occurrence`
    /// is bumped (ordinary redefinition).
    pub fn define(&mut self, name: &str, section: Section, kind: EntityKind) -> EntityId {
        let existing = self.dict.get(name).copied();
        let resolves_forward =
            existing.is_some_and(|id| matches!(self.arena.get(id).kind, EntityKind::Forward { .. }));

        let occurrence = if resolves_forward {
            0
        } else {
            existing.map(|id| self.arena.get(id).occurrence + 1).unwrap_or(0)
        };
        let mut entity = Entity::new(name, section, self.reader.current_location(), kind);
        entity.occurrence = occurrence;
        entity.flags.from_source = true;
        let id = self.arena.alloc(entity);

        if resolves_forward {
            let forward_id = existing.unwrap();
            self.arena.rewrite_references(forward_id, id);
            if let EntityKind::Forward { resolved } = &mut self.arena.get_mut(forward_id).kind {
                *resolved = Some(id);
            }
        }
        self.dict.insert(name.to_string(), id);
        self.first_dict.entry(name.to_string()).or_insert(id);
        id
    }

    pub fn mangled_name(&self, id: EntityId) -> String {
        mangle::mangle(&self.arena.get(id).name, self.arena.get(id).occurrence)
    }

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.dict.get(name).copied()
    }

    /// Looks up (or lazily declares as a `Forward`) a well-known runtime helper word.
    /// Several primitives fall back to calling a helper rather than inlining real
    /// instructions (non-constant arithmetic, EEPROM access, long bit tests); those
    /// helpers live in a stdlib source this crate does not ship, so an unresolved one
    /// surfaces as an ordinary unresolved-Forward fatal error at the reachability walk,
    /// exactly like a user `forward` that was never defined.
    pub fn runtime_helper(&mut self, name: &str) -> EntityId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        self.define(name, Section::Undefined, EntityKind::Forward { resolved: None })
    }

    // --- compile-time data stack -------------------------------------------------

    pub fn push(&mut self, item: StackItem) {
        self.data_stack.push(item);
    }

    pub fn push_value(&mut self, v: Value) {
        self.data_stack.push(StackItem::Value(v));
    }

    pub fn push_entity(&mut self, id: EntityId) {
        self.data_stack.push(StackItem::Entity(id));
    }

    pub fn pop(&mut self) -> Result<StackItem, CompilerError> {
        self.data_stack.pop().ok_or_else(|| CompilerError::fatal("data stack underflow"))
    }

    pub fn peek(&self) -> Result<&StackItem, CompilerError> {
        self.data_stack.last().ok_or_else(|| CompilerError::fatal("data stack underflow"))
    }

    pub fn pop_value(&mut self) -> Result<Value, CompilerError> {
        Ok(self.pop()?.as_value())
    }

    pub fn pop_entity(&mut self) -> Result<EntityId, CompilerError> {
        let item = self.pop()?;
        item.as_entity().ok_or_else(|| CompilerError::fatal("expected a label or word on the stack"))
    }

    pub fn pop_int(&mut self) -> Result<i64, CompilerError> {
        let item = self.pop()?;
        match &item {
            StackItem::Int(n) => Ok(*n),
            StackItem::Value(v) => v
                .static_value(&self.arena)
                .ok_or_else(|| CompilerError::fatal("expected a compile-time-known integer")),
            StackItem::Entity(_) => Err(CompilerError::fatal("expected an integer, found an entity")),
        }
    }

    // --- current object / opcode emission ----------------------------------------

    pub fn current_word_mut(&mut self) -> Result<&mut WordBody, CompilerError> {
        let id = self.current_object.ok_or_else(|| CompilerError::fatal("not currently compiling a word"))?;
        self.arena
            .get_mut(id)
            .word_mut()
            .ok_or_else(|| CompilerError::internal("current object is not a Word"))
    }

    pub fn emit(&mut self, op: Opcode) -> Result<(), CompilerError> {
        self.current_word_mut()?.opcodes.push(op);
        Ok(())
    }

    /// Removes and returns the last `n` opcodes of the current word (used by the stack
    /// optimization primitives to rewrite a just-emitted push/fetch pattern in place).
    pub fn rewind(&mut self, n: usize) -> Result<Vec<Opcode>, CompilerError> {
        let body = self.current_word_mut()?;
        let cut = body.opcodes.len().saturating_sub(n);
        Ok(body.opcodes.split_off(cut))
    }

    pub fn last_instruction(&self) -> Option<&Opcode> {
        let id = self.current_object?;
        self.arena.get(id).word()?.opcodes.last()
    }

    pub fn before_last_instruction(&self) -> Option<&Opcode> {
        let id = self.current_object?;
        let ops = &self.arena.get(id).word()?.opcodes;
        if ops.len() < 2 {
            None
        } else {
            Some(&ops[ops.len() - 2])
        }
    }

    /// Pushes a save frame and switches `current_object`/`mode`, for primitives that
    /// must temporarily divert emission elsewhere (e.g. a Variable initializer writing
    /// into `init_runtime` mid-definition).
    pub fn switch_object(&mut self, to: EntityId, mode: Mode) {
        self.object_stack.push(ObjectFrame { current_object: self.current_object, mode: self.mode });
        self.current_object = Some(to);
        self.mode = mode;
    }

    pub fn restore_object(&mut self) -> Result<(), CompilerError> {
        let frame = self
            .object_stack
            .pop()
            .ok_or_else(|| CompilerError::internal("object stack underflow"))?;
        self.current_object = frame.current_object;
        self.mode = frame.mode;
        Ok(())
    }

    pub fn allot_ram(&mut self, bytes: i64) -> i64 {
        let addr = self.here;
        self.here += bytes;
        addr
    }

    pub fn allot_eeprom(&mut self, bytes: i64) -> i64 {
        let addr = self.eehere;
        self.eehere += bytes;
        addr
    }

    // --- the token-dispatch loop ---------------------------------------------------

    /// Consumes every token from the reader, returning once the outermost input is
    /// exhausted (`CompilerError::Eof`, treated as a normal end-of-run rather than
    /// propagated further by the caller).
    pub fn run(&mut self) -> Result<(), CompilerError> {
        loop {
            let token = match self.reader.next_token() {
                Ok(t) => t,
                Err(CompilerError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            };
            self.interpret_token(&token)?;
        }
    }

    pub fn interpret_token(&mut self, token: &str) -> Result<(), CompilerError> {
        if self.in_code_block {
            return internals::asmcode::interpret_token(self, token);
        }
        self.interpret_ordinary_token(token)
    }

    /// The values a named-data entity pushes when it's referenced by name rather than
    /// called: a Constant its folded value, a Bit its bit index then its address (the
    /// `( bit addr -- )` order `bits.rs` expects), a Variable/Value-cell its address, a
    /// `create`d block a symbolic reference to its (not yet laid out) flash address.
    /// `None` for any other kind, meaning the ordinary call-or-push-entity rule applies.
    fn named_data_values(&self, id: EntityId) -> Option<Vec<Value>> {
        match &self.arena.get(id).kind {
            EntityKind::Constant(v) => Some(vec![v.clone()]),
            EntityKind::Bit { address, bit } => Some(vec![bit.clone(), address.clone()]),
            EntityKind::Variable { address } | EntityKind::ValueCell { address } => {
                Some(vec![address.clone()])
            }
            EntityKind::FlashData { .. } => Some(vec![Value::reference(id)]),
            _ => None,
        }
    }

    /// The ordinary dict-or-number dispatch. Also the fallback path for any token inside
    /// a `code ... ;code` block that isn't a recognized mnemonic or suffix modifier —
    /// e.g. `;code` itself, `prefix`/`postfix`, or a call to another word.
    pub fn interpret_ordinary_token(&mut self, token: &str) -> Result<(), CompilerError> {
        if let Some(id) = self.lookup(token) {
            if let EntityKind::Macro { .. } = &self.arena.get(id).kind {
                return internals::macros::expand(self, id);
            }
            let immediate = self.arena.get(id).is_immediate();
            if immediate {
                return internals::dispatch(self, id);
            }

            // Named data (constants, variables, bits, value cells, flash blobs) pushes
            // its value/address directly rather than being called; only Word/Forward
            // entities follow the call-or-push rule.
            if let Some(values) = self.named_data_values(id) {
                return match self.mode {
                    Mode::Compile => {
                        for v in values {
                            self.emit(Opcode::Push(v))?;
                        }
                        Ok(())
                    }
                    Mode::Interpret => {
                        for v in values {
                            self.push_value(v);
                        }
                        Ok(())
                    }
                };
            }

            return match self.mode {
                Mode::Compile => {
                    let loc = self.reader.current_location();
                    self.emit(Opcode::AddrFast(
                        crate::opcode::AddrFastOp::Call,
                        Value::reference(id),
                        Fast::NoFast,
                    ))
                    .map_err(|e| match e {
                        CompilerError::Fatal(m) => CompilerError::compilation(m, loc),
                        other => other,
                    })
                }
                Mode::Interpret => {
                    self.push_entity(id);
                    Ok(())
                }
            };
        }

        if let Some(number) = crate::value::parse_number(token) {
            let v = Value::Number(number);
            return match self.mode {
                Mode::Compile => self.emit(Opcode::Push(v)),
                Mode::Interpret => {
                    self.push_value(v);
                    Ok(())
                }
            };
        }

        Err(CompilerError::compilation(format!("unknown word: {}", token), self.reader.current_location()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreting_a_number_pushes_it() {
        let mut state = CompilerState::new("t", vec!["42".to_string()]);
        state.run().unwrap();
        assert_eq!(state.pop_int().unwrap(), 42);
    }

    #[test]
    fn unknown_word_is_a_compilation_error() {
        let mut state = CompilerState::new("t", vec!["bogus-word".to_string()]);
        let err = state.run().unwrap_err();
        assert!(matches!(err, CompilerError::Compilation { .. }));
    }

    #[test]
    fn defining_a_word_installs_it_in_the_dictionary() {
        let mut state = CompilerState::new("t", vec![": double dup + ;".to_string()]);
        state.run().unwrap();
        assert!(state.lookup("double").is_some());
    }

    #[test]
    fn redefinition_bumps_occurrence() {
        let mut state = CompilerState::new("t", vec![": x 1 ; : x 2 ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("x").unwrap();
        assert_eq!(state.arena.get(id).occurrence, 1);
    }
}
