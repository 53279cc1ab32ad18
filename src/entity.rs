//! The dictionary entity graph: every definition (word, label, constant, forward,
//! variable, bit, flash-data blob) lives in one arena addressed by stable index, so
//! mutual recursion and forward-reference fix-ups are a scan-and-rewrite over a
//! vector rather than a graph of owning pointers.
//!
//! Grounded on `rforth.py`'s `Named` base class (`deep_references`, `refers_to`,
//! `reset_referenced_by`, the `section`/flag attributes) and on the linked-list
//! dictionary construction in `runtime.rs`'s `make_word`/`make_variable`.

use std::fmt;

use crate::internals::PrimitiveKind;
use crate::opcode::Opcode;
use crate::value::Value;

pub type EntityId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Section {
    Code,
    Memory,
    Constants,
    StaticData,
    Undefined,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Flags {
    pub immediate: bool,
    /// Set by the `inliner` once this word's calls have actually been replaced by
    /// cloned opcode sequences (it is then elided from the emitted output).
    pub inlined: bool,
    /// Set by the `no-inline` primitive, or implied by an ISR / a `return,fast` tail:
    /// this word must never be inlined regardless of the should-inline heuristic.
    pub not_inlinable: bool,
    /// Set by the `inline` primitive: force-inline at every call site, skipping the
    /// should-inline heuristic.
    pub force_inline: bool,
    pub inw: bool,
    pub outw: bool,
    pub outz: bool,
    pub from_source: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct SourceLoc {
    pub file: String,
    pub line: usize,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        SourceLoc { file: file.into(), line }
    }

    pub fn unknown() -> Self {
        SourceLoc { file: "<unknown>".to_string(), line: 0 }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IsrKind {
    None,
    Low,
    High,
}

#[derive(Clone, Debug)]
pub struct WordBody {
    pub opcodes: Vec<Opcode>,
    pub end_label: EntityId,
    pub substitute: Option<EntityId>,
    pub prepared: bool,
    pub isr: IsrKind,
}

impl WordBody {
    pub fn new(end_label: EntityId) -> Self {
        WordBody {
            opcodes: vec![],
            end_label,
            substitute: None,
            prepared: false,
            isr: IsrKind::None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum EntityKind {
    Primitive(PrimitiveKind),
    Word(WordBody),
    Label,
    Forward { resolved: Option<EntityId> },
    Constant(Value),
    Bit { address: Value, bit: Value },
    Variable { address: Value },
    ValueCell { address: Value },
    FlashData { data: Vec<u8>, original: String },
    /// A user-defined `macro ... ;macro` word: its body is kept as raw tokens and
    /// re-interpreted at every call site, in whatever mode the call site is in, rather
    /// than compiled once.
    Macro { tokens: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub name: String,
    pub occurrence: u32,
    pub section: Section,
    pub definition: SourceLoc,
    pub references: Vec<EntityId>,
    pub referenced_by: u32,
    pub flags: Flags,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(name: impl Into<String>, section: Section, definition: SourceLoc, kind: EntityKind) -> Self {
        Entity {
            name: name.into(),
            occurrence: 0,
            section,
            definition,
            references: Vec::new(),
            referenced_by: 0,
            flags: Flags::default(),
            kind,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.flags.immediate || matches!(self.kind, EntityKind::Primitive(_))
    }

    pub fn word(&self) -> Option<&WordBody> {
        match &self.kind {
            EntityKind::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn word_mut(&mut self) -> Option<&mut WordBody> {
        match &mut self.kind {
            EntityKind::Word(w) => Some(w),
            _ => None,
        }
    }

    /// Records that this entity mentions `other`, matching `Named.refers_to`'s
    /// skip-if-already-present / skip-if-self behavior.
    pub fn refers_to(&mut self, other: EntityId, self_id: EntityId) {
        if other != self_id && !self.references.contains(&other) {
            self.references.push(other);
        }
    }
}

#[derive(Default)]
pub struct EntityArena {
    entries: Vec<Entity>,
}

impl EntityArena {
    pub fn new() -> Self {
        EntityArena { entries: Vec::new() }
    }

    pub fn alloc(&mut self, entity: Entity) -> EntityId {
        self.entries.push(entity);
        self.entries.len() - 1
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entries[id]
    }

    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entries[id]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entries.iter().enumerate()
    }

    pub fn ids_in_order(&self) -> Vec<EntityId> {
        (0..self.entries.len()).collect()
    }

    pub fn reset_referenced_by(&mut self) {
        for e in self.entries.iter_mut() {
            e.referenced_by = 0;
        }
    }

    pub fn add_reference(&mut self, from: EntityId, to: EntityId) {
        self.entries[from].refers_to(to, from);
    }

    /// Rewrites every opcode parameter and reference-list entry pointing at `from` to
    /// point at `to` instead — the mechanism behind both Forward resolution (a later
    /// redefinition replaces every existing reference atomically) and the single-goto
    /// optimizer substitution.
    pub fn rewrite_references(&mut self, from: EntityId, to: EntityId) {
        for e in self.entries.iter_mut() {
            for r in e.references.iter_mut() {
                if *r == from {
                    *r = to;
                }
            }
            if let EntityKind::Word(w) = &mut e.kind {
                for op in w.opcodes.iter_mut() {
                    op.rewrite_entity(from, to);
                }
                if w.end_label == from {
                    w.end_label = to;
                }
                if w.substitute == Some(from) {
                    w.substitute = Some(to);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(name: &str) -> Entity {
        Entity::new(name, Section::Undefined, SourceLoc::unknown(), EntityKind::Label)
    }

    #[test]
    fn alloc_returns_sequential_ids() {
        let mut arena = EntityArena::new();
        let a = arena.alloc(dummy("a"));
        let b = arena.alloc(dummy("b"));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(arena.get(a).name, "a");
    }

    #[test]
    fn refers_to_is_idempotent_and_skips_self() {
        let mut arena = EntityArena::new();
        let a = arena.alloc(dummy("a"));
        arena.add_reference(a, a);
        assert!(arena.get(a).references.is_empty());
        let b = arena.alloc(dummy("b"));
        arena.add_reference(a, b);
        arena.add_reference(a, b);
        assert_eq!(arena.get(a).references, vec![b]);
    }

    #[test]
    fn rewrite_references_updates_reference_lists_and_opcodes() {
        let mut arena = EntityArena::new();
        let fwd = arena.alloc(dummy("later"));
        let main_id = arena.alloc(dummy("main"));
        arena.add_reference(main_id, fwd);
        let real = arena.alloc(dummy("later_real"));
        arena.rewrite_references(fwd, real);
        assert_eq!(arena.get(main_id).references, vec![real]);
    }

    #[test]
    fn word_opcode_list_starts_with_its_own_label() {
        let mut arena = EntityArena::new();
        let end_label = arena.alloc(dummy("main_end"));
        let mut body = WordBody::new(end_label);
        let main_id = arena.alloc(Entity::new(
            "main",
            Section::Code,
            SourceLoc::unknown(),
            EntityKind::Word(WordBody::new(end_label)),
        ));
        body.opcodes.push(Opcode::Label(main_id));
        arena.get_mut(main_id).kind = EntityKind::Word(body);
        let w = arena.get(main_id).word().unwrap();
        assert_eq!(w.opcodes[0].as_label(), Some(main_id));
    }
}
