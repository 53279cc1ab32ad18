//! The inliner: decides which Words are candidates for inlining, and performs the
//! actual call-site substitution.
//!
//! Grounded on `examples/original_source/rforth.py`'s `Named.can_inline`/`should_inline`
//! and `Compiler.inline_call`. Automatic inlining's two-pass restart (collect candidates,
//! recompile from scratch with a bigger force-inline set) is driven from `lib.rs`; this
//! module only answers "can/should this word inline" and "splice this call open".

use std::collections::{HashMap, HashSet};

use crate::compiler::CompilerState;
use crate::entity::{EntityId, EntityKind};
use crate::messages::CompilerError;
use crate::opcode::{AddrFastOp, Fast, FastOp, JumpOp, Opcode};
use crate::value::Value;

fn main_entity(state: &CompilerState) -> Option<EntityId> {
    state.lookup(&state.main_name)
}

/// An opcode that unconditionally leaves the word before its natural end: any bare
/// return/retfie/retlw, or a `goto` to a named target. `can_inline` rejects any word
/// whose body contains one of these before its final instruction — inlining such a word
/// would need control-flow splicing this compiler doesn't attempt.
fn is_early_exit(op: &Opcode) -> bool {
    matches!(op, Opcode::Fast(_, _))
        || matches!(op, Opcode::Jump(JumpOp::RetLw, _))
        || matches!(op, Opcode::Jump(JumpOp::Goto, Value::Reference(_)))
}

/// Whether `id` is structurally eligible to be inlined at all, independent of whether
/// any call site actually wants to.
pub fn can_inline(state: &CompilerState, id: EntityId) -> bool {
    let entity = state.arena.get(id);
    if entity.flags.not_inlinable {
        return false;
    }
    if Some(id) == state.low_interrupt || Some(id) == state.high_interrupt {
        return false;
    }
    let w = match entity.word() {
        Some(w) => w,
        None => return false,
    };
    if w.opcodes.is_empty() {
        return false;
    }
    if w.opcodes[..w.opcodes.len() - 1].iter().any(is_early_exit) {
        return false;
    }
    !matches!(w.opcodes.last(), Some(Opcode::Fast(FastOp::Return, Fast::Fast)))
}

/// The cost heuristic: inline when the call-overhead-plus-body cost of leaving the word
/// as a separate callable (`len + referenced_by`) is no better than duplicating its body
/// at every call site (`len * referenced_by`). Returns `None` when the word is not a
/// should-inline candidate at all (already inlined, a builtin, or `main` itself).
pub fn should_inline(state: &CompilerState, id: EntityId) -> Option<bool> {
    let entity = state.arena.get(id);
    if entity.flags.inlined || !entity.flags.from_source {
        return None;
    }
    if main_entity(state) == Some(id) {
        return None;
    }
    let w = entity.word()?;
    let len = w.opcodes.len() as u64;
    let referenced_by = entity.referenced_by as u64;
    let actual = len + referenced_by;
    let projected = len * referenced_by;
    Some(actual >= projected)
}

/// Splices a cloned, label-freshened copy of `target`'s body into `out` in place of the
/// `call target` this replaces. Internal labels (including, usually, `end_label`) are
/// freshened so two inlined copies of the same word never collide. If nothing inside the
/// body jumps to `end_label` (no early `exit`), the trailing label and its closing
/// `return` are both dropped so the inlinee just falls through into the caller's next
/// instruction; otherwise `end_label` survives (freshened) as a fallthrough target for
/// those early exits, with only the `return` removed.
fn clone_inline(state: &mut CompilerState, target: EntityId, out: &mut Vec<Opcode>) {
    let (mut body, end_label, def_loc) = {
        let entity = state.arena.get(target);
        let w = entity.word().expect("clone_inline called on a non-Word target");
        (w.opcodes.clone(), w.end_label, entity.definition.clone())
    };

    if body.first().and_then(|op| op.as_label()) == Some(target) {
        body.remove(0);
    }
    if matches!(body.last(), Some(Opcode::Fast(FastOp::Return, Fast::NoFast))) {
        body.pop();
    }
    let early_exit_survives = body.iter().any(|op| op.makes_reference_to(end_label));
    if !early_exit_survives && body.last().and_then(|op| op.as_label()) == Some(end_label) {
        body.pop();
    }

    let mut rename: HashMap<EntityId, EntityId> = HashMap::new();
    for op in &body {
        if let Some(lbl) = op.as_label() {
            rename.entry(lbl).or_insert_with(|| state.alloc_label(def_loc.clone()));
        }
    }
    for op in body.iter_mut() {
        for (&from, &to) in rename.iter() {
            op.rewrite_entity(from, to);
        }
    }
    out.extend(body);
}

/// Rewrites one word's body, replacing every call to a word marked `inlined` with a
/// cloned copy of that callee, repeating until no more calls in this word's body are to
/// an inlined target (a word can itself call another inlined word).
pub fn inline_calls_in_word(state: &mut CompilerState, id: EntityId) -> Result<(), CompilerError> {
    loop {
        let opcodes = state
            .arena
            .get(id)
            .word()
            .ok_or_else(|| CompilerError::internal("inline_calls_in_word called on a non-Word entity"))?
            .opcodes
            .clone();
        let mut out = Vec::with_capacity(opcodes.len());
        let mut changed = false;
        for op in opcodes {
            if let Opcode::AddrFast(AddrFastOp::Call, Value::Reference(target), Fast::NoFast) = op {
                if target != id && state.arena.get(target).flags.inlined {
                    clone_inline(state, target, &mut out);
                    changed = true;
                    continue;
                }
                out.push(Opcode::AddrFast(AddrFastOp::Call, Value::Reference(target), Fast::NoFast));
            } else {
                out.push(op);
            }
        }
        if let EntityKind::Word(w) = &mut state.arena.get_mut(id).kind {
            w.opcodes = out;
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Marks every reachable word whose definition location is in `force` (the `inline`
/// primitive's own marker, plus a prior round's restart set) as `inlined`, provided it is
/// structurally eligible. Called once up front, before the reachability walk expands and
/// optimizes each word, so `inline_calls_in_word` sees the final decision.
pub fn mark_forced_inlines(state: &mut CompilerState, force: &HashSet<crate::entity::SourceLoc>) {
    let ids = state.arena.ids_in_order();
    for id in ids {
        let entity = state.arena.get(id);
        let wants_force = entity.flags.force_inline || force.contains(&entity.definition);
        if wants_force && can_inline(state, id) {
            state.arena.get_mut(id).flags.inlined = true;
        }
    }
}

/// Scans every reachable word for should-inline candidates, per the two-pass automatic
/// inlining flow: returns the set of definition locations a restart should force-inline.
pub fn collect_should_inline(state: &CompilerState, reachable: &[EntityId]) -> HashSet<crate::entity::SourceLoc> {
    let mut out = HashSet::new();
    for &id in reachable {
        if can_inline(state, id) && should_inline(state, id) == Some(true) {
            out.insert(state.arena.get(id).definition.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn can_inline_rejects_an_isr() {
        let mut state = CompilerState::new("t", vec![": isr low-interrupt ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("isr").unwrap();
        assert!(!can_inline(&state, id));
    }

    #[test]
    fn can_inline_rejects_no_inline_marked_word() {
        let mut state = CompilerState::new("t", vec![": w no-inline ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        assert!(!can_inline(&state, id));
    }

    #[test]
    fn inline_calls_in_word_splices_a_cloned_body() {
        let mut state = CompilerState::new("t", vec![": callee 1 ; : caller callee ;".to_string()]);
        state.run().unwrap();
        let callee = state.lookup("callee").unwrap();
        let caller = state.lookup("caller").unwrap();
        state.arena.get_mut(callee).flags.inlined = true;
        inline_calls_in_word(&mut state, caller).unwrap();
        let w = state.arena.get(caller).word().unwrap();
        assert!(!w
            .opcodes
            .iter()
            .any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, Value::Reference(t), _) if *t == callee)));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Push(_))));
    }
}
