//! Pseudo-op expansion and the peephole optimizer.
//!
//! Grounded on `examples/original_source/rforth.py`'s `expand`/`optimize` pair: expansion
//! rewrites every pseudo-op into real PIC18 instructions (or drops it entirely, for the
//! interrupt-guard pseudo-ops when `-i` was never given); optimization then repeatedly
//! applies a fixed-order list of local rewrites until the opcode list stops changing.

use crate::compiler::CompilerState;
use crate::entity::{EntityId, EntityKind};
use crate::messages::CompilerError;
use crate::opcode::{
    self, Access, AddrAccessOp, AddrFastOp, AddrPairOp, Fast, JumpOp, Opcode,
};
use crate::value::{high, low, ram_addr, Value};

fn push_byte(out: &mut Vec<Opcode>, byte: Value, arena: &crate::entity::EntityArena) {
    if byte.static_value(arena) == Some(0) {
        out.push(Opcode::AddrAccess(AddrAccessOp::ClrF, Value::number(opcode::PREINC0), Access::Access));
    } else {
        out.push(Opcode::Jump(JumpOp::MovLw, byte));
        out.push(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(opcode::PREINC0), Access::Access));
    }
}

fn helper_call(state: &mut CompilerState, out: &mut Vec<Opcode>, name: &str) {
    let id = state.runtime_helper(name);
    out.push(Opcode::AddrFast(AddrFastOp::Call, Value::reference(id), Fast::NoFast));
}

/// `OP_BIT_SET?`/`OP_BIT_CLR?` expansion: test the bit with the caller-supplied access
/// tag (short-addressable, already verified by `internals::bits::test`), then push a
/// two-byte all-ones/all-zeros flag onto the data stack via W.
fn bit_test_skip(out: &mut Vec<Opcode>, op: crate::opcode::BitOp, addr: Value, bit: Value, access: Access) {
    out.push(Opcode::Jump(JumpOp::MovLw, Value::number(-1)));
    out.push(Opcode::Bit(op, addr, bit, access));
    out.push(Opcode::Jump(JumpOp::AddLw, Value::number(1)));
    out.push(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(opcode::PREINC0), Access::Access));
    out.push(Opcode::AddrAccess(AddrAccessOp::MovWf, Value::number(opcode::PREINC0), Access::Access));
}

/// Rewrites one input opcode into zero or more real-instruction opcodes, appended to
/// `out`. `prev_was_zset` records whether the opcode immediately before this one (in the
/// *input* stream) was a `MarkerZSet`, selecting a cheaper helper for `ZeroEquals`/
/// `Normalize` immediately following a Z-flag-producing comparison.
fn expand_one(state: &mut CompilerState, op: Opcode, out: &mut Vec<Opcode>, prev_was_zset: bool) {
    match op {
        Opcode::Push(v) => {
            let l = low(v.clone(), &state.arena);
            let h = high(v, &state.arena);
            push_byte(out, l, &state.arena);
            push_byte(out, h, &state.arena);
        }
        Opcode::Fetch(addr) => {
            if let Some(known) = addr.static_value(&state.arena) {
                if ram_addr(known) {
                    let hi = addr.clone().add(Value::number(1));
                    out.push(Opcode::AddrPair(AddrPairOp::MovFf, addr, Value::number(opcode::PREINC0)));
                    out.push(Opcode::AddrPair(AddrPairOp::MovFf, hi, Value::number(opcode::PREINC0)));
                    return;
                }
            }
            expand_one(state, Opcode::Push(addr), out, false);
            helper_call(state, out, "runtime-@");
        }
        Opcode::CFetch(addr) => {
            if let Some(known) = addr.static_value(&state.arena) {
                if ram_addr(known) {
                    out.push(Opcode::AddrPair(AddrPairOp::MovFf, addr, Value::number(opcode::PREINC0)));
                    return;
                }
            }
            expand_one(state, Opcode::Push(addr), out, false);
            helper_call(state, out, "runtime-c@");
        }
        Opcode::FetchTos => helper_call(state, out, "runtime-fetch-tos"),
        Opcode::CFetchTos => helper_call(state, out, "runtime-cfetch-tos"),
        Opcode::PushW(v) => out.push(Opcode::Jump(JumpOp::MovLw, v)),
        Opcode::PopW => out.push(Opcode::AddrAccess(AddrAccessOp::MovF, Value::number(opcode::POSTDEC0), Access::Access)),
        Opcode::DropTos => {
            out.push(Opcode::AddrAccess(AddrAccessOp::MovF, Value::number(opcode::POSTDEC0), Access::Access));
            out.push(Opcode::AddrAccess(AddrAccessOp::MovF, Value::number(opcode::POSTDEC0), Access::Access));
        }
        Opcode::Dup => helper_call(state, out, "runtime-dup"),
        Opcode::TwoToOne => helper_call(state, out, "runtime-2to1"),
        Opcode::ZeroEquals => {
            helper_call(state, out, if prev_was_zset { "runtime-0=-zset" } else { "runtime-0=" })
        }
        Opcode::Normalize => {
            helper_call(state, out, if prev_was_zset { "runtime-normalize-zset" } else { "runtime-normalize" })
        }
        Opcode::BitSetQ(addr, bit, access) => bit_test_skip(out, crate::opcode::BitOp::BtfSs, addr, bit, access),
        Opcode::BitClrQ(addr, bit, access) => bit_test_skip(out, crate::opcode::BitOp::BtfSc, addr, bit, access),
        Opcode::IntrProtect => {
            if state.interrupts_enabled {
                helper_call(state, out, "runtime-intr-protect");
            }
        }
        Opcode::IntrUnprotect => {
            if state.interrupts_enabled {
                helper_call(state, out, "runtime-intr-unprotect");
            }
        }
        Opcode::MarkerZSet | Opcode::MarkerInlineBoundary | Opcode::Comment(_) => {}
        real => out.push(real),
    }
}

/// Expands every pseudo-op in a Word's body into real instructions, in place.
pub fn expand_word(state: &mut CompilerState, id: EntityId) -> Result<(), CompilerError> {
    let opcodes = state
        .arena
        .get(id)
        .word()
        .ok_or_else(|| CompilerError::internal("expand_word called on a non-Word entity"))?
        .opcodes
        .clone();
    let mut out = Vec::with_capacity(opcodes.len() * 2);
    let mut prev_was_zset = false;
    for op in opcodes {
        let this_is_zset = matches!(op, Opcode::MarkerZSet);
        expand_one(state, op, &mut out, prev_was_zset);
        prev_was_zset = this_is_zset;
    }
    if let EntityKind::Word(w) = &mut state.arena.get_mut(id).kind {
        w.opcodes = out;
    }
    Ok(())
}

/// True if `op`'s only/first parameter is a reference to `label`, the check the
/// optimizer uses to decide whether a `Label` is still referenced from anywhere.
fn references(op: &Opcode, label: EntityId) -> bool {
    op.makes_reference_to(label)
}

fn is_skip_instruction(op: &Opcode) -> bool {
    match op {
        Opcode::AddrAccess(o, _, _) => o.is_skip_on_condition(),
        Opcode::Bit(o, _, _, _) => o.is_skip(),
        _ => false,
    }
}

/// The real-instruction opcode a `goto`/`bra` target resolves to if it IS itself an
/// unconditional terminator — used by the chained-jumps rule. Only chases within the
/// same word (a target elsewhere is a `Label` belonging to another Word's body, which
/// this pass does not reach into).
fn first_real_instruction_after_label<'a>(opcodes: &'a [Opcode], label: EntityId) -> Option<&'a Opcode> {
    let pos = opcodes.iter().position(|op| op.as_label() == Some(label))?;
    opcodes[pos + 1..].iter().find(|op| !op.is_marker() && op.as_label().is_none())
}

/// Applies the ten fixed-order peephole rules to a single Word's opcode list until a
/// fixpoint is reached (no rule changes anything in a full pass).
pub fn optimize_word(state: &mut CompilerState, id: EntityId) -> Result<(), CompilerError> {
    loop {
        let before = state
            .arena
            .get(id)
            .word()
            .ok_or_else(|| CompilerError::internal("optimize_word called on a non-Word entity"))?
            .opcodes
            .clone();
        let mut ops = before.clone();

        tail_call(&state.arena, id, &mut ops);
        chained_jumps(&mut ops);
        retlw_fusion(&mut ops);
        dead_label_elimination(&mut ops);
        dead_code_elimination(&mut ops);
        short_forward_jumps(&mut ops);
        short_conditions(&mut ops);
        useless_goto(&mut ops);
        duplicate_labels(state, id, &mut ops);

        if ops == before {
            return Ok(());
        }
        if let EntityKind::Word(w) = &mut state.arena.get_mut(id).kind {
            w.opcodes = ops;
        }
    }
}

/// Rule 1: `call X,no_fast` immediately followed by `return,no_fast` becomes a plain
/// tail jump to `X` — `bra` when `X` is a Label (or this word's own id, self-recursion,
/// since `recurse` and a Word's own leading opcode both reference the Word's id), `goto`
/// otherwise. `bra`'s range is limited to the current function body, so a tail call to a
/// *different* Word (an ordinary call to another definition or a runtime helper) must
/// stay a `goto`.
fn tail_call(arena: &crate::entity::EntityArena, word_id: EntityId, ops: &mut Vec<Opcode>) {
    let mut i = 0;
    while i + 1 < ops.len() {
        if let (Opcode::AddrFast(AddrFastOp::Call, target, Fast::NoFast), Opcode::Fast(crate::opcode::FastOp::Return, Fast::NoFast)) =
            (&ops[i], &ops[i + 1])
        {
            let target = target.clone();
            let is_bra_target = match &target {
                Value::Reference(t) => *t == word_id || matches!(arena.get(*t).kind, EntityKind::Label),
                _ => false,
            };
            let jump = if is_bra_target {
                Opcode::Jump(JumpOp::Bra, target)
            } else {
                Opcode::Jump(JumpOp::Goto, target)
            };
            ops.splice(i..=i + 1, [jump]);
        }
        i += 1;
    }
}

/// Rule 2: a `goto`/`bra` whose target label is immediately followed (within the same
/// word) by another unconditional terminator is replaced by that terminator directly.
fn chained_jumps(ops: &mut Vec<Opcode>) {
    let snapshot = ops.clone();
    for op in ops.iter_mut() {
        if let Opcode::Jump(j, Value::Reference(label)) = op {
            if j.is_unconditional_jump() {
                if let Some(real) = first_real_instruction_after_label(&snapshot, *label) {
                    if real.is_unconditional_terminator() && !matches!(real, Opcode::Jump(_, Value::Reference(t)) if *t == *label) {
                        *op = real.clone();
                    }
                }
            }
        }
    }
}

/// Rule 3: `movlw v` immediately followed by `return,no_fast` fuses into `retlw v`.
fn retlw_fusion(ops: &mut Vec<Opcode>) {
    let mut i = 0;
    while i + 1 < ops.len() {
        if let (Opcode::Jump(JumpOp::MovLw, v), Opcode::Fast(crate::opcode::FastOp::Return, Fast::NoFast)) =
            (&ops[i], &ops[i + 1])
        {
            let v = v.clone();
            ops.splice(i..=i + 1, [Opcode::Jump(JumpOp::RetLw, v)]);
        }
        i += 1;
    }
}

/// Rule 4: a `Label` nobody references (from anywhere in this word) is dropped.
fn dead_label_elimination(ops: &mut Vec<Opcode>) {
    let labels: Vec<EntityId> = ops.iter().filter_map(|op| op.as_label()).collect();
    let referenced: Vec<EntityId> = labels
        .into_iter()
        .filter(|&lbl| ops.iter().any(|op| op.as_label() != Some(lbl) && references(op, lbl)))
        .collect();
    ops.retain(|op| match op.as_label() {
        Some(lbl) => referenced.contains(&lbl),
        None => true,
    });
}

/// Rule 5: code after an unconditional terminator is unreachable and is dropped, up to
/// the next label that is reachable — either referenced from an earlier opcode, or
/// reached by a backward branch across an intermediate label. The backward scan walks
/// opcodes already kept from the candidate dead position toward word start and stops at
/// the first one that references the label under test (break on first match, not an
/// exhaustive scan) — this is intentionally shallow, matching the narrow guarantee the
/// original nested-loop walk gave.
fn dead_code_elimination(ops: &mut Vec<Opcode>) {
    let mut kept: Vec<Opcode> = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        kept.push(ops[i].clone());
        if ops[i].is_unconditional_terminator() {
            let mut j = i + 1;
            while j < ops.len() {
                if let Some(lbl) = ops[j].as_label() {
                    let reachable = kept.iter().rev().any(|op| references(op, lbl))
                        || ops[j + 1..].iter().any(|op| references(op, lbl));
                    if reachable {
                        break;
                    }
                }
                j += 1;
            }
            i = j;
            continue;
        }
        i += 1;
    }
    *ops = kept;
}

/// Rule 6: `skip-instruction; bra L` where the fallthrough after `L`'s resolution is
/// either an external jump or a `Label L` itself collapses by inverting the skip
/// condition and dropping the intervening `bra`. This compiler's skip-instructions don't
/// carry an invert bit of their own (`decfsz`/`dcfsnz`/etc. are fixed-polarity), so the
/// rewrite is limited to the `btfss`/`btfsc` pair, which does invert.
fn short_forward_jumps(ops: &mut Vec<Opcode>) {
    let mut i = 0;
    while i + 1 < ops.len() {
        let is_skip = is_skip_instruction(&ops[i]);
        if is_skip {
            if let Opcode::Jump(j, Value::Reference(target)) = &ops[i + 1] {
                if j.is_internal_jump() && i + 2 < ops.len() {
                    if ops[i + 2].as_label() == Some(*target) {
                        if let Opcode::Bit(b, addr, bit, acc) = ops[i].clone() {
                            let inverted = match b {
                                crate::opcode::BitOp::BtfSs => crate::opcode::BitOp::BtfSc,
                                crate::opcode::BitOp::BtfSc => crate::opcode::BitOp::BtfSs,
                                other => other,
                            };
                            ops[i] = Opcode::Bit(inverted, addr, bit, acc);
                            ops.remove(i + 1);
                            continue;
                        }
                    }
                }
            }
        }
        i += 1;
    }
}

/// Rule 7: `btfss`/`btfsc` against the Z or C bit, immediately followed by an internal
/// jump, collapses to the matching dedicated flag-branch (`bnz`/`bz`/`bnc`/`bc`), which
/// costs one fewer instruction than the skip-and-branch pair.
fn short_conditions(ops: &mut Vec<Opcode>) {
    const STATUS_Z_BIT: i64 = 2;
    const STATUS_C_BIT: i64 = 0;
    const STATUS: i64 = 0xfd8;
    let mut i = 0;
    while i + 1 < ops.len() {
        if let Opcode::Bit(b, addr, bit, _) = &ops[i] {
            if addr == &Value::number(STATUS) {
                if let Some(bitv) = bit.static_value(&crate::entity::EntityArena::new()) {
                    if let Opcode::Jump(j, target) = ops[i + 1].clone() {
                        if j.is_internal_jump() {
                            let flag = match (bitv, b) {
                                (STATUS_Z_BIT, crate::opcode::BitOp::BtfSc) => Some(JumpOp::Bnz),
                                (STATUS_Z_BIT, crate::opcode::BitOp::BtfSs) => Some(JumpOp::Bz),
                                (STATUS_C_BIT, crate::opcode::BitOp::BtfSc) => Some(JumpOp::Bnc),
                                (STATUS_C_BIT, crate::opcode::BitOp::BtfSs) => Some(JumpOp::Bc),
                                _ => None,
                            };
                            if let Some(flag) = flag {
                                ops.splice(i..=i + 1, [Opcode::Jump(flag, target)]);
                                continue;
                            }
                        }
                    }
                }
            }
        }
        i += 1;
    }
}

/// Rule 8: `goto L` with only labels (no real instructions) between it and `Label L` is
/// a no-op and is removed.
fn useless_goto(ops: &mut Vec<Opcode>) {
    let mut i = 0;
    while i < ops.len() {
        if let Opcode::Jump(JumpOp::Goto, Value::Reference(target)) = &ops[i] {
            let target = *target;
            let mut j = i + 1;
            let mut hit = false;
            while j < ops.len() {
                match ops[j].as_label() {
                    Some(lbl) if lbl == target => {
                        hit = true;
                        break;
                    }
                    Some(_) => j += 1,
                    None => break,
                }
            }
            if hit {
                ops.remove(i);
                continue;
            }
        }
        i += 1;
    }
}

/// Rule 9: adjacent `Label`s (including the word's own leading label) collapse to the
/// first; every later reference to the dropped label is rewritten arena-wide.
fn duplicate_labels(state: &mut CompilerState, _id: EntityId, ops: &mut Vec<Opcode>) {
    let mut i = 0;
    while i + 1 < ops.len() {
        if let (Some(keep), Some(drop)) = (ops[i].as_label(), ops[i + 1].as_label()) {
            state.arena.rewrite_references(drop, keep);
            ops.remove(i + 1);
            continue;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;
    use crate::opcode::FastOp;

    #[test]
    fn tail_call_to_another_word_becomes_goto() {
        let mut arena = crate::entity::EntityArena::new();
        let word_id = arena.alloc(crate::entity::Entity::new(
            "self",
            crate::entity::Section::Code,
            crate::entity::SourceLoc::new("<test>", 0),
            EntityKind::Word(crate::entity::WordBody::new(arena.len())),
        ));
        let other_id = arena.alloc(crate::entity::Entity::new(
            "helper",
            crate::entity::Section::Code,
            crate::entity::SourceLoc::new("<test>", 0),
            EntityKind::Word(crate::entity::WordBody::new(arena.len())),
        ));
        let mut ops = vec![
            Opcode::AddrFast(AddrFastOp::Call, Value::reference(other_id), Fast::NoFast),
            Opcode::Fast(FastOp::Return, Fast::NoFast),
        ];
        tail_call(&arena, word_id, &mut ops);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Opcode::Jump(JumpOp::Goto, _)), "tail call to a different Word must be goto, got {:?}", ops[0]);
    }

    #[test]
    fn tail_call_to_self_becomes_bra() {
        let mut arena = crate::entity::EntityArena::new();
        let word_id = arena.alloc(crate::entity::Entity::new(
            "self",
            crate::entity::Section::Code,
            crate::entity::SourceLoc::new("<test>", 0),
            EntityKind::Word(crate::entity::WordBody::new(arena.len())),
        ));
        let mut ops = vec![
            Opcode::AddrFast(AddrFastOp::Call, Value::reference(word_id), Fast::NoFast),
            Opcode::Fast(FastOp::Return, Fast::NoFast),
        ];
        tail_call(&arena, word_id, &mut ops);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Opcode::Jump(JumpOp::Bra, _)), "self-recursive tail call must be bra, got {:?}", ops[0]);
    }

    #[test]
    fn tail_call_to_a_label_becomes_bra() {
        let mut arena = crate::entity::EntityArena::new();
        let word_id = arena.alloc(crate::entity::Entity::new(
            "self",
            crate::entity::Section::Code,
            crate::entity::SourceLoc::new("<test>", 0),
            EntityKind::Word(crate::entity::WordBody::new(arena.len())),
        ));
        let label_id = arena.alloc(crate::entity::Entity::new(
            "L",
            crate::entity::Section::Code,
            crate::entity::SourceLoc::new("<test>", 0),
            EntityKind::Label,
        ));
        let mut ops = vec![
            Opcode::AddrFast(AddrFastOp::Call, Value::reference(label_id), Fast::NoFast),
            Opcode::Fast(FastOp::Return, Fast::NoFast),
        ];
        tail_call(&arena, word_id, &mut ops);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Opcode::Jump(JumpOp::Bra, _)), "tail call to an internal Label must be bra, got {:?}", ops[0]);
    }

    #[test]
    fn retlw_fusion_merges_movlw_and_return() {
        let mut ops = vec![
            Opcode::Jump(JumpOp::MovLw, Value::number(5)),
            Opcode::Fast(FastOp::Return, Fast::NoFast),
        ];
        retlw_fusion(&mut ops);
        assert_eq!(ops, vec![Opcode::Jump(JumpOp::RetLw, Value::number(5))]);
    }

    #[test]
    fn dead_label_elimination_drops_unreferenced_labels() {
        let mut ops = vec![Opcode::Label(1), Opcode::Plain(crate::opcode::PlainOp::Nop)];
        dead_label_elimination(&mut ops);
        assert_eq!(ops, vec![Opcode::Plain(crate::opcode::PlainOp::Nop)]);
    }

    #[test]
    fn dead_code_elimination_drops_code_after_unconditional_return() {
        let mut ops = vec![
            Opcode::Fast(FastOp::Return, Fast::NoFast),
            Opcode::Plain(crate::opcode::PlainOp::Nop),
        ];
        dead_code_elimination(&mut ops);
        assert_eq!(ops, vec![Opcode::Fast(FastOp::Return, Fast::NoFast)]);
    }

    /// Open Question (SPEC_FULL.md §9): a label right after an unconditional terminator
    /// must survive if some instruction *later* in the word branches back to it, even
    /// though nothing *before* the terminator referenced it yet.
    #[test]
    fn dead_code_keeps_label_reached_only_by_late_backward_branch() {
        let mut ops = vec![
            Opcode::Fast(FastOp::Return, Fast::NoFast),
            Opcode::Label(99),
            Opcode::Plain(crate::opcode::PlainOp::Nop),
            Opcode::Jump(JumpOp::Bra, Value::reference(99)),
        ];
        dead_code_elimination(&mut ops);
        assert!(ops.iter().any(|op| op.as_label() == Some(99)));
        assert!(ops.iter().any(|op| matches!(op, Opcode::Plain(crate::opcode::PlainOp::Nop))));
    }

    #[test]
    fn expand_word_turns_push_into_byte_pushes() {
        let mut state = CompilerState::new("t", vec![": w 5 ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        expand_word(&mut state, id).unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::Push(_))));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Jump(JumpOp::MovLw, _))));
    }

    #[test]
    fn expand_word_turns_bit_set_q_into_a_direct_skip_test() {
        let mut state = CompilerState::new("t", vec![": w 3 0x20 bit-set? ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        expand_word(&mut state, id).unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::BitSetQ(_, _, _))));
        assert!(w.opcodes.iter().any(|op| matches!(op, Opcode::Bit(crate::opcode::BitOp::BtfSs, _, _, Access::Access))));
    }

    #[test]
    fn optimize_word_fuses_a_known_tail_call_into_return() {
        let mut state = CompilerState::new("t", vec![": callee ; : caller callee ;".to_string()]);
        state.run().unwrap();
        let caller = state.lookup("caller").unwrap();
        optimize_word(&mut state, caller).unwrap();
        let w = state.arena.get(caller).word().unwrap();
        assert!(!w.opcodes.iter().any(|op| matches!(op, Opcode::AddrFast(AddrFastOp::Call, _, Fast::NoFast))
            && w.opcodes.last() == Some(&Opcode::Fast(FastOp::Return, Fast::NoFast))));
    }
}
