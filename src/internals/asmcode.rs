//! The assembly escape: `code ... ;code`, and the `prefix`/`postfix` suffix-modifier
//! toggle. Inside a `code` block the tokenizer stops running the ordinary interpreter
//! loop and instead reads raw PIC18 mnemonics with `,w`/`,f`/`,0`/`,1`/`,s` suffix
//! modifiers.
//!
//! Grounded on `rforth.py`'s `w_code`/`w_semicolon_code` and the per-mnemonic operand
//! tables `pic_opcodes*` (reused here as `opcode::{PlainOp, JumpOp, ...}`).

use crate::compiler::{AsmModifiers, CompilerState, Mode};
use crate::entity::{EntityKind, Section, WordBody};
use crate::messages::CompilerError;
use crate::opcode::{
    AddrAccessOp, AddrFastOp, AddrPairOp, Access, BitOp, Fast, FastOp, JumpOp, Opcode, PlainOp,
};
use crate::value::Value;

/// Built-in register names a `code` block can refer to by name instead of by raw
/// address. A small, representative subset of the PIC18 special function register file.
const REGISTERS: &[(&str, i64)] = &[
    ("WREG", 0xfe8),
    ("STATUS", 0xfd8),
    ("PCL", 0xff9),
    ("BSR", 0xfe0),
    ("FSR0L", 0xfe9),
    ("FSR0H", 0xfea),
    ("FSR1L", crate::opcode::FSR1L),
    ("FSR2L", 0xfdf),
    ("INDF0", crate::opcode::INDF0),
    ("INDF1", 0xfe7),
    ("INDF2", 0xfde),
    ("PREINC0", crate::opcode::PREINC0),
    ("POSTDEC0", crate::opcode::POSTDEC0),
    ("POSTINC0", crate::opcode::POSTINC0),
    ("PREINC2", crate::opcode::PREINC2),
    ("POSTDEC2", crate::opcode::POSTDEC2),
    ("POSTINC2", crate::opcode::POSTINC2),
];

enum Family {
    Plain(PlainOp),
    Jump(JumpOp),
    Fast(FastOp),
    AddrAccess(AddrAccessOp),
    AddrPair,
    AddrFast,
    Bit(BitOp),
}

fn mnemonic(name: &str) -> Option<Family> {
    use Family::*;
    Some(match name {
        "clrwdt" => Plain(PlainOp::ClrWdt),
        "daw" => Plain(PlainOp::Daw),
        "nop" => Plain(PlainOp::Nop),
        "sleep" => Plain(PlainOp::Sleep),
        "reset" => Plain(PlainOp::Reset),
        "tblrd*" => Plain(PlainOp::TblRdStar),
        "tblrd*+" => Plain(PlainOp::TblRdStarPlus),
        "tblrd*-" => Plain(PlainOp::TblRdStarMinus),
        "tblrd+*" => Plain(PlainOp::TblRdPlusStar),
        "tblwt*" => Plain(PlainOp::TblWtStar),
        "tblwt*+" => Plain(PlainOp::TblWtStarPlus),
        "tblwt*-" => Plain(PlainOp::TblWtStarMinus),
        "tblwt+*" => Plain(PlainOp::TblWtPlusStar),

        "bc" => Jump(JumpOp::Bc),
        "bn" => Jump(JumpOp::Bn),
        "bnc" => Jump(JumpOp::Bnc),
        "bnn" => Jump(JumpOp::Bnn),
        "bnov" => Jump(JumpOp::Bnov),
        "bnz" => Jump(JumpOp::Bnz),
        "bov" => Jump(JumpOp::Bov),
        "bra" => Jump(JumpOp::Bra),
        "bz" => Jump(JumpOp::Bz),
        "goto" => Jump(JumpOp::Goto),
        "rcall" => Jump(JumpOp::RCall),
        "addlw" => Jump(JumpOp::AddLw),
        "andlw" => Jump(JumpOp::AndLw),
        "iorlw" => Jump(JumpOp::IorLw),
        "movlb" => Jump(JumpOp::MovLb),
        "movlw" => Jump(JumpOp::MovLw),
        "mullw" => Jump(JumpOp::MulLw),
        "retlw" => Jump(JumpOp::RetLw),
        "sublw" => Jump(JumpOp::SubLw),
        "xorlw" => Jump(JumpOp::XorLw),

        "return" => Fast(FastOp::Return),
        "retfie" => Fast(FastOp::RetFie),

        "addwf" => AddrAccess(AddrAccessOp::AddWf),
        "addwfc" => AddrAccess(AddrAccessOp::AddWfC),
        "clrf" => AddrAccess(AddrAccessOp::ClrF),
        "cpfseq" => AddrAccess(AddrAccessOp::CpfsEq),
        "cpfsgt" => AddrAccess(AddrAccessOp::CpfsGt),
        "cpfslt" => AddrAccess(AddrAccessOp::CpfsLt),
        "decf" => AddrAccess(AddrAccessOp::DecF),
        "incf" => AddrAccess(AddrAccessOp::IncF),
        "movf" => AddrAccess(AddrAccessOp::MovF),
        "movwf" => AddrAccess(AddrAccessOp::MovWf),
        "mulwf" => AddrAccess(AddrAccessOp::MulWf),
        "negf" => AddrAccess(AddrAccessOp::NegF),
        "setf" => AddrAccess(AddrAccessOp::SetF),
        "tstfsz" => AddrAccess(AddrAccessOp::TstFsz),
        "lfsr" => AddrAccess(AddrAccessOp::Lfsr),
        "decfsz" => AddrAccess(AddrAccessOp::DecFsz),
        "dcfsnz" => AddrAccess(AddrAccessOp::DcfSnz),
        "incfsz" => AddrAccess(AddrAccessOp::IncFsz),
        "infsnz" => AddrAccess(AddrAccessOp::InFsnz),

        "movff" => AddrPair,
        "call" => AddrFast,

        "bsf" => Bit(BitOp::Bsf),
        "bcf" => Bit(BitOp::Bcf),
        "btg" => Bit(BitOp::Btg),
        "btfss" => Bit(BitOp::BtfSs),
        "btfsc" => Bit(BitOp::BtfSc),

        _ => return None,
    })
}

enum Suffix {
    DstW,
    DstF,
    AccessBank,
    NoAccessBank,
    Fast,
}

fn suffix(token: &str) -> Option<Suffix> {
    match token {
        ",w" => Some(Suffix::DstW),
        ",f" => Some(Suffix::DstF),
        ",0" => Some(Suffix::AccessBank),
        ",1" => Some(Suffix::NoAccessBank),
        ",s" => Some(Suffix::Fast),
        _ => None,
    }
}

/// Resolves an asm operand token: a numeric literal, a known register name, or the
/// name of an already-defined entity (Word, Label, Constant, ...).
fn operand(state: &mut CompilerState, token: &str) -> Result<Value, CompilerError> {
    if let Some((_, addr)) = REGISTERS.iter().find(|(name, _)| *name == token) {
        return Ok(Value::number(*addr));
    }
    if let Some(n) = crate::value::parse_number(token) {
        return Ok(Value::Number(n));
    }
    if let Some(id) = state.lookup(token) {
        return Ok(Value::reference(id));
    }
    Err(CompilerError::compilation(format!("unknown asm operand: {}", token), state.reader.current_location()))
}

fn next_operand(state: &mut CompilerState) -> Result<Value, CompilerError> {
    let tok = state.reader.next_token()?;
    operand(state, &tok)
}

fn patch_access(op: &mut Opcode, access: Access) {
    match op {
        Opcode::AddrAccess(_, _, a) => *a = access,
        Opcode::Bit(_, _, _, a) => *a = access,
        _ => {}
    }
}

fn patch_fast(op: &mut Opcode, fast: Fast) {
    match op {
        Opcode::Fast(_, f) => *f = fast,
        Opcode::AddrFast(_, _, f) => *f = fast,
        _ => {}
    }
}

fn build_opcode(family: Family, state: &mut CompilerState) -> Result<Opcode, CompilerError> {
    Ok(match family {
        Family::Plain(op) => Opcode::Plain(op),
        Family::Jump(op) => Opcode::Jump(op, next_operand(state)?),
        Family::Fast(FastOp::Return) => Opcode::Fast(FastOp::Return, state.asm_modifiers.fast),
        Family::Fast(FastOp::RetFie) => Opcode::Fast(FastOp::RetFie, state.asm_modifiers.fast),
        Family::AddrAccess(op) => {
            let addr = next_operand(state)?;
            Opcode::AddrAccess(op, addr, state.asm_modifiers.access)
        }
        Family::AddrPair => {
            let a = next_operand(state)?;
            let b = next_operand(state)?;
            Opcode::AddrPair(AddrPairOp::MovFf, a, b)
        }
        Family::AddrFast => Opcode::AddrFast(AddrFastOp::Call, next_operand(state)?, state.asm_modifiers.fast),
        Family::Bit(op) => {
            let addr = next_operand(state)?;
            let bit = next_operand(state)?;
            Opcode::Bit(op, addr, bit, state.asm_modifiers.access)
        }
    })
}

/// Called for every token while `state.in_code_block` is set. Handles `;code` (falls
/// through to the ordinary dispatcher, which finds it registered as an immediate),
/// suffix modifiers, and raw mnemonics; anything else falls back to the ordinary
/// interpreter (so calling another word from inside a `code` block still works).
pub fn interpret_token(state: &mut CompilerState, token: &str) -> Result<(), CompilerError> {
    if let Some(s) = suffix(token) {
        return apply_suffix(state, s);
    }
    if let Some(family) = mnemonic(token) {
        let postfix = state.asm_modifiers.postfix;
        let op = build_opcode(family, state)?;
        state.emit(op)?;
        if !postfix {
            // prefix mode: the modifiers just consumed were meant for this
            // instruction; reset them to defaults now that it has been built.
            state.asm_modifiers = AsmModifiers::default();
        }
        return Ok(());
    }
    state.interpret_ordinary_token(token)
}

/// Applies one suffix modifier. In postfix mode (the default — "the modifier is
/// written postfix to its target") it patches the instruction just emitted; in prefix
/// mode it sticks on `state.asm_modifiers` to be consumed when the *next* instruction
/// is built.
fn apply_suffix(state: &mut CompilerState, s: Suffix) -> Result<(), CompilerError> {
    if state.asm_modifiers.postfix {
        match s {
            Suffix::DstW => state.asm_modifiers.dst_f = false,
            Suffix::DstF => state.asm_modifiers.dst_f = true,
            Suffix::AccessBank => {
                if let Some(op) = state.current_word_mut().ok().map(|w| w.opcodes.last_mut()).flatten() {
                    patch_access(op, Access::Access);
                }
            }
            Suffix::NoAccessBank => {
                if let Some(op) = state.current_word_mut().ok().map(|w| w.opcodes.last_mut()).flatten() {
                    patch_access(op, Access::NoAccess);
                }
            }
            Suffix::Fast => {
                if let Some(op) = state.current_word_mut().ok().map(|w| w.opcodes.last_mut()).flatten() {
                    patch_fast(op, Fast::Fast);
                }
            }
        }
    } else {
        match s {
            Suffix::DstW => state.asm_modifiers.dst_f = false,
            Suffix::DstF => state.asm_modifiers.dst_f = true,
            Suffix::AccessBank => state.asm_modifiers.access = Access::Access,
            Suffix::NoAccessBank => state.asm_modifiers.access = Access::NoAccess,
            Suffix::Fast => state.asm_modifiers.fast = Fast::Fast,
        }
    }
    Ok(())
}

/// `code NAME` — begins an assembly-escape word definition: the body is read as raw
/// PIC mnemonics rather than ordinary Forth words until `;code`.
pub fn code(state: &mut CompilerState) -> Result<(), CompilerError> {
    let name = state.reader.next_token().map_err(|_| CompilerError::fatal("code: expected a name"))?;
    let id = state.define(&name, Section::Code, EntityKind::Word(WordBody::new(0)));
    let end_label = state.alloc_label(state.reader.current_location());
    if let EntityKind::Word(w) = &mut state.arena.get_mut(id).kind {
        w.end_label = end_label;
    }
    state.current_object = Some(id);
    state.mode = Mode::Compile;
    state.in_code_block = true;
    state.asm_modifiers = AsmModifiers::default();
    state.emit(Opcode::Label(id))
}

/// `;code` — ends an assembly-escape word definition.
pub fn end_code(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.current_object = None;
    state.mode = Mode::Interpret;
    state.in_code_block = false;
    state.asm_modifiers = AsmModifiers::default();
    Ok(())
}

pub fn prefix(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.asm_modifiers.postfix = false;
    Ok(())
}

pub fn postfix(state: &mut CompilerState) -> Result<(), CompilerError> {
    state.asm_modifiers.postfix = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{FastOp, JumpOp};

    #[test]
    fn code_block_emits_exact_opcode_sequence() {
        let mut state = CompilerState::new(
            "t",
            vec!["code foo movlw 5 ,w movwf WREG ,0 return ;code".to_string()],
        );
        state.run().unwrap();
        let id = state.lookup("foo").unwrap();
        let w = state.arena.get(id).word().unwrap();
        assert!(matches!(w.opcodes[0], Opcode::Label(label) if label == id));
        assert!(matches!(&w.opcodes[1], Opcode::Jump(JumpOp::MovLw, v) if v.static_value(&state.arena) == Some(5)));
        assert!(matches!(w.opcodes[2], Opcode::AddrAccess(AddrAccessOp::MovWf, _, Access::Access)));
        assert!(matches!(w.opcodes[3], Opcode::Fast(FastOp::Return, Fast::NoFast)));
        assert_eq!(w.opcodes.len(), 4);
    }
}
