//! The intermediate opcode representation: a proper tagged variant per PIC18 mnemonic
//! family, plus the pseudo-ops that survive into the IR only to be expanded before
//! optimization, plus meta-markers (labels, comments, fixpoints the expander leaves
//! behind for itself).
//!
//! Mnemonic families grounded on `examples/original_source/rforth.py`'s `pic_opcodes`,
//! `pic_opcodes_l`, `pic_opcodes_s`, `pic_opcodes_la`, `pic_opcodes_ll`, `pic_opcodes_ls`.

use std::fmt;

use crate::entity::EntityId;
use crate::value::Value;

/// Indirect-addressing special function register offsets shared by the stack-effect
/// primitives (`stackopt.rs`, `control.rs`) and the pseudo-op expander below. FSR0 is the
/// data stack pointer, FSR2 the return stack pointer, FSR1 a scratch indirect pointer
/// used as the bit-ops fallback.
pub const PREINC0: i64 = 0xfe1;
pub const POSTDEC0: i64 = 0xfe0;
pub const POSTINC0: i64 = 0xfe2;
pub const PREINC1: i64 = 0xfe3;
pub const FSR1L: i64 = 0xfe9;
pub const PREINC2: i64 = 0xfe4;
pub const POSTDEC2: i64 = 0xfe6;
pub const POSTINC2: i64 = 0xfe8;
pub const INDF0: i64 = 0xfef;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    Access,
    NoAccess,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Access => write!(f, "access"),
            Access::NoAccess => write!(f, "0"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fast {
    Fast,
    NoFast,
}

impl fmt::Display for Fast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fast::Fast => write!(f, "1"),
            Fast::NoFast => write!(f, "0"),
        }
    }
}

/// Zero-operand real instructions (`pic_opcodes`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlainOp {
    ClrWdt,
    Daw,
    Nop,
    Sleep,
    Reset,
    TblRdStar,
    TblRdStarPlus,
    TblRdStarMinus,
    TblRdPlusStar,
    TblWtStar,
    TblWtStarPlus,
    TblWtStarMinus,
    TblWtPlusStar,
}

impl fmt::Display for PlainOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlainOp::ClrWdt => "clrwdt",
            PlainOp::Daw => "daw",
            PlainOp::Nop => "nop",
            PlainOp::Sleep => "sleep",
            PlainOp::Reset => "reset",
            PlainOp::TblRdStar => "tblrd*",
            PlainOp::TblRdStarPlus => "tblrd*+",
            PlainOp::TblRdStarMinus => "tblrd*-",
            PlainOp::TblRdPlusStar => "tblrd+*",
            PlainOp::TblWtStar => "tblwt*",
            PlainOp::TblWtStarPlus => "tblwt*+",
            PlainOp::TblWtStarMinus => "tblwt*-",
            PlainOp::TblWtPlusStar => "tblwt+*",
        };
        write!(f, "{}", s)
    }
}

/// One-operand jump/literal instructions (`pic_opcodes_l`). The operand is either a
/// jump target (a `Value::Reference` to a Label/Word) or an 8-bit literal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JumpOp {
    Bc,
    Bn,
    Bnc,
    Bnn,
    Bnov,
    Bnz,
    Bov,
    Bra,
    Bz,
    Goto,
    RCall,
    AddLw,
    AndLw,
    IorLw,
    MovLb,
    MovLw,
    MulLw,
    RetLw,
    SubLw,
    XorLw,
}

impl JumpOp {
    /// True for the unconditional control-transfer mnemonics the optimizer treats as
    /// "falls off the end of the word" terminators.
    pub fn is_unconditional_jump(self) -> bool {
        matches!(self, JumpOp::Goto | JumpOp::Bra)
    }

    pub fn is_internal_jump(self) -> bool {
        matches!(
            self,
            JumpOp::Bc
                | JumpOp::Bn
                | JumpOp::Bnc
                | JumpOp::Bnn
                | JumpOp::Bnov
                | JumpOp::Bnz
                | JumpOp::Bov
                | JumpOp::Bra
                | JumpOp::Bz
        )
    }
}

impl fmt::Display for JumpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JumpOp::Bc => "bc",
            JumpOp::Bn => "bn",
            JumpOp::Bnc => "bnc",
            JumpOp::Bnn => "bnn",
            JumpOp::Bnov => "bnov",
            JumpOp::Bnz => "bnz",
            JumpOp::Bov => "bov",
            JumpOp::Bra => "bra",
            JumpOp::Bz => "bz",
            JumpOp::Goto => "goto",
            JumpOp::RCall => "rcall",
            JumpOp::AddLw => "addlw",
            JumpOp::AndLw => "andlw",
            JumpOp::IorLw => "iorlw",
            JumpOp::MovLb => "movlb",
            JumpOp::MovLw => "movlw",
            JumpOp::MulLw => "mullw",
            JumpOp::RetLw => "retlw",
            JumpOp::SubLw => "sublw",
            JumpOp::XorLw => "xorlw",
        };
        write!(f, "{}", s)
    }
}

/// Fast/no-fast-tagged instructions (`pic_opcodes_s`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FastOp {
    Return,
    RetFie,
}

impl fmt::Display for FastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FastOp::Return => write!(f, "return"),
            FastOp::RetFie => write!(f, "retfie"),
        }
    }
}

/// Address+access-bank-tagged instructions (`pic_opcodes_la`), extended with the
/// skip-on-condition family the peephole optimizer names directly (decfsz/dcfsnz/
/// incfsz/infsnz) which shares the same operand shape.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrAccessOp {
    AddWf,
    AddWfC,
    ClrF,
    CpfsEq,
    CpfsGt,
    CpfsLt,
    DecF,
    IncF,
    MovF,
    MovWf,
    MulWf,
    NegF,
    SetF,
    TstFsz,
    Lfsr,
    DecFsz,
    DcfSnz,
    IncFsz,
    InFsnz,
}

impl AddrAccessOp {
    pub fn is_skip_on_condition(self) -> bool {
        matches!(
            self,
            AddrAccessOp::TstFsz
                | AddrAccessOp::DecFsz
                | AddrAccessOp::DcfSnz
                | AddrAccessOp::IncFsz
                | AddrAccessOp::InFsnz
        )
    }
}

impl fmt::Display for AddrAccessOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddrAccessOp::AddWf => "addwf",
            AddrAccessOp::AddWfC => "addwfc",
            AddrAccessOp::ClrF => "clrf",
            AddrAccessOp::CpfsEq => "cpfseq",
            AddrAccessOp::CpfsGt => "cpfsgt",
            AddrAccessOp::CpfsLt => "cpfslt",
            AddrAccessOp::DecF => "decf",
            AddrAccessOp::IncF => "incf",
            AddrAccessOp::MovF => "movf",
            AddrAccessOp::MovWf => "movwf",
            AddrAccessOp::MulWf => "mulwf",
            AddrAccessOp::NegF => "negf",
            AddrAccessOp::SetF => "setf",
            AddrAccessOp::TstFsz => "tstfsz",
            AddrAccessOp::Lfsr => "lfsr",
            AddrAccessOp::DecFsz => "decfsz",
            AddrAccessOp::DcfSnz => "dcfsnz",
            AddrAccessOp::IncFsz => "incfsz",
            AddrAccessOp::InFsnz => "infsnz",
        };
        write!(f, "{}", s)
    }
}

/// Two-address instructions with no access tag (`pic_opcodes_ll`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrPairOp {
    MovFf,
}

impl fmt::Display for AddrPairOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "movff")
    }
}

/// Address+fast-tagged instructions (`pic_opcodes_ls`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrFastOp {
    Call,
}

impl fmt::Display for AddrFastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call")
    }
}

/// Address+bit-index+access instructions: direct bit mutation (`bsf`/`bcf`/`btg`) and
/// bit-test-and-skip (`btfss`/`btfsc`), which share one operand shape.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitOp {
    Bsf,
    Bcf,
    Btg,
    BtfSs,
    BtfSc,
}

impl BitOp {
    pub fn is_skip(self) -> bool {
        matches!(self, BitOp::BtfSs | BitOp::BtfSc)
    }
}

impl fmt::Display for BitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BitOp::Bsf => "bsf",
            BitOp::Bcf => "bcf",
            BitOp::Btg => "btg",
            BitOp::BtfSs => "btfss",
            BitOp::BtfSc => "btfsc",
        };
        write!(f, "{}", s)
    }
}

/// One opcode in a Word's body. Pseudo-ops and meta-markers carry no direct assembly
/// rendering; `crate::opcode::expand` rewrites pseudo-ops into real-instruction opcodes
/// before a Word is optimized.
#[derive(Clone, PartialEq, Debug)]
pub enum Opcode {
    Plain(PlainOp),
    Jump(JumpOp, Value),
    Fast(FastOp, Fast),
    AddrAccess(AddrAccessOp, Value, Access),
    AddrPair(AddrPairOp, Value, Value),
    AddrFast(AddrFastOp, Value, Fast),
    Bit(BitOp, Value, Value, Access),

    // Pseudo-ops (expanded away before optimization).
    Push(Value),
    Fetch(Value),
    CFetch(Value),
    FetchTos,
    CFetchTos,
    PushW(Value),
    PopW,
    DropTos,
    Dup,
    ZeroEquals,
    Normalize,
    BitSetQ(Value, Value, Access),
    BitClrQ(Value, Value, Access),
    TwoToOne,
    IntrProtect,
    IntrUnprotect,

    // Meta-markers.
    Label(EntityId),
    Comment(String),
    MarkerZSet,
    MarkerInlineBoundary,
}

impl Opcode {
    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            Opcode::Push(_)
                | Opcode::Fetch(_)
                | Opcode::CFetch(_)
                | Opcode::FetchTos
                | Opcode::CFetchTos
                | Opcode::PushW(_)
                | Opcode::PopW
                | Opcode::DropTos
                | Opcode::Dup
                | Opcode::ZeroEquals
                | Opcode::Normalize
                | Opcode::BitSetQ(_, _, _)
                | Opcode::BitClrQ(_, _, _)
                | Opcode::TwoToOne
                | Opcode::IntrProtect
                | Opcode::IntrUnprotect
        )
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Opcode::Comment(_) | Opcode::MarkerZSet | Opcode::MarkerInlineBoundary)
    }

    pub fn as_label(&self) -> Option<EntityId> {
        match self {
            Opcode::Label(id) => Some(*id),
            _ => None,
        }
    }

    /// The unconditional word-body terminators the dead-code/tail-call rules key on:
    /// `goto`, `bra`, `retlw`, `return`, `retfie`, `reset`, or `movwf PCL,access`.
    pub fn is_unconditional_terminator(&self) -> bool {
        match self {
            Opcode::Jump(op, _) => op.is_unconditional_jump() || matches!(op, JumpOp::RetLw),
            Opcode::Fast(_, _) => true,
            Opcode::Plain(PlainOp::Reset) => true,
            _ => false,
        }
    }

    pub fn is_return_no_fast(&self) -> bool {
        matches!(self, Opcode::Fast(FastOp::Return, Fast::NoFast))
    }

    pub fn is_return_fast(&self) -> bool {
        matches!(self, Opcode::Fast(FastOp::Return, Fast::Fast))
    }

    /// True if this opcode's first (or only) parameter references `label`, matching
    /// `Named.makes_reference_to` scans used to decide reachability within a word body.
    pub fn makes_reference_to(&self, label: EntityId) -> bool {
        match self {
            Opcode::Jump(_, v) => v.makes_reference_to(label),
            Opcode::AddrAccess(_, v, _) => v.makes_reference_to(label),
            Opcode::AddrPair(_, a, b) => a.makes_reference_to(label) || b.makes_reference_to(label),
            Opcode::AddrFast(_, v, _) => v.makes_reference_to(label),
            Opcode::Bit(_, a, b, _) => a.makes_reference_to(label) || b.makes_reference_to(label),
            Opcode::Push(v) | Opcode::Fetch(v) | Opcode::CFetch(v) | Opcode::PushW(v) => {
                v.makes_reference_to(label)
            }
            Opcode::BitSetQ(a, b, _) | Opcode::BitClrQ(a, b, _) => {
                a.makes_reference_to(label) || b.makes_reference_to(label)
            }
            Opcode::Label(id) => *id == label,
            _ => false,
        }
    }

    /// Every entity this opcode mentions, for reference-list population during the
    /// reachability walk (labels are excluded — they are definitions, not mentions).
    pub fn referenced_entities(&self) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut collect = |v: &Value, out: &mut Vec<EntityId>| {
            if let Value::Reference(id) = v {
                out.push(*id);
            }
        };
        match self {
            Opcode::Jump(_, v) => collect(v, &mut out),
            Opcode::AddrAccess(_, v, _) => collect(v, &mut out),
            Opcode::AddrPair(_, a, b) => {
                collect(a, &mut out);
                collect(b, &mut out);
            }
            Opcode::AddrFast(_, v, _) => collect(v, &mut out),
            Opcode::Bit(_, a, b, _) => {
                collect(a, &mut out);
                collect(b, &mut out);
            }
            Opcode::Push(v) | Opcode::Fetch(v) | Opcode::CFetch(v) | Opcode::PushW(v) => {
                collect(v, &mut out)
            }
            Opcode::BitSetQ(a, b, _) | Opcode::BitClrQ(a, b, _) => {
                collect(a, &mut out);
                collect(b, &mut out);
            }
            _ => {}
        }
        out
    }

    /// Rewrites any entity reference from `from` to `to`, across Values and Labels.
    pub fn rewrite_entity(&mut self, from: EntityId, to: EntityId) {
        match self {
            Opcode::Jump(_, v) => v.rewrite_entity(from, to),
            Opcode::AddrAccess(_, v, _) => v.rewrite_entity(from, to),
            Opcode::AddrPair(_, a, b) => {
                a.rewrite_entity(from, to);
                b.rewrite_entity(from, to);
            }
            Opcode::AddrFast(_, v, _) => v.rewrite_entity(from, to),
            Opcode::Bit(_, a, b, _) => {
                a.rewrite_entity(from, to);
                b.rewrite_entity(from, to);
            }
            Opcode::Push(v) | Opcode::Fetch(v) | Opcode::CFetch(v) | Opcode::PushW(v) => {
                v.rewrite_entity(from, to)
            }
            Opcode::BitSetQ(a, b, _) | Opcode::BitClrQ(a, b, _) => {
                a.rewrite_entity(from, to);
                b.rewrite_entity(from, to);
            }
            Opcode::Label(id) if *id == from => *id = to,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_classifies_unconditional_vs_internal() {
        assert!(JumpOp::Goto.is_unconditional_jump());
        assert!(!JumpOp::Bz.is_unconditional_jump());
        assert!(JumpOp::Bra.is_internal_jump());
        assert!(!JumpOp::Goto.is_internal_jump());
    }

    #[test]
    fn opcode_reports_pseudo_and_marker_correctly() {
        assert!(Opcode::Push(Value::number(1)).is_pseudo());
        assert!(!Opcode::Label(0).is_pseudo());
        assert!(Opcode::Comment("x".into()).is_marker());
        assert!(!Opcode::Dup.is_marker());
    }

    #[test]
    fn makes_reference_to_matches_label_opcode() {
        assert!(Opcode::Label(3).makes_reference_to(3));
        assert!(!Opcode::Label(3).makes_reference_to(4));
        let jump = Opcode::Jump(JumpOp::Goto, Value::Reference(7));
        assert!(jump.makes_reference_to(7));
        assert!(!jump.makes_reference_to(8));
    }

    #[test]
    fn rewrite_entity_updates_jump_targets() {
        let mut jump = Opcode::Jump(JumpOp::Goto, Value::Reference(1));
        jump.rewrite_entity(1, 99);
        assert!(jump.makes_reference_to(99));
        assert!(!jump.makes_reference_to(1));
    }

    #[test]
    fn terminators_include_unconditional_jumps_and_returns() {
        assert!(Opcode::Jump(JumpOp::Goto, Value::number(0)).is_unconditional_terminator());
        assert!(Opcode::Fast(FastOp::Return, Fast::NoFast).is_unconditional_terminator());
        assert!(!Opcode::Dup.is_unconditional_terminator());
    }
}
