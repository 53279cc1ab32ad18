//! The primitive catalogue: the compile-time vocabulary that drives the interpreter
//! loop. Modeled as one tagged `enum PrimitiveKind` plus a single dispatch table,
//! replacing the source compiler's function-per-primitive with runtime metaclass
//! construction.
//!
//! Each family lives in its own module, mirroring this crate's convention of one
//! `internals/*.rs` file per related group of builtin words (`general.rs` for stack
//! arithmetic, `console.rs` for I/O words, and so on).

pub mod arith;
pub mod asmcode;
pub mod attrs;
pub mod bits;
pub mod control;
pub mod definition;
pub mod interrupts;
pub mod macros;
pub mod memory;
pub mod source;
pub mod stackopt;

use crate::compiler::CompilerState;
use crate::entity::{Entity, EntityKind, Flags, Section, SourceLoc};
use crate::messages::CompilerError;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PrimitiveKind {
    // definition.rs
    Colon,
    Semicolon,
    Constant,
    Variable,
    CVariable,
    EeVariable,
    EeCVariable,
    ValueWord,
    Create,
    Comma,
    CComma,
    Allot,
    BitWord,
    Forward,

    // control.rs
    Begin,
    Again,
    Until,
    While,
    Repeat,
    If,
    Else,
    Then,
    Ahead,
    EarlyExitOpen,
    EarlyExitClose,
    CFor,
    CNext,
    SwitchW,
    CaseW,
    DefaultW,
    EndCaseW,
    EndSwitchW,
    QIf,
    Recurse,
    Exit,

    // stackopt.rs
    Dup,
    Drop,
    ToW,
    WFrom,
    ToR,
    RFrom,
    Keep,
    Bi,

    // arith.rs
    Plus,
    Minus,
    Times,
    LShift,
    OnePlus,
    OneMinus,

    // memory.rs
    Store,
    CStore,
    Fetch,
    CFetch,
    OnePlusStore,

    // bits.rs
    BitSet,
    BitClr,
    BitToggle,
    BitSetQ,
    BitClrQ,
    BitMask,

    // asmcode.rs
    Code,
    EndCode,
    Prefix,
    Postfix,

    // interrupts.rs
    IntrProtect,
    IntrUnprotect,
    LowInterrupt,
    HighInterrupt,

    // attrs.rs
    Inline,
    NoInline,
    InW,
    OutW,
    OutZ,

    // macros.rs
    MacroStart,
    MacroEnd,

    // source.rs
    ParenComment,
    Include,
    Needs,
}

/// `(name, kind, stack-effect doc comment)` — mirrors the `compile_builtins`/
/// `add_builtins` sequential-registration idiom, one line per primitive with a Forth
/// stack-effect comment, rather than a declarative table.
const CATALOGUE: &[(&str, PrimitiveKind, &str)] = &[
    (":", PrimitiveKind::Colon, ": ( \"name\" -- ) begin a new word definition"),
    (";", PrimitiveKind::Semicolon, "; ( -- ) end the current word definition"),
    ("constant", PrimitiveKind::Constant, "constant ( n \"name\" -- ) define a named compile-time integer"),
    ("variable", PrimitiveKind::Variable, "variable ( \"name\" -- ) allot a two-byte RAM cell"),
    ("cvariable", PrimitiveKind::CVariable, "cvariable ( \"name\" -- ) allot a one-byte RAM cell"),
    ("eevariable", PrimitiveKind::EeVariable, "eevariable ( \"name\" -- ) allot a two-byte EEPROM cell"),
    ("eecvariable", PrimitiveKind::EeCVariable, "eecvariable ( \"name\" -- ) allot a one-byte EEPROM cell"),
    ("value", PrimitiveKind::ValueWord, "value ( n \"name\" -- ) define a named value cell with an initializer"),
    ("create", PrimitiveKind::Create, "create ( \"name\" -- ) begin a data definition allotted with , and c,"),
    (",", PrimitiveKind::Comma, ", ( n -- ) append a cell to the most recent create"),
    ("c,", PrimitiveKind::CComma, "c, ( n -- ) append a byte to the most recent create"),
    ("allot", PrimitiveKind::Allot, "allot ( n -- ) reserve n bytes after the most recent create"),
    ("bit", PrimitiveKind::BitWord, "bit ( addr bit-index \"name\" -- ) define a named bit"),
    ("forward", PrimitiveKind::Forward, "forward ( \"name\" -- ) declare a placeholder to be defined later"),
    ("begin", PrimitiveKind::Begin, "begin ( -- label ) mark the top of a loop"),
    ("again", PrimitiveKind::Again, "again ( label -- ) unconditional jump back to begin"),
    ("until", PrimitiveKind::Until, "until ( label -- ) conditional jump back to begin"),
    ("while", PrimitiveKind::While, "while ( label -- label fwd ) conditional exit from a begin loop"),
    ("repeat", PrimitiveKind::Repeat, "repeat ( label fwd -- ) close a begin..while..repeat loop"),
    ("if", PrimitiveKind::If, "if ( -- fwd ) conditional forward branch"),
    ("else", PrimitiveKind::Else, "else ( fwd -- fwd' ) alternate branch of an if"),
    ("then", PrimitiveKind::Then, "then ( fwd -- ) resolve an if/else forward branch"),
    ("ahead", PrimitiveKind::Ahead, "ahead ( -- fwd ) unconditional forward branch"),
    ("[[", PrimitiveKind::EarlyExitOpen, "[[ ( -- ) open a scoped early-exit block"),
    ("]]", PrimitiveKind::EarlyExitClose, "]] ( -- ) close a scoped early-exit block"),
    ("cfor", PrimitiveKind::CFor, "cfor ( -- label ) begin a byte-counted loop"),
    ("cnext", PrimitiveKind::CNext, "cnext ( label -- ) close a cfor loop"),
    ("switchw", PrimitiveKind::SwitchW, "switchw ( -- ) begin a jump table dispatching on W"),
    ("casew", PrimitiveKind::CaseW, "casew ( n -- ) one arm of a switchw"),
    ("defaultw", PrimitiveKind::DefaultW, "defaultw ( -- ) the default arm of a switchw"),
    ("endcasew", PrimitiveKind::EndCaseW, "endcasew ( -- ) end one casew arm"),
    ("endswitchw", PrimitiveKind::EndSwitchW, "endswitchw ( -- ) end a switchw"),
    ("?if", PrimitiveKind::QIf, "?if ( -- fwd ) conditional forward branch testing the carry flag"),
    ("recurse", PrimitiveKind::Recurse, "recurse ( -- ) call the word currently being defined"),
    ("exit", PrimitiveKind::Exit, "exit ( -- ) jump to the innermost [[ ]] exit point, or return early"),
    ("dup", PrimitiveKind::Dup, "dup ( n -- n n ) duplicate the top compile-time value"),
    ("drop", PrimitiveKind::Drop, "drop ( n -- ) discard the top compile-time value"),
    (">w", PrimitiveKind::ToW, ">w ( n -- ) move the top of the data stack into W"),
    ("w>", PrimitiveKind::WFrom, "w> ( -- n ) push W onto the data stack"),
    (">r", PrimitiveKind::ToR, ">r ( n -- ) move the top of the data stack to the return stack"),
    ("r>", PrimitiveKind::RFrom, "r> ( -- n ) move the top of the return stack to the data stack"),
    ("keep", PrimitiveKind::Keep, "keep ( n -- n ) re-push a copy of the last pushed value"),
    ("bi", PrimitiveKind::Bi, "bi ( a b -- a b ) apply two operations to a shared value"),
    ("+", PrimitiveKind::Plus, "+ ( a b -- sum ) add, folding when both operands are static"),
    ("-", PrimitiveKind::Minus, "- ( a b -- diff ) subtract, folding when both operands are static"),
    ("*", PrimitiveKind::Times, "* ( a b -- product ) multiply, folding when both operands are static"),
    ("lshift", PrimitiveKind::LShift, "lshift ( a n -- a<<n ) shift left, folding when static"),
    ("1+", PrimitiveKind::OnePlus, "1+ ( n -- n+1 ) increment, folding when static"),
    ("1-", PrimitiveKind::OneMinus, "1- ( n -- n-1 ) decrement, folding when static"),
    ("!", PrimitiveKind::Store, "! ( n addr -- ) store a cell"),
    ("c!", PrimitiveKind::CStore, "c! ( n addr -- ) store a byte"),
    ("@", PrimitiveKind::Fetch, "@ ( addr -- n ) fetch a cell"),
    ("c@", PrimitiveKind::CFetch, "c@ ( addr -- n ) fetch a byte"),
    ("1+!", PrimitiveKind::OnePlusStore, "1+! ( addr -- ) increment the cell at addr in place"),
    ("bit-set", PrimitiveKind::BitSet, "bit-set ( bit addr -- ) set a bit"),
    ("bit-clr", PrimitiveKind::BitClr, "bit-clr ( bit addr -- ) clear a bit"),
    ("bit-toggle", PrimitiveKind::BitToggle, "bit-toggle ( bit addr -- ) toggle a bit"),
    ("bit-set?", PrimitiveKind::BitSetQ, "bit-set? ( bit addr -- flag ) test whether a bit is set"),
    ("bit-clr?", PrimitiveKind::BitClrQ, "bit-clr? ( bit addr -- flag ) test whether a bit is clear"),
    ("bit-mask", PrimitiveKind::BitMask, "bit-mask ( bit -- mask ) compute a single-bit mask"),
    ("code", PrimitiveKind::Code, "code ( \"name\" -- ) begin an assembly-escape word definition"),
    (";code", PrimitiveKind::EndCode, ";code ( -- ) end an assembly-escape word definition"),
    ("prefix", PrimitiveKind::Prefix, "prefix ( -- ) suffix modifiers attach to the previous token"),
    ("postfix", PrimitiveKind::Postfix, "postfix ( -- ) suffix modifiers attach to the following token"),
    ("intr-protect", PrimitiveKind::IntrProtect, "intr-protect ( -- ) save and clear the global interrupt-enable bit"),
    ("intr-unprotect", PrimitiveKind::IntrUnprotect, "intr-unprotect ( -- ) restore the global interrupt-enable bit"),
    ("low-interrupt", PrimitiveKind::LowInterrupt, "low-interrupt ( -- ) mark the current word as the low-priority ISR"),
    ("high-interrupt", PrimitiveKind::HighInterrupt, "high-interrupt ( -- ) mark the current word as the high-priority ISR"),
    ("inline", PrimitiveKind::Inline, "inline ( -- ) force this word to be inlined at every call site"),
    ("no-inline", PrimitiveKind::NoInline, "no-inline ( -- ) forbid inlining this word"),
    ("inw", PrimitiveKind::InW, "inw ( -- ) this word expects its argument in W, not the stack"),
    ("outw", PrimitiveKind::OutW, "outw ( -- ) this word returns its result in W, not the stack"),
    ("outz", PrimitiveKind::OutZ, "outz ( -- ) this word's result is reflected in the Z flag"),
    ("macro", PrimitiveKind::MacroStart, "macro ( \"name\" -- ) begin a compile-time macro definition"),
    (";macro", PrimitiveKind::MacroEnd, ";macro ( -- ) end a compile-time macro definition"),
    ("(", PrimitiveKind::ParenComment, "( ( \"ccc<paren>\" -- ) discard a parenthesized comment"),
    ("include", PrimitiveKind::Include, "include ( \"name\" -- ) unconditionally compile another file"),
    ("needs", PrimitiveKind::Needs, "needs ( \"name\" -- ) compile another file unless already loaded"),
];

/// Registers every primitive in the dictionary as an immediate `Entity`, in catalogue
/// order (mirroring `compile_builtins`'s sequential-registration idiom).
pub fn register_all(state: &mut CompilerState) {
    for (name, kind, _doc) in CATALOGUE {
        let mut entity = Entity::new(
            *name,
            Section::Undefined,
            SourceLoc::new("<builtin>", 0),
            EntityKind::Primitive(*kind),
        );
        entity.flags = Flags { immediate: true, from_source: false, ..Flags::default() };
        let id = state.arena.alloc(entity);
        state.dict.insert(name.to_string(), id);
        state.first_dict.entry(name.to_string()).or_insert(id);
    }
}

/// Looks up which `PrimitiveKind` an entity carries, panicking-free: callers already
/// know `id` is immediate before calling this.
fn kind_of(state: &CompilerState, id: crate::entity::EntityId) -> Option<PrimitiveKind> {
    match &state.arena.get(id).kind {
        EntityKind::Primitive(k) => Some(*k),
        _ => None,
    }
}

/// Runs the compile-time behavior bound to an immediate word: the first step of the
/// interpreter loop's dispatch, before falling back to ordinary call-or-push handling.
pub fn dispatch(state: &mut CompilerState, id: crate::entity::EntityId) -> Result<(), CompilerError> {
    let kind = kind_of(state, id)
        .ok_or_else(|| CompilerError::internal("dispatch called on a non-primitive entity"))?;
    use PrimitiveKind::*;
    match kind {
        Colon => definition::colon(state),
        Semicolon => definition::semicolon(state),
        Constant => definition::constant(state),
        Variable => definition::variable(state),
        CVariable => definition::cvariable(state),
        EeVariable => definition::eevariable(state),
        EeCVariable => definition::eecvariable(state),
        ValueWord => definition::value_word(state),
        Create => definition::create(state),
        Comma => definition::comma(state),
        CComma => definition::c_comma(state),
        Allot => definition::allot(state),
        BitWord => definition::bit_word(state),
        Forward => definition::forward(state),

        Begin => control::begin(state),
        Again => control::again(state),
        Until => control::until(state),
        While => control::while_(state),
        Repeat => control::repeat(state),
        If => control::if_(state),
        Else => control::else_(state),
        Then => control::then(state),
        Ahead => control::ahead(state),
        EarlyExitOpen => control::early_exit_open(state),
        EarlyExitClose => control::early_exit_close(state),
        CFor => control::cfor(state),
        CNext => control::cnext(state),
        SwitchW => control::switchw(state),
        CaseW => control::casew(state),
        DefaultW => control::defaultw(state),
        EndCaseW => control::endcasew(state),
        EndSwitchW => control::endswitchw(state),
        QIf => control::qif(state),
        Recurse => control::recurse(state),
        Exit => control::exit(state),

        Dup => stackopt::dup(state),
        Drop => stackopt::drop_(state),
        ToW => stackopt::to_w(state),
        WFrom => stackopt::w_from(state),
        ToR => stackopt::to_r(state),
        RFrom => stackopt::r_from(state),
        Keep => stackopt::keep(state),
        Bi => stackopt::bi(state),

        Plus => arith::plus(state),
        Minus => arith::minus(state),
        Times => arith::times(state),
        LShift => arith::lshift(state),
        OnePlus => arith::one_plus(state),
        OneMinus => arith::one_minus(state),

        Store => memory::store(state),
        CStore => memory::c_store(state),
        Fetch => memory::fetch(state),
        CFetch => memory::c_fetch(state),
        OnePlusStore => memory::one_plus_store(state),

        BitSet => bits::bit_set(state),
        BitClr => bits::bit_clr(state),
        BitToggle => bits::bit_toggle(state),
        BitSetQ => bits::bit_set_q(state),
        BitClrQ => bits::bit_clr_q(state),
        BitMask => bits::bit_mask(state),

        Code => asmcode::code(state),
        EndCode => asmcode::end_code(state),
        Prefix => asmcode::prefix(state),
        Postfix => asmcode::postfix(state),

        IntrProtect => interrupts::intr_protect(state),
        IntrUnprotect => interrupts::intr_unprotect(state),
        LowInterrupt => interrupts::low_interrupt(state),
        HighInterrupt => interrupts::high_interrupt(state),

        Inline => attrs::inline(state),
        NoInline => attrs::no_inline(state),
        InW => attrs::inw(state),
        OutW => attrs::outw(state),
        OutZ => attrs::outz(state),

        MacroStart => macros::macro_start(state),
        MacroEnd => macros::macro_end(state),

        ParenComment => source::paren_comment(state),
        Include => source::include(state),
        Needs => source::needs(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (name, _, _) in CATALOGUE {
            assert!(seen.insert(*name), "duplicate primitive name: {}", name);
        }
    }
}
