//! Symbolic literal values: numbers and the arithmetic expressions folded from them.
//!
//! Grounded on `examples/original_source/rforth.py`'s `LiteralValue`/`Number`/`Binary`/
//! `Unary` classes and the `low`/`high`/address-range free functions near the top of
//! that file.

use std::fmt;

use crate::entity::{EntityArena, EntityId, EntityKind};

pub const ACCESS_BANK_LOW: i64 = 0x5f;
pub const ACCESS_BANK_HIGH_LOW: i64 = 0xf60;
pub const BANK1_MASK: i64 = 0xff00;
pub const BANK1_VALUE: i64 = 0x0100;
pub const SPECIAL_REG_LOW: i64 = 0xf00;
pub const SPECIAL_REG_HIGH: i64 = 0xfff;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Base {
    Bin,
    Dec,
    Hex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Number {
    pub value: i64,
    pub base: Base,
}

impl Number {
    pub fn new(value: i64, base: Base) -> Self {
        Number { value, base }
    }

    pub fn dec(value: i64) -> Self {
        Number::new(value, Base::Dec)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.value < 0 { "-" } else { "" };
        let mag = self.value.unsigned_abs();
        match self.base {
            Base::Dec => write!(f, "{}{}", sign, mag),
            Base::Hex => write!(f, "{}0x{:x}", sign, mag),
            Base::Bin => write!(f, "{}0b{:b}", sign, mag),
        }
    }
}

/// Parses an `rforth1` numeric literal: repeated leading `-` toggles sign, then a
/// `$`/`0x` (hex), `0b` (binary) or bare (decimal) prefix. Returns `None` on any parse
/// failure so the interpreter loop can fall through to "unknown word".
pub fn parse_number(token: &str) -> Option<Number> {
    let mut rest = token;
    let mut negative = false;
    while let Some(stripped) = rest.strip_prefix('-') {
        negative = !negative;
        rest = stripped;
    }
    if rest.is_empty() {
        return None;
    }
    let (digits, base) = if let Some(h) = rest.strip_prefix('$') {
        (h, Base::Hex)
    } else if let Some(h) = rest.strip_prefix("0x") {
        (h, Base::Hex)
    } else if let Some(b) = rest.strip_prefix("0b") {
        (b, Base::Bin)
    } else {
        (rest, Base::Dec)
    };
    let radix = match base {
        Base::Hex => 16,
        Base::Bin => 2,
        Base::Dec => 10,
    };
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    Some(Number::new(value, base))
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Shl,
}

impl BinaryOp {
    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Shl => a.wrapping_shl(b as u32 & 63),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Shl => "<<",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Low,
    High,
    Neg,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Number(Number),
    Binary(BinaryOp, Box<Value>, Box<Value>),
    Unary(UnaryOp, Box<Value>),
    Reference(EntityId),
}

impl Value {
    pub fn number(value: i64) -> Value {
        Value::Number(Number::dec(value))
    }

    pub fn reference(id: EntityId) -> Value {
        Value::Reference(id)
    }

    /// Constant-folds to an integer when every leaf resolves. Numbers always resolve;
    /// a Reference resolves only when bound to a Constant whose own value resolves.
    pub fn static_value(&self, arena: &EntityArena) -> Option<i64> {
        match self {
            Value::Number(n) => Some(n.value),
            Value::Binary(op, a, b) => {
                let a = a.static_value(arena)?;
                let b = b.static_value(arena)?;
                Some(op.apply(a, b))
            }
            Value::Unary(op, a) => {
                let a = a.static_value(arena)?;
                Some(match op {
                    UnaryOp::Low => a & 0xff,
                    UnaryOp::High => (a >> 8) & 0xff,
                    UnaryOp::Neg => -a,
                })
            }
            Value::Reference(id) => match &arena.get(*id).kind {
                EntityKind::Constant(v) => v.static_value(arena),
                _ => None,
            },
        }
    }

    /// `static_value` masked to 16 bits, used when emitting a two-byte operand.
    pub fn static_value16(&self, arena: &EntityArena) -> Option<i64> {
        self.static_value(arena).map(|v| v & 0xffff)
    }

    pub fn makes_reference_to(&self, label: EntityId) -> bool {
        match self {
            Value::Number(_) => false,
            Value::Binary(_, a, b) => a.makes_reference_to(label) || b.makes_reference_to(label),
            Value::Unary(_, a) => a.makes_reference_to(label),
            Value::Reference(id) => *id == label,
        }
    }

    /// Rewrites any `Reference(from)` leaf to `Reference(to)`, used by Forward
    /// resolution and the single-goto substitution optimizer rule.
    pub fn rewrite_entity(&mut self, from: EntityId, to: EntityId) {
        match self {
            Value::Reference(id) if *id == from => *id = to,
            Value::Binary(_, a, b) => {
                a.rewrite_entity(from, to);
                b.rewrite_entity(from, to);
            }
            Value::Unary(_, a) => a.rewrite_entity(from, to),
            _ => {}
        }
    }

    pub fn add(self, other: Value) -> Value {
        Value::Binary(BinaryOp::Add, Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Value) -> Value {
        Value::Binary(BinaryOp::Sub, Box::new(self), Box::new(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Binary(op, a, b) => write!(f, "({}{}{})", a, op.symbol(), b),
            Value::Unary(UnaryOp::Low, a) => write!(f, "LOW({})", a),
            Value::Unary(UnaryOp::High, a) => write!(f, "HIGH({})", a),
            Value::Unary(UnaryOp::Neg, a) => write!(f, "(-{})", a),
            Value::Reference(id) => write!(f, "<entity {}>", id),
        }
    }
}

/// `low(x)`: when `x` already fits in a single byte it IS its own low byte, so it's
/// returned unchanged instead of being wrapped; otherwise the assembler computes it.
pub fn low(x: Value, arena: &EntityArena) -> Value {
    match x.static_value(arena) {
        Some(v) if (0..=0xff).contains(&v) => x,
        _ => Value::Unary(UnaryOp::Low, Box::new(x)),
    }
}

/// `high(x)`: when `x` fits in a single byte its high byte is statically zero.
pub fn high(x: Value, arena: &EntityArena) -> Value {
    match x.static_value(arena) {
        Some(v) if (0..=0xff).contains(&v) => Value::number(0),
        _ => Value::Unary(UnaryOp::High, Box::new(x)),
    }
}

pub fn in_access_bank(addr: i64) -> bool {
    (0..=ACCESS_BANK_LOW).contains(&addr) || (ACCESS_BANK_HIGH_LOW..=0xfff).contains(&addr)
}

pub fn is_special_register(addr: i64) -> bool {
    (SPECIAL_REG_LOW..=SPECIAL_REG_HIGH).contains(&addr)
}

pub fn in_bank_1(addr: i64) -> bool {
    addr & BANK1_MASK == BANK1_VALUE
}

pub fn short_addr(addr: i64) -> bool {
    in_access_bank(addr) || in_bank_1(addr)
}

/// Whether `addr` can be reached through the access bank (vs. needing the BSR-relative
/// bank-1 form). Mirrors `rforth.py`'s `access_bit`: bank-1 addresses (where `variable`s
/// live, 0x0100-0x01ff) are not in the access bank and must use the non-access form.
pub fn access_bit(addr: i64) -> bool {
    in_access_bank(addr)
}

pub fn ram_addr(addr: i64) -> bool {
    addr & 0xf000 == 0
}

pub fn eeprom_addr(addr: i64) -> bool {
    addr & 0xf000 == 0x1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal() {
        assert_eq!(parse_number("42"), Some(Number::dec(42)));
    }

    #[test]
    fn parses_hex_prefixes() {
        assert_eq!(parse_number("0xff").unwrap().value, 255);
        assert_eq!(parse_number("$ff").unwrap().value, 255);
    }

    #[test]
    fn parses_binary() {
        assert_eq!(parse_number("0b101").unwrap().value, 5);
    }

    #[test]
    fn repeated_minus_toggles_sign() {
        assert_eq!(parse_number("--5").unwrap().value, 5);
        assert_eq!(parse_number("-5").unwrap().value, -5);
        assert_eq!(parse_number("---5").unwrap().value, -5);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_number("dup"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("-"), None);
    }

    #[test]
    fn number_display_roundtrips() {
        for n in [
            Number::new(10, Base::Dec),
            Number::new(0xab, Base::Hex),
            Number::new(-5, Base::Dec),
        ] {
            let printed = n.to_string();
            let reparsed = parse_number(&printed).unwrap();
            assert_eq!(reparsed.value, n.value);
        }
    }

    #[test]
    fn static_value_folds_binary_and_unary() {
        let arena = EntityArena::new();
        let v = Value::number(3).add(Value::number(4));
        assert_eq!(v.static_value(&arena), Some(7));
        let v = Value::Unary(UnaryOp::Low, Box::new(Value::number(0x1234)));
        assert_eq!(v.static_value(&arena), Some(0x34));
    }

    #[test]
    fn low_short_circuits_for_values_already_byte_sized() {
        let arena = EntityArena::new();
        let v = Value::number(0x42);
        assert_eq!(low(v.clone(), &arena), v);
        let big = Value::number(0x1234);
        assert!(matches!(low(big, &arena), Value::Unary(UnaryOp::Low, _)));
    }

    #[test]
    fn high_is_zero_for_byte_sized_values() {
        let arena = EntityArena::new();
        let v = Value::number(0x42);
        assert_eq!(high(v, &arena), Value::number(0));
    }

    #[test]
    fn address_range_predicates() {
        assert!(in_access_bank(0x10));
        assert!(in_access_bank(0xf70));
        assert!(!in_access_bank(0x100));
        assert!(is_special_register(0xf80));
        assert!(in_bank_1(0x0120));
        assert!(ram_addr(0x0050));
        assert!(eeprom_addr(0x1050));
    }

    #[test]
    fn access_bit_is_false_for_bank_1_addresses() {
        assert!(access_bit(0x20));
        assert!(access_bit(0xf80));
        assert!(!access_bit(0x0100));
        assert!(!access_bit(0x0120));
    }
}
