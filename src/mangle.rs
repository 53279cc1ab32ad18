//! Entity name mangling: turns raw Forth names (full of punctuation the assembler
//! can't swallow) into injective assembler-safe identifiers.
//!
//! Grounded on `examples/original_source/rforth.py`'s `Named.__repr__`.

/// Single-character substitutions, applied left to right. Mirrors the source
/// compiler's substitution table exactly, including which punctuation gets wrapped in
/// underscores versus folded bare.
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('?', "QM"),
    ('!', "EX"),
    ('@', "AT"),
    ('+', "PL"),
    ('-', "_"),
    ('*', "ST"),
    ('/', "SL"),
    ('=', "EQ"),
    ('<', "LT"),
    ('>', "GT"),
    ('$', "_"),
    ('.', "_"),
    ('"', "QU"),
    ('\'', "_"),
    (':', "CL"),
    (';', "SC"),
    ('(', "OP"),
    (')', "CP"),
    ('%', "PC"),
];

/// gpasm directives/reserved words a mangled name must not collide with.
const RESERVED_DIRECTIVES: &[&str] = &[
    "END", "ORG", "EQU", "SET", "RADIX", "PROCESSOR", "INCLUDE", "CODE", "UDATA", "IDATA",
    "CONFIG", "DB", "DW", "RES", "GLOBAL", "EXTERN", "MACRO", "ENDM", "IF", "ELSE", "ENDIF",
    "LIST", "VARIABLE", "CONSTANT",
];

fn substitute_char(c: char) -> String {
    for (from, to) in SUBSTITUTIONS {
        if c == *from {
            return if to.len() > 1 {
                format!("_{}_", to)
            } else {
                to.to_string()
            };
        }
    }
    c.to_string()
}

/// Turns a raw name into a base assembler identifier: character substitution,
/// multi-letter substitutions bracketed by underscores, leading digit prefixed.
fn mangle_base(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        out.push_str(&substitute_char(c));
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        out = format!("_{}", out);
    }
    if out.is_empty() {
        out = "_".to_string();
    }
    out
}

/// Full mangling: base substitution, then a `__N` redefinition-occurrence suffix when
/// `occurrence > 0`, then a leading-underscore prefix if the result collides with a
/// reserved assembler directive.
pub fn mangle(name: &str, occurrence: u32) -> String {
    let mut mangled = mangle_base(name);
    if occurrence > 0 {
        mangled = format!("{}__{}", mangled, occurrence);
    }
    let upper = mangled.to_ascii_uppercase();
    if RESERVED_DIRECTIVES.contains(&upper.as_str()) {
        mangled = format!("_{}", mangled);
    }
    mangled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_punctuation() {
        assert_eq!(mangle("?", 0), "QM");
        assert_eq!(mangle("dup?", 0), "dupQM");
        assert_eq!(mangle("1+!", 0), "_1_PL_EX");
    }

    #[test]
    fn multi_letter_substitutions_are_bracketed_by_underscores() {
        assert_eq!(mangle("@", 0), "AT");
        assert_eq!(mangle("x@", 0), "x_AT_");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(mangle("2dup", 0), "_2dup");
    }

    #[test]
    fn occurrence_adds_suffix() {
        assert_eq!(mangle("foo", 0), "foo");
        assert_eq!(mangle("foo", 1), "foo__1");
        assert_eq!(mangle("foo", 2), "foo__2");
    }

    #[test]
    fn reserved_directive_clash_is_prefixed() {
        assert_eq!(mangle("end", 0), "_end");
        assert_eq!(mangle("org", 0), "_org");
    }

    #[test]
    fn mangling_is_injective_across_occurrences() {
        let a = mangle("foo", 0);
        let b = mangle("foo", 1);
        let c = mangle("foo", 2);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn distinct_names_never_collide() {
        let mangled_plus = mangle("+", 0);
        let mangled_pl_literal = mangle("pl", 0);
        assert_ne!(mangled_plus, mangled_pl_literal);
    }
}
