//! Command-line configuration, via `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

use crate::value::parse_number;

fn parse_addr(s: &str) -> Result<i64, String> {
    parse_number(s).map(|n| n.value).ok_or_else(|| format!("not a number: {}", s))
}

/// `rforth1 [options] FILE` — compiles a source file to PIC18 assembly and, unless
/// `-c` was given, assembles it.
#[derive(Parser, Debug)]
#[command(name = "rforth1", version, about = "A Forth-like cross-compiler targeting PIC18 assembly")]
pub struct Config {
    /// Auto-inline: run the two-pass automatic inlining heuristic.
    #[arg(short = 'a', long = "auto-inline")]
    pub auto_inline: bool,

    /// Compile only: skip the downstream assembler invocation.
    #[arg(short = 'c', long = "compile-only")]
    pub compile_only: bool,

    /// Enable interrupts: compile the intr-protect/intr-unprotect pseudo-ops instead
    /// of dropping them, and emit the ISR vectors.
    #[arg(short = 'i', long = "interrupts")]
    pub interrupts: bool,

    /// The name of the word to use as the entry point.
    #[arg(short = 'm', long = "main", default_value = "main")]
    pub main: String,

    /// Omit comment headers (section banners, per-entity name comments) in the output.
    #[arg(short = 'N', long = "no-headers")]
    pub no_headers: bool,

    /// Override the output file path (defaults to the input file with a `.asm` extension).
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Target processor model, passed to `processor pic<model>` in the emitted header.
    #[arg(short = 'p', long = "processor", default_value = "18f248")]
    pub processor: String,

    /// Start address (accepts `$`, `0x`, `0b`, or decimal).
    #[arg(short = 's', long = "start", default_value = "0x2000", value_parser = parse_addr)]
    pub start: i64,

    /// The source file to compile.
    pub file: String,
}

impl Config {
    pub fn parse_args() -> Config {
        Config::parse()
    }
}
