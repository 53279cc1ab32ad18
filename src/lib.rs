//! Top-level orchestration: read the source file, run the compiler, walk/inline/lay out
//! the reachable entities, and (unless compile-only) hand the emitted text to the
//! downstream assembler.
//!
//! Grounded on `examples/original_source/rforth.py`'s top-level `main`, reshaped into a
//! pure `compile(...) -> CompilePlan` plus an outer driver loop rather than singleton
//! teardown/reconstruction, so the `-a` auto-inline flag's two-pass restart is just
//! calling `compile` again with a bigger force-inline set.

pub mod assembler;
pub mod compiler;
pub mod config;
pub mod entity;
pub mod files;
pub mod inliner;
pub mod internals;
pub mod layout;
pub mod mangle;
pub mod messages;
pub mod opcode;
pub mod optimizer;
pub mod reader;
pub mod value;

use std::collections::HashSet;
use std::path::PathBuf;

use compiler::CompilerState;
use config::Config;
use entity::SourceLoc;
use layout::EmitOptions;
use messages::CompilerError;

/// The result of one `compile` call: the emitted text plus whatever the `-a` two-pass
/// auto-inline flow would want to try again with.
pub struct CompilePlan {
    pub text: String,
    pub error_count: usize,
    pub warning_count: usize,
    pub wants_more_inlining: Option<HashSet<SourceLoc>>,
}

/// Reads `main_file` (resolved against the search path), compiles it, and lays out and
/// emits the result. `force_inline` seeds the inliner's force list, letting the `-a`
/// flow call this again with a bigger set rather than mutating a shared compiler.
pub fn compile(config: &Config, force_inline: HashSet<SourceLoc>) -> Result<CompilePlan, CompilerError> {
    let search_path = files::search_path();
    let resolved = files::resolve(&config.file, &search_path)
        .map_err(|e| CompilerError::fatal(format!("{}", e)))?;
    let lines = files::read_lines(&resolved).map_err(|e| CompilerError::fatal(format!("{}", e)))?;

    let mut state = CompilerState::new(resolved.to_string_lossy().to_string(), lines);
    state.main_name = config.main.clone();
    state.interrupts_enabled = config.interrupts;
    state.inline_list = force_inline;

    state.run()?;

    let order = layout::walk_reachable(&mut state)?;
    layout::validate_forwards(&state, &order)?;
    layout::apply_inlining(&mut state, &order)?;
    layout::substitute_single_goto_words(&mut state, &order);

    let wants_more_inlining = if config.auto_inline {
        let candidates = layout::collect_auto_inline_candidates(&state, &order);
        let new: HashSet<SourceLoc> = candidates.difference(&state.inline_list).cloned().collect();
        if new.is_empty() {
            None
        } else {
            Some(state.inline_list.union(&new).cloned().collect())
        }
    } else {
        None
    };

    let ordered = layout::reorder_fallthrough(&mut state, &order);
    let text = layout::emit(
        &state,
        &ordered,
        &EmitOptions {
            processor: config.processor.clone(),
            start: config.start,
            no_headers: config.no_headers,
        },
    );

    Ok(CompilePlan {
        text,
        error_count: state.msg.error_count(),
        warning_count: state.msg.warning_count(),
        wants_more_inlining,
    })
}

/// Drives the full `-a` two-pass restart: compiles once, and if new auto-inline
/// candidates were found, recompiles from scratch with an enlarged force-inline set.
/// Loops until a round finds nothing new to add.
pub fn compile_with_auto_inline(config: &Config) -> Result<CompilePlan, CompilerError> {
    let mut force_inline = HashSet::new();
    loop {
        let plan = compile(config, force_inline.clone())?;
        match &plan.wants_more_inlining {
            Some(bigger) => force_inline = bigger.clone(),
            None => return Ok(plan),
        }
    }
}

/// Runs the whole pipeline per `config`: compile (and optimize/inline/lay out), write
/// the emitted text, and unless `-c` was given, spawn the assembler. Returns the process
/// exit code.
pub fn run(config: &Config) -> i32 {
    let plan = match compile_with_auto_inline(config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    if plan.error_count > 0 {
        eprintln!("ERROR: {} error(s), {} warning(s)", plan.error_count, plan.warning_count);
        return 1;
    }

    let output_path: PathBuf = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.file).with_extension("asm"));
    if let Err(e) = std::fs::write(&output_path, &plan.text) {
        eprintln!("ERROR: could not write '{}': {}", output_path.display(), e);
        return 1;
    }

    if config.compile_only {
        return 0;
    }

    match assembler::assemble("gpasm", &output_path) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}
