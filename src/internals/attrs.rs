//! Attribute-marker primitives: `inline`/`no-inline` (inliner hints) and
//! `inw`/`outw`/`outz` (declares a word's stack-vs-W calling convention so call
//! sites can be wrapped with the right W-register or Z-flag glue automatically).

use crate::compiler::CompilerState;
use crate::entity::EntityKind;
use crate::messages::CompilerError;

fn current_word_flags(state: &mut CompilerState) -> Result<&mut crate::entity::Flags, CompilerError> {
    let id = state
        .current_object
        .ok_or_else(|| CompilerError::fatal("attribute marker used outside of a word definition"))?;
    let entity = state.arena.get_mut(id);
    match &entity.kind {
        EntityKind::Word(_) => Ok(&mut entity.flags),
        _ => Err(CompilerError::internal("current object is not a Word for an attribute marker")),
    }
}

pub fn inline(state: &mut CompilerState) -> Result<(), CompilerError> {
    current_word_flags(state)?.force_inline = true;
    Ok(())
}

pub fn no_inline(state: &mut CompilerState) -> Result<(), CompilerError> {
    current_word_flags(state)?.not_inlinable = true;
    Ok(())
}

pub fn inw(state: &mut CompilerState) -> Result<(), CompilerError> {
    current_word_flags(state)?.inw = true;
    Ok(())
}

pub fn outw(state: &mut CompilerState) -> Result<(), CompilerError> {
    current_word_flags(state)?.outw = true;
    Ok(())
}

pub fn outz(state: &mut CompilerState) -> Result<(), CompilerError> {
    current_word_flags(state)?.outz = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerState;

    #[test]
    fn inline_sets_force_inline_flag() {
        let mut state = CompilerState::new("t", vec![": w inline ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        assert!(state.arena.get(id).flags.force_inline);
    }

    #[test]
    fn no_inline_sets_not_inlinable_flag() {
        let mut state = CompilerState::new("t", vec![": w no-inline ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        assert!(state.arena.get(id).flags.not_inlinable);
    }

    #[test]
    fn calling_convention_markers_set_their_flags() {
        let mut state = CompilerState::new("t", vec![": w inw outw outz ;".to_string()]);
        state.run().unwrap();
        let id = state.lookup("w").unwrap();
        let flags = state.arena.get(id).flags;
        assert!(flags.inw && flags.outw && flags.outz);
    }
}
