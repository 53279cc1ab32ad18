//! Line-buffered tokenizer and the `include`/`needs` input stack.
//!
//! Grounded on `examples/original_source/rforth.py`'s `Input` class (`next_line`,
//! `current_location`) and the TIB-buffer tokenizer idiom in `internals/compiler.rs`'s
//! `f_parse_to`/`f_parse_p` — reshaped here to operate on owned `String` lines rather
//! than a runtime TIB in shared heap cells, since this compiler never executes the
//! program it emits.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::entity::SourceLoc;
use crate::messages::CompilerError;

/// One open input — either the top-level source file or an `include`/`needs` target.
pub struct InputSource {
    name: String,
    lines: Vec<String>,
    next_line: usize,
    current_line_no: usize,
    buffer: String,
    pos: usize,
}

impl InputSource {
    pub fn new(name: impl Into<String>, lines: Vec<String>) -> Self {
        InputSource {
            name: name.into(),
            lines,
            next_line: 0,
            current_line_no: 0,
            buffer: String::new(),
            pos: 0,
        }
    }

    pub fn current_location(&self) -> SourceLoc {
        SourceLoc::new(self.name.clone(), self.current_line_no)
    }

    /// Advances to the next non-exhausted line. Empty lines are skipped by retrying,
    /// matching `refill`'s documented behavior.
    fn refill(&mut self) -> bool {
        while self.next_line < self.lines.len() {
            self.buffer = self.lines[self.next_line].clone();
            self.next_line += 1;
            self.current_line_no = self.next_line;
            self.pos = 0;
            if !self.buffer.trim().is_empty() {
                return true;
            }
        }
        false
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.buffer.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Returns the next whitespace-delimited token, refilling lines as needed. A
    /// standalone `\` token discards the remainder of the buffer (line comment).
    pub fn parse_word(&mut self) -> Option<String> {
        loop {
            self.skip_whitespace();
            if self.pos >= self.buffer.len() && !self.refill() {
                return None;
            }
            if self.pos >= self.buffer.len() {
                continue;
            }
            let bytes = self.buffer.as_bytes();
            let start = self.pos;
            while self.pos < bytes.len() && !bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            let token = self.buffer[start..self.pos].to_string();
            if token == "\\" {
                self.pos = self.buffer.len();
                continue;
            }
            return Some(token);
        }
    }

    /// Splits the remainder of the buffer at the first occurrence of `delim` (used for
    /// `( ... )` comment bodies and inline data literals). Returns the text up to (not
    /// including) the delimiter, or the rest of the line if the delimiter is absent.
    pub fn parse(&mut self, delim: char) -> Option<String> {
        if self.pos >= self.buffer.len() && !self.refill() {
            return None;
        }
        let rest = &self.buffer[self.pos..];
        match rest.find(delim) {
            Some(idx) => {
                let text = rest[..idx].to_string();
                self.pos += idx + delim.len_utf8();
                Some(text)
            }
            None => {
                let text = rest.to_string();
                self.pos = self.buffer.len();
                Some(text)
            }
        }
    }
}

/// The active include stack plus the `needs` load-once guard.
pub struct Reader {
    stack: Vec<InputSource>,
    loaded: HashSet<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl Reader {
    pub fn new(main_name: impl Into<String>, main_lines: Vec<String>) -> Self {
        Reader {
            stack: vec![InputSource::new(main_name, main_lines)],
            loaded: HashSet::new(),
            search_path: crate::files::search_path(),
        }
    }

    pub fn current_location(&self) -> SourceLoc {
        self.stack.last().map(|s| s.current_location()).unwrap_or_else(SourceLoc::unknown)
    }

    /// Next token from the active input; exhausted includes are popped and their
    /// parent resumed transparently. `Eof` is returned only once the outermost
    /// (top-level) source is itself exhausted.
    pub fn next_token(&mut self) -> Result<String, CompilerError> {
        loop {
            let exhausted = match self.stack.last_mut() {
                None => return Err(CompilerError::Eof),
                Some(top) => match top.parse_word() {
                    Some(tok) => return Ok(tok),
                    None => true,
                },
            };
            if exhausted {
                if self.stack.len() == 1 {
                    return Err(CompilerError::Eof);
                }
                self.stack.pop();
            }
        }
    }

    pub fn parse_delim(&mut self, delim: char) -> Result<String, CompilerError> {
        match self.stack.last_mut() {
            Some(top) => top.parse(delim).ok_or(CompilerError::Eof),
            None => Err(CompilerError::Eof),
        }
    }

    fn push_file(&mut self, name: &str) -> Result<PathBuf, CompilerError> {
        let path = crate::files::resolve(name, &self.search_path)
            .map_err(|e| CompilerError::fatal(format!("could not open '{}': {}", name, e)))?;
        let lines = crate::files::read_lines(&path)
            .map_err(|e| CompilerError::fatal(format!("could not read '{}': {}", name, e)))?;
        self.stack.push(InputSource::new(path.display().to_string(), lines));
        Ok(path)
    }

    /// `include FILE`: pushes `FILE` onto the input stack unconditionally, running it
    /// to completion before control returns to the including source.
    pub fn include(&mut self, name: &str) -> Result<(), CompilerError> {
        let path = self.push_file(name)?;
        self.loaded.insert(path);
        Ok(())
    }

    /// `needs FILE`: `include` guarded by the loaded-files set — a no-op if this exact
    /// resolved path has already been loaded by either `include` or `needs`.
    pub fn needs(&mut self, name: &str) -> Result<(), CompilerError> {
        let path = crate::files::resolve(name, &self.search_path)
            .map_err(|e| CompilerError::fatal(format!("could not open '{}': {}", name, e)))?;
        if self.loaded.contains(&path) {
            return Ok(());
        }
        self.push_file(name)?;
        self.loaded.insert(path);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_word_splits_on_whitespace() {
        let mut src = InputSource::new("t", vec![": double dup + ;".to_string()]);
        let mut tokens = Vec::new();
        while let Some(t) = src.parse_word() {
            tokens.push(t);
        }
        assert_eq!(tokens, vec![":", "double", "dup", "+", ";"]);
    }

    #[test]
    fn backslash_discards_rest_of_line() {
        let mut src = InputSource::new("t", vec!["1 2 \\ comment ignored".to_string(), "3".to_string()]);
        let mut tokens = Vec::new();
        while let Some(t) = src.parse_word() {
            tokens.push(t);
        }
        assert_eq!(tokens, vec!["1", "2", "3"]);
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut src = InputSource::new("t", vec!["".to_string(), "   ".to_string(), "ok".to_string()]);
        assert_eq!(src.parse_word(), Some("ok".to_string()));
    }

    #[test]
    fn parse_splits_at_delimiter() {
        let mut src = InputSource::new("t", vec!["( a comment ) leftover".to_string()]);
        assert_eq!(src.parse_word(), Some("(".to_string()));
        assert_eq!(src.parse(')'), Some(" a comment ".to_string()));
        assert_eq!(src.parse_word(), Some("leftover".to_string()));
    }

    #[test]
    fn include_pushes_and_pops_back_to_parent() {
        let dir = std::env::temp_dir().join(format!("rforth1-reader-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let included = dir.join("inc.fs");
        fs::write(&included, ": inner 1 ;").unwrap();

        let mut reader = Reader::new("main.fs", vec!["before".to_string()]);
        reader.search_path = vec![dir.clone()];
        assert_eq!(reader.next_token().unwrap(), "before");
        reader.include("inc.fs").unwrap();
        assert_eq!(reader.depth(), 2);
        assert_eq!(reader.next_token().unwrap(), ":");
        assert_eq!(reader.next_token().unwrap(), "inner");
        assert_eq!(reader.next_token().unwrap(), "1");
        assert_eq!(reader.next_token().unwrap(), ";");
        // the include is now exhausted; the next token pops back and hits outer Eof
        assert!(matches!(reader.next_token(), Err(CompilerError::Eof)));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn needs_loads_at_most_once() {
        let dir = std::env::temp_dir().join(format!("rforth1-reader2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let shared = dir.join("shared.fs");
        fs::write(&shared, ": shared 1 ;").unwrap();

        let mut reader = Reader::new("main.fs", vec![]);
        reader.search_path = vec![dir.clone()];
        reader.needs("shared.fs").unwrap();
        assert_eq!(reader.depth(), 2);
        // drain it
        while reader.next_token().is_ok() {}
        reader.needs("shared.fs").unwrap();
        assert_eq!(reader.depth(), 1, "second needs for the same file must be a no-op");
        fs::remove_dir_all(&dir).ok();
    }
}
