//! File access and the `RFORTH1_PATH` search-path resolution used by `include`/`needs`.
//!
//! Grounded on `timbarnes-f3/src/files.rs` and `src/internals/files.rs` (the
//! canonicalize-then-open pattern, the `FileMode` enum) and on
//! `examples/original_source/rforth.py`'s `forth_search_path`/`forth_open`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Rw,
    Ro,
    Wo,
}

/// Builds the ordered search path: current directory, then each `RFORTH1_PATH` entry
/// (platform path-separator joined), then the directory containing this binary.
pub fn search_path() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(".")];
    if let Ok(var) = env::var("RFORTH1_PATH") {
        for entry in env::split_paths(&var) {
            paths.push(entry);
        }
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.to_path_buf());
        }
    }
    paths
}

/// Resolves `name` against the search path: absolute/rooted paths are used directly;
/// relative paths are tried against each search directory in order. Mirrors
/// `forth_open`'s `path[0] not in [os.path.sep, os.path.altsep]` absolute-path check.
pub fn resolve(name: &str, path: &[PathBuf]) -> io::Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return if candidate.exists() {
            Ok(candidate.to_path_buf())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name)))
        };
    }
    for dir in path {
        let joined = dir.join(candidate);
        if joined.exists() {
            return Ok(joined);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("could not find '{}' on the search path", name),
    ))
}

/// Reads a whole source file (used by `include`/`needs`) into its lines.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.lines().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn search_path_always_starts_with_current_dir() {
        let path = search_path();
        assert_eq!(path[0], PathBuf::from("."));
    }

    #[test]
    fn resolve_finds_file_in_a_search_directory() {
        let dir = env::temp_dir().join(format!("rforth1-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("lib.fs");
        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, ": noop ;").unwrap();
        let found = resolve("lib.fs", &[dir.clone()]).unwrap();
        assert_eq!(found, file_path);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn resolve_fails_for_missing_file() {
        let dir = env::temp_dir();
        assert!(resolve("definitely-not-a-real-file.fs", &[dir]).is_err());
    }

    #[test]
    fn read_lines_splits_on_newlines() {
        let dir = env::temp_dir().join(format!("rforth1-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("x.fs");
        fs::write(&file_path, ": a 1 ;\n: b 2 ;\n").unwrap();
        let lines = read_lines(&file_path).unwrap();
        assert_eq!(lines, vec![": a 1 ;".to_string(), ": b 2 ;".to_string()]);
        fs::remove_dir_all(&dir).ok();
    }
}
