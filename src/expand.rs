// ABOUTME: Builtin argv expansion: tilde, pathname globbing, PATH lookup

use crate::cell::Cell;
use crate::error::{ShellError, ShellResult};
use std::path::PathBuf;

/// Tilde- and glob-expand an argv list. Symbols expand; strings and
/// everything else pass through untouched.
pub fn expand_argv(argv: Cell) -> ShellResult<Cell> {
    let mut out: Vec<Cell> = Vec::new();
    let mut rest = argv;
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        match p.car() {
            Cell::Symbol(s) => expand_word(s.text(), &mut out)?,
            other => out.push(other),
        }
        rest = p.cdr();
    }
    Ok(crate::cell::list_of(&out))
}

fn expand_word(word: &str, out: &mut Vec<Cell>) -> ShellResult<()> {
    let word = tilde(word);
    if word.contains(['*', '?', '[']) {
        let mut matched = false;
        let paths = glob::glob(&word)
            .map_err(|e| ShellError::os(format!("glob: {}: {}", word, e)))?;
        for path in paths {
            let path = path.map_err(|e| ShellError::os(format!("glob: {}", e)))?;
            out.push(Cell::sym(&path.to_string_lossy()));
            matched = true;
        }
        if !matched {
            return Err(ShellError::os(format!("no matches found: {}", word)));
        }
    } else {
        out.push(Cell::sym(&word));
    }
    Ok(())
}

/// `~` and `~/...` expand to the caller's home directory
pub fn tilde(word: &str) -> String {
    if word == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    } else if let Some(rest) = word.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let mut path = PathBuf::from(home);
            path.push(rest);
            return path.to_string_lossy().into_owned();
        }
    }
    word.to_string()
}

/// Resolve a command name against PATH; names containing a slash resolve
/// relative to the working directory
pub fn look_path(name: &str) -> ShellResult<PathBuf> {
    let name = tilde(name);
    if name.contains('/') {
        let path = PathBuf::from(&name);
        if is_executable(&path) {
            return Ok(path);
        }
        return Err(ShellError::os(format!("{}: command not found", name)));
    }
    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(&name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ShellError::os(format!("{}: command not found", name)))
}

fn is_executable(path: &PathBuf) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Split an argv cell list into the leading program name and its
/// arguments, as raw text
pub fn argv_strings(argv: &Cell) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = argv.clone();
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        out.push(p.car().raw());
        rest = p.cdr();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::cons;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_tilde_expansion() {
        std::env::set_var("HOME", "/home/walrus");
        assert_eq!(tilde("~"), "/home/walrus");
        assert_eq!(tilde("~/notes.txt"), "/home/walrus/notes.txt");
        assert_eq!(tilde("not~expanded"), "not~expanded");
    }

    #[test]
    fn test_strings_pass_through_unexpanded() {
        let argv = crate::cell::list_of(&[Cell::str("*"), Cell::sym("plain")]);
        let out = expand_argv(argv).expect("expands");
        assert_eq!(format!("{}", out), "(\"*\" plain)");
    }

    #[test]
    fn test_glob_no_match_is_an_error() {
        let argv = cons(Cell::sym("/nonexistent-path-zzz/*.qqq"), Cell::Null);
        assert!(expand_argv(argv).is_err());
    }

    #[test]
    fn test_look_path_finds_sh() {
        let path = look_path("sh").expect("sh on PATH");
        assert!(path.to_string_lossy().ends_with("/sh"));
        assert!(look_path("no-such-command-zzz").is_err());
    }
}
