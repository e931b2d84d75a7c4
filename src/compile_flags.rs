//! Per-translation-unit compile flag extraction from `compile_commands.json`
//! (spec.md §4.8; kept as its own module per SPEC_FULL.md §7, mirroring the
//! original two-tool split).

use crate::error::{AnalyzerError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

const STRIP_WITH_ARG: &[&str] = &["-o", "-MF", "-MT", "-MQ"];
const STRIP_STANDALONE: &[&str] = &["-c", "-MD", "-MMD", "-MP", "-MG", "-pipe", "-save-temps", "-gsplit-dwarf"];
const STRIP_PREFIXES: &[&str] = &[
    "-fcrash-diagnostics-dir",
    "-fmodule-file=",
    "-fmodules-cache-path=",
    "-fpch-preprocess",
    "--serialize-diagnostics",
    "-fdebug-prefix-map=",
    "--debug-prefix-map=",
    "-iprefix",
    "-iwithprefix",
    "-iwithprefixbefore",
    "-fprofile-generate",
    "-fprofile-use=",
    "-fprofile-instr-generate",
    "-fprofile-instr-use=",
    "-fcoverage-mapping",
];

static RE_STRIP_ATTACHED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:-o|-MF|-MT|-MQ)(?:=?.+)$").unwrap());
/// Optimization flags are NOT stripped here (SPEC_FULL.md §7) — the PoC
/// synthesizer strips them as a second pass via `filter_opt_flags`.
static RE_OPT_FLAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-O[0-3sg]$").unwrap());

fn should_strip(flag: &str) -> bool {
    STRIP_STANDALONE.contains(&flag) || RE_STRIP_ATTACHED.is_match(flag) || STRIP_PREFIXES.iter().any(|p| flag.starts_with(p))
}

/// Filter raw flag tokens (excluding compiler executable and source file)
/// down to the build-relevant subset. Idempotent; never reorders.
pub fn extract_flags(raw_flags: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    let mut skip_next = false;

    for token in raw_flags {
        if skip_next {
            skip_next = false;
            continue;
        }
        if STRIP_WITH_ARG.contains(&token.as_str()) {
            skip_next = true;
            continue;
        }
        if should_strip(token) {
            continue;
        }
        result.push(token.clone());
    }
    result
}

/// Second-pass optimization-flag filter used only by the PoC pipeline
/// (spec.md §4.8: "optimization flags are always stripped"; SPEC_FULL.md §7
/// documents why this is not part of `extract_flags`).
pub fn filter_opt_flags(flags: &[String]) -> Vec<String> {
    flags.iter().filter(|f| !RE_OPT_FLAG.is_match(f)).cloned().collect()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CompileDbEntry {
    pub directory: String,
    pub file: String,
    #[serde(default)]
    pub arguments: Option<Vec<String>>,
    #[serde(default)]
    pub command: Option<String>,
}

fn normalize_path(path_str: &str, directory: &str) -> PathBuf {
    let p = Path::new(path_str);
    let resolved = if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(directory).join(p)
    };
    resolved.canonicalize().unwrap_or(resolved)
}

fn parse_command_string(command: &str) -> Vec<String> {
    shell_words::split(command).unwrap_or_else(|_| command.split_whitespace().map(|s| s.to_string()).collect())
}

mod shell_words {
    /// Minimal POSIX-ish whitespace/quote splitter (no external crate in
    /// the teacher stack fits this narrowly-scoped need).
    pub fn split(command: &str) -> Result<Vec<String>, ()> {
        let mut tokens = Vec::new();
        let mut cur = String::new();
        let mut chars = command.chars().peekable();
        let mut in_single = false;
        let mut in_double = false;

        while let Some(c) = chars.next() {
            match c {
                '\'' if !in_double => in_single = !in_single,
                '"' if !in_single => in_double = !in_double,
                ' ' | '\t' if !in_single && !in_double => {
                    if !cur.is_empty() {
                        tokens.push(std::mem::take(&mut cur));
                    }
                }
                '\\' if !in_single => {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                }
                _ => cur.push(c),
            }
        }
        if !cur.is_empty() {
            tokens.push(cur);
        }
        if in_single || in_double {
            return Err(());
        }
        Ok(tokens)
    }
}

/// Find the compile_commands.json entry for `src`: first by resolved
/// absolute-path equality, then by basename (spec.md §4.8).
pub fn find_entry<'a>(db: &'a [CompileDbEntry], src: &str, working_dir: Option<&str>) -> Option<&'a CompileDbEntry> {
    let src_path = {
        let p = Path::new(src);
        if let Some(wd) = working_dir {
            if !p.is_absolute() {
                Path::new(wd).join(p)
            } else {
                p.to_path_buf()
            }
        } else {
            p.to_path_buf()
        }
    };
    let src_path = src_path.canonicalize().unwrap_or(src_path);

    for entry in db {
        let entry_path = normalize_path(&entry.file, &entry.directory);
        if entry_path == src_path {
            return Some(entry);
        }
    }

    let src_basename = src_path.file_name();
    db.iter().find(|entry| Path::new(&entry.file).file_name() == src_basename)
}

pub fn get_raw_flags(entry: &CompileDbEntry) -> Vec<String> {
    let arguments = entry
        .arguments
        .clone()
        .unwrap_or_else(|| parse_command_string(entry.command.as_deref().unwrap_or("")));
    if arguments.is_empty() {
        return Vec::new();
    }
    let src_basename = Path::new(&entry.file).file_name();
    arguments
        .into_iter()
        .skip(1)
        .filter(|token| {
            token != &entry.file && Path::new(token).file_name() != src_basename
        })
        .collect()
}

/// Load a compile database and extract build-relevant flags for `src`.
/// Exit code 2 (spec.md §4.8, §6) is signaled via `AnalyzerError::NotFound`.
pub fn extract_for_source(db_path: &Path, src: &str, working_dir: Option<&str>) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(db_path).map_err(|e| AnalyzerError::io(db_path, e))?;
    let db: Vec<CompileDbEntry> = serde_json::from_str(&text)?;
    let entry = find_entry(&db, src, working_dir).ok_or_else(|| AnalyzerError::NotFound {
        what: format!("'{}' not found in {}", src, db_path.display()),
    })?;
    Ok(extract_flags(&get_raw_flags(entry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_output_and_dependency_flags() {
        let raw = vec!["-o".to_string(), "out.o".to_string(), "-c".to_string(), "-Wall".to_string()];
        let flags = extract_flags(&raw);
        assert_eq!(flags, vec!["-Wall".to_string()]);
    }

    #[test]
    fn strips_attached_mf_flag() {
        let raw = vec!["-MF=deps.d".to_string(), "-O2".to_string()];
        let flags = extract_flags(&raw);
        assert_eq!(flags, vec!["-O2".to_string()]);
    }

    #[test]
    fn extract_flags_is_idempotent() {
        let raw = vec!["-Wall".to_string(), "-Wextra".to_string()];
        let once = extract_flags(&raw);
        let twice = extract_flags(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn filter_opt_flags_removes_optimization_level() {
        let flags = vec!["-Wall".to_string(), "-O2".to_string(), "-Os".to_string()];
        let filtered = filter_opt_flags(&flags);
        assert_eq!(filtered, vec!["-Wall".to_string()]);
    }

    #[test]
    fn find_entry_falls_back_to_basename() {
        let db = vec![CompileDbEntry {
            directory: "/proj".to_string(),
            file: "/proj/src/crypto.c".to_string(),
            arguments: Some(vec!["cc".to_string(), "-O2".to_string(), "crypto.c".to_string()]),
            command: None,
        }];
        let found = find_entry(&db, "crypto.c", None);
        assert!(found.is_some());
    }
}
