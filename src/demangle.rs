//! Symbol demangling (spec.md §4.6, §5): prefer an external `rustfilt`
//! subprocess with a bounded timeout, fall back to a built-in partial
//! demangler that strips the monomorphization-hash suffix and decodes
//! length-prefixed path segments.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

const DEMANGLER_TIMEOUT: Duration = Duration::from_secs(30);

static RE_HASH_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"17h[0-9a-f]{16}E$").unwrap());
static RE_LEGACY_MANGLED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_ZN(\d+.*)$").unwrap());
static RE_LEN_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(.*)$").unwrap());

/// Built-in fallback: decode the length-prefixed path segments of Itanium /
/// Rust-legacy mangled names and strip the trailing monomorphization hash.
pub fn builtin_demangle(symbol: &str) -> String {
    let without_hash = RE_HASH_SUFFIX.replace(symbol, "").to_string();

    let Some(caps) = RE_LEGACY_MANGLED.captures(&without_hash) else {
        return without_hash;
    };
    let mut rest = caps.get(1).unwrap().as_str();
    let mut segments = Vec::new();

    while let Some(caps) = RE_LEN_SEGMENT.captures(rest) {
        let len: usize = match caps.get(1).unwrap().as_str().parse() {
            Ok(n) => n,
            Err(_) => break,
        };
        let remainder = caps.get(2).unwrap().as_str();
        if remainder.len() < len {
            break;
        }
        segments.push(&remainder[..len]);
        rest = &remainder[len..];
        if rest.is_empty() || rest == "E" {
            break;
        }
    }

    if segments.is_empty() {
        without_hash
    } else {
        segments.join("::")
    }
}

/// Invoke `rustfilt` via subprocess with a bounded timeout; fall back to
/// `builtin_demangle` on any failure (missing binary, non-zero exit,
/// timeout). Never aborts the run (spec.md §5).
pub fn demangle(symbol: &str) -> String {
    match demangle_via_subprocess(symbol) {
        Some(result) if !result.trim().is_empty() => result,
        _ => builtin_demangle(symbol),
    }
}

fn demangle_via_subprocess(symbol: &str) -> Option<String> {
    let mut child = Command::new("rustfilt")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = writeln!(stdin, "{}", symbol);
    }

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let output = child.wait_with_output();
        let _ = tx.send(output);
    });

    match rx.recv_timeout(DEMANGLER_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_monomorphization_hash() {
        let mangled = "_ZN4core3mem6forget17h1234567890abcdefE";
        let demangled = builtin_demangle(mangled);
        assert!(!demangled.contains("17h"));
        assert!(demangled.contains("core"));
    }

    #[test]
    fn decodes_length_prefixed_segments() {
        let mangled = "_ZN4core3mem6forget17habcdef0123456789E";
        let demangled = builtin_demangle(mangled);
        assert_eq!(demangled, "core::mem::forget");
    }

    #[test]
    fn falls_back_to_input_on_unrecognized_format() {
        let demangled = builtin_demangle("not_mangled_at_all");
        assert_eq!(demangled, "not_mangled_at_all");
    }
}
