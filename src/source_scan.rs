//! Regex-level source scanner (spec.md §4.1).
//!
//! Two passes per `.rs` file: a dangerous-API pattern pass with a ±15-line
//! sensitive-name context filter, and an async-suspension pass that flags
//! sensitive locals still live across an `.await` point.

use crate::error::{AnalyzerError, Result};
use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use crate::sensitive::SensitivePattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

const CONTEXT_WINDOW: usize = 15;

struct ApiPattern {
    regex: Regex,
    category: Category,
    severity: Severity,
    detail: &'static str,
}

static API_PATTERNS: Lazy<Vec<ApiPattern>> = Lazy::new(|| {
    vec![
        ApiPattern {
            regex: Regex::new(r"\bmem::forget\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::Critical,
            detail: "mem::forget suppresses Drop, bypassing any zeroizing Drop impl",
        },
        ApiPattern {
            regex: Regex::new(r"\bManuallyDrop::new\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::Critical,
            detail: "ManuallyDrop::new suppresses Drop, bypassing any zeroizing Drop impl",
        },
        ApiPattern {
            regex: Regex::new(r"\bBox::leak\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::Critical,
            detail: "Box::leak escapes ownership; the heap allocation is never dropped or zeroed",
        },
        ApiPattern {
            regex: Regex::new(r"\bBox::into_raw\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::High,
            detail: "Box::into_raw escapes ownership; the heap allocation is never dropped unless manually reconstructed",
        },
        ApiPattern {
            regex: Regex::new(r"\bptr::write_bytes\b").unwrap(),
            category: Category::OptimizedAwayZeroize,
            severity: Severity::High,
            detail: "ptr::write_bytes is non-volatile; LLVM may eliminate it as a dead store",
        },
        ApiPattern {
            regex: Regex::new(r"\bmem::transmute(?:::<[^>]*>)?\b").unwrap(),
            category: Category::SecretCopy,
            severity: Severity::High,
            detail: "mem::transmute creates a bitwise copy — original and transmuted value both exist on the stack",
        },
        ApiPattern {
            regex: Regex::new(r"\bslice::from_raw_parts(?:_mut)?\b").unwrap(),
            category: Category::SecretCopy,
            severity: Severity::Medium,
            detail: "slice::from_raw_parts aliases raw memory, which may expose secret bytes past their intended lifetime",
        },
        ApiPattern {
            regex: Regex::new(r"\bmem::take\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::Medium,
            detail: "mem::take replaces with Default::default() without guaranteeing the old value is zeroized",
        },
        ApiPattern {
            regex: Regex::new(r"\bmem::uninitialized\b").unwrap(),
            category: Category::MissingSourceZeroize,
            severity: Severity::Critical,
            detail: "mem::uninitialized is deprecated and unsound; uninitialized memory may alias prior secret content",
        },
    ]
});

static ASYNC_FN_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\basync\s+fn\s").unwrap());
static LET_BINDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\blet\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=").unwrap());
static AWAIT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.await\b").unwrap());

/// Strip `//` line comments and `/* ... */` block comments (which may span
/// multiple lines). A line containing code before a mid-line block-comment
/// opener keeps its code; only the remainder becomes comment (spec.md §4.1).
/// String literals are left intact.
pub fn strip_comments(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_block_comment = false;

    for raw_line in source.lines() {
        let mut line = String::new();
        let mut chars = raw_line.char_indices().peekable();
        let mut in_string = false;

        while let Some((i, c)) = chars.next() {
            if in_block_comment {
                if c == '*' && raw_line[i..].starts_with("*/") {
                    in_block_comment = false;
                    chars.next();
                }
                continue;
            }
            if in_string {
                line.push(c);
                if c == '\\' {
                    if let Some((_, next)) = chars.next() {
                        line.push(next);
                    }
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }
            if c == '"' {
                in_string = true;
                line.push(c);
                continue;
            }
            if c == '/' && raw_line[i..].starts_with("//") {
                break;
            }
            if c == '/' && raw_line[i..].starts_with("/*") {
                in_block_comment = true;
                chars.next();
                continue;
            }
            line.push(c);
        }
        out.push(line);
    }
    out
}

fn scan_api_patterns(lines: &[String], pattern: &SensitivePattern, minter: &IdMinter, path: &str, out: &mut Vec<Finding>) {
    for (idx, line) in lines.iter().enumerate() {
        for api in API_PATTERNS.iter() {
            if !api.regex.is_match(line) {
                continue;
            }
            let lo = idx.saturating_sub(CONTEXT_WINDOW);
            let hi = (idx + CONTEXT_WINDOW + 1).min(lines.len());
            let window = lines[lo..hi].join("\n");
            let confidence = if pattern.is_match(&window) {
                Confidence::Likely
            } else {
                Confidence::NeedsReview
            };

            out.push(Finding {
                id: minter.next(),
                category: api.category,
                severity: api.severity,
                confidence,
                symbol: String::new(),
                location: Location::new(path, (idx + 1) as u32),
                detail: api.detail.to_string(),
                evidence: vec![Evidence::new(EvidenceSource::SourceGrep, line.trim().to_string())],
                needs_review: confidence == Confidence::NeedsReview,
                compiler_evidence: None,
            });
        }
    }
}

fn scan_async_suspension(lines: &[String], pattern: &SensitivePattern, minter: &IdMinter, path: &str, out: &mut Vec<Finding>) {
    let mut idx = 0usize;
    while idx < lines.len() {
        if !ASYNC_FN_HEADER.is_match(&lines[idx]) {
            idx += 1;
            continue;
        }

        // Balance braces from the first `{` after the header to find the body.
        let mut depth = 0i64;
        let mut started = false;
        let mut body_start = idx;
        let mut body_end = lines.len();
        'outer: for (j, line) in lines.iter().enumerate().skip(idx) {
            for ch in line.chars() {
                match ch {
                    '{' => {
                        if !started {
                            started = true;
                            body_start = j;
                        }
                        depth += 1;
                    }
                    '}' => {
                        depth -= 1;
                        if started && depth == 0 {
                            body_end = j;
                            break 'outer;
                        }
                    }
                    _ => {}
                }
            }
        }

        let body = &lines[body_start..=body_end.min(lines.len() - 1)];
        let mut seen_bindings: std::collections::HashSet<String> = std::collections::HashSet::new();

        for (offset, line) in body.iter().enumerate() {
            if let Some(caps) = LET_BINDING.captures(line) {
                let name = caps.get(1).unwrap().as_str().to_string();
                if !pattern.is_match(&name) || seen_bindings.contains(&name) {
                    continue;
                }
                let has_later_await = body[offset + 1..].iter().any(|l| AWAIT_TOKEN.is_match(l));
                if has_later_await {
                    seen_bindings.insert(name.clone());
                    out.push(Finding {
                        id: minter.next(),
                        category: Category::NotOnAllPaths,
                        severity: Severity::High,
                        confidence: Confidence::Likely,
                        symbol: name,
                        location: Location::new(path, (body_start + offset + 1) as u32),
                        detail: "sensitive local remains live across an .await suspension point".to_string(),
                        evidence: vec![Evidence::new(EvidenceSource::SourceGrep, line.trim().to_string())],
                        needs_review: false,
                        compiler_evidence: None,
                    });
                }
            }
        }

        idx = body_end + 1;
    }
}

/// Scan one source file's already-comment-stripped lines.
pub fn scan_lines(lines: &[String], pattern: &SensitivePattern, minter: &IdMinter, path: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    scan_api_patterns(lines, pattern, minter, path, &mut findings);
    scan_async_suspension(lines, pattern, minter, path, &mut findings);
    findings
}

/// Scan every `.rs` file under `root`, sorted for deterministic traversal
/// (spec.md §5: "file traversal uses sorted recursion").
pub fn scan_root(root: &Path, pattern: &SensitivePattern) -> Result<Vec<Finding>> {
    let minter = IdMinter::new("RS", "SRC");
    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "rs").unwrap_or(false))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    let mut findings = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(&path).map_err(|e| AnalyzerError::io(&path, e))?;
        let lines = strip_comments(&text);
        let path_str = path.to_string_lossy().to_string();
        findings.extend(scan_lines(&lines, pattern, &minter, &path_str));
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitive::SensitivePattern;

    fn pattern() -> SensitivePattern {
        SensitivePattern::compose(&[])
    }

    #[test]
    fn scenario_a_mem_forget_on_secret_key() {
        let source = "fn f() {\nlet secret_key = gen(); mem::forget(secret_key);\n}\n";
        let lines = strip_comments(source);
        let minter = IdMinter::new("RS", "SRC");
        let findings = scan_lines(&lines, &pattern(), &minter, "f.rs");
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.category.as_str(), "MISSING_SOURCE_ZEROIZE");
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.confidence, Confidence::Likely);
        assert_eq!(f.location.line, 2);
    }

    #[test]
    fn word_boundary_discipline_rejects_substring_matches() {
        let p = pattern();
        assert!(p.is_match("let key_val = 1;"));
        assert!(!p.is_match("let monkeykey = 1;"));
    }

    #[test]
    fn comment_exclusion_single_line() {
        let source = "// mem::forget(secret_key);\nlet x = 1;\n";
        let lines = strip_comments(source);
        let minter = IdMinter::new("RS", "SRC");
        let findings = scan_lines(&lines, &pattern(), &minter, "f.rs");
        assert!(findings.is_empty());
    }

    #[test]
    fn comment_exclusion_multiline_block() {
        let source = "/* start\nmem::forget(secret_key);\nend */\nlet x = 1;\n";
        let lines = strip_comments(source);
        let minter = IdMinter::new("RS", "SRC");
        let findings = scan_lines(&lines, &pattern(), &minter, "f.rs");
        assert!(findings.is_empty());
    }

    #[test]
    fn mid_line_block_comment_opener_keeps_leading_code() {
        let source = "let x = 1; /* mem::forget(secret_key);\nstill comment */\nlet y = 2;\n";
        let lines = strip_comments(source);
        assert!(lines[0].contains("let x = 1;"));
        let minter = IdMinter::new("RS", "SRC");
        let findings = scan_lines(&lines, &pattern(), &minter, "f.rs");
        assert!(findings.is_empty());
    }

    #[test]
    fn async_suspension_flags_secret_live_across_await() {
        let source = "async fn f() {\n    let secret_key = gen();\n    other().await;\n}\n";
        let lines = strip_comments(source);
        let minter = IdMinter::new("RS", "SRC");
        let mut findings = Vec::new();
        scan_async_suspension(&lines, &pattern(), &minter, "f.rs", &mut findings);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category.as_str(), "NOT_ON_ALL_PATHS");
        assert_eq!(findings[0].symbol, "secret_key");
    }

    #[test]
    fn async_suspension_at_most_one_finding_per_binding() {
        let source = "async fn f() {\n    let secret_key = gen();\n    a().await;\n    b().await;\n}\n";
        let lines = strip_comments(source);
        let minter = IdMinter::new("RS", "SRC");
        let mut findings = Vec::new();
        scan_async_suspension(&lines, &pattern(), &minter, "f.rs", &mut findings);
        assert_eq!(findings.len(), 1);
    }
}
