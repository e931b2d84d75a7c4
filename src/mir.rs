//! MIR pattern analyzer (spec.md §4.5): text-only analysis of Rust MIR.

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use crate::sensitive::{SensitiveObject, SensitivePattern};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static RE_FN_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfn\s+([A-Za-z0-9_:<>\.]+)\s*\(").unwrap());
static RE_DEBUG_MAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"debug\s+(\w+)\s*=>\s*_(\d+)").unwrap());
static RE_DROP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bdrop\(_(\d+)\)").unwrap());
static RE_STORAGE_DEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bStorageDead\(_(\d+)\)").unwrap());
static RE_RETURN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\breturn\b").unwrap());
static RE_RESUME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bresume\b").unwrap());
static RE_AGGREGATE_MOVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\d+\s*=\s*([A-Za-z0-9_:]+)\s*\{[^}]*move\s+_(\d+)[^}]*\}").unwrap());
static RE_ZEROIZING_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Zeroiz|ZeroizeOnDrop|SecretBox|Zeroizing").unwrap());
static RE_CLOSURE_CAPTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(closure|async|generator|Coroutine).*move\s+_(\d+)").unwrap());
static RE_DROP_GLUE_FN: Lazy<Regex> = Lazy::new(|| Regex::new(r"drop_in_place|_drop_impl").unwrap());
static RE_ZEROIZE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"zeroize::").unwrap());
static RE_FFI_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"::c_|_ffi_|_sys_|extern").unwrap());
static RE_FFI_EXCLUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"zeroize|memset").unwrap());
static RE_YIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\byield\b").unwrap());
static RE_ERR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bErr\(").unwrap());

struct MirFunction<'a> {
    name: String,
    lines: Vec<&'a str>,
    debug_map: HashMap<u32, String>,
    /// Set when brace-depth tracking went negative while splitting this
    /// function out of the module text. Per spec.md §9 Open Questions, the
    /// clamp-and-continue recovery is preserved but every finding from this
    /// function is marked `needs_review` since downstream soundness is not
    /// established.
    brace_depth_clamped: bool,
}

/// Split MIR text into function regions by tracking brace depth, clamping
/// negative depth to zero per spec.md §7/§9 (the source implementation's
/// "negative-brace-depth recovery" tolerant path).
fn split_functions(text: &str) -> Vec<MirFunction<'_>> {
    let mut functions = Vec::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0usize;

    while i < lines.len() {
        let Some(caps) = RE_FN_HEADER.captures(lines[i]) else {
            i += 1;
            continue;
        };
        let name = caps.get(1).unwrap().as_str().to_string();
        let start = i;
        let mut depth = 0i64;
        let mut started = false;
        let mut end = lines.len() - 1;
        let mut clamped = false;

        for (j, line) in lines.iter().enumerate().skip(i) {
            for ch in line.chars() {
                if ch == '{' {
                    depth += 1;
                    started = true;
                } else if ch == '}' {
                    depth -= 1;
                    if depth < 0 {
                        depth = 0; // clamp; fatal-engine-bug tolerant path (spec.md §7)
                        clamped = true;
                    }
                }
            }
            if started && depth == 0 {
                end = j;
                break;
            }
        }

        let body_lines = &lines[start..=end];
        let mut debug_map = HashMap::new();
        for line in body_lines {
            if let Some(caps) = RE_DEBUG_MAP.captures(line) {
                let name = caps.get(1).unwrap().as_str().to_string();
                let slot: u32 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
                debug_map.insert(slot, name);
            }
        }

        functions.push(MirFunction {
            name,
            lines: body_lines.to_vec(),
            debug_map,
            brace_depth_clamped: clamped,
        });

        i = end + 1;
    }

    functions
}

fn slot_is_sensitive(slot: u32, func: &MirFunction, pattern: &SensitivePattern) -> bool {
    func.debug_map
        .get(&slot)
        .map(|name| pattern.is_match(name))
        .unwrap_or(false)
}

fn body_text(func: &MirFunction) -> String {
    func.lines.join("\n")
}

pub fn analyze(text: &str, objects: &[SensitiveObject], path: &str) -> Vec<Finding> {
    let pattern = SensitivePattern::compose(objects);
    let minter = IdMinter::new("MIR", "PAT");
    let mut findings = Vec::new();

    for func in split_functions(text) {
        let before = findings.len();
        detect_drop_without_storage_dead(&func, &pattern, &minter, path, &mut findings);
        detect_resume_with_live_secret(&func, &pattern, &minter, path, &mut findings);
        detect_aggregate_move(&func, &pattern, &minter, path, &mut findings);
        detect_closure_capture(&func, &pattern, &minter, path, &mut findings);
        detect_drop_glue_without_zeroize(&func, &minter, path, &mut findings);
        detect_ffi_call_with_secret(&func, &pattern, &minter, path, &mut findings);
        detect_yield_with_live_secret(&func, &pattern, &minter, path, &mut findings);
        detect_err_path_with_live_secret(&func, &pattern, &minter, path, &mut findings);
        if func.brace_depth_clamped {
            for f in &mut findings[before..] {
                f.needs_review = true;
            }
        }
    }

    findings
}

fn detect_drop_without_storage_dead(
    func: &MirFunction,
    _pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    let mut storage_dead_slots: std::collections::HashSet<u32> = std::collections::HashSet::new();
    for caps in RE_STORAGE_DEAD.captures_iter(&body) {
        storage_dead_slots.insert(caps.get(1).unwrap().as_str().parse().unwrap_or(0));
    }
    let mut seen: std::collections::HashSet<u32> = std::collections::HashSet::new();
    let has_return = RE_RETURN.is_match(&body);

    for caps in RE_DROP.captures_iter(&body) {
        let slot: u32 = caps.get(1).unwrap().as_str().parse().unwrap_or(0);
        if storage_dead_slots.contains(&slot) || seen.contains(&slot) {
            continue;
        }
        seen.insert(slot);
        let symbol = func.debug_map.get(&slot).cloned().unwrap_or_default();
        let category = if has_return {
            Category::NotOnAllPaths
        } else {
            Category::MissingSourceZeroize
        };
        out.push(Finding {
            id: minter.next(),
            category,
            severity: Severity::Medium,
            confidence: Confidence::Likely,
            symbol,
            location: Location::file_level(path),
            detail: format!("_{} is dropped but never paired with StorageDead(_{})", slot, slot),
            evidence: vec![Evidence::new(EvidenceSource::MirText, format!("drop(_{})", slot))],
            needs_review: false,
            compiler_evidence: None,
        });
    }
}

fn detect_resume_with_live_secret(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    if !RE_RESUME.is_match(&body) {
        return;
    }
    let live: Vec<&String> = func
        .debug_map
        .values()
        .filter(|name| pattern.is_match(name))
        .take(3)
        .collect();
    if live.is_empty() {
        return;
    }
    out.push(Finding {
        id: minter.next(),
        category: Category::MissingSourceZeroize,
        severity: Severity::High,
        confidence: Confidence::Likely,
        symbol: func.name.clone(),
        location: Location::file_level(path),
        detail: format!(
            "unwind resume terminator reached with live sensitive locals: {}",
            live.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ),
        evidence: vec![Evidence::new(EvidenceSource::MirText, "resume".to_string())],
        needs_review: false,
        compiler_evidence: None,
    });
}

fn detect_aggregate_move(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    for caps in RE_AGGREGATE_MOVE.captures_iter(&body) {
        let type_name = caps.get(1).unwrap().as_str();
        let slot: u32 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
        if RE_ZEROIZING_TYPE.is_match(type_name) {
            continue;
        }
        if !slot_is_sensitive(slot, func, pattern) {
            continue;
        }
        out.push(Finding {
            id: minter.next(),
            category: Category::SecretCopy,
            severity: Severity::Medium,
            confidence: Confidence::Likely,
            symbol: func.debug_map.get(&slot).cloned().unwrap_or_default(),
            location: Location::file_level(path),
            detail: format!("sensitive _{} moved into non-zeroizing aggregate {}", slot, type_name),
            evidence: vec![Evidence::new(EvidenceSource::MirText, caps.get(0).unwrap().as_str().to_string())],
            needs_review: false,
            compiler_evidence: None,
        });
    }
}

fn detect_closure_capture(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    for caps in RE_CLOSURE_CAPTURE.captures_iter(&body) {
        let slot: u32 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
        if !slot_is_sensitive(slot, func, pattern) {
            continue;
        }
        out.push(Finding {
            id: minter.next(),
            category: Category::SecretCopy,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: func.debug_map.get(&slot).cloned().unwrap_or_default(),
            location: Location::file_level(path),
            detail: format!("sensitive _{} captured by move into a closure/async/generator body", slot),
            evidence: vec![Evidence::new(EvidenceSource::MirText, caps.get(0).unwrap().as_str().to_string())],
            needs_review: false,
            compiler_evidence: None,
        });
    }
}

fn detect_drop_glue_without_zeroize(func: &MirFunction, minter: &IdMinter, path: &str, out: &mut Vec<Finding>) {
    if !RE_DROP_GLUE_FN.is_match(&func.name) {
        return;
    }
    let body = body_text(func);
    if !RE_DROP.is_match(&body) || RE_ZEROIZE_REF.is_match(&body) {
        return;
    }
    out.push(Finding {
        id: minter.next(),
        category: Category::MissingSourceZeroize,
        severity: Severity::High,
        confidence: Confidence::Likely,
        symbol: func.name.clone(),
        location: Location::file_level(path),
        detail: "drop glue calls drop() but never references zeroize::".to_string(),
        evidence: vec![Evidence::new(EvidenceSource::MirText, func.name.clone())],
        needs_review: false,
        compiler_evidence: None,
    });
}

fn detect_ffi_call_with_secret(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    for line in &func.lines {
        if !RE_FFI_CALL.is_match(line) || RE_FFI_EXCLUDE.is_match(line) {
            continue;
        }
        if !pattern.is_match(line) {
            continue;
        }
        out.push(Finding {
            id: minter.next(),
            category: Category::SecretCopy,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: func.name.clone(),
            location: Location::file_level(path),
            detail: "FFI call references a sensitive slot".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::MirText, line.trim().to_string())],
            needs_review: false,
            compiler_evidence: None,
        });
    }
}

fn detect_yield_with_live_secret(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    if !RE_YIELD.is_match(&body) {
        return;
    }
    if !func.debug_map.values().any(|n| pattern.is_match(n)) {
        return;
    }
    out.push(Finding {
        id: minter.next(),
        category: Category::NotOnAllPaths,
        severity: Severity::High,
        confidence: Confidence::Likely,
        symbol: func.name.clone(),
        location: Location::file_level(path),
        detail: "yield terminator reached with a live sensitive local".to_string(),
        evidence: vec![Evidence::new(EvidenceSource::MirText, "yield".to_string())],
        needs_review: false,
        compiler_evidence: None,
    });
}

fn detect_err_path_with_live_secret(
    func: &MirFunction,
    pattern: &SensitivePattern,
    minter: &IdMinter,
    path: &str,
    out: &mut Vec<Finding>,
) {
    let body = body_text(func);
    if !RE_ERR.is_match(&body) {
        return;
    }
    if !func.debug_map.values().any(|n| pattern.is_match(n)) {
        return;
    }
    out.push(Finding {
        id: minter.next(),
        category: Category::NotOnAllPaths,
        severity: Severity::High,
        confidence: Confidence::Likely,
        symbol: func.name.clone(),
        location: Location::file_level(path),
        detail: "Err(...) path reached with a live sensitive local".to_string(),
        evidence: vec![Evidence::new(EvidenceSource::MirText, "Err(".to_string())],
        needs_review: false,
        compiler_evidence: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_d_drop_without_storage_dead_with_return_is_not_on_all_paths() {
        let mir = r#"
fn f() -> () {
    debug secret => _3;
    bb0: {
        drop(_3);
        return;
    }
}
"#;
        let findings = analyze(mir, &[], "f.mir");
        let relevant: Vec<_> = findings
            .iter()
            .filter(|f| f.detail.contains("StorageDead"))
            .collect();
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].category.as_str(), "NOT_ON_ALL_PATHS");
        assert_eq!(relevant[0].symbol, "secret");
    }

    #[test]
    fn drop_glue_without_zeroize_reference() {
        let mir = r#"
fn drop_in_place::<SecretKey>(_1: *mut SecretKey) -> () {
    bb0: {
        drop(_2);
        return;
    }
}
"#;
        let findings = analyze(mir, &[], "f.mir");
        assert!(findings
            .iter()
            .any(|f| f.category.as_str() == "MISSING_SOURCE_ZEROIZE" && f.detail.contains("drop glue")));
    }

    #[test]
    fn negative_brace_depth_clamps_instead_of_panicking() {
        let mir = "fn f() -> () {\n}\n}\n}\nfn g() -> () {\n}\n";
        let functions = split_functions(mir);
        assert_eq!(functions.len(), 2);
    }
}
