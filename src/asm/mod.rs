//! Assembly analyzer dispatch front end (spec.md §4.6).

pub mod aarch64;
pub mod x86_64;

use crate::demangle::demangle;
use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use crate::sensitive::SensitivePattern;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    AArch64,
}

static RE_X86_REG: Lazy<Regex> = Lazy::new(|| Regex::new(r"%r(sp|ax|bx|cx|dx|si|di|bp|[0-9]+)\b").unwrap());
static RE_ARM_STP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstp\s+x29\b").unwrap());
static RE_ARM_STR_XZR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstr\s+xzr\b").unwrap());
static RE_ARM_MOVI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmovi\s+v\d+\.").unwrap());
static RE_ARM_BARE_X: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bx\d+,").unwrap());

/// Detect the target architecture by scanning assembly text (spec.md §4.6).
pub fn detect_arch(text: &str) -> Option<Arch> {
    if RE_X86_REG.is_match(text) {
        return Some(Arch::X86_64);
    }
    if RE_ARM_STP.is_match(text) || RE_ARM_STR_XZR.is_match(text) || RE_ARM_MOVI.is_match(text) || RE_ARM_BARE_X.is_match(text) {
        return Some(Arch::AArch64);
    }
    None
}

static RE_TYPE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\.type\s+([A-Za-z0-9_.$]+)\s*,\s*@function").unwrap());
static RE_GLOBL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\.globl\s+([A-Za-z0-9_.$]+)").unwrap());
static RE_LOCAL_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.?L[A-Z_]").unwrap());
static RE_LABEL_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9_.$]+):\s*$").unwrap());
static RE_HASH_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"::h[0-9a-f]{16}").unwrap());
static RE_TYPE_PARAMS: Lazy<Regex> = Lazy::new(|| Regex::new(r"::<[^>]*>").unwrap());

pub struct AsmFunction {
    pub mangled_name: String,
    pub lines: Vec<(u32, String)>,
}

/// Gather function labels from `.type <sym>,@function` directives, falling
/// back to `.globl` when none exist. Internal compiler labels matching
/// `^\.?L[A-Z_]` never start a function region (spec.md §4.6).
pub fn partition_functions(text: &str) -> Vec<AsmFunction> {
    let lines: Vec<&str> = text.lines().collect();
    let mut function_syms: Vec<String> = Vec::new();
    for line in &lines {
        if let Some(caps) = RE_TYPE_DIRECTIVE.captures(line) {
            function_syms.push(caps.get(1).unwrap().as_str().to_string());
        }
    }
    if function_syms.is_empty() {
        for line in &lines {
            if let Some(caps) = RE_GLOBL.captures(line) {
                function_syms.push(caps.get(1).unwrap().as_str().to_string());
            }
        }
    }
    let function_syms: std::collections::HashSet<String> = function_syms.into_iter().collect();

    let mut functions = Vec::new();
    let mut current: Option<AsmFunction> = None;

    for (idx, raw) in lines.iter().enumerate() {
        let lineno = (idx + 1) as u32;
        if let Some(caps) = RE_LABEL_LINE.captures(raw) {
            let name = caps.get(1).unwrap().as_str();
            if RE_LOCAL_LABEL.is_match(name) {
                if let Some(f) = current.as_mut() {
                    f.lines.push((lineno, raw.to_string()));
                }
                continue;
            }
            if function_syms.contains(name) {
                if let Some(f) = current.take() {
                    functions.push(f);
                }
                current = Some(AsmFunction {
                    mangled_name: name.to_string(),
                    lines: Vec::new(),
                });
                continue;
            }
        }
        if let Some(f) = current.as_mut() {
            f.lines.push((lineno, raw.to_string()));
        }
    }
    if let Some(f) = current.take() {
        functions.push(f);
    }
    functions
}

/// Strip the monomorphization hash and angle-bracket type-parameter blocks
/// to form the canonical de-duplication base name (spec.md §4.6, §9). Both
/// steps are applied to avoid asymmetric keys.
pub fn base_name(demangled: &str) -> String {
    let no_hash = RE_HASH_SUFFIX.replace_all(demangled, "");
    RE_TYPE_PARAMS.replace_all(&no_hash, "").to_string()
}

struct DedupKey {
    category: &'static str,
    base: String,
    extra: Option<String>,
}

fn dedup_key(f: &Finding, base: &str) -> DedupKey {
    let extra = if f.category.as_str() == "REGISTER_SPILL" {
        Some(f.evidence.first().map(|e| e.detail.clone()).unwrap_or_default())
    } else {
        None
    };
    DedupKey {
        category: f.category.as_str(),
        base: base.to_string(),
        extra,
    }
}

/// Collapse findings with identical (category, base name) — or
/// (category, base name, evidence text) for `REGISTER_SPILL` — recording
/// the number of collapsed instances in the evidence detail (spec.md §4.6).
pub fn dedup_findings(findings: Vec<Finding>, base_names: &[(String, String)]) -> Vec<Finding> {
    use std::collections::HashMap;
    let base_lookup: HashMap<&str, &str> = base_names
        .iter()
        .map(|(sym, base)| (sym.as_str(), base.as_str()))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Finding, usize)> = HashMap::new();

    for f in findings {
        let base = base_lookup.get(f.symbol.as_str()).copied().unwrap_or(&f.symbol);
        let key = dedup_key(&f, base);
        let key_str = format!("{}|{}|{}", key.category, key.base, key.extra.unwrap_or_default());
        match groups.get_mut(&key_str) {
            Some((_, count)) => *count += 1,
            None => {
                order.push(key_str.clone());
                groups.insert(key_str, (f, 1));
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let (mut f, count) = groups.remove(&key).unwrap();
            if count > 1 {
                f.detail = format!("{} ({} monomorphized instances collapsed)", f.detail, count);
            }
            f
        })
        .collect()
}

static RE_DROP_IN_PLACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"drop_in_place").unwrap());
static RE_CALL_MEMSET_ZEROIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:call|bl)\s+.*(?:memset|zeroize|volatile_set_memory)").unwrap());
static RE_ZEROIZE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"zeroize").unwrap());

fn drop_glue_corroboration(func: &AsmFunction, demangled: &str, minter: &IdMinter, path: &str) -> Option<Finding> {
    if !RE_DROP_IN_PLACE.is_match(demangled) {
        return None;
    }
    let has_wipe_call = func.lines.iter().any(|(_, l)| RE_CALL_MEMSET_ZEROIZE.is_match(l));
    let has_zeroize_ref = func.lines.iter().any(|(_, l)| RE_ZEROIZE_LINE.is_match(l));
    if has_wipe_call || has_zeroize_ref {
        return None;
    }
    Some(Finding {
        id: minter.next(),
        category: Category::MissingSourceZeroize,
        severity: Severity::Medium,
        confidence: Confidence::Likely,
        symbol: func.mangled_name.clone(),
        location: Location::file_level(path),
        detail: "drop_in_place glue calls neither a wipe routine nor references zeroize".to_string(),
        evidence: vec![Evidence::new(EvidenceSource::Asm, "asm: no wipe call in drop glue".to_string())],
        needs_review: false,
        compiler_evidence: None,
    })
}

/// Full assembly-analyzer entry point (spec.md §4.6).
pub fn analyze(text: &str, pattern: &SensitivePattern, path: &str) -> Vec<Finding> {
    let minter = IdMinter::new("ASM", "X");

    let Some(arch) = detect_arch(text) else {
        return vec![Finding {
            id: minter.next(),
            category: Category::AnalysisSkipped,
            severity: Severity::Info,
            confidence: Confidence::Confirmed,
            symbol: String::new(),
            location: Location::file_level(path),
            detail: "unrecognized target architecture".to_string(),
            evidence: vec![],
            needs_review: false,
            compiler_evidence: None,
        }];
    };

    let functions = partition_functions(text);
    let mut findings = Vec::new();
    let mut base_names = Vec::new();

    for func in &functions {
        let demangled = demangle(&func.mangled_name);
        base_names.push((func.mangled_name.clone(), base_name(&demangled)));

        if !pattern.is_match(&demangled.to_lowercase()) && !RE_DROP_IN_PLACE.is_match(&demangled) {
            continue;
        }

        let backend_findings = match arch {
            Arch::X86_64 => x86_64::analyze_function(&func.mangled_name, &func.lines),
            Arch::AArch64 => aarch64::analyze_function(&func.mangled_name, &func.lines),
        };
        for mut f in backend_findings {
            f.id = minter.next();
            if arch == Arch::AArch64 {
                f.detail = format!("[EXPERIMENTAL] {}", f.detail);
            }
            f.location = Location::file_level(path);
            findings.push(f);
        }

        if let Some(f) = drop_glue_corroboration(func, &demangled, &minter, path) {
            findings.push(f);
        }
    }

    dedup_findings(findings, &base_names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_x86_64_from_register_names() {
        let text = "movq %rax, %rbx\n";
        assert_eq!(detect_arch(text), Some(Arch::X86_64));
    }

    #[test]
    fn detects_aarch64_from_arm_syntax() {
        let text = "stp x29, x30, [sp, #-32]!\n";
        assert_eq!(detect_arch(text), Some(Arch::AArch64));
    }

    #[test]
    fn unknown_architecture_emits_analysis_skipped() {
        let text = "this is not assembly at all\n";
        let pattern = SensitivePattern::compose(&[]);
        let findings = analyze(text, &pattern, "f.s");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category.as_str(), "ANALYSIS_SKIPPED");
        assert_eq!(findings[0].confidence, Confidence::Confirmed);
    }

    #[test]
    fn base_name_strips_hash_and_type_params() {
        let name = "zeroize::Zeroize::zeroize::<SecretKey>::h0123456789abcdef";
        let base = base_name(name);
        assert!(!base.contains("h0123456789abcdef"));
        assert!(!base.contains("<SecretKey>"));
    }
}
