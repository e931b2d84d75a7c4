//! AArch64 Rust assembly analysis backend (spec.md §4.6). Explicitly
//! experimental: every finding this backend produces is tagged
//! `[EXPERIMENTAL]` by the dispatch front end in `asm::analyze`.

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const CALLEE_SAVED: &[&str] = &[
    "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "x30", "v8", "v9", "v10", "v11",
    "v12", "v13", "v14", "v15",
];

static RE_STP_FRAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"stp\s+x29,\s*x30,\s*\[sp,\s*#-(\d+)\]!").unwrap());
static RE_SUB_SP: Lazy<Regex> = Lazy::new(|| Regex::new(r"sub\s+sp,\s*sp,\s*#(\d+)").unwrap());
static RE_STR_XZR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstr\s+xzr\b").unwrap());
static RE_STP_XZR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstp\s+xzr,\s*xzr\b").unwrap());
static RE_MOVI_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmovi\s+v\d+\.\S*,\s*#0\b").unwrap());
static RE_BL_WIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bbl\s+.*(?:memset|zeroize)").unwrap());
static RE_RET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bret\b").unwrap());
static RE_STR_SPILL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstr\s+([xvq]\d+),\s*\[sp").unwrap());
static RE_STP_SPILL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bstp\s+([xvq]\d+),\s*([xvq]\d+),\s*\[sp").unwrap());

fn has_zero_store(line: &str) -> bool {
    RE_STR_XZR.is_match(line) || RE_STP_XZR.is_match(line) || RE_MOVI_ZERO.is_match(line) || RE_BL_WIPE.is_match(line)
}

fn check_stack_retention(func_name: &str, lines: &[(u32, String)]) -> Option<Finding> {
    let mut frame_size = 0u64;
    let mut zeroed = false;
    let mut has_ret = false;

    for (_, line) in lines {
        if let Some(caps) = RE_STP_FRAME.captures(line) {
            frame_size += caps.get(1).unwrap().as_str().parse::<u64>().unwrap_or(0);
        }
        if let Some(caps) = RE_SUB_SP.captures(line) {
            frame_size += caps.get(1).unwrap().as_str().parse::<u64>().unwrap_or(0);
        }
        if has_zero_store(line) {
            zeroed = true;
        }
        if RE_RET.is_match(line) {
            has_ret = true;
        }
    }

    if frame_size > 0 && has_ret && !zeroed {
        Some(Finding {
            id: String::new(),
            category: Category::StackRetention,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: func_name.to_string(),
            location: crate::finding::Location::file_level(""),
            detail: format!(
                "AArch64 frame of {} bytes allocated in '{}' with no zero-store before return",
                frame_size, func_name
            ),
            evidence: vec![Evidence::new(EvidenceSource::Asm, format!("frame size {} bytes", frame_size))],
            needs_review: false,
            compiler_evidence: None,
        })
    } else {
        None
    }
}

fn reg_class(reg: &str) -> &'static str {
    if CALLEE_SAVED.contains(&reg) {
        "callee-saved"
    } else {
        "caller-saved"
    }
}

fn check_register_spill(func_name: &str, lines: &[(u32, String)]) -> Vec<Finding> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut findings = Vec::new();

    for (lineno, line) in lines {
        let mut regs: Vec<String> = Vec::new();
        if let Some(caps) = RE_STR_SPILL.captures(line) {
            regs.push(caps.get(1).unwrap().as_str().to_string());
        }
        if let Some(caps) = RE_STP_SPILL.captures(line) {
            regs.push(caps.get(1).unwrap().as_str().to_string());
            regs.push(caps.get(2).unwrap().as_str().to_string());
        }
        for reg in regs {
            if reg == "xzr" || seen.contains(&reg) {
                continue;
            }
            seen.insert(reg.clone());
            let class = reg_class(&reg);
            let severity = if class == "callee-saved" { Severity::High } else { Severity::Medium };
            findings.push(Finding {
                id: String::new(),
                category: Category::RegisterSpill,
                severity,
                confidence: Confidence::Likely,
                symbol: func_name.to_string(),
                location: crate::finding::Location::file_level(""),
                detail: format!("register {} ({}) spilled to stack at line {} in '{}'", reg, class, lineno, func_name),
                evidence: vec![Evidence::new(EvidenceSource::Asm, format!("{} at line {}", line.trim(), lineno))],
                needs_review: false,
                compiler_evidence: None,
            });
        }
    }
    findings
}

pub fn analyze_function(func_name: &str, lines: &[(u32, String)]) -> Vec<Finding> {
    let mut findings = Vec::new();
    if let Some(f) = check_stack_retention(func_name, lines) {
        findings.push(f);
    }
    findings.extend(check_register_spill(func_name, lines));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_retention_from_combined_stp_and_sub_sp() {
        let lines = vec![
            (1u32, "stp x29, x30, [sp, #-32]!".to_string()),
            (2, "sub sp, sp, #16".to_string()),
            (3, "ret".to_string()),
        ];
        let findings = analyze_function("f", &lines);
        assert!(findings.iter().any(|f| f.category.as_str() == "STACK_RETENTION"));
    }

    #[test]
    fn xzr_operand_never_counted_as_a_spill() {
        let lines = vec![(1u32, "str xzr, [sp, #8]".to_string())];
        let findings = check_register_spill("f", &lines);
        assert!(findings.is_empty());
    }
}
