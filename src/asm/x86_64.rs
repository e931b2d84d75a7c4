//! x86-64 Rust assembly analysis backend (spec.md §4.6).

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const CALLER_SAVED: &[&str] = &[
    "rax", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11", "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5",
    "xmm6", "xmm7", "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];
const CALLEE_SAVED: &[&str] = &["rbx", "r12", "r13", "r14", "r15", "rbp"];

static RE_FRAME_ALLOC: Lazy<Regex> = Lazy::new(|| Regex::new(r"subq\s+\$(\d+),\s*%rsp").unwrap());
static RE_MOVQ_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"movq\s+\$0,\s*-?\d+\(%r[sb]p\)").unwrap());
static RE_MOVL_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"movl\s+\$0,\s*-?\d+\(%r[sb]p\)").unwrap());
static RE_MOVW_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"movw\s+\$0,\s*-?\d+\(%r[sb]p\)").unwrap());
static RE_MOVB_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"movb\s+\$0,\s*-?\d+\(%r[sb]p\)").unwrap());
static RE_MEMSET_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"call\s+.*(?:memset|volatile_set_memory|zeroize)").unwrap());
static RE_SIMD_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:xorps|xorpd|pxor|vpxor)\s+%(\w+),\s*%(\w+)").unwrap());
static RE_REG_SPILL: Lazy<Regex> = Lazy::new(|| Regex::new(r"mov(?:q|dqa|ups|aps)\s+%(\w+),\s*(-?\d+)\(%r[sb]p\)").unwrap());
static RE_RET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bret[ql]?\b").unwrap());
static RE_RED_ZONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"mov(?:q|l|b|w)\s+%\w+,\s*-(\d+)\(%rsp\)").unwrap());

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("")
}

fn has_zero_store(code: &str) -> bool {
    RE_MOVQ_ZERO.is_match(code)
        || RE_MOVL_ZERO.is_match(code)
        || RE_MOVW_ZERO.is_match(code)
        || RE_MOVB_ZERO.is_match(code)
        || RE_MEMSET_CALL.is_match(code)
        || RE_SIMD_ZERO.captures(code).map(|c| c.get(1).map(|m| m.as_str()) == c.get(2).map(|m| m.as_str())).unwrap_or(false)
}

fn check_stack_retention(func_name: &str, lines: &[(u32, String)]) -> Option<Finding> {
    let mut frame_alloc: Option<(u32, String, u64)> = None;
    let mut zeroed = false;
    let mut ret_line: Option<u32> = None;

    for (lineno, line) in lines {
        let code = strip_comment(line);
        if frame_alloc.is_none() {
            if let Some(caps) = RE_FRAME_ALLOC.captures(code) {
                let size: u64 = caps.get(1).unwrap().as_str().parse().unwrap_or(0);
                frame_alloc = Some((*lineno, line.trim().to_string(), size));
            }
        }
        if has_zero_store(code) {
            zeroed = true;
        }
        if RE_RET.is_match(code) {
            ret_line = Some(*lineno);
        }
    }

    let (alloc_lineno, alloc_text, frame_size) = frame_alloc?;
    let ret_lineno = ret_line?;
    if zeroed || frame_size == 0 {
        return None;
    }

    Some(Finding {
        id: String::new(),
        category: Category::StackRetention,
        severity: Severity::High,
        confidence: Confidence::Likely,
        symbol: func_name.to_string(),
        location: crate::finding::Location::file_level(""),
        detail: format!(
            "stack frame of {} bytes allocated at line {} ('{}') but no zero-store found before return at line {}",
            frame_size, alloc_lineno, alloc_text, ret_lineno
        ),
        evidence: vec![Evidence::new(
            EvidenceSource::Asm,
            format!("{} at line {}; no volatile wipe before retq at line {}", alloc_text, alloc_lineno, ret_lineno),
        )],
        needs_review: false,
        compiler_evidence: None,
    })
}

fn check_register_spill(func_name: &str, lines: &[(u32, String)]) -> Vec<Finding> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut findings = Vec::new();

    for (lineno, line) in lines {
        let Some(caps) = RE_REG_SPILL.captures(line) else { continue };
        let reg = caps.get(1).unwrap().as_str().to_string();
        let class = if CALLER_SAVED.contains(&reg.as_str()) {
            "caller-saved"
        } else if CALLEE_SAVED.contains(&reg.as_str()) {
            "callee-saved"
        } else {
            continue;
        };
        if seen.contains(&reg) {
            continue;
        }
        seen.insert(reg.clone());
        let severity = if class == "callee-saved" { Severity::High } else { Severity::Medium };
        findings.push(Finding {
            id: String::new(),
            category: Category::RegisterSpill,
            severity,
            confidence: Confidence::Likely,
            symbol: func_name.to_string(),
            location: crate::finding::Location::file_level(""),
            detail: format!(
                "register %{} ({}) spilled to stack at line {} in function '{}'",
                reg, class, lineno, func_name
            ),
            evidence: vec![Evidence::new(EvidenceSource::Asm, format!("{} at line {}", line.trim(), lineno))],
            needs_review: false,
            compiler_evidence: None,
        });
    }
    findings
}

fn check_red_zone(func_name: &str, lines: &[(u32, String)]) -> Option<Finding> {
    if lines.iter().any(|(_, l)| RE_FRAME_ALLOC.is_match(l)) {
        return None;
    }

    let mut depth = 0u64;
    let mut zeroed = false;
    let mut has_ret = false;

    for (_, line) in lines {
        let code = strip_comment(line);
        if let Some(caps) = RE_RED_ZONE.captures(code) {
            let offset: u64 = caps.get(1).unwrap().as_str().parse().unwrap_or(0);
            if offset <= 128 {
                depth = depth.max(offset);
            }
        }
        if has_zero_store(code) {
            zeroed = true;
        }
        if RE_RET.is_match(code) {
            has_ret = true;
        }
    }

    if depth > 0 && has_ret && !zeroed {
        Some(Finding {
            id: String::new(),
            category: Category::StackRetention,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: func_name.to_string(),
            location: crate::finding::Location::file_level(""),
            detail: format!(
                "leaf function '{}' stores {} bytes in the x86-64 red zone without zeroing before return",
                func_name, depth
            ),
            evidence: vec![Evidence::new(EvidenceSource::Asm, format!("red zone depth -{}(%rsp)", depth))],
            needs_review: false,
            compiler_evidence: None,
        })
    } else {
        None
    }
}

pub fn analyze_function(func_name: &str, lines: &[(u32, String)]) -> Vec<Finding> {
    let mut findings = Vec::new();
    if let Some(f) = check_stack_retention(func_name, lines) {
        findings.push(f);
    }
    findings.extend(check_register_spill(func_name, lines));
    if let Some(f) = check_red_zone(func_name, lines) {
        findings.push(f);
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_e_stack_retention_no_zero_store() {
        let lines = vec![
            (1u32, "subq $64,%rsp".to_string()),
            (2, "retq".to_string()),
        ];
        let findings = analyze_function("drop_in_place<SecretKey>", &lines);
        assert!(findings.iter().any(|f| f.category.as_str() == "STACK_RETENTION"));
    }

    #[test]
    fn comment_stripping_prevents_false_positive_on_ret_in_comment() {
        let lines = vec![
            (1u32, "subq $64,%rsp".to_string()),
            (2, "movq $0, -8(%rsp) # retq is not real here".to_string()),
            (3, "retq".to_string()),
        ];
        let findings = analyze_function("f", &lines);
        assert!(!findings.iter().any(|f| f.category.as_str() == "STACK_RETENTION"));
    }

    #[test]
    fn register_spill_classifies_callee_saved_as_high() {
        let lines = vec![(1u32, "movq %rbx, -16(%rbp)".to_string())];
        let findings = check_register_spill("f", &lines);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn register_spill_emits_once_per_distinct_register() {
        let lines = vec![
            (1u32, "movq %rax, -8(%rbp)".to_string()),
            (2, "movq %rax, -16(%rbp)".to_string()),
        ];
        let findings = check_register_spill("f", &lines);
        assert_eq!(findings.len(), 1);
    }
}
