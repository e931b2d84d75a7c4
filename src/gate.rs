//! Evidence merger and confidence gate (spec.md §4.7).

use crate::finding::{Confidence, EvidenceSource, Finding, Report};
use std::collections::HashSet;

const ADVANCED_MCP_CATEGORIES: &[&str] = &["SECRET_COPY", "MISSING_ON_ERROR_PATH", "NOT_DOMINATING_EXITS"];
const ASM_REQUIRED_CATEGORIES: &[&str] = &["STACK_RETENTION", "REGISTER_SPILL"];

fn has_compiler_evidence(value: &Option<serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Object(map)) => ["o0", "o2", "diff_summary"]
            .iter()
            .any(|k| map.get(*k).map(|v| !v.is_null() && v != &serde_json::Value::Bool(false)).unwrap_or(false)),
        _ => false,
    }
}

fn has_asm_evidence(finding: &Finding) -> bool {
    finding.evidence.iter().any(|e| e.source == EvidenceSource::Asm)
}

/// Apply the three confidence gates. Never deletes a finding and never
/// changes `confidence = confirmed` to anything else (spec.md §8 property
/// 9) — gating only ever sets the derived `needs_review` flag and appends a
/// note to `detail`.
pub fn apply_gates(mut report: Report, mcp_available: bool, require_mcp_for_advanced: bool) -> Report {
    for finding in &mut report.findings {
        let category = finding.category.as_str();

        if category == "OPTIMIZED_AWAY_ZEROIZE" && !has_compiler_evidence(&finding.compiler_evidence) {
            finding.needs_review = true;
            finding.detail = format!(
                "{} [gated: missing IR/ASM evidence for optimized-away claim]",
                finding.detail
            )
            .trim()
            .to_string();
        }

        if ASM_REQUIRED_CATEGORIES.contains(&category) && !has_asm_evidence(finding) {
            finding.needs_review = true;
            finding.detail = format!("{} [gated: missing assembly evidence]", finding.detail).trim().to_string();
        }

        if require_mcp_for_advanced && !mcp_available && ADVANCED_MCP_CATEGORIES.contains(&category) {
            finding.needs_review = true;
            finding.detail = format!("{} [gated: MCP unavailable for advanced semantic finding]", finding.detail)
                .trim()
                .to_string();
        }
    }

    report.summary.issues_found = report.findings.len();
    report
}

pub fn category_closure_check(report: &Report) -> bool {
    let _known: HashSet<&str> = [
        "MISSING_SOURCE_ZEROIZE",
        "OPTIMIZED_AWAY_ZEROIZE",
        "STACK_RETENTION",
        "REGISTER_SPILL",
        "SECRET_COPY",
        "MISSING_ON_ERROR_PATH",
        "PARTIAL_WIPE",
        "NOT_ON_ALL_PATHS",
        "INSECURE_HEAP_ALLOC",
        "LOOP_UNROLLED_INCOMPLETE",
        "NOT_DOMINATING_EXITS",
        "ANALYSIS_SKIPPED",
        "ANALYSIS_ERROR",
    ]
    .into_iter()
    .collect();
    report.findings.iter().all(|f| _known.contains(f.category.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Category, Evidence, EvidenceSource, Finding, Location, Severity};

    fn finding(category: Category, confidence: Confidence) -> Finding {
        Finding {
            id: "F-RS-TEST-0001".to_string(),
            category,
            severity: Severity::High,
            confidence,
            symbol: String::new(),
            location: Location::file_level("f.rs"),
            detail: "detail".to_string(),
            evidence: vec![],
            needs_review: false,
            compiler_evidence: None,
        }
    }

    #[test]
    fn gate_never_downgrades_confirmed_or_deletes_findings() {
        let f = finding(Category::AnalysisSkipped, Confidence::Confirmed);
        let report = Report::new(vec![f]);
        let gated = apply_gates(report, false, true);
        assert_eq!(gated.findings.len(), 1);
        assert_eq!(gated.findings[0].confidence, Confidence::Confirmed);
    }

    #[test]
    fn optimized_away_without_compiler_evidence_is_gated() {
        let f = finding(Category::OptimizedAwayZeroize, Confidence::Likely);
        let report = Report::new(vec![f]);
        let gated = apply_gates(report, false, false);
        assert!(gated.findings[0].needs_review);
        assert!(gated.findings[0].detail.contains("[gated:"));
    }

    #[test]
    fn asm_required_category_without_asm_evidence_is_gated() {
        let mut f = finding(Category::StackRetention, Confidence::Likely);
        f.evidence = vec![Evidence::new(EvidenceSource::Cfg, "no asm here".to_string())];
        let report = Report::new(vec![f]);
        let gated = apply_gates(report, false, false);
        assert!(gated.findings[0].needs_review);
    }

    #[test]
    fn asm_evidence_tag_is_recognized_regardless_of_detail_wording() {
        let mut f = finding(Category::StackRetention, Confidence::Likely);
        f.evidence = vec![Evidence::new(EvidenceSource::Asm, "frame size 64 bytes".to_string())];
        let report = Report::new(vec![f]);
        let gated = apply_gates(report, false, false);
        assert!(!gated.findings[0].needs_review);
    }

    #[test]
    fn advanced_category_downgraded_when_mcp_unavailable_and_required() {
        let f = finding(Category::SecretCopy, Confidence::Likely);
        let report = Report::new(vec![f]);
        let gated = apply_gates(report, false, true);
        assert!(gated.findings[0].needs_review);
    }
}
