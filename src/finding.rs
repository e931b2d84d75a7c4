use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Core Data Types
// ============================================================================

/// Closed category enumeration (spec.md §3). No free-form categories are
/// ever emitted; every producer picks one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    MissingSourceZeroize,
    OptimizedAwayZeroize,
    StackRetention,
    RegisterSpill,
    SecretCopy,
    MissingOnErrorPath,
    PartialWipe,
    NotOnAllPaths,
    InsecureHeapAlloc,
    LoopUnrolledIncomplete,
    NotDominatingExits,
    AnalysisSkipped,
    AnalysisError,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MissingSourceZeroize => "MISSING_SOURCE_ZEROIZE",
            Category::OptimizedAwayZeroize => "OPTIMIZED_AWAY_ZEROIZE",
            Category::StackRetention => "STACK_RETENTION",
            Category::RegisterSpill => "REGISTER_SPILL",
            Category::SecretCopy => "SECRET_COPY",
            Category::MissingOnErrorPath => "MISSING_ON_ERROR_PATH",
            Category::PartialWipe => "PARTIAL_WIPE",
            Category::NotOnAllPaths => "NOT_ON_ALL_PATHS",
            Category::InsecureHeapAlloc => "INSECURE_HEAP_ALLOC",
            Category::LoopUnrolledIncomplete => "LOOP_UNROLLED_INCOMPLETE",
            Category::NotDominatingExits => "NOT_DOMINATING_EXITS",
            Category::AnalysisSkipped => "ANALYSIS_SKIPPED",
            Category::AnalysisError => "ANALYSIS_ERROR",
        }
    }

    /// The eleven categories the PoC synthesizer can generate a
    /// proof-of-concept for (spec.md §4.8). Excludes the two meta-categories.
    pub fn is_exploitable(&self) -> bool {
        !matches!(self, Category::AnalysisSkipped | Category::AnalysisError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Confidence tiers, ordered `confirmed < likely < needs_review` per
/// spec.md §4.8's "minimum means threshold-or-better" wording — confirmed
/// is the strongest finding and sorts lowest in this scale so that
/// `>= min_confidence` means "at least as uncertain as the threshold".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Confirmed,
    Likely,
    NeedsReview,
}

impl Confidence {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(Confidence::Confirmed),
            "likely" => Some(Confidence::Likely),
            "needs_review" => Some(Confidence::NeedsReview),
            _ => None,
        }
    }
}

/// The source tag carried by every evidence record (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    SourceGrep,
    Cfg,
    IrDiff,
    MirText,
    LlvmIr,
    Asm,
    Mcp,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::SourceGrep => "source_grep",
            EvidenceSource::Cfg => "cfg",
            EvidenceSource::IrDiff => "ir_diff",
            EvidenceSource::MirText => "mir_text",
            EvidenceSource::LlvmIr => "llvm_ir",
            EvidenceSource::Asm => "asm",
            EvidenceSource::Mcp => "mcp",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    pub detail: String,
}

impl Evidence {
    pub fn new(source: EvidenceSource, detail: impl Into<String>) -> Self {
        Self {
            source,
            detail: detail.into(),
        }
    }
}

/// File path + 1-based line number. Line 0 denotes file-level/unknown line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    pub fn file_level(file: impl Into<String>) -> Self {
        Self::new(file, 0)
    }
}

/// Immutable once emitted, except for the confidence gate which may toggle
/// `needs_review` and append a `[gated: ...]` note to `detail` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub confidence: Confidence,
    pub symbol: String,
    pub location: Location,
    pub detail: String,
    pub evidence: Vec<Evidence>,
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_evidence: Option<serde_json::Value>,
}

impl Finding {
    pub fn needs_review_flag(&self) -> bool {
        self.confidence == Confidence::NeedsReview || self.needs_review
    }
}

/// Mints finding ids `F-<LANG>-<STAGE>-<nnnn>` in emission order within one
/// run (spec.md §5: "a module-level monotonic finding counter used solely
/// to mint ids within one run"). Never shared across process invocations.
pub struct IdMinter {
    lang: &'static str,
    stage: &'static str,
    counter: AtomicU32,
}

impl IdMinter {
    pub fn new(lang: &'static str, stage: &'static str) -> Self {
        Self {
            lang,
            stage,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("F-{}-{}-{:04}", self.lang, self.stage, n)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub issues_found: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub summary: Summary,
}

impl Report {
    pub fn new(findings: Vec<Finding>) -> Self {
        let issues_found = findings.len();
        Self {
            findings,
            summary: Summary { issues_found },
        }
    }
}

/// Accepts either bare-array or `{findings, summary}` shapes (spec.md §6).
pub fn parse_report(text: &str) -> crate::error::Result<Report> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.is_array() {
        let findings: Vec<Finding> = serde_json::from_value(value)?;
        Ok(Report::new(findings))
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_minter_is_monotonic_and_stable() {
        let minter = IdMinter::new("RS", "SRC");
        assert_eq!(minter.next(), "F-RS-SRC-0001");
        assert_eq!(minter.next(), "F-RS-SRC-0002");
        assert_eq!(minter.next(), "F-RS-SRC-0003");
    }

    #[test]
    fn confidence_orders_confirmed_below_needs_review() {
        assert!(Confidence::Confirmed < Confidence::Likely);
        assert!(Confidence::Likely < Confidence::NeedsReview);
    }

    #[test]
    fn parse_report_accepts_bare_array() {
        let json = r#"[]"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.findings.len(), 0);
    }

    #[test]
    fn parse_report_accepts_envelope() {
        let json = r#"{"findings": [], "summary": {"issues_found": 0}}"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.summary.issues_found, 0);
    }
}
