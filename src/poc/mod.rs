//! PoC synthesis engine (spec.md §4.8).

pub mod generators;

use crate::config::PocConfig;
use crate::finding::{Confidence, Finding};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const EXPLOITABLE_CATEGORIES: &[&str] = &[
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
];

pub struct FilterOptions<'a> {
    pub categories: Option<&'a [String]>,
    pub min_confidence: Option<Confidence>,
    pub no_confidence_filter: bool,
}

/// Filter findings to the eleven exploitable categories, optionally to a
/// caller-requested subset, and optionally by minimum confidence where
/// "minimum" means threshold-or-better (spec.md §4.8).
pub fn select_findings<'a>(findings: &'a [Finding], opts: &FilterOptions) -> Vec<&'a Finding> {
    let exploitable: BTreeSet<&str> = EXPLOITABLE_CATEGORIES.iter().copied().collect();

    findings
        .iter()
        .filter(|f| exploitable.contains(f.category.as_str()))
        .filter(|f| match opts.categories {
            Some(cats) => cats.iter().any(|c| c == f.category.as_str()),
            None => true,
        })
        .filter(|f| {
            if opts.no_confidence_filter {
                return true;
            }
            match opts.min_confidence {
                Some(min) => f.confidence >= min,
                None => true,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub finding_id: String,
    pub category: String,
    pub c_file: String,
    pub binary: String,
    pub opt_level: String,
    pub requires_manual_adjustment: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// Write `poc_common.h`, one generated `.c` per finding, a Makefile, and
/// `poc_manifest.json` into `out_dir` (spec.md §4.8).
pub fn synthesize(findings: &[&Finding], out_dir: &Path, config: &PocConfig) -> crate::error::Result<Manifest> {
    fs::create_dir_all(out_dir).map_err(|e| crate::error::AnalyzerError::io(out_dir, e))?;
    fs::write(out_dir.join("poc_common.h"), generators::common_header(config))
        .map_err(|e| crate::error::AnalyzerError::io(out_dir, e))?;

    let mut entries = Vec::new();
    let mut makefile_rules = String::new();
    let mut binaries = Vec::new();

    for (idx, finding) in findings.iter().enumerate() {
        let gen = generators::generator_for(finding.category.as_str());
        let unit = gen.generate(finding, config, idx);

        let c_path = out_dir.join(&unit.c_filename);
        fs::write(&c_path, &unit.c_source).map_err(|e| crate::error::AnalyzerError::io(&c_path, e))?;

        makefile_rules.push_str(&format!(
            "{bin}: {src}\n\t$(CC) {opt} -o {bin} {src}\n\n",
            bin = unit.binary_name,
            src = unit.c_filename,
            opt = unit.opt_level,
        ));
        binaries.push(unit.binary_name.clone());

        entries.push(ManifestEntry {
            finding_id: finding.id.clone(),
            category: finding.category.as_str().to_string(),
            c_file: unit.c_filename,
            binary: unit.binary_name,
            opt_level: unit.opt_level,
            requires_manual_adjustment: unit.requires_manual_adjustment,
        });
    }

    let makefile = build_makefile(&binaries, &makefile_rules);
    fs::write(out_dir.join("Makefile"), makefile).map_err(|e| crate::error::AnalyzerError::io(out_dir, e))?;

    let manifest = Manifest { entries };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    fs::write(out_dir.join("poc_manifest.json"), manifest_json).map_err(|e| crate::error::AnalyzerError::io(out_dir, e))?;

    Ok(manifest)
}

fn build_makefile(binaries: &[String], rules: &str) -> String {
    let all = binaries.join(" ");
    let run_lines: String = binaries
        .iter()
        .map(|b| format!("\t@./{b} >/dev/null 2>&1 && echo \"RESULT: EXPLOITABLE ({b})\" || echo \"RESULT: NOT EXPLOITABLE ({b})\"\n", b = b))
        .collect();
    format!(
        "CC ?= cc\nall: {all}\n\n{rules}\nrun: {all}\n{run}\n.PHONY: all run\n",
        all = all,
        rules = rules,
        run = run_lines,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Category, Evidence, EvidenceSource, Location, Severity};

    fn finding(category: Category, confidence: Confidence) -> Finding {
        Finding {
            id: "F-RS-POC-0001".to_string(),
            category,
            severity: Severity::High,
            confidence,
            symbol: "f".to_string(),
            location: Location::file_level("f.rs"),
            detail: "64 bytes frame".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::Asm, "64 bytes frame".to_string())],
            needs_review: false,
            compiler_evidence: None,
        }
    }

    #[test]
    fn excludes_meta_categories() {
        let findings = vec![finding(Category::AnalysisSkipped, Confidence::Confirmed)];
        let opts = FilterOptions {
            categories: None,
            min_confidence: None,
            no_confidence_filter: false,
        };
        assert!(select_findings(&findings, &opts).is_empty());
    }

    #[test]
    fn min_confidence_is_threshold_or_better() {
        let findings = vec![
            finding(Category::StackRetention, Confidence::Confirmed),
            finding(Category::StackRetention, Confidence::NeedsReview),
        ];
        let opts = FilterOptions {
            categories: None,
            min_confidence: Some(Confidence::Likely),
            no_confidence_filter: false,
        };
        let selected = select_findings(&findings, &opts);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].confidence, Confidence::NeedsReview);
    }

    #[test]
    fn no_confidence_filter_override_disables_filtering() {
        let findings = vec![finding(Category::StackRetention, Confidence::Confirmed)];
        let opts = FilterOptions {
            categories: None,
            min_confidence: Some(Confidence::NeedsReview),
            no_confidence_filter: true,
        };
        assert_eq!(select_findings(&findings, &opts).len(), 1);
    }
}
