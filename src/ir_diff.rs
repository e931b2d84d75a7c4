//! IR-diff analyzer (spec.md §4.4): compares LLVM IR across optimization
//! levels and reports wipe operations that disappear under optimization.

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use crate::ir_semantic::{parse_module, IrFunction};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    pub fn label(&self) -> &'static str {
        match self {
            OptLevel::O0 => "O0",
            OptLevel::O1 => "O1",
            OptLevel::O2 => "O2",
            OptLevel::O3 => "O3",
        }
    }
}

pub const SECRET_ALLOCA_SIZES: &[u64] = &[16, 24, 32, 48, 64, 96, 128];

static RE_ALLOCA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(%[A-Za-z0-9_.]+)\s*=\s*alloca\s+\[(\d+)\s+x\s+i8\]").unwrap());
static RE_LIFETIME_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"llvm\.lifetime\.end.*?(%[A-Za-z0-9_.]+)").unwrap());
static RE_STORE_VOLATILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^store\s+volatile\s+\S+\s+\S+,\s+\S*?(%[A-Za-z0-9_.]+)").unwrap());
static RE_STORE_VOLATILE_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^store\s+volatile\s+\S+\s+(%[A-Za-z0-9_.]+),\s+\S*?(%[A-Za-z0-9_.]+)").unwrap()
});
static RE_MEMSET_NONVOLATILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"llvm\.memset").unwrap());
static RE_LOAD_SECRET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(%[A-Za-z0-9_.]+)\s*=\s*load\s").unwrap());
static RE_RET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ret\s+\S+\s+(%[A-Za-z0-9_.]+)").unwrap());
static RE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:%\S+\s*=\s*)?call\b").unwrap());
static RE_BYVAL_OR_AGG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}|\bbyval\b").unwrap());

#[derive(Debug, Default)]
pub struct FileMetrics {
    pub total_volatile_stores: usize,
    pub volatile_stores_by_symbol: BTreeMap<String, usize>,
    pub secret_sized_allocas: BTreeSet<String>,
    pub lifetime_ended_allocas: BTreeSet<String>,
    pub allocas_with_volatile_store: BTreeSet<String>,
    pub nonvolatile_memset_lines: Vec<u32>,
    pub secret_named_loads: BTreeMap<String, String>,
    pub secret_named_rets: Vec<(u32, String)>,
    pub call_with_secret_operand: Vec<(u32, String)>,
    pub aggregate_secret_calls: Vec<(u32, String)>,
}

fn sensitive(name: &str) -> bool {
    crate::sensitive::DEFAULT_PATTERN.is_match(name)
}

pub fn compute_metrics(text: &str) -> FileMetrics {
    let mut m = FileMetrics::default();
    let functions = parse_module(text);

    for func in &functions {
        // Reset per-function secret-SSA tracking to avoid cross-function
        // pollution (spec.md §4.4, §9).
        let mut local_secret_loads: BTreeMap<String, String> = BTreeMap::new();

        for block in func.blocks.values() {
            for instr in &block.instructions {
                let raw = instr.raw.trim();

                if let Some(caps) = RE_ALLOCA.captures(raw) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    let size: u64 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
                    if SECRET_ALLOCA_SIZES.contains(&size) {
                        m.secret_sized_allocas.insert(name);
                    }
                }

                if let Some(caps) = RE_LIFETIME_END.captures(raw) {
                    m.lifetime_ended_allocas.insert(caps.get(1).unwrap().as_str().to_string());
                }

                if let Some(caps) = RE_STORE_VOLATILE_NAMED.captures(raw) {
                    let dest = caps.get(2).unwrap().as_str().to_string();
                    m.total_volatile_stores += 1;
                    *m.volatile_stores_by_symbol.entry(dest.clone()).or_insert(0) += 1;
                    m.allocas_with_volatile_store.insert(dest);
                } else if RE_STORE_VOLATILE.is_match(raw) {
                    m.total_volatile_stores += 1;
                    if let Some(caps) = RE_STORE_VOLATILE.captures(raw) {
                        let dest = caps.get(1).unwrap().as_str().to_string();
                        m.allocas_with_volatile_store.insert(dest);
                    }
                }

                if RE_MEMSET_NONVOLATILE.is_match(raw) && !raw.contains("volatile") {
                    m.nonvolatile_memset_lines.push(instr.line_num);
                }

                if let Some(caps) = RE_LOAD_SECRET.captures(raw) {
                    let dest = caps.get(1).unwrap().as_str().to_string();
                    if sensitive(raw) {
                        local_secret_loads.insert(dest.clone(), raw.to_string());
                        m.secret_named_loads.insert(dest, raw.to_string());
                    }
                }

                if let Some(caps) = RE_RET.captures(raw) {
                    let val = caps.get(1).unwrap().as_str();
                    if local_secret_loads.contains_key(val) {
                        m.secret_named_rets.push((instr.line_num, raw.to_string()));
                    }
                }

                if RE_CALL.is_match(raw) {
                    for (ssa, _) in local_secret_loads.iter() {
                        if raw.contains(ssa.as_str()) && !crate::cfg::WIPE_CALLEES.iter().any(|w| raw.contains(w)) {
                            m.call_with_secret_operand.push((instr.line_num, raw.to_string()));
                        }
                    }
                    if RE_BYVAL_OR_AGG.is_match(raw) && sensitive(raw) {
                        m.aggregate_secret_calls.push((instr.line_num, raw.to_string()));
                    }
                }
            }
        }
    }

    m
}

pub struct DiffInput<'a> {
    pub level: OptLevel,
    pub text: &'a str,
}

/// Per-adjacent-pair de-duplicated comparison across O0..O3 (spec.md §4.4).
pub fn analyze(inputs: &[DiffInput]) -> Vec<Finding> {
    let minter = IdMinter::new("IR", "DIFF");
    let mut findings = Vec::new();

    let mut by_level: BTreeMap<OptLevel, FileMetrics> = BTreeMap::new();
    for input in inputs {
        by_level.insert(input.level, compute_metrics(input.text));
    }

    let o0 = by_level.get(&OptLevel::O0);
    let o2 = by_level.get(&OptLevel::O2);

    if let (Some(o0), Some(o2)) = (o0, o2) {
        emit_o0_o2_findings(o0, o2, &minter, &mut findings);
    }

    let has_o1 = by_level.contains_key(&OptLevel::O1);
    let mut already_emitted_symbols: BTreeSet<String> = BTreeSet::new();
    if let (Some(o0m), Some(o2m)) = (o0, o2) {
        for (sym, &o0_count) in &o0m.volatile_stores_by_symbol {
            let o2_count = o2m.volatile_stores_by_symbol.get(sym).copied().unwrap_or(0);
            if o0_count > o2_count {
                already_emitted_symbols.insert(sym.clone());
            }
        }
    }

    let levels: Vec<OptLevel> = by_level.keys().copied().collect();
    for pair in levels.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a == OptLevel::O0 && b == OptLevel::O2 && has_o1 {
            // covered directly by the O0->O2 comparison above
            continue;
        }
        let (ma, mb) = (by_level.get(&a).unwrap(), by_level.get(&b).unwrap());
        for (sym, &a_count) in &ma.volatile_stores_by_symbol {
            if already_emitted_symbols.contains(sym) {
                continue;
            }
            let b_count = mb.volatile_stores_by_symbol.get(sym).copied().unwrap_or(0);
            if a_count > b_count {
                findings.push(Finding {
                    id: minter.next(),
                    category: Category::OptimizedAwayZeroize,
                    severity: Severity::High,
                    confidence: Confidence::Likely,
                    symbol: sym.clone(),
                    location: Location::file_level(""),
                    detail: format!(
                        "volatile stores to {} drop from {} at {} to {} at {}",
                        sym,
                        a_count,
                        a.label(),
                        b_count,
                        b.label()
                    ),
                    evidence: vec![Evidence::new(
                        EvidenceSource::IrDiff,
                        format!("{}: {} -> {}: {}", a.label(), a_count, b.label(), b_count),
                    )],
                    needs_review: false,
                    compiler_evidence: Some(serde_json::json!({"o0": a_count, "o2": b_count})),
                });
            }
        }
    }

    findings
}

fn emit_o0_o2_findings(o0: &FileMetrics, o2: &FileMetrics, minter: &IdMinter, out: &mut Vec<Finding>) {
    if o0.total_volatile_stores > o2.total_volatile_stores {
        out.push(Finding {
            id: minter.next(),
            category: Category::OptimizedAwayZeroize,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: String::new(),
            location: Location::file_level(""),
            detail: format!(
                "total volatile stores drop from {} at O0 to {} at O2",
                o0.total_volatile_stores, o2.total_volatile_stores
            ),
            evidence: vec![Evidence::new(
                EvidenceSource::IrDiff,
                format!("{} -> {}", o0.total_volatile_stores, o2.total_volatile_stores),
            )],
            needs_review: false,
            compiler_evidence: Some(serde_json::json!({
                "o0": o0.total_volatile_stores,
                "o2": o2.total_volatile_stores,
                "diff_summary": "total volatile store count decreased"
            })),
        });
    }

    for (sym, &o0_count) in &o0.volatile_stores_by_symbol {
        let o2_count = o2.volatile_stores_by_symbol.get(sym).copied().unwrap_or(0);
        if o0_count > o2_count {
            out.push(Finding {
                id: minter.next(),
                category: Category::OptimizedAwayZeroize,
                severity: Severity::High,
                confidence: Confidence::Likely,
                symbol: sym.clone(),
                location: Location::file_level(""),
                detail: format!("volatile stores to {}: {} at O0 -> {} at O2", sym, o0_count, o2_count),
                evidence: vec![Evidence::new(EvidenceSource::IrDiff, format!("{}: {} -> {}", sym, o0_count, o2_count))],
                needs_review: false,
                compiler_evidence: Some(serde_json::json!({"o0": o0_count, "o2": o2_count})),
            });
        }
    }

    for &line in &o2.nonvolatile_memset_lines {
        out.push(Finding {
            id: minter.next(),
            category: Category::OptimizedAwayZeroize,
            severity: Severity::High,
            confidence: Confidence::Likely,
            symbol: String::new(),
            location: Location::new("", line),
            detail: "O2 contains a non-volatile llvm.memset call".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::IrDiff, format!("line {}", line))],
            needs_review: false,
            compiler_evidence: Some(serde_json::json!({"o2": true})),
        });
    }

    for alloca in &o2.lifetime_ended_allocas {
        if !o2.allocas_with_volatile_store.contains(alloca) && o2.secret_sized_allocas.contains(alloca) {
            out.push(Finding {
                id: minter.next(),
                category: Category::StackRetention,
                severity: Severity::High,
                confidence: Confidence::Likely,
                symbol: alloca.clone(),
                location: Location::file_level(""),
                detail: format!("{} reaches llvm.lifetime.end with no volatile store at O2", alloca),
                evidence: vec![Evidence::new(EvidenceSource::IrDiff, alloca.clone())],
                needs_review: false,
                compiler_evidence: None,
            });
        }
    }

    for alloca in &o0.secret_sized_allocas {
        if o0.allocas_with_volatile_store.contains(alloca) && !o2.allocas_with_volatile_store.contains(alloca) {
            out.push(Finding {
                id: minter.next(),
                category: Category::OptimizedAwayZeroize,
                severity: Severity::High,
                confidence: Confidence::Likely,
                symbol: alloca.clone(),
                location: Location::file_level(""),
                detail: format!("{} volatile-stored at O0, wipe absent at O2", alloca),
                evidence: vec![Evidence::new(EvidenceSource::IrDiff, alloca.clone())],
                needs_review: false,
                compiler_evidence: Some(serde_json::json!({"o0": true, "o2": false})),
            });
        }
    }

    for (line, raw) in &o2.call_with_secret_operand {
        out.push(Finding {
            id: minter.next(),
            category: Category::RegisterSpill,
            severity: Severity::Medium,
            confidence: Confidence::Likely,
            symbol: String::new(),
            location: Location::new("", *line),
            detail: "secret-named SSA value passed directly to a non-wipe call".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::IrDiff, raw.clone())],
            needs_review: false,
            compiler_evidence: None,
        });
    }

    for (line, raw) in &o2.secret_named_rets {
        out.push(Finding {
            id: minter.next(),
            category: Category::RegisterSpill,
            severity: Severity::Medium,
            confidence: Confidence::Likely,
            symbol: String::new(),
            location: Location::new("", *line),
            detail: "ret instruction returns a secret-named SSA value".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::IrDiff, raw.clone())],
            needs_review: false,
            compiler_evidence: None,
        });
    }

    for (line, raw) in &o2.aggregate_secret_calls {
        out.push(Finding {
            id: minter.next(),
            category: Category::SecretCopy,
            severity: Severity::Medium,
            confidence: Confidence::Likely,
            symbol: String::new(),
            location: Location::new("", *line),
            detail: "call-site argument aggregates or byval-passes a secret-named operand".to_string(),
            evidence: vec![Evidence::new(EvidenceSource::IrDiff, raw.clone())],
            needs_review: false,
            compiler_evidence: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_b_volatile_stores_disappear_under_o2() {
        let mut o0 = String::from("define void @f() {\nentry:\n");
        for _ in 0..32 {
            o0.push_str("  store volatile i8 0, ptr %key\n");
        }
        o0.push_str("  ret void\n}\n");
        let o2 = "define void @f() {\nentry:\n  ret void\n}\n";

        let inputs = vec![
            DiffInput { level: OptLevel::O0, text: &o0 },
            DiffInput { level: OptLevel::O2, text: o2 },
        ];
        let findings = analyze(&inputs);
        assert!(findings.iter().any(|f| f.category.as_str() == "OPTIMIZED_AWAY_ZEROIZE"
            && f.detail.contains("total")));
        assert!(findings
            .iter()
            .any(|f| f.category.as_str() == "OPTIMIZED_AWAY_ZEROIZE" && f.symbol == "%key"));
    }

    #[test]
    fn identical_o0_o2_yields_zero_findings() {
        let text = "define void @f() {\nentry:\n  ret void\n}\n";
        let inputs = vec![
            DiffInput { level: OptLevel::O0, text },
            DiffInput { level: OptLevel::O2, text },
        ];
        assert!(analyze(&inputs).is_empty());
    }
}
