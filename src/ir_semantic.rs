//! Semantic LLVM IR analyzer (spec.md §4.3).
//!
//! Line-oriented parser that materializes functions -> basic blocks ->
//! instructions, then derives memory-operation counts and detects unrolled
//! wipe loops.

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub line_num: u32,
    pub opcode: String,
    pub operands: Vec<String>,
    pub result: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<String>,
    pub predecessors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IrFunction {
    pub name: String,
    pub blocks: BTreeMap<String, BasicBlock>,
    pub block_order: Vec<String>,
}

static RE_DEFINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^define\s.*@([A-Za-z0-9_.$]+)\s*\(").unwrap());
static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9_.$]+):\s*(;.*)?$").unwrap());
static RE_WIPE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(explicit_bzero|OPENSSL_cleanse|sodium_memzero|zeroize)\b").unwrap());
static RE_MEMSET: Lazy<Regex> = Lazy::new(|| Regex::new(r"llvm\.memset(\.p0i8\.i\d+)?").unwrap());
static RE_MEMCPY: Lazy<Regex> = Lazy::new(|| Regex::new(r"llvm\.memcpy").unwrap());
static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*br\s").unwrap());
static RE_BR_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"label\s+%([A-Za-z0-9_.$]+)").unwrap());
static RE_SWITCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*switch\s").unwrap());
static RE_STORE_ZERO_SEQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^store\s+i\d+\s+0,\s+\S*?([A-Za-z_][A-Za-z0-9_]*?)(\d+)\b").unwrap());

fn tokenize_operands(rest: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    for ch in rest.chars() {
        match ch {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                cur.push(ch);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                cur.push(ch);
            }
            ',' if depth == 0 => {
                let t = cur.trim().to_string();
                if !t.is_empty() {
                    operands.push(t);
                }
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    let t = cur.trim().to_string();
    if !t.is_empty() {
        operands.push(t);
    }
    operands
}

fn parse_instruction(lineno: u32, raw: &str) -> Instruction {
    let trimmed = raw.trim();
    let (result, remainder) = match trimmed.split_once('=') {
        Some((lhs, rhs)) if lhs.trim_start().starts_with('%') => (Some(lhs.trim().to_string()), rhs.trim()),
        _ => (None, trimmed),
    };
    let mut parts = remainder.splitn(2, char::is_whitespace);
    let opcode = parts.next().unwrap_or("").to_string();
    let rest = parts.next().unwrap_or("");
    Instruction {
        line_num: lineno,
        opcode,
        operands: tokenize_operands(rest),
        result,
        raw: raw.to_string(),
    }
}

/// Parse one LLVM IR text module into functions/blocks/instructions.
pub fn parse_module(text: &str) -> Vec<IrFunction> {
    let mut functions = Vec::new();
    let mut current: Option<IrFunction> = None;
    let mut current_label = "entry".to_string();

    for (idx, raw) in text.lines().enumerate() {
        let lineno = (idx + 1) as u32;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = RE_DEFINE.captures(line) {
            if let Some(f) = current.take() {
                functions.push(f);
            }
            current = Some(IrFunction {
                name: caps.get(1).unwrap().as_str().to_string(),
                blocks: BTreeMap::new(),
                block_order: Vec::new(),
            });
            current_label = "entry".to_string();
            continue;
        }

        let Some(func) = current.as_mut() else { continue };

        if line == "}" {
            continue;
        }

        if let Some(caps) = RE_LABEL.captures(line) {
            if !line.contains('=') {
                current_label = caps.get(1).unwrap().as_str().to_string();
                func.blocks.entry(current_label.clone()).or_insert_with(|| BasicBlock {
                    label: current_label.clone(),
                    ..Default::default()
                });
                func.block_order.push(current_label.clone());
                continue;
            }
        }

        let block = func
            .blocks
            .entry(current_label.clone())
            .or_insert_with(|| BasicBlock {
                label: current_label.clone(),
                ..Default::default()
            });
        if !func.block_order.contains(&current_label) {
            func.block_order.push(current_label.clone());
        }

        let instr = parse_instruction(lineno, raw);

        if RE_BR.is_match(line) {
            for cap in RE_BR_LABEL.captures_iter(line) {
                block.successors.push(cap.get(1).unwrap().as_str().to_string());
            }
        } else if RE_SWITCH.is_match(line) {
            for cap in RE_BR_LABEL.captures_iter(line) {
                block.successors.push(cap.get(1).unwrap().as_str().to_string());
            }
        }

        block.instructions.push(instr);
    }

    if let Some(f) = current.take() {
        functions.push(f);
    }

    // Wire predecessors from successor lists.
    for func in functions.iter_mut() {
        let edges: Vec<(String, String)> = func
            .blocks
            .values()
            .flat_map(|b| b.successors.iter().map(move |s| (b.label.clone(), s.clone())))
            .collect();
        for (from, to) in edges {
            if let Some(b) = func.blocks.get_mut(&to) {
                b.predecessors.push(from);
            }
        }
    }

    functions
}

#[derive(Debug, Default)]
pub struct IrCounters {
    pub store_count: usize,
    pub load_count: usize,
    pub memset_count: usize,
    pub memset_volatile_count: usize,
    pub memcpy_count: usize,
    pub wipe_call_count: usize,
    pub volatile_store_count: usize,
    pub phi_count: usize,
    pub register_op_count: usize,
}

pub fn count_metrics(func: &IrFunction) -> IrCounters {
    let mut c = IrCounters::default();
    for block in func.blocks.values() {
        for instr in &block.instructions {
            match instr.opcode.as_str() {
                "store" => {
                    c.store_count += 1;
                    if instr.raw.contains("volatile") {
                        c.volatile_store_count += 1;
                    }
                }
                "load" => c.load_count += 1,
                "phi" => c.phi_count += 1,
                "add" | "sub" | "mul" | "and" | "or" | "xor" | "shl" | "lshr" | "ashr" => c.register_op_count += 1,
                "call" => {
                    if RE_MEMSET.is_match(&instr.raw) {
                        c.memset_count += 1;
                        if instr.raw.contains("volatile") {
                            c.memset_volatile_count += 1;
                        }
                    }
                    if RE_MEMCPY.is_match(&instr.raw) {
                        c.memcpy_count += 1;
                    }
                    if RE_WIPE_CALL.is_match(&instr.raw) {
                        c.wipe_call_count += 1;
                    }
                }
                _ => {}
            }
        }
    }
    c
}

/// Extract the "base<digits>" destination pattern used by unrolled-wipe
/// detection: same base name with a differing numeric suffix.
fn dest_base_and_suffix(operand: &str) -> Option<(String, u64)> {
    let caps = RE_STORE_ZERO_SEQ.captures(operand)?;
    let base = caps.get(1)?.as_str().to_string();
    let suffix: u64 = caps.get(2)?.as_str().parse().ok()?;
    Some((base, suffix))
}

/// Detect >= 4 consecutive `store` instructions of integer zero to a
/// sequentially-suffixed destination within one basic block (spec.md §4.3).
pub fn detect_unrolled_wipe(func: &IrFunction, path: &str, minter: &IdMinter) -> Vec<Finding> {
    let mut findings = Vec::new();

    for block in func.blocks.values() {
        let mut run_base: Option<String> = None;
        let mut run: Vec<&Instruction> = Vec::new();

        let mut flush = |run: &mut Vec<&Instruction>, findings: &mut Vec<Finding>| {
            if run.len() >= 4 {
                findings.push(Finding {
                    id: minter.next(),
                    category: Category::LoopUnrolledIncomplete,
                    severity: Severity::Info,
                    confidence: Confidence::Likely,
                    symbol: func.name.clone(),
                    location: Location::new(path, run[0].line_num),
                    detail: format!(
                        "{} consecutive zero-stores to a sequentially-named destination in block '{}'",
                        run.len(),
                        block.label
                    ),
                    evidence: vec![Evidence::new(
                        EvidenceSource::LlvmIr,
                        run.iter().map(|i| i.raw.trim().to_string()).collect::<Vec<_>>().join(" | "),
                    )],
                    needs_review: false,
                    compiler_evidence: None,
                });
            }
            run.clear();
        };

        for instr in &block.instructions {
            if instr.opcode != "store" {
                flush(&mut run, &mut findings);
                run_base = None;
                continue;
            }
            let dest = instr.operands.last().cloned().unwrap_or_default();
            match dest_base_and_suffix(&dest) {
                Some((base, _)) if run_base.as_deref() == Some(base.as_str()) || run.is_empty() => {
                    run_base = Some(base);
                    run.push(instr);
                }
                Some((base, _)) => {
                    flush(&mut run, &mut findings);
                    run_base = Some(base);
                    run.push(instr);
                }
                None => {
                    flush(&mut run, &mut findings);
                    run_base = None;
                }
            }
        }
        flush(&mut run, &mut findings);
    }

    findings
}

pub fn analyze(text: &str, path: &str) -> Vec<Finding> {
    let minter = IdMinter::new("IR", "SEM");
    let functions = parse_module(text);
    let mut findings = Vec::new();
    for func in &functions {
        findings.extend(detect_unrolled_wipe(func, path, &minter));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_header_and_blocks() {
        let ir = "define void @foo() {\nentry:\n  %1 = add i32 1, 2\n  ret void\n}\n";
        let funcs = parse_module(ir);
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "foo");
        assert!(funcs[0].blocks.contains_key("entry"));
    }

    #[test]
    fn counts_store_and_volatile() {
        let ir = "define void @foo() {\nentry:\n  store volatile i8 0, ptr %key\n  store i8 1, ptr %other\n  ret void\n}\n";
        let funcs = parse_module(ir);
        let counters = count_metrics(&funcs[0]);
        assert_eq!(counters.store_count, 2);
        assert_eq!(counters.volatile_store_count, 1);
    }

    #[test]
    fn detects_unrolled_wipe_sequence() {
        let ir = concat!(
            "define void @wipe() {\n",
            "entry:\n",
            "  store i8 0, ptr %buf0\n",
            "  store i8 0, ptr %buf1\n",
            "  store i8 0, ptr %buf2\n",
            "  store i8 0, ptr %buf3\n",
            "  ret void\n",
            "}\n"
        );
        let funcs = parse_module(ir);
        let minter = IdMinter::new("IR", "SEM");
        let findings = detect_unrolled_wipe(&funcs[0], "f.ll", &minter);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category.as_str(), "LOOP_UNROLLED_INCOMPLETE");
    }
}
