//! IR-diff analyzer CLI (spec.md §4.4).
//!
//! usage: check_llvm_patterns --o0 <file> [--o1 <file>] [--o2 <file>] [--o3 <file>]

use std::env;
use std::process::ExitCode;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::Report;
use zeroize_audit::ir_diff::{self, DiffInput, OptLevel};

fn parse_args(args: &[String]) -> Vec<(OptLevel, String)> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let level = match args[i].as_str() {
            "--o0" => Some(OptLevel::O0),
            "--o1" => Some(OptLevel::O1),
            "--o2" => Some(OptLevel::O2),
            "--o3" => Some(OptLevel::O3),
            _ => None,
        };
        if let (Some(level), Some(path)) = (level, args.get(i + 1)) {
            pairs.push((level, path.clone()));
            i += 2;
        } else {
            i += 1;
        }
    }
    pairs
}

fn main() -> ExitCode {
    println!("🔍 zeroize-audit IR-diff analyzer");

    let args: Vec<String> = env::args().skip(1).collect();
    let pairs = parse_args(&args);
    if pairs.is_empty() {
        eprintln!("usage: check_llvm_patterns --o0 <file> [--o1 <file>] [--o2 <file>] [--o3 <file>]");
        return ExitCode::from(2);
    }

    let mut texts = Vec::new();
    for (level, path) in &pairs {
        match std::fs::read_to_string(path) {
            Ok(text) => texts.push((*level, text)),
            Err(e) => {
                eprintln!("❌ {}", AnalyzerError::io(path.as_str(), e));
                return ExitCode::from(1);
            }
        }
    }

    let inputs: Vec<DiffInput> = texts.iter().map(|(level, text)| DiffInput { level: *level, text }).collect();
    let findings = ir_diff::analyze(&inputs);
    let report = Report::new(findings);
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    eprintln!("✅ {} finding(s)", report.summary.issues_found);
    ExitCode::SUCCESS
}
