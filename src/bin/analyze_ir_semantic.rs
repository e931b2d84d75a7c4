//! Semantic LLVM IR analyzer CLI (spec.md §4.3).

use std::env;
use std::process::ExitCode;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::Report;
use zeroize_audit::ir_semantic;

fn main() -> ExitCode {
    println!("🔍 zeroize-audit semantic IR analyzer");

    let args: Vec<String> = env::args().collect();
    let path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: analyze_ir_semantic <module.ll>");
            return ExitCode::from(2);
        }
    };

    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {}", AnalyzerError::io(path.as_str(), e));
            return ExitCode::from(1);
        }
    };

    let findings = ir_semantic::analyze(&text, path);
    let report = Report::new(findings);
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    eprintln!("✅ {} finding(s)", report.summary.issues_found);
    ExitCode::SUCCESS
}
