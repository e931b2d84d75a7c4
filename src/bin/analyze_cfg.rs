//! CFG + dominator analyzer CLI (spec.md §4.2).

use std::env;
use std::process::ExitCode;
use zeroize_audit::cfg;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::Report;
use zeroize_audit::sensitive::DEFAULT_PATTERN;

fn exit_code_for(err: &AnalyzerError) -> u8 {
    match err {
        AnalyzerError::Io { .. } => 1,
        _ => 2,
    }
}

fn main() -> ExitCode {
    println!("🔍 zeroize-audit CFG analyzer");

    let args: Vec<String> = env::args().collect();
    let path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: analyze_cfg <source_file.rs>");
            return ExitCode::from(2);
        }
    };

    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let err = AnalyzerError::io(path.as_str(), e);
            eprintln!("❌ {}", err);
            return ExitCode::from(exit_code_for(&err));
        }
    };

    let findings = cfg::analyze(&source, path, &DEFAULT_PATTERN);
    let report = Report::new(findings);
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    eprintln!("✅ {} finding(s)", report.summary.issues_found);
    ExitCode::SUCCESS
}
