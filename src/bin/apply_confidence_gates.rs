//! Evidence merger / confidence gate CLI (spec.md §4.7).

use std::env;
use std::process::ExitCode;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::parse_report;
use zeroize_audit::gate;

fn main() -> ExitCode {
    println!("🔍 zeroize-audit confidence gate");

    let args: Vec<String> = env::args().collect();
    let report_path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: apply_confidence_gates <report.json> [--mcp-available] [--require-mcp-for-advanced]");
            return ExitCode::from(2);
        }
    };

    let mcp_available = args.iter().any(|a| a == "--mcp-available");
    let require_mcp_for_advanced = args.iter().any(|a| a == "--require-mcp-for-advanced");

    let text = match std::fs::read_to_string(report_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {}", AnalyzerError::io(report_path.as_str(), e));
            return ExitCode::from(1);
        }
    };

    let report = match parse_report(&text) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(1);
        }
    };

    let gated = gate::apply_gates(report, mcp_available, require_mcp_for_advanced);
    println!("{}", serde_json::to_string_pretty(&gated).unwrap());
    eprintln!("✅ {} finding(s) after gating", gated.summary.issues_found);
    ExitCode::SUCCESS
}
