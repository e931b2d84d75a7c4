//! MCP evidence normalizer CLI (spec.md §4.7).

use std::env;
use std::process::ExitCode;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::mcp;

fn main() -> ExitCode {
    println!("🔍 zeroize-audit MCP evidence normalizer");

    let args: Vec<String> = env::args().collect();
    let path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: normalize_mcp_evidence <raw_evidence.json>");
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

    let document: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("❌ {}", AnalyzerError::from(e));
            return ExitCode::from(1);
        }
    };

    let normalized = mcp::normalize(&document);
    println!("{}", serde_json::to_string_pretty(&normalized).unwrap());
    eprintln!(
        "✅ mcp_available={} evidence={}",
        normalized.mcp_available,
        normalized.evidence.len()
    );
    ExitCode::SUCCESS
}
