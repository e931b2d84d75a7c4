//! Assembly analyzer dispatch front end CLI (spec.md §4.6).

use std::env;
use std::process::ExitCode;
use zeroize_audit::asm;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::Report;
use zeroize_audit::sensitive::{SensitiveObject, SensitivePattern};

fn load_objects(path: &str) -> zeroize_audit::error::Result<Vec<SensitiveObject>> {
    let text = std::fs::read_to_string(path).map_err(|e| AnalyzerError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn main() -> ExitCode {
    println!("🔍 zeroize-audit assembly analyzer");

    let args: Vec<String> = env::args().collect();
    let path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: check_rust_asm <module.s> [sensitive_objects.json]");
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

    let objects = match args.get(2) {
        Some(p) => match load_objects(p) {
            Ok(objs) => objs,
            Err(e) => {
                eprintln!("❌ {}", e);
                return ExitCode::from(1);
            }
        },
        None => Vec::new(),
    };
    let pattern = SensitivePattern::compose(&objects);

    let findings = asm::analyze(&text, &pattern, path);
    let report = Report::new(findings);
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    eprintln!("✅ {} finding(s)", report.summary.issues_found);
    ExitCode::SUCCESS
}
