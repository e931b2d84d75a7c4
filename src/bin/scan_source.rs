//! Source scanner CLI (spec.md §4.1).

use std::env;
use std::path::Path;
use std::process::ExitCode;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::sensitive::{SensitiveObject, SensitivePattern};
use zeroize_audit::source_scan;

fn exit_code_for(err: &AnalyzerError) -> u8 {
    match err {
        AnalyzerError::Io { .. } => 1,
        AnalyzerError::NotFound { .. } | AnalyzerError::InvalidInput(_) => 2,
        AnalyzerError::Parse { .. } | AnalyzerError::Json(_) => 1,
    }
}

fn load_objects(path: &str) -> zeroize_audit::error::Result<Vec<SensitiveObject>> {
    let text = std::fs::read_to_string(path).map_err(|e| AnalyzerError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn main() -> ExitCode {
    println!("🔍 zeroize-audit source scanner");

    let args: Vec<String> = env::args().collect();
    let root = match args.get(1) {
        Some(r) => r,
        None => {
            eprintln!("usage: scan_source <root_dir> [sensitive_objects.json]");
            return ExitCode::from(2);
        }
    };

    let objects = match args.get(2) {
        Some(path) => match load_objects(path) {
            Ok(objs) => objs,
            Err(e) => {
                eprintln!("❌ {}", e);
                return ExitCode::from(exit_code_for(&e));
            }
        },
        None => Vec::new(),
    };

    let pattern = SensitivePattern::compose(&objects);

    match source_scan::scan_root(Path::new(root), &pattern) {
        Ok(findings) => {
            let report = zeroize_audit::finding::Report::new(findings);
            println!("{}", serde_json::to_string_pretty(&report).unwrap());
            eprintln!("✅ {} finding(s)", report.summary.issues_found);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
