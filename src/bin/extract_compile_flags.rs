//! Compile-flag extraction CLI (spec.md §4.8, SPEC_FULL.md §7).

use std::env;
use std::path::Path;
use std::process::ExitCode;
use zeroize_audit::compile_flags;
use zeroize_audit::error::AnalyzerError;

fn main() -> ExitCode {
    println!("🔍 zeroize-audit compile-flag extractor");

    let args: Vec<String> = env::args().collect();
    let (db_path, src) = match (args.get(1), args.get(2)) {
        (Some(db), Some(src)) => (db, src),
        _ => {
            eprintln!("usage: extract_compile_flags <compile_commands.json> <source_file> [working_dir]");
            return ExitCode::from(2);
        }
    };
    let working_dir = args.get(3).map(|s| s.as_str());

    match compile_flags::extract_for_source(Path::new(db_path), src, working_dir) {
        Ok(flags) => {
            println!("{}", serde_json::to_string_pretty(&flags).unwrap());
            eprintln!("✅ {} flag(s)", flags.len());
            ExitCode::SUCCESS
        }
        Err(AnalyzerError::NotFound { what }) => {
            eprintln!("❌ {}", what);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::from(1)
        }
    }
}
