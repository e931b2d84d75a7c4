//! PoC synthesis engine CLI (spec.md §4.8).

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zeroize_audit::config::PocConfig;
use zeroize_audit::error::AnalyzerError;
use zeroize_audit::finding::{parse_report, Confidence};
use zeroize_audit::poc::{self, FilterOptions};

fn load_config(path: Option<&str>) -> PocConfig {
    match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(text) => PocConfig::from_toml(&text).unwrap_or_default(),
            Err(_) => PocConfig::default(),
        },
        None => PocConfig::default(),
    }
}

fn main() -> ExitCode {
    println!("🚀 zeroize-audit PoC synthesizer");

    let args: Vec<String> = env::args().collect();
    let report_path = match args.get(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: generate_poc <report.json> <out_dir> [--config poc_config.toml] [--no-confidence-filter]");
            return ExitCode::from(2);
        }
    };
    let out_dir = match args.get(2) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: generate_poc <report.json> <out_dir> [--config poc_config.toml] [--no-confidence-filter]");
            return ExitCode::from(2);
        }
    };

    let config_path = args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1)).map(|s| s.as_str());
    let no_confidence_filter = args.iter().any(|a| a == "--no-confidence-filter");

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

    let config = load_config(config_path);
    let min_confidence = Confidence::parse(&config.min_confidence);

    let opts = FilterOptions {
        categories: None,
        min_confidence,
        no_confidence_filter,
    };
    let selected = poc::select_findings(&report.findings, &opts);

    if selected.is_empty() {
        eprintln!("❌ no exploitable findings selected");
        return ExitCode::from(2);
    }

    match poc::synthesize(&selected, Path::new(&out_dir), &config) {
        Ok(manifest) => {
            println!("{}", serde_json::to_string_pretty(&manifest).unwrap());
            eprintln!("✅ synthesized {} PoC(s) in {}", manifest.entries.len(), out_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::from(3)
        }
    }
}
