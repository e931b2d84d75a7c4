//! MCP evidence normalizer (spec.md §4.7): accepts either a top-level list
//! or a `{results: [...]}` object and normalizes each item.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvidence {
    pub file: String,
    pub line: u32,
    pub symbol: String,
    pub kind: String,
    pub detail: String,
    pub source: String,
    pub confidence: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNormalized {
    pub mcp_available: bool,
    pub evidence: Vec<NormalizedEvidence>,
    pub by_tool: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
}

fn coerce_line(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn string_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    obj.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

/// Normalize a single raw evidence item to the canonical shape, coercing
/// string line numbers and defaulting `confidence = medium`.
pub fn normalize_item(item: &serde_json::Value) -> Option<NormalizedEvidence> {
    let obj = item.as_object()?;
    let line = obj.get("line").map(coerce_line).unwrap_or(0);
    let confidence = obj
        .get("confidence")
        .and_then(|v| v.as_str())
        .unwrap_or("medium")
        .to_string();

    Some(NormalizedEvidence {
        file: string_field(obj, "file"),
        line,
        symbol: string_field(obj, "symbol"),
        kind: string_field(obj, "kind"),
        detail: string_field(obj, "detail"),
        source: string_field(obj, "source"),
        confidence,
        metadata: obj.get("metadata").cloned().unwrap_or(serde_json::Value::Null),
    })
}

/// Accepts either a top-level array or a `{results: [...]}` envelope.
pub fn normalize(document: &serde_json::Value) -> McpNormalized {
    let items: Vec<&serde_json::Value> = if let Some(arr) = document.as_array() {
        arr.iter().collect()
    } else if let Some(results) = document.get("results").and_then(|v| v.as_array()) {
        results.iter().collect()
    } else {
        Vec::new()
    };

    let mut evidence = Vec::new();
    let mut by_tool: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();

    for item in items {
        if let Some(normalized) = normalize_item(item) {
            *by_tool.entry(normalized.source.clone()).or_insert(0) += 1;
            *by_kind.entry(normalized.kind.clone()).or_insert(0) += 1;
            evidence.push(normalized);
        }
    }

    McpNormalized {
        mcp_available: !evidence.is_empty(),
        evidence,
        by_tool,
        by_kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_bare_array() {
        let doc = json!([{"file": "a.rs", "line": "12", "symbol": "s", "kind": "k", "source": "t"}]);
        let result = normalize(&doc);
        assert!(result.mcp_available);
        assert_eq!(result.evidence[0].line, 12);
        assert_eq!(result.evidence[0].confidence, "medium");
    }

    #[test]
    fn normalizes_results_envelope() {
        let doc = json!({"results": [{"file": "a.rs", "line": 5}]});
        let result = normalize(&doc);
        assert_eq!(result.evidence.len(), 1);
    }

    #[test]
    fn empty_input_is_mcp_unavailable() {
        let doc = json!([]);
        let result = normalize(&doc);
        assert!(!result.mcp_available);
    }
}
