//! Shared sensitive-name and dangerous-API pattern composition.
//!
//! spec.md §9: "Implementers should compose the final pattern once per
//! analyzer run (not per line) and share it across detector functions."
//! `SensitivePattern` does exactly that: it is built once from a
//! sensitive-object descriptor list and handed to every detector in the
//! run.

use once_cell::sync::Lazy;
use regex::Regex;

/// Built-in default keywords (spec.md §3), used when the caller supplies no
/// sensitive-object descriptors at all.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "key", "secret", "password", "token", "nonce", "seed", "priv", "master", "credential",
];

/// A single sensitive-object descriptor supplied by the caller (spec.md §3:
/// "language tag; symbol or type name").
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SensitiveObject {
    pub language: String,
    pub name: String,
}

/// Case-insensitive matcher with word-boundary discipline: lowercase
/// keywords use a non-letter boundary that tolerates `_`/digits so
/// `secret_key`/`key_val` match while `monkey`/`tokenize` never do,
/// PascalCase type names use plain `\b` word boundaries.
pub struct SensitivePattern {
    regex: Regex,
}

impl SensitivePattern {
    /// Compose the pattern once from an optional descriptor list. An empty
    /// list falls back to `DEFAULT_KEYWORDS`.
    pub fn compose(objects: &[SensitiveObject]) -> Self {
        let mut keywords: Vec<String> = DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect();
        let mut type_names: Vec<String> = Vec::new();

        for obj in objects {
            let name = obj.name.trim();
            if name.is_empty() {
                continue;
            }
            if name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                type_names.push(regex::escape(name));
            } else {
                keywords.push(regex::escape(name));
            }
        }

        keywords.sort();
        keywords.dedup();
        type_names.sort();
        type_names.dedup();

        let regex = build_lookaround_free(&keywords, &type_names);
        Self { regex }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn find_names<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.regex
            .captures_iter(text)
            .filter_map(|c| c.name("kw").or_else(|| c.name("ty")))
            .map(|m| m.as_str())
            .collect()
    }
}

/// The `regex` crate has no lookaround support, so the word-boundary
/// discipline described in spec.md §3 cannot use `\b` for the lowercase
/// keyword set: `\b` treats `_` as a word character (same as Python's
/// `\w`), so `\bkey\b` does not match `key` inside `secret_key` even though
/// the original's lookaround (`(?<![a-zA-Z])...(?![a-zA-Z])`, which treats
/// only letters as "word") does. Since there is no lookahead either, the
/// boundary is built by literally consuming one non-letter (or the string
/// edge) on each side and capturing just the keyword in a named group:
/// `(?:^|[^A-Za-z])(?P<kw>key|secret|...)(?:$|[^A-Za-z])`. PascalCase type
/// names keep plain `\b(?:...)\b` since `_`-tolerance doesn't apply there.
fn build_lookaround_free(keywords: &[String], type_names: &[String]) -> Regex {
    let mut alts: Vec<String> = Vec::new();
    if !keywords.is_empty() {
        alts.push(format!(r"(?:^|[^A-Za-z])(?P<kw>{})(?:$|[^A-Za-z])", keywords.join("|")));
    }
    if !type_names.is_empty() {
        alts.push(format!(r"\b(?P<ty>{})\b", type_names.join("|")));
    }
    let full = format!(r"(?i)(?:{})", alts.join("|"));
    Regex::new(&full).expect("sensitive pattern is built from escaped literals")
}

/// A process-wide default instance for call sites that have no descriptor
/// list at all (e.g. the CFG analyzer, which takes no sensitive-objects
/// input per spec.md §6).
pub static DEFAULT_PATTERN: Lazy<SensitivePattern> = Lazy::new(|| SensitivePattern::compose(&[]));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_sensitive_keyword_with_boundary() {
        let p = SensitivePattern::compose(&[]);
        assert!(p.is_match("let secret_key = gen();"));
    }

    #[test]
    fn matches_keyword_inside_snake_case_identifier() {
        let p = SensitivePattern::compose(&[]);
        assert!(p.is_match("let key_val = load();"));
        assert!(p.is_match("let auth_token = issue();"));
    }

    #[test]
    fn does_not_match_substring_inside_unrelated_identifier() {
        let p = SensitivePattern::compose(&[]);
        assert!(!p.is_match("let monkey = 1;"));
        assert!(!p.is_match("fn tokenize() {}"));
    }

    #[test]
    fn matches_pascal_case_type_name() {
        let objects = vec![SensitiveObject {
            language: "rust".to_string(),
            name: "SecretKey".to_string(),
        }];
        let p = SensitivePattern::compose(&objects);
        assert!(p.is_match("drop_in_place<SecretKey>"));
    }
}
