use serde::{Deserialize, Serialize};

/// Mirrors the original `poc_generation.*` YAML keys (spec.md §6), loaded
/// from TOML instead of YAML since the teacher stack carries `toml` and no
/// YAML crate; see SPEC_FULL.md §4 for the rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PocConfig {
    pub min_confidence: String,
    pub secret_fill_byte: u8,
    pub stack_probe_max_size: usize,
    pub source_inclusion_threshold: usize,
}

impl Default for PocConfig {
    fn default() -> Self {
        Self {
            min_confidence: "likely".to_string(),
            secret_fill_byte: 0xAA,
            stack_probe_max_size: 4096,
            source_inclusion_threshold: 5000,
        }
    }
}

impl PocConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Wrapper {
            poc_generation: PocConfig,
        }
        let wrapper: Wrapper = toml::from_str(text)?;
        Ok(wrapper.poc_generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_python_defaults() {
        let c = PocConfig::default();
        assert_eq!(c.min_confidence, "likely");
        assert_eq!(c.secret_fill_byte, 0xAA);
        assert_eq!(c.stack_probe_max_size, 4096);
        assert_eq!(c.source_inclusion_threshold, 5000);
    }

    #[test]
    fn parses_partial_toml_with_defaults_for_the_rest() {
        let toml = "[poc_generation]\nsecret_fill_byte = 171\n";
        let c = PocConfig::from_toml(toml).unwrap();
        assert_eq!(c.secret_fill_byte, 171);
        assert_eq!(c.min_confidence, "likely");
    }
}
