use crate::error::{AnalysisError, Result};
use crate::llm::assistant::DEFAULT_HISTORY_LIMIT;
use crate::llm::extractor::FallbackPolicy;
use crate::reconciler::CascadePolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Conversation turns sent with each feedback message.
    pub history_limit: usize,
    pub extraction_fallback: FallbackPolicy,
    /// Use the canned narrative when narrative generation fails.
    pub narrative_fallback: bool,
    pub cascade: CascadePolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            extraction_fallback: FallbackPolicy::StaticData,
            narrative_fallback: true,
            cascade: CascadePolicy::Minimal,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AnalysisError::InvalidConfig(format!("{} has invalid value '{}'", name, raw)))
}

impl AnalyzerConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            config.api_key = Some(key.trim().to_string());
        }
        if let Some(model) = lookup("ANALYZER_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(raw) = lookup("ANALYZER_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_var("ANALYZER_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ANALYZER_HISTORY_LIMIT") {
            config.history_limit = parse_var("ANALYZER_HISTORY_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("ANALYZER_EXTRACTION_FALLBACK") {
            config.extraction_fallback = match raw.trim().to_lowercase().as_str() {
                "static" | "static_data" => FallbackPolicy::StaticData,
                "surface" | "error" => FallbackPolicy::Surface,
                _ => {
                    return Err(AnalysisError::InvalidConfig(format!(
                        "ANALYZER_EXTRACTION_FALLBACK must be 'static_data' or 'surface', got '{}'",
                        raw
                    )))
                }
            };
        }
        if let Some(raw) = lookup("ANALYZER_CASCADE") {
            config.cascade = match raw.trim().to_lowercase().as_str() {
                "minimal" => CascadePolicy::Minimal,
                "full" => CascadePolicy::Full,
                _ => {
                    return Err(AnalysisError::InvalidConfig(format!(
                        "ANALYZER_CASCADE must be 'minimal' or 'full', got '{}'",
                        raw
                    )))
                }
            };
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AnalyzerConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.history_limit, 10);
        assert!(config.narrative_fallback);
    }

    #[test]
    fn test_overrides() {
        let config = AnalyzerConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", " abc "),
            ("ANALYZER_MODEL", "gemini-2.5-pro"),
            ("ANALYZER_TIMEOUT_SECS", "30"),
            ("ANALYZER_HISTORY_LIMIT", "4"),
            ("ANALYZER_EXTRACTION_FALLBACK", "Surface"),
            ("ANALYZER_CASCADE", "full"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.history_limit, 4);
        assert_eq!(config.extraction_fallback, FallbackPolicy::Surface);
        assert_eq!(config.cascade, CascadePolicy::Full);
    }

    #[test]
    fn test_invalid_values() {
        let err = AnalyzerConfig::from_lookup(lookup(&[("ANALYZER_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
        let err = AnalyzerConfig::from_lookup(lookup(&[("ANALYZER_CASCADE", "all")])).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn test_deserialize_partial_and_hide_key() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"history_limit": 6, "cascade": "full", "api_key": "k"}"#).unwrap();
        assert_eq!(config.history_limit, 6);
        assert_eq!(config.cascade, CascadePolicy::Full);
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);

        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("api_key").is_none());
    }
}
