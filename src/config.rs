//! Runtime configuration
//!
//! Every tunable threshold lives here with its default. `from_env` lets a
//! deployment override any of them; call `dotenv::dotenv()` first to pick up
//! a local `.env` file.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Language used internally for classification and extraction.
pub const WORKING_LANGUAGE: &str = "en";

/// How to order trend analysis against comparative analysis when both
/// clear the confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonPolicy {
    /// Comparison first once at least `min_documents` documents are ready.
    DocumentCount { min_documents: usize },
    /// Plain score order.
    Score,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        ComparisonPolicy::DocumentCount { min_documents: 2 }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum score a specialised tool needs to be considered (0.5)
    pub confidence_threshold: f32,
    /// Messages loaded with the session per turn (20)
    pub history_window: usize,
    /// Messages condensed into model prompts (5)
    pub prompt_history_messages: usize,
    /// Per-message truncation inside prompts (200 chars)
    pub prompt_message_chars: usize,
    /// Retries granted to the top intent (1)
    pub max_tool_retries: u32,
    /// Budget for one whole request (45s)
    pub request_timeout: Duration,
    /// Budget for one external call (15s)
    pub call_timeout: Duration,
    /// Below this, detection falls back to the session language (0.6)
    pub detection_confidence_floor: f32,
    /// Language for brand-new sessions when detection is unsure ("en")
    pub default_language: String,
    /// Characters of a fetched page handed to the model (4000)
    pub web_content_limit: usize,
    /// Characters of a document handed to the summarizer (30000)
    pub summary_input_limit: usize,
    pub comparison_policy: ComparisonPolicy,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub document_service_url: Option<String>,
    pub database_url: Option<String>,
    pub chart_dir: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            history_window: 20,
            prompt_history_messages: 5,
            prompt_message_chars: 200,
            max_tool_retries: 1,
            request_timeout: Duration::from_secs(45),
            call_timeout: Duration::from_secs(15),
            detection_confidence_floor: 0.6,
            default_language: WORKING_LANGUAGE.to_string(),
            web_content_limit: 4000,
            summary_input_limit: 30_000,
            comparison_policy: ComparisonPolicy::default(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            document_service_url: None,
            database_url: None,
            chart_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var::<f32>("CLASSIFIER_CONFIDENCE_THRESHOLD")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(OrchestrationError::ConfigError(format!(
                    "CLASSIFIER_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                    v
                )));
            }
            config.confidence_threshold = v;
        }
        if let Some(v) = parse_var("HISTORY_WINDOW")? {
            config.history_window = v;
        }
        if let Some(v) = parse_var("PROMPT_HISTORY_MESSAGES")? {
            config.prompt_history_messages = v;
        }
        if let Some(v) = parse_var("PROMPT_MESSAGE_CHARS")? {
            config.prompt_message_chars = v;
        }
        if let Some(v) = parse_var("MAX_TOOL_RETRIES")? {
            config.max_tool_retries = v;
        }
        if let Some(v) = parse_var("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var("CALL_TIMEOUT_SECS")? {
            config.call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var("DETECTION_CONFIDENCE_FLOOR")? {
            config.detection_confidence_floor = v;
        }
        if let Some(v) = non_empty_var("DEFAULT_LANGUAGE") {
            config.default_language = v.to_lowercase();
        }
        if let Some(v) = parse_var("WEB_CONTENT_LIMIT")? {
            config.web_content_limit = v;
        }
        if let Some(v) = parse_var("SUMMARY_INPUT_LIMIT")? {
            config.summary_input_limit = v;
        }

        let min_documents = parse_var("COMPARISON_MIN_DOCUMENTS")?.unwrap_or(2);
        config.comparison_policy = match non_empty_var("COMPARISON_POLICY").as_deref() {
            None | Some("document_count") => ComparisonPolicy::DocumentCount { min_documents },
            Some("score") => ComparisonPolicy::Score,
            Some(other) => {
                return Err(OrchestrationError::ConfigError(format!(
                    "Unknown COMPARISON_POLICY: {}",
                    other
                )))
            }
        };

        config.gemini_api_key = non_empty_var("GEMINI_API_KEY");
        if let Some(model) = non_empty_var("GEMINI_MODEL") {
            config.gemini_model = model;
        }
        config.document_service_url = non_empty_var("DOCUMENT_SERVICE_URL");
        config.database_url =
            non_empty_var("DATABASE_URL").or_else(|| non_empty_var("POSTGRES_URL"));
        config.chart_dir = non_empty_var("CHART_DIR");

        if config.request_timeout < config.call_timeout {
            return Err(OrchestrationError::ConfigError(
                "REQUEST_TIMEOUT_SECS must not be shorter than CALL_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            OrchestrationError::ConfigError(format!("{}={} is invalid: {}", name, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.max_tool_retries, 1);
        assert_eq!(config.default_language, "en");
        assert_eq!(
            config.comparison_policy,
            ComparisonPolicy::DocumentCount { min_documents: 2 }
        );
        assert!(config.request_timeout > config.call_timeout);
    }

    #[test]
    fn test_parse_var_reports_bad_values() {
        env::set_var("FCO_TEST_BAD_NUMBER", "twelve");
        let parsed: Result<Option<usize>> = parse_var("FCO_TEST_BAD_NUMBER");
        assert!(matches!(parsed, Err(OrchestrationError::ConfigError(_))));
        env::remove_var("FCO_TEST_BAD_NUMBER");

        let missing: Option<usize> = parse_var("FCO_TEST_UNSET_VARIABLE").unwrap();
        assert!(missing.is_none());
    }
}
