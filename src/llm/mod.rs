//! Language-generation collaborator
//!
//! Classification, argument extraction, translation, summarisation and
//! general answers all go through [`LanguageModel::complete`]. The model may
//! decline with [`Completion::NoConfidentAnswer`], which callers treat
//! differently from an error.

pub mod gemini;

pub use gemini::GeminiClient;

use crate::error::OrchestrationError;
use crate::Result;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Sentinel the model is told to emit when it cannot answer.
pub const NO_CONFIDENT_ANSWER: &str = "NO_CONFIDENT_ANSWER";

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Structured(Value),
    NoConfidentAnswer,
}

impl Completion {
    /// Text of the answer, if any.
    pub fn into_text(self) -> Option<String> {
        match self {
            Completion::Text(text) => Some(text),
            Completion::Structured(value) => Some(value.to_string()),
            Completion::NoConfidentAnswer => None,
        }
    }

    /// JSON payload of the answer, parsing text replies if necessary.
    pub fn into_json(self) -> Result<Option<Value>> {
        match self {
            Completion::Structured(value) => Ok(Some(value)),
            Completion::Text(text) => parse_json_response(&text).map(Some),
            Completion::NoConfidentAnswer => Ok(None),
        }
    }
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`. When `schema` is given the answer must be JSON
    /// conforming to it.
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<Completion>;
}

/// Strip ```json fences and parse.
pub fn parse_json_response(response: &str) -> Result<Value> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| {
        OrchestrationError::LlmError(format!(
            "Failed to parse model JSON response: {} | raw={}",
            e, response
        ))
    })
}

/// Run an external call under a sub-timeout.
pub async fn bounded<T, F>(label: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestrationError::Timeout(format!(
            "{} exceeded {} ms",
            label,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_response_strips_fences() {
        let raw = "```json\n{\"tool\": \"web_research\"}\n```";
        assert_eq!(parse_json_response(raw).unwrap(), json!({"tool": "web_research"}));
        assert!(parse_json_response("not json").is_err());
    }

    #[test]
    fn test_completion_into_json() {
        let text = Completion::Text("{\"a\": 1}".to_string());
        assert_eq!(text.into_json().unwrap(), Some(json!({"a": 1})));
        assert_eq!(Completion::NoConfidentAnswer.into_json().unwrap(), None);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        };
        let result = bounded("slow call", Duration::from_millis(10), slow).await;
        assert!(matches!(result, Err(OrchestrationError::Timeout(_))));

        let fast = bounded("fast call", Duration::from_millis(200), async { Ok(7) }).await;
        tokio_test::assert_ok!(fast);
    }
}
