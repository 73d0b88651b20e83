//! Gemini API client
//!
//! Implements [`LanguageModel`] over the `generateContent` REST endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{Completion, LanguageModel, NO_CONFIDENT_ANSWER};
use crate::error::OrchestrationError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Responses scoring below this are reported as not confident.
const MIN_CONFIDENCE: f32 = 0.55;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent?key={}", BASE_URL, self.model, self.api_key)
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> crate::Result<Completion> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = build_request(prompt, schema);

        info!(model = %self.model, structured = schema.is_some(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        interpret_response(&gemini_response, schema.is_some())
    }
}

fn build_request(prompt: &str, schema: Option<&Value>) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: if schema.is_some() { 0.0 } else { 0.3 },
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
            response_mime_type: schema.map(|_| "application/json".to_string()),
            response_schema: schema.cloned(),
        },
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: build_system_prompt(),
            }],
        },
    }
}

fn build_system_prompt() -> String {
    format!(
        r#"You are the reasoning engine of a financial analysis assistant.

Guidelines:
- Be accurate, structured and concise
- Follow any requested JSON schema exactly
- If you cannot answer with confidence, reply with exactly {}"#,
        NO_CONFIDENT_ANSWER
    )
}

fn interpret_response(response: &GeminiResponse, structured: bool) -> crate::Result<Completion> {
    let Some(candidate) = response.candidates.first() else {
        debug!("Gemini returned no candidates");
        return Ok(Completion::NoConfidentAnswer);
    };

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Ok(Completion::NoConfidentAnswer);
    }

    let answer: String = candidate
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("");
    let answer = answer.trim();

    if answer.is_empty() || answer == NO_CONFIDENT_ANSWER {
        return Ok(Completion::NoConfidentAnswer);
    }

    let confidence = calculate_confidence(candidate);
    debug!(confidence, "Gemini response received");
    if confidence < MIN_CONFIDENCE {
        return Ok(Completion::NoConfidentAnswer);
    }

    if structured {
        let value = super::parse_json_response(answer)?;
        return Ok(Completion::Structured(value));
    }

    Ok(Completion::Text(answer.to_string()))
}

/// Heuristic confidence from the finish reason and answer length.
fn calculate_confidence(candidate: &Candidate) -> f32 {
    let base_confidence: f32 = 0.85;

    let finish_confidence = match candidate.finish_reason.as_deref() {
        Some("STOP") => 1.0,
        Some("MAX_TOKENS") => 0.8,
        Some("RECITATION") => 0.6,
        _ => 0.7,
    };

    let response_length: usize = candidate.content.parts.iter().map(|p| p.text.len()).sum();

    let length_confidence = if response_length > 8000 { 0.8 } else { 1.0 };

    (base_confidence * finish_confidence * length_confidence).clamp(0.5, 0.98)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(text: &str, finish: &str) -> GeminiResponse {
        GeminiResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part {
                        text: text.to_string(),
                    }],
                },
                finish_reason: Some(finish.to_string()),
            }],
        }
    }

    #[test]
    fn test_request_serialization_carries_schema() {
        let schema = json!({"type": "object", "properties": {"tool": {"type": "string"}}});
        let request = build_request("Which tool?", Some(&schema));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["responseSchema"], schema);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Which tool?");

        let plain = serde_json::to_value(build_request("hi", None)).unwrap();
        assert!(plain["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn test_interpret_response_variants() {
        let empty = GeminiResponse { candidates: vec![] };
        assert_eq!(interpret_response(&empty, false).unwrap(), Completion::NoConfidentAnswer);

        let declined = candidate(NO_CONFIDENT_ANSWER, "STOP");
        assert_eq!(interpret_response(&declined, false).unwrap(), Completion::NoConfidentAnswer);

        let blocked = candidate("anything", "SAFETY");
        assert_eq!(interpret_response(&blocked, false).unwrap(), Completion::NoConfidentAnswer);

        let text = candidate("Revenue grew 12%.", "STOP");
        assert_eq!(
            interpret_response(&text, false).unwrap(),
            Completion::Text("Revenue grew 12%.".to_string())
        );

        let structured = candidate("```json\n{\"language\": \"es\"}\n```", "STOP");
        assert_eq!(
            interpret_response(&structured, true).unwrap(),
            Completion::Structured(json!({"language": "es"}))
        );
    }

    #[test]
    fn test_response_deserializes_camel_case() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"ok"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3}}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }
}
