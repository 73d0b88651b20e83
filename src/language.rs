//! Multilingual adapter
//!
//! Inbound text is detected and translated into the working language before
//! classification; replies are translated back. Translation is best effort:
//! a failed call hands back the original text flagged as degraded.

use crate::config::{OrchestratorConfig, WORKING_LANGUAGE};
use crate::error::OrchestrationError;
use crate::llm::{bounded, Completion, LanguageModel};
use crate::models::Session;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

pub const SUPPORTED_LANGUAGES: [Language; 15] = [
    Language { code: "en", name: "English" },
    Language { code: "es", name: "Spanish" },
    Language { code: "fr", name: "French" },
    Language { code: "de", name: "German" },
    Language { code: "it", name: "Italian" },
    Language { code: "pt", name: "Portuguese" },
    Language { code: "nl", name: "Dutch" },
    Language { code: "ru", name: "Russian" },
    Language { code: "zh", name: "Chinese" },
    Language { code: "ja", name: "Japanese" },
    Language { code: "ko", name: "Korean" },
    Language { code: "ar", name: "Arabic" },
    Language { code: "hi", name: "Hindi" },
    Language { code: "gu", name: "Gujarati" },
    Language { code: "mr", name: "Marathi" },
];

pub fn find(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES.iter().find(|l| l.code == code)
}

/// Language name for prompts; falls back to the code itself.
fn display_name(code: &str) -> &str {
    find(code).map(|l| l.name).unwrap_or(code)
}

const ENGLISH_MARKERS: &[&str] = &[
    "the", "is", "are", "what", "how", "and", "of", "my", "show", "please", "for", "in",
    "compare", "revenue", "me", "a", "to",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub language: String,
    pub confidence: f32,
}

/// Inbound text after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingText {
    pub text: String,
    /// Language the user wrote in (after fallbacks).
    pub language: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub text: String,
    pub degraded: bool,
}

pub struct MultilingualAdapter {
    llm: Arc<dyn LanguageModel>,
    confidence_floor: f32,
    default_language: String,
    call_timeout: Duration,
}

impl MultilingualAdapter {
    pub fn new(llm: Arc<dyn LanguageModel>, config: &OrchestratorConfig) -> Self {
        Self {
            llm,
            confidence_floor: config.detection_confidence_floor,
            default_language: config.default_language.clone(),
            call_timeout: config.call_timeout,
        }
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        SUPPORTED_LANGUAGES.iter().map(|l| l.code).collect()
    }

    /// Detect the user's language and render `text` in the working language.
    pub async fn to_working_language(&self, text: &str, session: &Session) -> WorkingText {
        let language = match (&session.language, session.language_pinned) {
            (Some(pinned), true) => pinned.clone(),
            _ => {
                let detection = self.detect(text).await;
                self.resolve_language(detection, session)
            }
        };

        let translated = self.translate_best_effort(text, &language, WORKING_LANGUAGE).await;
        WorkingText {
            text: translated.text,
            language,
            degraded: translated.degraded,
        }
    }

    /// Render a working-language reply in `target`.
    pub async fn to_user_language(&self, text: &str, target: &str) -> Translated {
        self.translate_best_effort(text, WORKING_LANGUAGE, target).await
    }

    fn resolve_language(&self, detection: Detection, session: &Session) -> String {
        let supported = find(&detection.language).is_some();
        if supported && detection.confidence >= self.confidence_floor {
            return detection.language;
        }

        debug!(
            detected = %detection.language,
            confidence = detection.confidence,
            "Low-confidence language detection, using session language"
        );
        session
            .language
            .clone()
            .unwrap_or_else(|| self.default_language.clone())
    }

    pub async fn detect(&self, text: &str) -> Detection {
        if let Some(detection) = detect_script(text) {
            return detection;
        }

        match self.detect_with_model(text).await {
            Ok(Some(detection)) => detection,
            Ok(None) => fallback_detection(text),
            Err(e) => {
                warn!(error = %e, "Language detection call failed");
                fallback_detection(text)
            }
        }
    }

    async fn detect_with_model(&self, text: &str) -> Result<Option<Detection>> {
        let codes = self.supported_languages().join(", ");
        let prompt = format!(
            "Identify the language of the following text. Answer with an ISO 639-1 code \
             from [{}] and a confidence between 0 and 1.\n\nTEXT:\n{}",
            codes, text
        );
        let schema = detection_schema();

        let completion = bounded(
            "language detection",
            self.call_timeout,
            self.llm.complete(&prompt, Some(&schema)),
        )
        .await?;

        let Some(value) = completion.into_json()? else {
            return Ok(None);
        };

        let language = value
            .get("language")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .ok_or_else(|| OrchestrationError::LlmError("detection without language".into()))?;
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;

        Ok(Some(Detection {
            language,
            confidence,
        }))
    }

    async fn translate_best_effort(&self, text: &str, from: &str, to: &str) -> Translated {
        match self.translate(text, from, to).await {
            Ok(text) => Translated {
                text,
                degraded: false,
            },
            Err(e) => {
                warn!(from, to, error = %e, "Translation degraded, keeping original text");
                Translated {
                    text: text.to_string(),
                    degraded: true,
                }
            }
        }
    }

    /// Translate `text`; identical languages are returned untouched.
    pub async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let prompt = format!(
            "Translate the following text from {} to {}. Preserve markdown, numbers, \
             tables and code blocks exactly. Reply with the translation only.\n\nTEXT:\n{}",
            display_name(from),
            display_name(to),
            text
        );

        let completion = bounded(
            "translation",
            self.call_timeout,
            self.llm.complete(&prompt, None),
        )
        .await
        .map_err(|e| OrchestrationError::TranslationDegraded(e.to_string()))?;

        match completion {
            Completion::Text(translated) if !translated.trim().is_empty() => Ok(translated),
            _ => Err(OrchestrationError::TranslationDegraded(format!(
                "no translation {} -> {}",
                from, to
            ))),
        }
    }
}

fn detection_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "language": {"type": "string"},
            "confidence": {"type": "number"}
        },
        "required": ["language", "confidence"]
    })
}

/// Decide from the writing system alone when it is unambiguous.
fn detect_script(text: &str) -> Option<Detection> {
    let mut counts = [0usize; 7];
    let (gujarati, hangul, kana, han, arabic, cyrillic, latin) = (0, 1, 2, 3, 4, 5, 6);

    for c in text.chars() {
        let slot = match c as u32 {
            0x0A80..=0x0AFF => gujarati,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => hangul,
            0x3040..=0x30FF => kana,
            0x4E00..=0x9FFF => han,
            0x0600..=0x06FF => arabic,
            0x0400..=0x04FF => cyrillic,
            _ if c.is_ascii_alphabetic() => latin,
            _ => continue,
        };
        counts[slot] += 1;
    }

    let code = if counts[gujarati] > 0 {
        "gu"
    } else if counts[hangul] > 0 {
        "ko"
    } else if counts[kana] > 0 {
        "ja"
    } else if counts[han] > 0 {
        "zh"
    } else if counts[arabic] > counts[latin] {
        "ar"
    } else if counts[cyrillic] > counts[latin] {
        "ru"
    } else {
        return None;
    };

    Some(Detection {
        language: code.to_string(),
        confidence: 0.95,
    })
}

/// Used when the model cannot be asked.
fn fallback_detection(text: &str) -> Detection {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let english_hits = words
        .iter()
        .filter(|w| ENGLISH_MARKERS.contains(&w.as_str()))
        .count();

    if text.is_ascii() && english_hits > 0 {
        Detection {
            language: "en".to_string(),
            confidence: 0.7,
        }
    } else {
        Detection {
            language: "und".to_string(),
            confidence: 0.0,
        }
    }
}
