//! Intent classifier
//!
//! Maps a working-language query plus session context to ranked intents:
//! 1. eligibility filter over the tool descriptors
//! 2. scoring: max of the regex prior and the model's score
//! 3. argument extraction for the top intent only
//!
//! `general_query` is the guaranteed answer when nothing clears the
//! confidence threshold.

pub mod prompts;
pub mod rules;

pub use rules::RetryHint;

use crate::config::{ComparisonPolicy, OrchestratorConfig};
use crate::error::OrchestrationError;
use crate::llm::{bounded, LanguageModel};
use crate::models::{Intent, Session, ToolDescriptor, ToolName};
use crate::session::condensed_history;
use crate::tools::argument_schema;
use crate::Result;
use rules::HistorySettings;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct IntentClassifier {
    llm: Arc<dyn LanguageModel>,
    descriptors: Vec<ToolDescriptor>,
    threshold: f32,
    policy: ComparisonPolicy,
    history: HistorySettings,
    call_timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, descriptors: Vec<ToolDescriptor>, config: &OrchestratorConfig) -> Self {
        Self {
            llm,
            descriptors,
            threshold: config.confidence_threshold,
            policy: config.comparison_policy,
            history: HistorySettings {
                messages: config.prompt_history_messages,
                message_chars: config.prompt_message_chars,
            },
            call_timeout: config.call_timeout,
        }
    }

    pub fn eligible_tools(&self, query: &str, session: &Session) -> Vec<&ToolDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| rules::is_eligible(d, query, session))
            .collect()
    }

    /// Ranked intents, most confident first. Only the first carries
    /// extracted arguments; the rest are extracted on demand.
    pub async fn classify(&self, query: &str, session: &Session) -> Result<Vec<Intent>> {
        let eligible = self.eligible_tools(query, session);
        if eligible.is_empty() {
            return Err(OrchestrationError::NoEligibleTool(
                "no registered tool is eligible for this request".to_string(),
            ));
        }

        let history = condensed_history(session, self.history.messages, self.history.message_chars);
        let model_scores = self.model_scores(query, &eligible, &history).await;

        let mut scored: Vec<(ToolName, f32)> = eligible
            .iter()
            .map(|d| {
                let prior = rules::prior_score(d.name, query);
                let model = model_scores.get(&d.name).copied().unwrap_or(0.0);
                (d.name, prior.max(model))
            })
            .collect();
        debug!(scores = ?scored, "Scored eligible tools");

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.priority().cmp(&b.0.priority()))
        });

        let mut ranked: Vec<(ToolName, f32)> = scored
            .iter()
            .copied()
            .filter(|(_, score)| *score >= self.threshold)
            .collect();

        if ranked.is_empty() {
            let general = scored
                .iter()
                .copied()
                .find(|(tool, _)| *tool == ToolName::GeneralQuery)
                .ok_or_else(|| {
                    OrchestrationError::NoEligibleTool(
                        "no tool cleared the confidence threshold and general_query is not registered"
                            .to_string(),
                    )
                })?;
            ranked.push(general);
        }

        self.apply_comparison_policy(&mut ranked, session);

        let mut intents: Vec<Intent> = ranked
            .iter()
            .map(|(tool, confidence)| Intent {
                tool: *tool,
                confidence: *confidence,
                arguments: Value::Null,
            })
            .collect();

        let top = intents[0].tool;
        intents[0].arguments = self.extract_arguments(top, query, session, None).await;

        info!(
            top = %top,
            confidence = intents[0].confidence,
            candidates = intents.len(),
            "Intent classified"
        );
        Ok(intents)
    }

    /// Put trend or comparison first, whichever the policy prefers, when both ranked.
    fn apply_comparison_policy(&self, ranked: &mut [(ToolName, f32)], session: &Session) {
        let ComparisonPolicy::DocumentCount { min_documents } = self.policy else {
            return;
        };
        let position = |tool| ranked.iter().position(|(t, _)| *t == tool);
        let (Some(trend), Some(comparative)) = (
            position(ToolName::FinancialTrendAnalysis),
            position(ToolName::ComparativeAnalysis),
        ) else {
            return;
        };

        let ready_files = session.ready_count(|k| k.is_file());
        let comparison_first = ready_files >= min_documents;
        if comparison_first == (comparative < trend) {
            return;
        }

        debug!(ready_files, comparison_first, "Comparison policy reordering");
        ranked.swap(trend, comparative);
    }

    async fn model_scores(
        &self,
        query: &str,
        eligible: &[&ToolDescriptor],
        history: &str,
    ) -> HashMap<ToolName, f32> {
        let prompt = prompts::scoring_prompt(query, eligible, history);
        let schema = prompts::scores_schema();

        let response = bounded(
            "intent scoring",
            self.call_timeout,
            self.llm.complete(&prompt, Some(&schema)),
        )
        .await
        .and_then(|completion| completion.into_json());

        let value = match response {
            Ok(Some(value)) => value,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Intent scoring call failed, using rule priors only");
                return HashMap::new();
            }
        };

        value
            .get("scores")
            .and_then(Value::as_array)
            .map(|scores| {
                scores
                    .iter()
                    .filter_map(|entry| {
                        let tool = ToolName::from_str(entry.get("tool")?.as_str()?).ok()?;
                        let confidence = entry.get("confidence")?.as_f64()? as f32;
                        eligible
                            .iter()
                            .any(|d| d.name == tool)
                            .then_some((tool, confidence.clamp(0.0, 1.0)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Arguments for `tool`: deterministic draft, relaxed by the retry hint,
    /// refined by the model within the tool's schema.
    pub async fn extract_arguments(
        &self,
        tool: ToolName,
        query: &str,
        session: &Session,
        hint: Option<&RetryHint>,
    ) -> Value {
        let mut draft = rules::draft_arguments(tool, query, session, self.history);
        if let Some(hint) = hint {
            draft = rules::relax_arguments(tool, &draft, hint);
        }
        if tool == ToolName::GeneralQuery {
            return draft;
        }

        let schema = argument_schema(tool);
        let prompt = prompts::extraction_prompt(tool, query, &draft, session, hint);
        let response = bounded(
            "argument extraction",
            self.call_timeout,
            self.llm.complete(&prompt, Some(&schema)),
        )
        .await
        .and_then(|completion| completion.into_json());

        match response {
            Ok(Some(Value::Object(refined))) => merge_refinement(&draft, refined, &schema, session),
            Ok(_) => draft,
            Err(e) => {
                warn!(%tool, error = %e, "Argument extraction failed, keeping draft");
                draft
            }
        }
    }
}

/// Merge model-refined arguments into the draft: schema keys only, no
/// nulls, and document ids must belong to the session.
fn merge_refinement(draft: &Value, refined: Map<String, Value>, schema: &Value, session: &Session) -> Value {
    let mut merged = draft.as_object().cloned().unwrap_or_default();
    let allowed = schema["properties"].as_object().cloned().unwrap_or_default();

    for (key, value) in refined {
        if value.is_null() || !allowed.contains_key(&key) {
            continue;
        }
        let valid = match key.as_str() {
            "document_id" => value
                .as_str()
                .is_some_and(|id| session.document(id).is_some()),
            "document_ids" => value.as_array().is_some_and(|ids| {
                ids.len() >= 2
                    && ids
                        .iter()
                        .all(|id| id.as_str().is_some_and(|id| session.document(id).is_some()))
            }),
            _ => true,
        };
        if valid {
            merged.insert(key, value);
        } else {
            debug!(key = %key, "Dropping refined argument outside the session");
        }
    }
    Value::Object(merged)
}
