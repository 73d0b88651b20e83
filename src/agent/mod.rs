//! Main orchestrator - one request per turn
//!
//! INPUT → TRANSLATE → CLASSIFY → INVOKE → VALIDATE → RETRY? → FALLBACK? → REPLY
//!
//! The dispatcher is a plain sequential state machine. The per-session turn
//! lock is held from context load to commit, and the turn is written in one
//! `commit_turn` at the very end, so a dropped request leaves no trace.

use crate::aggregator::aggregate;
use crate::classifier::{IntentClassifier, RetryHint};
use crate::collaborators::ChartStore;
use crate::config::{OrchestratorConfig, WORKING_LANGUAGE};
use crate::error::{OrchestrationError, ToolError};
use crate::execution::ExecutionEngine;
use crate::language::MultilingualAdapter;
use crate::models::{
    AttemptOutcome, ChartRef, Intent, Message, Reply, Session, SessionKey, SessionSummary,
    ToolDescriptor, ToolInvocation, ToolName, ToolResult,
};
use crate::session::{SessionContextManager, SessionStore};
use crate::tools::{create_default_registry, ToolContext, ToolRegistry, ToolServices};
use crate::validation::{create_default_validation_engine, ValidationEngine};
use crate::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request.";

const TRANSLATION_NOTICE: &str =
    "(Translation is currently unavailable, so this reply is in English.)";

/// Dispatcher states for one request.
enum DispatchState {
    Classifying,
    Invoking { intent: Intent, retry: bool },
    Validating { intent: Intent, retry: bool, result: ToolResult },
    Retrying { intent: Intent, hint: RetryHint },
    Fallback,
    Done { intent: Intent, result: ToolResult },
}

impl DispatchState {
    fn label(&self) -> &'static str {
        match self {
            DispatchState::Classifying => "classifying",
            DispatchState::Invoking { .. } => "invoking",
            DispatchState::Validating { .. } => "validating",
            DispatchState::Retrying { .. } => "retrying",
            DispatchState::Fallback => "fallback",
            DispatchState::Done { .. } => "done",
        }
    }
}

struct Dispatch {
    invocation: ToolInvocation,
    answer: Option<(Intent, ToolResult)>,
}

/// Everything the turn produced before it is committed.
struct TurnOutcome {
    language: String,
    /// Working-language rendering of the user text, when it differs.
    user_working: Option<String>,
    reply_text: String,
    /// Working-language reply, when it differs from `reply_text`.
    reply_working: Option<String>,
    chart_refs: Vec<ChartRef>,
    invocation: ToolInvocation,
    translation_degraded: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    sessions: SessionContextManager,
    language: MultilingualAdapter,
    classifier: IntentClassifier,
    execution_engine: ExecutionEngine,
    validation_engine: ValidationEngine,
    tool_registry: Arc<ToolRegistry>,
    charts: Arc<dyn ChartStore>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn SessionStore>, services: ToolServices) -> Self {
        let tool_registry = Arc::new(create_default_registry(&services, &config));
        Self::with_registry(config, store, services, tool_registry)
    }

    /// Build around an explicit registry. The registry is read-only from here on.
    pub fn with_registry(
        config: OrchestratorConfig,
        store: Arc<dyn SessionStore>,
        services: ToolServices,
        tool_registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            sessions: SessionContextManager::new(store, config.history_window),
            language: MultilingualAdapter::new(services.llm.clone(), &config),
            classifier: IntentClassifier::new(services.llm.clone(), tool_registry.descriptors(), &config),
            execution_engine: ExecutionEngine::new(tool_registry.clone(), config.call_timeout),
            validation_engine: create_default_validation_engine(),
            charts: services.charts,
            tool_registry,
            config,
        }
    }

    /// Answer one user message. Some reply is always produced unless the
    /// request itself is malformed or persistence fails.
    pub async fn handle_message(&self, session_id: &str, user_id: &str, text: &str) -> Result<Reply> {
        let key = SessionKey::new(user_id, session_id)?;
        if text.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "message text must not be empty".to_string(),
            ));
        }

        let start_time = Instant::now();
        let _turn = self.sessions.lock_session(&key).await;
        let session = self.sessions.load_context(&key).await?;
        let message_id = Uuid::new_v4();

        info!(session_id = %key, %message_id, "Orchestrator: handling message");

        let outcome = match tokio::time::timeout(
            self.config.request_timeout,
            self.run_turn(&key, text, &session, message_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    session_id = %key,
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "Request timed out, replying with apology"
                );
                TurnOutcome {
                    language: session
                        .language
                        .clone()
                        .unwrap_or_else(|| self.config.default_language.clone()),
                    user_working: None,
                    reply_text: APOLOGY.to_string(),
                    reply_working: None,
                    chart_refs: Vec::new(),
                    invocation: ToolInvocation::new(),
                    translation_degraded: false,
                }
            }
        };

        let user_message = Message::user(text, outcome.user_working, &outcome.language);
        let assistant_message = Message::assistant(
            message_id,
            outcome.reply_text.clone(),
            outcome.reply_working,
            &outcome.language,
            Some(outcome.invocation.clone()),
        );
        self.sessions
            .commit_turn(&key, user_message, assistant_message)
            .await?;

        if !session.language_pinned && session.language.as_deref() != Some(outcome.language.as_str()) {
            self.sessions.remember_language(&key, &outcome.language).await?;
        }

        info!(
            session_id = %key,
            %message_id,
            answered_by = ?outcome.invocation.answered_by,
            attempts = outcome.invocation.attempts.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: turn committed"
        );

        Ok(Reply {
            message_id,
            text: outcome.reply_text,
            chart_refs: outcome.chart_refs,
            language: outcome.language,
            answered_by: outcome.invocation.answered_by,
            translation_degraded: outcome.translation_degraded,
            invocation: outcome.invocation,
        })
    }

    async fn run_turn(&self, key: &SessionKey, text: &str, session: &Session, message_id: Uuid) -> TurnOutcome {
        let working = self.language.to_working_language(text, session).await;

        let (body, chart_refs, invocation) = match self.dispatch(key, &working.text, session, message_id).await {
            Ok(Dispatch {
                invocation,
                answer: Some((intent, result)),
            }) => {
                let (body, chart_refs) = aggregate(&result, &intent, &invocation);
                (body, chart_refs, invocation)
            }
            Ok(Dispatch { invocation, answer: None }) => {
                warn!(session_id = %key, "Every candidate tool failed, replying with apology");
                (APOLOGY.to_string(), Vec::new(), invocation)
            }
            Err(e) => {
                error!(session_id = %key, error = %e, "Dispatch failed");
                (APOLOGY.to_string(), Vec::new(), ToolInvocation::new())
            }
        };

        let outbound = self.language.to_user_language(&body, &working.language).await;
        let mut reply_text = outbound.text;
        if outbound.degraded {
            reply_text.push_str("\n\n");
            reply_text.push_str(TRANSLATION_NOTICE);
        }

        let translated = working.language != WORKING_LANGUAGE;
        TurnOutcome {
            user_working: translated.then(|| working.text.clone()),
            reply_working: (translated && reply_text != body).then_some(body),
            language: working.language,
            reply_text,
            chart_refs,
            invocation,
            translation_degraded: working.degraded || outbound.degraded,
        }
    }

    /// Classifying → Invoking → Validating → {Done | Retrying | Fallback}.
    async fn dispatch(
        &self,
        key: &SessionKey,
        query: &str,
        session: &Session,
        message_id: Uuid,
    ) -> Result<Dispatch> {
        let ctx = ToolContext { session, message_id };
        let mut invocation = ToolInvocation::new();
        let mut reasoning_trace: Vec<String> = Vec::new();
        let mut ranked: VecDeque<Intent> = VecDeque::new();
        let mut attempted: Vec<ToolName> = Vec::new();
        let mut top: Option<ToolName> = None;
        let mut retries_used = 0u32;
        let mut state = DispatchState::Classifying;

        loop {
            debug!(
                session_id = %key,
                state = state.label(),
                attempt = invocation.attempts.len(),
                "Dispatch transition"
            );

            state = match state {
                DispatchState::Classifying => {
                    let mut intents: VecDeque<Intent> = self.classifier.classify(query, session).await?.into();
                    let Some(first) = intents.pop_front() else {
                        return Err(OrchestrationError::NoEligibleTool(
                            "classifier returned no intents".to_string(),
                        ));
                    };
                    reasoning_trace.push(format!(
                        "CLASSIFY: {} ({:.2}), {} more ranked",
                        first.tool,
                        first.confidence,
                        intents.len()
                    ));
                    top = Some(first.tool);
                    ranked = intents;
                    DispatchState::Invoking {
                        intent: first,
                        retry: false,
                    }
                }

                DispatchState::Invoking { intent, retry } => {
                    if !attempted.contains(&intent.tool) {
                        attempted.push(intent.tool);
                    }
                    let (attempt, outcome) = self.execution_engine.invoke(&intent, &ctx, retry).await;
                    reasoning_trace.push(format!(
                        "INVOKE: {}{} - {} ms",
                        intent.tool,
                        if retry { " (retry)" } else { "" },
                        attempt.execution_time_ms
                    ));
                    invocation.attempts.push(attempt);

                    match outcome {
                        Ok(result) => DispatchState::Validating { intent, retry, result },
                        Err(e) => {
                            info!(
                                session_id = %key,
                                tool = %intent.tool,
                                kind = %e.kind(),
                                retry,
                                "Tool attempt failed"
                            );
                            if e.is_retryable() && self.may_retry(intent.tool, top, retries_used) {
                                let available = match &e {
                                    ToolError::Empty { available, .. } => available.clone(),
                                    _ => Vec::new(),
                                };
                                DispatchState::Retrying {
                                    intent,
                                    hint: RetryHint {
                                        reason: e.to_string(),
                                        available,
                                    },
                                }
                            } else {
                                DispatchState::Fallback
                            }
                        }
                    }
                }

                DispatchState::Validating { intent, retry, result } => {
                    let report = match self.tool_registry.get(intent.tool) {
                        Some(tool) => self.validation_engine.validate(tool.descriptor(), &result),
                        None => {
                            return Err(OrchestrationError::StateError(format!(
                                "{} answered but is not registered",
                                intent.tool
                            )))
                        }
                    };
                    reasoning_trace.push(format!(
                        "VALIDATE: {} - {}",
                        intent.tool,
                        if report.passed { "passed" } else { "rejected" }
                    ));

                    if report.passed {
                        DispatchState::Done { intent, result }
                    } else {
                        warn!(
                            session_id = %key,
                            tool = %intent.tool,
                            issues = ?report.issues,
                            retry,
                            "Result rejected by validation"
                        );
                        if let Some(last) = invocation.attempts.last_mut() {
                            last.outcome = AttemptOutcome::Rejected {
                                issues: report.issues.clone(),
                            };
                        }
                        if self.may_retry(intent.tool, top, retries_used) {
                            DispatchState::Retrying {
                                intent,
                                hint: RetryHint {
                                    reason: report.issues.join("; "),
                                    available: report.available,
                                },
                            }
                        } else {
                            DispatchState::Fallback
                        }
                    }
                }

                DispatchState::Retrying { intent, hint } => {
                    retries_used += 1;
                    reasoning_trace.push(format!("RETRY: {} after '{}'", intent.tool, hint.reason));
                    let arguments = self
                        .classifier
                        .extract_arguments(intent.tool, query, session, Some(&hint))
                        .await;
                    DispatchState::Invoking {
                        intent: intent.with_arguments(arguments),
                        retry: true,
                    }
                }

                DispatchState::Fallback => match self.next_candidate(&mut ranked, &attempted) {
                    Some(candidate) => {
                        reasoning_trace.push(format!("FALLBACK: {}", candidate.tool));
                        let arguments = self
                            .classifier
                            .extract_arguments(candidate.tool, query, session, None)
                            .await;
                        DispatchState::Invoking {
                            intent: candidate.with_arguments(arguments),
                            retry: false,
                        }
                    }
                    None => {
                        reasoning_trace.push("FALLBACK: no candidates left".to_string());
                        debug!(session_id = %key, trace = ?reasoning_trace, "Dispatch trace");
                        return Ok(Dispatch {
                            invocation,
                            answer: None,
                        });
                    }
                },

                DispatchState::Done { intent, result } => {
                    reasoning_trace.push(format!("DONE: answered by {}", intent.tool));
                    debug!(session_id = %key, trace = ?reasoning_trace, "Dispatch trace");
                    invocation.answered_by = Some(intent.tool);
                    invocation.result = Some(result.clone());
                    return Ok(Dispatch {
                        invocation,
                        answer: Some((intent, result)),
                    });
                }
            };
        }
    }

    /// Only the top intent is retried, up to `max_tool_retries` times.
    fn may_retry(&self, tool: ToolName, top: Option<ToolName>, retries_used: u32) -> bool {
        top == Some(tool) && retries_used < self.config.max_tool_retries
    }

    /// Next ranked intent not yet tried, else `general_query` if it has not run.
    fn next_candidate(&self, ranked: &mut VecDeque<Intent>, attempted: &[ToolName]) -> Option<Intent> {
        while let Some(candidate) = ranked.pop_front() {
            if !attempted.contains(&candidate.tool) {
                return Some(candidate);
            }
        }

        let general = ToolName::GeneralQuery;
        (!attempted.contains(&general) && self.tool_registry.contains(general)).then(|| Intent {
            tool: general,
            confidence: 0.0,
            arguments: Value::Null,
        })
    }

    //
    // ================= Supplementary operations =================
    //

    /// Session manager, for the upload pipeline to register documents.
    pub fn sessions(&self) -> &SessionContextManager {
        &self.sessions
    }

    pub async fn history(&self, key: &SessionKey) -> Result<Vec<Message>> {
        self.sessions.history(key).await
    }

    /// Every chart produced in the session, in message order.
    pub async fn session_charts(&self, key: &SessionKey) -> Result<Vec<ChartRef>> {
        Ok(self
            .sessions
            .history(key)
            .await?
            .into_iter()
            .filter_map(|m| m.invocation)
            .filter_map(|i| i.result)
            .flat_map(|r| r.chart_refs)
            .collect())
    }

    pub async fn resolve_chart(&self, chart: &ChartRef) -> Result<Vec<u8>> {
        Ok(self.charts.resolve(chart).await?)
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tool_registry.descriptors()
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        self.language.supported_languages()
    }

    pub async fn select_language(&self, key: &SessionKey, code: &str) -> Result<()> {
        self.sessions.select_language(key, code).await
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        self.sessions.list_sessions(user_id).await
    }
}
