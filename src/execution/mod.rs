//! Execution engine for single tool attempts
//!
//! Runs one intent against the registry under the per-call timeout and
//! records the attempt. No model calls happen here.

use crate::error::ToolError;
use crate::models::{AttemptOutcome, Intent, InvocationAttempt, ToolResult};
use crate::tools::{ToolContext, ToolRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct ExecutionEngine {
    tool_registry: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(tool_registry: Arc<ToolRegistry>, call_timeout: Duration) -> Self {
        Self {
            tool_registry,
            call_timeout,
        }
    }

    /// Invoke the intent's tool once. The attempt is always returned, with
    /// `Succeeded` provisionally set on success; validation may later turn
    /// it into `Rejected`.
    pub async fn invoke(
        &self,
        intent: &Intent,
        ctx: &ToolContext<'_>,
        retry: bool,
    ) -> (InvocationAttempt, Result<ToolResult, ToolError>) {
        let started_at = Utc::now();
        let start = Instant::now();

        debug!(tool = %intent.tool, retry, "Invoking tool");

        let outcome = match self.tool_registry.get(intent.tool) {
            Some(tool) => {
                match tokio::time::timeout(self.call_timeout, tool.invoke(&intent.arguments, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Unreachable(format!(
                        "{} did not answer within {}ms",
                        intent.tool,
                        self.call_timeout.as_millis()
                    ))),
                }
            }
            None => Err(ToolError::Unreachable(format!(
                "{} is not registered",
                intent.tool
            ))),
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;

        let attempt_outcome = match &outcome {
            Ok(_) => AttemptOutcome::Succeeded,
            Err(e) => {
                warn!(
                    tool = %intent.tool,
                    retry,
                    kind = %e.kind(),
                    error = %e,
                    "Tool execution failed"
                );
                AttemptOutcome::Failed {
                    kind: e.kind(),
                    detail: e.to_string(),
                }
            }
        };

        let attempt = InvocationAttempt {
            tool: intent.tool,
            arguments: intent.arguments.clone(),
            outcome: attempt_outcome,
            retry,
            execution_time_ms,
            started_at,
        };

        (attempt, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::models::{Session, SessionKey, ToolDescriptor, ToolName};
    use crate::tools::{descriptor_for, Tool};
    use serde_json::{json, Value};

    struct SlowTool(ToolDescriptor);

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn invoke(&self, _args: &Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::text("late"))
        }
    }

    fn session() -> Session {
        Session::new(SessionKey::new("u", "s").unwrap())
    }

    #[tokio::test]
    async fn test_call_timeout_is_unreachable() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool(descriptor_for(ToolName::WebResearch))));
        let engine = ExecutionEngine::new(Arc::new(registry), Duration::from_millis(20));
        let session = session();
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };
        let intent = Intent {
            tool: ToolName::WebResearch,
            confidence: 0.9,
            arguments: json!({"url": "https://example.com"}),
        };

        let (attempt, result) = engine.invoke(&intent, &ctx, false).await;
        assert_eq!(result.unwrap_err().kind(), ToolErrorKind::Unreachable);
        assert!(!attempt.succeeded());
        assert_eq!(attempt.arguments, intent.arguments);
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_unreachable() {
        let engine = ExecutionEngine::new(Arc::new(ToolRegistry::new()), Duration::from_secs(1));
        let session = session();
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };
        let intent = Intent {
            tool: ToolName::GeneralQuery,
            confidence: 1.0,
            arguments: json!({"query": "hi"}),
        };

        let (attempt, result) = engine.invoke(&intent, &ctx, true).await;
        assert!(attempt.retry);
        match attempt.outcome {
            AttemptOutcome::Failed { kind, .. } => assert_eq!(kind, ToolErrorKind::Unreachable),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(result.is_err());
    }
}
