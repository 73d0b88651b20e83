//! General financial Q&A, the last-resort tool
//!
//! Never fails on external errors: a model failure or refusal becomes a
//! canned apology delivered as a normal result.

use super::{descriptor_for, parse_args, require_non_empty, Tool, ToolContext};
use crate::error::ToolError;
use crate::llm::{bounded, Completion, LanguageModel};
use crate::models::{ToolDescriptor, ToolName, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const OFF_TOPIC_REPLY: &str =
    "I am a financial chatbot, please ask questions related to financial.";

pub const CANNED_APOLOGY: &str =
    "I'm sorry, I couldn't come up with a good answer to that. Could you rephrase your question?";

#[derive(Debug, Deserialize)]
struct GeneralArgs {
    query: String,
    #[serde(default)]
    context: String,
}

pub struct GeneralQueryTool {
    descriptor: ToolDescriptor,
    llm: Arc<dyn LanguageModel>,
    answer_timeout: Duration,
}

impl GeneralQueryTool {
    /// `answer_timeout` must stay below the engine's per-call timeout so a
    /// slow model still ends in the canned reply.
    pub fn new(llm: Arc<dyn LanguageModel>, answer_timeout: Duration) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::GeneralQuery),
            llm,
            answer_timeout,
        }
    }

    fn build_prompt(query: &str, context: &str) -> String {
        let context = if context.trim().is_empty() {
            "(no earlier messages)"
        } else {
            context.trim()
        };
        format!(
            r#"You are a helpful financial assistant. Answer questions about finance,
accounting, markets, budgeting and the user's uploaded financial documents.
Greetings and small talk get a short friendly reply.
If the question is not related to finance, reply exactly:
"{off_topic}"

Recent conversation:
{context}

Question: {query}"#,
            off_topic = OFF_TOPIC_REPLY,
            context = context,
            query = query.trim()
        )
    }
}

#[async_trait::async_trait]
impl Tool for GeneralQueryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: GeneralArgs = parse_args(args)?;
        require_non_empty("query", &args.query)?;

        let prompt = Self::build_prompt(&args.query, &args.context);
        let completion = bounded(
            "general query",
            self.answer_timeout,
            self.llm.complete(&prompt, None),
        )
        .await;
        let (text, canned) = match completion {
            Ok(Completion::NoConfidentAnswer) => (CANNED_APOLOGY.to_string(), true),
            Ok(completion) => match completion.into_text() {
                Some(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
                _ => (CANNED_APOLOGY.to_string(), true),
            },
            Err(e) => {
                warn!(error = %e, "General query model call failed, replying with apology");
                (CANNED_APOLOGY.to_string(), true)
            }
        };

        Ok(ToolResult {
            text,
            data: json!({ "canned": canned }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, SessionKey};
    use crate::testing::ScriptedModel;

    #[tokio::test]
    async fn test_model_failure_still_succeeds() {
        let tool = GeneralQueryTool::new(Arc::new(ScriptedModel::failing()), Duration::from_secs(1));
        let session = Session::new(SessionKey::new("u", "s").unwrap());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool.invoke(&json!({"query": "What is EBITDA?"}), &ctx).await.unwrap();
        assert_eq!(result.text, CANNED_APOLOGY);
        assert_eq!(result.data["canned"], true);
    }

    #[tokio::test]
    async fn test_slow_model_gets_canned_reply_in_time() {
        let model = ScriptedModel::new().with_delay(Duration::from_secs(2));
        let tool = GeneralQueryTool::new(Arc::new(model), Duration::from_millis(20));
        let session = Session::new(SessionKey::new("u", "s").unwrap());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            tool.invoke(&json!({"query": "What is EBITDA?"}), &ctx),
        )
        .await
        .expect("bounded by the answer timeout")
        .unwrap();
        assert_eq!(result.text, CANNED_APOLOGY);
        assert_eq!(result.data["canned"], true);
    }

    #[tokio::test]
    async fn test_prompt_carries_context_and_scope() {
        let model = ScriptedModel::new().on("Question: What is EBITDA?", Completion::Text("Earnings before...".into()));
        let tool = GeneralQueryTool::new(Arc::new(model.clone()), Duration::from_secs(1));
        let session = Session::new(SessionKey::new("u", "s").unwrap());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool
            .invoke(&json!({"query": "What is EBITDA?", "context": "User: hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.text, "Earnings before...");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("User: hi"));
        assert!(prompt.contains(OFF_TOPIC_REPLY));
    }

    #[tokio::test]
    async fn test_missing_query_is_invalid() {
        let tool = GeneralQueryTool::new(Arc::new(ScriptedModel::new()), Duration::from_secs(1));
        let session = Session::new(SessionKey::new("u", "s").unwrap());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };
        let err = tool.invoke(&json!({"query": "  "}), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ToolErrorKind::InvalidArguments);
    }
}
