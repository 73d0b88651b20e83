//! Document summarizer for PDF and DOCX uploads

use super::{descriptor_for, parse_args, ready_document, require_non_empty, Tool, ToolContext};
use crate::collaborators::DocumentService;
use crate::error::ToolError;
use crate::llm::{Completion, LanguageModel};
use crate::models::{ToolDescriptor, ToolName, ToolResult};
use crate::session::truncate_chars;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SummarizerArgs {
    document_id: String,
}

pub struct DocumentSummarizerTool {
    descriptor: ToolDescriptor,
    documents: Arc<dyn DocumentService>,
    llm: Arc<dyn LanguageModel>,
    input_limit: usize,
}

impl DocumentSummarizerTool {
    pub fn new(documents: Arc<dyn DocumentService>, llm: Arc<dyn LanguageModel>, input_limit: usize) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::DocumentSummarizer),
            documents,
            llm,
            input_limit,
        }
    }

    fn build_prompt(name: &str, content: &str) -> String {
        format!(
            r#"You are a financial analyst. Summarize the document "{name}" below.

Cover the key financial figures, notable changes and risks in a few short
paragraphs or bullet points. Use only the document content. If the content
does not allow a meaningful summary, answer exactly "{sentinel}".

Document:
{content}"#,
            name = name,
            sentinel = crate::llm::NO_CONFIDENT_ANSWER,
            content = content
        )
    }
}

#[async_trait::async_trait]
impl Tool for DocumentSummarizerTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: SummarizerArgs = parse_args(args)?;
        require_non_empty("document_id", &args.document_id)?;
        let document = ready_document(ctx, self.name(), &args.document_id)?;

        let extracted = self.documents.get_document(&document.ref_id).await?;
        let content = match extracted.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => extracted
                .tables
                .iter()
                .filter(|t| !t.rows.is_empty())
                .map(|t| t.to_plain_text())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if content.trim().is_empty() {
            return Err(ToolError::empty(format!("{} has no extractable text", document.name)));
        }

        let input_chars = content.chars().count();
        let truncated = input_chars > self.input_limit;
        let content = truncate_chars(&content, self.input_limit);
        debug!(document = %document.ref_id, input_chars, truncated, "Summarizing document");

        let completion = self
            .llm
            .complete(&Self::build_prompt(&document.name, &content), None)
            .await
            .map_err(|e| ToolError::Unreachable(format!("summary generation failed: {}", e)))?;

        let summary = match completion {
            Completion::NoConfidentAnswer => {
                return Err(ToolError::empty(format!(
                    "no confident summary could be produced for {}",
                    document.name
                )))
            }
            other => other.into_text().unwrap_or_default(),
        };
        if summary.trim().is_empty() {
            return Err(ToolError::empty("the summary came back empty"));
        }

        let mut text = format!("### Summary of {}\n\n{}", document.name, summary.trim());
        if truncated {
            text.push_str("\n\n_Only the first part of this document was summarized._");
        }

        Ok(ToolResult {
            text,
            data: json!({
                "document_id": document.ref_id,
                "input_chars": input_chars,
                "truncated": truncated,
            }),
            ..Default::default()
        })
    }
}
