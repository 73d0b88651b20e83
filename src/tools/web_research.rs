//! Web research: answer a question from the content of one page

use super::{descriptor_for, parse_args, Tool, ToolContext};
use crate::collaborators::WebFetcher;
use crate::error::{CollaboratorError, ToolError};
use crate::llm::{Completion, LanguageModel};
use crate::models::{ToolDescriptor, ToolName, ToolResult};
use crate::session::truncate_chars;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct WebArgs {
    url: String,
    #[serde(default)]
    query: String,
}

/// Only absolute http(s) URLs with a host are fetched.
pub fn validate_url(raw: &str) -> Result<Url, ToolError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ToolError::InvalidArguments(format!("'{}' is not a valid URL: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ToolError::InvalidArguments(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ToolError::InvalidArguments(format!("URL '{}' has no host", raw)));
    }
    Ok(url)
}

pub struct WebResearchTool {
    descriptor: ToolDescriptor,
    web: Arc<dyn WebFetcher>,
    llm: Arc<dyn LanguageModel>,
    content_limit: usize,
}

impl WebResearchTool {
    pub fn new(web: Arc<dyn WebFetcher>, llm: Arc<dyn LanguageModel>, content_limit: usize) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::WebResearch),
            web,
            llm,
            content_limit,
        }
    }

    fn build_prompt(url: &Url, query: &str, content: &str) -> String {
        let question = if query.trim().is_empty() {
            "Summarize the financial information on this page."
        } else {
            query.trim()
        };
        format!(
            r#"Answer the question using only the content of the web page {url}.
Quote figures as they appear. If the page does not answer the question,
answer exactly "{sentinel}".

Question: {question}

Page content:
{content}"#,
            url = url,
            sentinel = crate::llm::NO_CONFIDENT_ANSWER,
            question = question,
            content = content
        )
    }
}

#[async_trait::async_trait]
impl Tool for WebResearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: WebArgs = parse_args(args)?;
        let url = validate_url(&args.url)?;

        let page = match self.web.fetch(url.as_str()).await {
            Ok(page) => page,
            Err(CollaboratorError::ExtractionFailed(reason)) => {
                return Err(ToolError::empty(format!("{} has no readable text: {}", url, reason)))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Web fetch failed");
                return Err(ToolError::Unreachable(format!("could not fetch {}: {}", url, e)));
            }
        };
        if page.trim().is_empty() {
            return Err(ToolError::empty(format!("{} has no readable text", url)));
        }

        let content = truncate_chars(page.trim(), self.content_limit);
        debug!(url = %url, chars = content.chars().count(), "Fetched page content");

        let completion = self
            .llm
            .complete(&Self::build_prompt(&url, &args.query, &content), None)
            .await
            .map_err(|e| ToolError::Unreachable(format!("answer generation failed: {}", e)))?;

        let answer = match completion {
            Completion::NoConfidentAnswer => {
                return Err(ToolError::empty(format!("{} does not answer the question", url)))
            }
            other => other.into_text().unwrap_or_default(),
        };

        Ok(ToolResult {
            text: format!("{}\n\nSource: {}", answer.trim(), url),
            data: json!({ "url": url.as_str() }),
            ..Default::default()
        })
    }
}
