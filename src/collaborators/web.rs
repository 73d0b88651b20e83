//! Web-fetch collaborator

use super::{CollaboratorResult, WebFetcher};
use crate::error::CollaboratorError;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref SCRIPT_OR_STYLE: Regex =
        Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Fetches a page over HTTP and reduces it to visible text.
pub struct HttpWebFetcher {
    client: Client,
}

impl HttpWebFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; financial-chat-orchestrator/0.1)")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }
}

#[async_trait::async_trait]
impl WebFetcher for HttpWebFetcher {
    async fn fetch(&self, url: &str) -> CollaboratorResult<String> {
        debug!(url, "Fetching web content");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url, error = %e, "Web fetch failed");
            CollaboratorError::Unavailable(format!("Failed to fetch {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Unavailable(format!(
                "{} returned {}",
                url, status
            )));
        }

        let body = response.text().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("Failed to read body of {}: {}", url, e))
        })?;

        let text = html_to_text(&body);
        if text.is_empty() {
            return Err(CollaboratorError::ExtractionFailed(format!(
                "No readable content at {}",
                url
            )));
        }

        Ok(text)
    }
}

/// Drop scripts, styles and tags; collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = HTML_TAG.replace_all(&without_code, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script type="text/javascript">var x = 1;</script></head>
            <body><h1>Market   update</h1><p>Revenue &amp; profit rose.</p></body></html>"#;

        assert_eq!(html_to_text(html), "Market update Revenue & profit rose.");
    }

    #[test]
    fn test_html_to_text_plain_input() {
        assert_eq!(html_to_text("  just\n\ntext "), "just text");
        assert_eq!(html_to_text("<div></div>"), "");
    }
}
