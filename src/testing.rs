//! Test doubles shared by the unit tests

use crate::collaborators::{
    CollaboratorResult, ExtractedDocument, InMemoryChartStore, InMemoryDocumentService, WebFetcher,
};
use crate::error::{CollaboratorError, OrchestrationError};
use crate::llm::{Completion, LanguageModel};
use crate::models::{DataTable, DocumentKind, DocumentRef, Session, SessionKey};
use crate::tools::ToolServices;
use crate::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    once: Vec<(String, Completion)>,
    always: Vec<(String, Completion)>,
    prompts: Vec<String>,
}

/// Language model answering from substring rules. Unmatched prompts get
/// `NoConfidentAnswer`. Clones share rules and the prompt log.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
    failing: bool,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with an LLM error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn on(self, needle: &str, completion: Completion) -> Self {
        self.script
            .lock()
            .unwrap()
            .always
            .push((needle.to_string(), completion));
        self
    }

    /// Rule used for the first matching call only; checked before `on` rules.
    pub fn once(self, needle: &str, completion: Completion) -> Self {
        self.script
            .lock()
            .unwrap()
            .once
            .push((needle.to_string(), completion));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().prompts.clone()
    }

    pub fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _schema: Option<&Value>) -> Result<Completion> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        script.prompts.push(prompt.to_string());
        if self.failing {
            return Err(OrchestrationError::LlmError("scripted failure".to_string()));
        }

        if let Some(i) = script.once.iter().position(|(n, _)| prompt.contains(n.as_str())) {
            return Ok(script.once.remove(i).1);
        }
        Ok(script
            .always
            .iter()
            .find(|(n, _)| prompt.contains(n.as_str()))
            .map(|(_, c)| c.clone())
            .unwrap_or(Completion::NoConfidentAnswer))
    }
}

/// Web fetcher returning a fixed page or a fixed failure.
pub struct StaticWebFetcher {
    page: CollaboratorResult<String>,
    delay: Option<Duration>,
}

impl StaticWebFetcher {
    pub fn page(text: &str) -> Self {
        Self {
            page: Ok(text.to_string()),
            delay: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            page: Err(CollaboratorError::Unavailable("connection refused".to_string())),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl WebFetcher for StaticWebFetcher {
    async fn fetch(&self, _url: &str) -> CollaboratorResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.page.clone()
    }
}

/// Concrete handles behind the services returned by [`test_services`].
pub struct TestHandles {
    pub documents: InMemoryDocumentService,
    pub charts: InMemoryChartStore,
}

impl TestHandles {
    pub async fn add_spreadsheet(&self, ref_id: &str, tables: Vec<DataTable>) {
        self.documents
            .insert(ExtractedDocument {
                ref_id: ref_id.to_string(),
                kind: DocumentKind::Spreadsheet,
                text: None,
                tables,
            })
            .await;
    }
}

pub fn test_services() -> (ToolServices, TestHandles) {
    test_services_with(ScriptedModel::new(), StaticWebFetcher::unavailable())
}

pub fn test_services_with(model: ScriptedModel, web: StaticWebFetcher) -> (ToolServices, TestHandles) {
    let documents = InMemoryDocumentService::new();
    let charts = InMemoryChartStore::new();
    let services = ToolServices {
        documents: Arc::new(documents.clone()),
        web: Arc::new(web),
        charts: Arc::new(charts.clone()),
        llm: Arc::new(model),
    };
    (services, TestHandles { documents, charts })
}

/// Session holding ready spreadsheets named `<id>.xlsx`.
pub fn spreadsheet_session(ids: &[&str]) -> Session {
    let mut session = Session::new(SessionKey::new("user-1", "session-1").unwrap());
    for id in ids {
        session.documents.push(
            DocumentRef::new(id, &format!("{}.xlsx", id), DocumentKind::Spreadsheet).ready(),
        );
    }
    session
}
