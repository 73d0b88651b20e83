//! Document-service clients

use super::{CollaboratorResult, DocumentService, ExtractedDocument};
use crate::error::CollaboratorError;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// HTTP client for the document-extraction service.
///
/// `GET {base_url}/documents/{ref_id}` returns an [`ExtractedDocument`].
#[derive(Clone)]
pub struct HttpDocumentService {
    client: Client,
    base_url: String,
}

impl HttpDocumentService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentService for HttpDocumentService {
    async fn get_document(&self, ref_id: &str) -> CollaboratorResult<ExtractedDocument> {
        let url = format!("{}/documents/{}", self.base_url, ref_id);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(ref_id, error = %e, "Document service request failed");
            CollaboratorError::Unavailable(format!("Document service request failed: {}", e))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CollaboratorError::NotFound(format!("document {}", ref_id)))
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let detail = response.text().await.unwrap_or_default();
                return Err(CollaboratorError::ExtractionFailed(format!(
                    "document {}: {}",
                    ref_id, detail
                )));
            }
            status if !status.is_success() => {
                return Err(CollaboratorError::Unavailable(format!(
                    "Document service returned {} for {}",
                    status, ref_id
                )))
            }
            _ => {}
        }

        response.json::<ExtractedDocument>().await.map_err(|e| {
            CollaboratorError::ExtractionFailed(format!("Invalid document payload: {}", e))
        })
    }
}

/// In-process document service for development and tests.
#[derive(Default, Clone)]
pub struct InMemoryDocumentService {
    documents: Arc<RwLock<HashMap<String, ExtractedDocument>>>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, document: ExtractedDocument) {
        let mut documents = self.documents.write().await;
        documents.insert(document.ref_id.clone(), document);
    }
}

#[async_trait::async_trait]
impl DocumentService for InMemoryDocumentService {
    async fn get_document(&self, ref_id: &str) -> CollaboratorResult<ExtractedDocument> {
        let documents = self.documents.read().await;
        documents
            .get(ref_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("document {}", ref_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let service = InMemoryDocumentService::new();
        service
            .insert(ExtractedDocument {
                ref_id: "doc-1".into(),
                kind: DocumentKind::Pdf,
                text: Some("Q1 report".into()),
                tables: vec![],
            })
            .await;

        let found = service.get_document("doc-1").await.unwrap();
        assert_eq!(found.text.as_deref(), Some("Q1 report"));

        let missing = service.get_document("doc-2").await;
        assert!(matches!(missing, Err(CollaboratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_http_service_unreachable_maps_to_unavailable() {
        let service = HttpDocumentService::new("http://127.0.0.1:9", Duration::from_millis(500));
        let result = service.get_document("doc-1").await;
        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
    }
}
