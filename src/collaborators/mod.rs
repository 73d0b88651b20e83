//! External collaborators
//!
//! The core never parses raw files, fetches pages itself or stores chart
//! bytes. It talks to three services through these traits:
//! - [`DocumentService`]: extracted content of an uploaded document
//! - [`WebFetcher`]: readable text of a URL
//! - [`ChartStore`]: chart artifact storage, handing back references

pub mod charts;
pub mod documents;
pub mod web;

pub use charts::{FsChartStore, InMemoryChartStore};
pub use documents::{HttpDocumentService, InMemoryDocumentService};
pub use web::HttpWebFetcher;

use crate::error::CollaboratorError;
use crate::models::{ChartRef, DataTable, DocumentKind};
use serde::{Deserialize, Serialize};

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Extracted content of one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedDocument {
    pub ref_id: String,
    pub kind: DocumentKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tables: Vec<DataTable>,
}

impl ExtractedDocument {
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.tables.iter().any(|t| !t.rows.is_empty())
    }
}

#[async_trait::async_trait]
pub trait DocumentService: Send + Sync {
    async fn get_document(&self, ref_id: &str) -> CollaboratorResult<ExtractedDocument>;
}

#[async_trait::async_trait]
pub trait WebFetcher: Send + Sync {
    /// Readable text content of `url`.
    async fn fetch(&self, url: &str) -> CollaboratorResult<String>;
}

#[async_trait::async_trait]
pub trait ChartStore: Send + Sync {
    async fn store(&self, filename: &str, bytes: Vec<u8>) -> CollaboratorResult<ChartRef>;
    async fn resolve(&self, chart: &ChartRef) -> CollaboratorResult<Vec<u8>>;
}

/// Content-addressed chart id: leading 16 bytes of SHA-256, hex encoded.
pub fn chart_id(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_id_is_stable_and_content_addressed() {
        let a = chart_id(b"{\"kind\":\"line\"}");
        let b = chart_id(b"{\"kind\":\"line\"}");
        let c = chart_id(b"{\"kind\":\"bar\"}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_has_content() {
        let mut doc = ExtractedDocument {
            ref_id: "d1".into(),
            kind: DocumentKind::Pdf,
            text: Some("   ".into()),
            tables: vec![],
        };
        assert!(!doc.has_content());
        doc.text = Some("Annual report".into());
        assert!(doc.has_content());
    }
}
