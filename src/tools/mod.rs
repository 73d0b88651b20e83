//! Tool trait, descriptors and registry
//!
//! Every analysis capability sits behind the same [`Tool`] contract:
//! validate arguments, do the work through the external collaborators and
//! return a [`ToolResult`] or a [`ToolError`]. The registry is built once
//! at startup and is read-only afterwards.

pub mod chart;
pub mod comparative;
pub mod extraction;
pub mod general_query;
pub mod statistics;
pub mod summarizer;
pub mod table;
pub mod trend;
pub mod web_research;

use crate::collaborators::{ChartStore, DocumentService, WebFetcher};
use crate::config::OrchestratorConfig;
use crate::error::ToolError;
use crate::llm::LanguageModel;
use crate::models::{
    CapabilityTag, DataTable, DocumentKind, DocumentRef, ExtractionStatus, Session,
    ToolDescriptor, ToolName, ToolResult,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-invocation context handed to a tool.
pub struct ToolContext<'a> {
    pub session: &'a Session,
    /// Assistant message the result will be attached to.
    pub message_id: Uuid,
}

/// Trait for a single tool adapter
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    fn name(&self) -> ToolName {
        self.descriptor().name
    }

    async fn invoke(
        &self,
        args: &Value,
        ctx: &ToolContext<'_>,
    ) -> std::result::Result<ToolResult, ToolError>;
}

/// Tool registry, ordered by static tool priority
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn contains(&self, name: ToolName) -> bool {
        self.tools.contains_key(&name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor().clone()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Descriptors =================
//

impl ToolName {
    /// Document kinds this tool can work on.
    pub fn accepts(&self, kind: DocumentKind) -> bool {
        match self {
            ToolName::FinancialTrendAnalysis
            | ToolName::ExtractTableData
            | ToolName::StatisticalAnalysis => kind == DocumentKind::Spreadsheet,
            ToolName::DocumentSummarizer => kind.is_text_document(),
            ToolName::ComparativeAnalysis => kind.is_file(),
            ToolName::WebResearch => kind == DocumentKind::WebLink,
            ToolName::GeneralQuery => false,
        }
    }
}

pub fn descriptor_for(name: ToolName) -> ToolDescriptor {
    let (description, capability, required_args, min_ready_documents): (
        &'static str,
        CapabilityTag,
        &'static [&'static str],
        usize,
    ) = match name {
        ToolName::FinancialTrendAnalysis => (
            "Quarter-over-quarter trend of one financial metric in an uploaded spreadsheet, with growth rates and a recommendation",
            CapabilityTag::DataBound,
            &["document_id", "metric", "quarters"],
            1,
        ),
        ToolName::ComparativeAnalysis => (
            "Compare financial figures across two or more uploaded documents and report changes between them",
            CapabilityTag::DocumentBound,
            &["document_ids"],
            2,
        ),
        ToolName::ExtractTableData => (
            "Pull specific rows from an uploaded spreadsheet: top N, filters, search or aggregates",
            CapabilityTag::DataBound,
            &["document_id", "extraction_type"],
            1,
        ),
        ToolName::StatisticalAnalysis => (
            "Descriptive statistics (mean, median, spread, quartiles, outliers) of spreadsheet columns",
            CapabilityTag::DataBound,
            &["document_id"],
            1,
        ),
        ToolName::DocumentSummarizer => (
            "Summarise an uploaded PDF or DOCX financial document",
            CapabilityTag::DocumentBound,
            &["document_id"],
            1,
        ),
        ToolName::WebResearch => (
            "Fetch a web page and answer the question from its content",
            CapabilityTag::WebBound,
            &["url"],
            0,
        ),
        ToolName::GeneralQuery => (
            "General financial questions and conversation without document data",
            CapabilityTag::General,
            &["query"],
            0,
        ),
    };

    ToolDescriptor {
        name,
        description,
        capability,
        required_args,
        min_ready_documents,
    }
}

/// JSON schema of a tool's arguments, used to constrain extraction.
pub fn argument_schema(name: ToolName) -> Value {
    let string_list = json!({"type": "array", "items": {"type": "string"}});

    let properties = match name {
        ToolName::FinancialTrendAnalysis => json!({
            "document_id": {"type": "string"},
            "metric": {"type": "string"},
            "quarters": {"type": "array", "items": {"type": "string", "enum": ["Q1", "Q2", "Q3", "Q4"]}}
        }),
        ToolName::ComparativeAnalysis => json!({
            "document_ids": string_list,
            "metrics": string_list,
            "columns": string_list,
            "quarters": string_list
        }),
        ToolName::ExtractTableData => json!({
            "document_id": {"type": "string"},
            "extraction_type": {"type": "string", "enum": ["all", "top_n", "filter", "search", "aggregate"]},
            "n_results": {"type": "integer"},
            "sort_column": {"type": "string"},
            "ascending": {"type": "boolean"},
            "filters": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "column": {"type": "string"},
                        "operator": {"type": "string", "enum": [">", "<", ">=", "<=", "==", "!=", "contains"]},
                        "value": {"type": "string"}
                    },
                    "required": ["column", "operator", "value"]
                }
            },
            "search_term": {"type": "string"},
            "group_column": {"type": "string"}
        }),
        ToolName::StatisticalAnalysis => json!({
            "document_id": {"type": "string"},
            "columns": string_list
        }),
        ToolName::DocumentSummarizer => json!({
            "document_id": {"type": "string"}
        }),
        ToolName::WebResearch => json!({
            "url": {"type": "string"},
            "query": {"type": "string"}
        }),
        ToolName::GeneralQuery => json!({
            "query": {"type": "string"},
            "context": {"type": "string"}
        }),
    };

    json!({
        "type": "object",
        "properties": properties,
        "required": descriptor_for(name).required_args,
    })
}

//
// ================= Shared Helpers =================
//

/// Everything the adapters talk to.
#[derive(Clone)]
pub struct ToolServices {
    pub documents: Arc<dyn DocumentService>,
    pub web: Arc<dyn WebFetcher>,
    pub charts: Arc<dyn ChartStore>,
    pub llm: Arc<dyn LanguageModel>,
}

/// Deserialize tool arguments, rejecting anything but a JSON object.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value) -> std::result::Result<T, ToolError> {
    if !args.is_object() {
        return Err(ToolError::InvalidArguments(
            "arguments must be a JSON object".to_string(),
        ));
    }
    serde_json::from_value(args.clone()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Resolve a document id against the session: it must exist, be ready and
/// be a kind the tool accepts.
pub(crate) fn ready_document<'a>(
    ctx: &'a ToolContext<'_>,
    tool: ToolName,
    ref_id: &str,
) -> std::result::Result<&'a DocumentRef, ToolError> {
    let document = ctx.session.document(ref_id).ok_or_else(|| {
        ToolError::InvalidArguments(format!("document {} is not part of this session", ref_id))
    })?;

    if document.status != ExtractionStatus::Ready {
        return Err(ToolError::InvalidArguments(format!(
            "document {} is {}, not ready",
            ref_id, document.status
        )));
    }
    if !tool.accepts(document.kind) {
        return Err(ToolError::InvalidArguments(format!(
            "{} cannot work on {} documents",
            tool, document.kind
        )));
    }
    Ok(document)
}

/// Extracted tables of a document; a document without tables is empty.
pub(crate) async fn fetch_tables(
    documents: &dyn DocumentService,
    ref_id: &str,
) -> std::result::Result<Vec<DataTable>, ToolError> {
    let extracted = documents.get_document(ref_id).await?;
    let tables: Vec<DataTable> = extracted
        .tables
        .into_iter()
        .filter(|t| !t.rows.is_empty())
        .collect();

    if tables.is_empty() {
        return Err(ToolError::empty(format!("document {} has no tables", ref_id)));
    }
    Ok(tables)
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> std::result::Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidArguments(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

/// Build the full registry over the given collaborators.
pub fn create_default_registry(services: &ToolServices, config: &OrchestratorConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(trend::FinancialTrendTool::new(
        services.documents.clone(),
        services.charts.clone(),
    )));
    registry.register(Arc::new(comparative::ComparativeAnalysisTool::new(
        services.documents.clone(),
        services.charts.clone(),
    )));
    registry.register(Arc::new(extraction::TableExtractionTool::new(
        services.documents.clone(),
    )));
    registry.register(Arc::new(statistics::StatisticalAnalysisTool::new(
        services.documents.clone(),
    )));
    registry.register(Arc::new(summarizer::DocumentSummarizerTool::new(
        services.documents.clone(),
        services.llm.clone(),
        config.summary_input_limit,
    )));
    registry.register(Arc::new(web_research::WebResearchTool::new(
        services.web.clone(),
        services.llm.clone(),
        config.web_content_limit,
    )));
    // Half the per-call budget leaves room for the canned reply.
    registry.register(Arc::new(general_query::GeneralQueryTool::new(
        services.llm.clone(),
        config.call_timeout / 2,
    )));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionKey;
    use crate::testing::test_services;

    #[test]
    fn test_default_registry_lists_in_priority_order() {
        let registry = create_default_registry(&test_services().0, &OrchestratorConfig::default());
        let names: Vec<ToolName> = registry.descriptors().iter().map(|d| d.name).collect();
        assert_eq!(names, ToolName::ALL.to_vec());
        assert!(registry.contains(ToolName::GeneralQuery));
    }

    #[test]
    fn test_schemas_require_descriptor_arguments() {
        for tool in ToolName::ALL {
            let schema = argument_schema(tool);
            let required: Vec<&str> = schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            assert_eq!(required, descriptor_for(tool).required_args.to_vec());
            for field in required {
                assert!(schema["properties"].get(field).is_some(), "{} missing {}", tool, field);
            }
        }
    }

    #[test]
    fn test_ready_document_checks_membership_status_and_kind() {
        let mut session = Session::new(SessionKey::new("u", "s").unwrap());
        session.documents.push(DocumentRef::new("xls", "q1.xlsx", DocumentKind::Spreadsheet).ready());
        session.documents.push(DocumentRef::new("pending", "q2.xlsx", DocumentKind::Spreadsheet));
        session.documents.push(DocumentRef::new("pdf", "report.pdf", DocumentKind::Pdf).ready());
        let ctx = ToolContext {
            session: &session,
            message_id: Uuid::new_v4(),
        };

        assert!(ready_document(&ctx, ToolName::FinancialTrendAnalysis, "xls").is_ok());
        assert!(ready_document(&ctx, ToolName::FinancialTrendAnalysis, "pending").is_err());
        assert!(ready_document(&ctx, ToolName::FinancialTrendAnalysis, "pdf").is_err());
        assert!(ready_document(&ctx, ToolName::DocumentSummarizer, "pdf").is_ok());
        assert!(ready_document(&ctx, ToolName::DocumentSummarizer, "other").is_err());
    }

    #[test]
    fn test_parse_args_rejects_non_objects() {
        #[derive(serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            url: String,
        }
        assert!(parse_args::<Args>(&json!("https://x")).is_err());
        assert!(parse_args::<Args>(&json!({"link": "https://x"})).is_err());
        assert!(parse_args::<Args>(&json!({"url": "https://x"})).is_ok());
    }
}
