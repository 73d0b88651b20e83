//! Core data models for the financial chat orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{OrchestrationError, ToolErrorKind};

//
// ================= Tools =================
//

/// Closed set of tools the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    FinancialTrendAnalysis,
    ComparativeAnalysis,
    ExtractTableData,
    StatisticalAnalysis,
    DocumentSummarizer,
    WebResearch,
    GeneralQuery,
}

impl ToolName {
    /// Static priority order; earlier wins ties.
    pub const ALL: [ToolName; 7] = [
        ToolName::FinancialTrendAnalysis,
        ToolName::ComparativeAnalysis,
        ToolName::ExtractTableData,
        ToolName::StatisticalAnalysis,
        ToolName::DocumentSummarizer,
        ToolName::WebResearch,
        ToolName::GeneralQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::FinancialTrendAnalysis => "financial_trend_analysis",
            ToolName::ComparativeAnalysis => "comparative_analysis",
            ToolName::ExtractTableData => "extract_table_data",
            ToolName::StatisticalAnalysis => "statistical_analysis",
            ToolName::DocumentSummarizer => "document_summarizer",
            ToolName::WebResearch => "web_research",
            ToolName::GeneralQuery => "general_query",
        }
    }

    pub fn priority(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ToolName::ALL
            .iter()
            .find(|t| t.as_str() == wanted)
            .copied()
            .ok_or_else(|| OrchestrationError::InvalidRequest(format!("Unknown tool: {}", s)))
    }
}

/// What a tool needs from the session before it can run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    /// Needs ready spreadsheet data
    DataBound,
    /// Needs ready extracted documents
    DocumentBound,
    /// Needs a URL or a web signal
    WebBound,
    /// Always eligible
    General,
}

/// Static registry entry for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub capability: CapabilityTag,
    pub required_args: &'static [&'static str],
    pub min_ready_documents: usize,
}

//
// ================= Session =================
//

/// Conversation scope: one (user, session) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: &str, session_id: &str) -> crate::Result<Self> {
        if user_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "user_id must not be empty".to_string(),
            ));
        }
        if session_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "session_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            user_id: user_id.trim().to_string(),
            session_id: session_id.trim().to_string(),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Language established for the conversation, detected or selected.
    pub language: Option<String>,
    /// Explicit selection; sticky until changed.
    #[serde(default)]
    pub language_pinned: bool,
    /// Most recent window of the log, chronological.
    pub messages: Vec<Message>,
    /// Length of the full log.
    pub message_count: usize,
    pub documents: Vec<DocumentRef>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            created_at: now,
            last_active: now,
            language: None,
            language_pinned: false,
            messages: Vec::new(),
            message_count: 0,
            documents: Vec::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.message_count == 0
    }

    /// The `count` most recent messages, oldest first.
    pub fn recent(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    pub fn document(&self, ref_id: &str) -> Option<&DocumentRef> {
        self.documents.iter().find(|d| d.ref_id == ref_id)
    }

    pub fn ready_documents(&self) -> impl Iterator<Item = &DocumentRef> {
        self.documents
            .iter()
            .filter(|d| d.status == ExtractionStatus::Ready)
    }

    pub fn ready_count(&self, accept: impl Fn(DocumentKind) -> bool) -> usize {
        self.ready_documents().filter(|d| accept(d.kind)).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: usize,
    pub language: Option<String>,
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(OrchestrationError::StateError(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub role: Role,
    /// Text as the user wrote or received it.
    pub text: String,
    /// Working-language rendering when it differs from `text`.
    pub translated_text: Option<String>,
    pub language: String,
    pub timestamp: DateTime<Utc>,
    pub invocation: Option<ToolInvocation>,
}

impl Message {
    pub fn user(text: &str, translated_text: Option<String>, language: &str) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role: Role::User,
            text: text.to_string(),
            translated_text,
            language: language.to_string(),
            timestamp: Utc::now(),
            invocation: None,
        }
    }

    pub fn assistant(
        message_id: Uuid,
        text: String,
        translated_text: Option<String>,
        language: &str,
        invocation: Option<ToolInvocation>,
    ) -> Self {
        Self {
            message_id,
            role: Role::Assistant,
            text,
            translated_text,
            language: language.to_string(),
            timestamp: Utc::now(),
            invocation,
        }
    }

    /// Text in the working language.
    pub fn working_text(&self) -> &str {
        self.translated_text.as_deref().unwrap_or(&self.text)
    }
}

//
// ================= Documents =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Spreadsheet,
    Pdf,
    Docx,
    WebLink,
}

impl DocumentKind {
    pub fn is_text_document(&self) -> bool {
        matches!(self, DocumentKind::Pdf | DocumentKind::Docx)
    }

    pub fn is_file(&self) -> bool {
        !matches!(self, DocumentKind::WebLink)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocumentKind::Spreadsheet => "spreadsheet",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::WebLink => "web_link",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for DocumentKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spreadsheet" => Ok(DocumentKind::Spreadsheet),
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "web_link" => Ok(DocumentKind::WebLink),
            other => Err(OrchestrationError::StateError(format!(
                "Unknown document kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Ready => "ready",
            ExtractionStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for ExtractionStatus {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExtractionStatus::Pending),
            "ready" => Ok(ExtractionStatus::Ready),
            "failed" => Ok(ExtractionStatus::Failed),
            other => Err(OrchestrationError::StateError(format!(
                "Unknown extraction status: {}",
                other
            ))),
        }
    }
}

/// Pointer to an uploaded file or linked URL owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    pub ref_id: String,
    pub name: String,
    pub kind: DocumentKind,
    pub status: ExtractionStatus,
    /// Source URL for web links.
    pub source: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl DocumentRef {
    pub fn new(ref_id: &str, name: &str, kind: DocumentKind) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            name: name.to_string(),
            kind,
            status: ExtractionStatus::Pending,
            source: None,
            registered_at: Utc::now(),
        }
    }

    pub fn ready(mut self) -> Self {
        self.status = ExtractionStatus::Ready;
        self
    }

    pub fn with_source(mut self, url: &str) -> Self {
        self.source = Some(url.to_string());
        self
    }
}

//
// ================= Intents =================
//

/// Classifier decision: which tool, how sure, with which arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub tool: ToolName,
    pub confidence: f32,
    pub arguments: Value,
}

impl Intent {
    pub fn with_arguments(&self, arguments: Value) -> Self {
        Self {
            tool: self.tool,
            confidence: self.confidence,
            arguments,
        }
    }
}

//
// ================= Tool Results =================
//

/// A single table cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataTable {
    #[serde(default)]
    pub title: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Reference to a stored chart artifact; never the bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartRef {
    pub chart_id: String,
    pub filename: String,
}

/// What a data-bound tool was asked for versus what it found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Coverage {
    pub requested: Vec<String>,
    pub found: Vec<String>,
    pub available: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<DataTable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chart_refs: Vec<ChartRef>,
    #[serde(default)]
    pub coverage: Option<Coverage>,
    #[serde(default)]
    pub data: Value,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tables.iter().all(|t| t.rows.is_empty())
    }
}

//
// ================= Invocation Record =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { kind: ToolErrorKind, detail: String },
    /// Ran, but the result failed validation.
    Rejected { issues: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationAttempt {
    pub tool: ToolName,
    pub arguments: Value,
    pub outcome: AttemptOutcome,
    pub retry: bool,
    pub execution_time_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl InvocationAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

/// Durable record of every attempt made for one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: Uuid,
    pub attempts: Vec<InvocationAttempt>,
    pub answered_by: Option<ToolName>,
    pub result: Option<ToolResult>,
}

impl ToolInvocation {
    pub fn new() -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            attempts: Vec::new(),
            answered_by: None,
            result: None,
        }
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.succeeded()).count()
    }

    /// Distinct tools tried, in order of first attempt.
    pub fn tools_attempted(&self) -> Vec<ToolName> {
        let mut tools = Vec::new();
        for attempt in &self.attempts {
            if !tools.contains(&attempt.tool) {
                tools.push(attempt.tool);
            }
        }
        tools
    }
}

impl Default for ToolInvocation {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Reply =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub message_id: Uuid,
    pub text: String,
    pub chart_refs: Vec<ChartRef>,
    pub language: String,
    pub answered_by: Option<ToolName>,
    pub translation_degraded: bool,
    pub invocation: ToolInvocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_round_trip_and_priority() {
        for (i, tool) in ToolName::ALL.iter().enumerate() {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), *tool);
            assert_eq!(tool.priority(), i);
        }
        assert!("weather_tool".parse::<ToolName>().is_err());
    }

    #[test]
    fn test_session_key_rejects_blank_ids() {
        assert!(SessionKey::new("", "s1").is_err());
        assert!(SessionKey::new("u1", "  ").is_err());
        assert!(SessionKey::new("u1", "s1").is_ok());
    }

    #[test]
    fn test_recent_window_keeps_latest_in_order() {
        let mut session = Session::new(SessionKey::new("u", "s").unwrap());
        for i in 0..6 {
            session.messages.push(Message::user(&format!("m{}", i), None, "en"));
        }
        let recent: Vec<&str> = session.recent(3).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(recent, vec!["m3", "m4", "m5"]);
        assert_eq!(session.recent(50).len(), 6);
    }

    #[test]
    fn test_ready_count_filters_status_and_kind() {
        let mut session = Session::new(SessionKey::new("u", "s").unwrap());
        session.documents.push(DocumentRef::new("a", "a.xlsx", DocumentKind::Spreadsheet).ready());
        session.documents.push(DocumentRef::new("b", "b.xlsx", DocumentKind::Spreadsheet));
        session.documents.push(DocumentRef::new("c", "c.pdf", DocumentKind::Pdf).ready());

        assert_eq!(session.ready_count(|k| k == DocumentKind::Spreadsheet), 1);
        assert_eq!(session.ready_count(|k| k.is_file()), 2);
    }

    #[test]
    fn test_tools_attempted_is_distinct() {
        let mut invocation = ToolInvocation::new();
        for (tool, retry) in [
            (ToolName::FinancialTrendAnalysis, false),
            (ToolName::FinancialTrendAnalysis, true),
            (ToolName::GeneralQuery, false),
        ] {
            invocation.attempts.push(InvocationAttempt {
                tool,
                arguments: Value::Null,
                outcome: AttemptOutcome::Succeeded,
                retry,
                execution_time_ms: 0,
                started_at: Utc::now(),
            });
        }
        assert_eq!(
            invocation.tools_attempted(),
            vec![ToolName::FinancialTrendAnalysis, ToolName::GeneralQuery]
        );
    }
}
