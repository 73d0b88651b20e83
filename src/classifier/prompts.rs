//! Prompt builders for the classification and extraction calls

use super::rules::RetryHint;
use crate::models::{Session, ToolDescriptor, ToolName};
use serde_json::{json, Value};

pub fn scores_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "scores": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                        "confidence": {"type": "number"}
                    },
                    "required": ["tool", "confidence"]
                }
            }
        },
        "required": ["scores"]
    })
}

pub fn scoring_prompt(query: &str, eligible: &[&ToolDescriptor], history: &str) -> String {
    let tools = eligible
        .iter()
        .map(|d| format!("- {}: {}", d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n");
    let history = if history.is_empty() { "(none)" } else { history };

    format!(
        r#"You route questions for a financial assistant.
Score how well each tool below fits the user's question, with a confidence
between 0 and 1. Score every listed tool and no other.

Tools:
{tools}

Recent conversation:
{history}

Question: {query}"#,
        tools = tools,
        history = history,
        query = query
    )
}

pub fn extraction_prompt(
    tool: ToolName,
    query: &str,
    draft: &Value,
    session: &Session,
    hint: Option<&RetryHint>,
) -> String {
    let documents = session
        .ready_documents()
        .filter(|d| tool.accepts(d.kind))
        .map(|d| format!("- id={} name={} kind={}", d.ref_id, d.name, d.kind))
        .collect::<Vec<_>>()
        .join("\n");
    let documents = if documents.is_empty() {
        "(none)".to_string()
    } else {
        documents
    };

    let mut prompt = format!(
        r#"Extract the arguments for the tool "{tool}" from the user's question.
Start from the draft and correct it only where the question says otherwise.
Use document ids exactly as listed.

Documents:
{documents}

Draft: {draft}

Question: {query}"#,
        tool = tool,
        documents = documents,
        draft = draft,
        query = query
    );

    if let Some(hint) = hint {
        prompt.push_str(&format!(
            "\n\nThe previous attempt failed: {}",
            hint.reason
        ));
        if !hint.available.is_empty() {
            prompt.push_str(&format!(
                "\nThe data offers only: {}. Pick from these.",
                hint.available.join(", ")
            ));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, DocumentRef, SessionKey};
    use crate::tools::descriptor_for;

    #[test]
    fn test_scoring_prompt_lists_only_eligible_tools() {
        let general = descriptor_for(ToolName::GeneralQuery);
        let web = descriptor_for(ToolName::WebResearch);
        let prompt = scoring_prompt("latest news", &[&web, &general], "");
        assert!(prompt.contains("- web_research:"));
        assert!(prompt.contains("- general_query:"));
        assert!(!prompt.contains("document_summarizer"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_extraction_prompt_includes_hint_and_documents() {
        let mut session = Session::new(SessionKey::new("u", "s").unwrap());
        session
            .documents
            .push(DocumentRef::new("d1", "q1.xlsx", DocumentKind::Spreadsheet).ready());
        session
            .documents
            .push(DocumentRef::new("d2", "notes.pdf", DocumentKind::Pdf).ready());
        let hint = RetryHint {
            reason: "metric 'profit' not found".into(),
            available: vec!["Sales".into()],
        };

        let prompt = extraction_prompt(
            ToolName::FinancialTrendAnalysis,
            "profit trend",
            &json!({"metric": "profit"}),
            &session,
            Some(&hint),
        );
        assert!(prompt.contains("id=d1"));
        assert!(!prompt.contains("id=d2"));
        assert!(prompt.contains("metric 'profit' not found"));
        assert!(prompt.contains("only: Sales"));
    }
}
