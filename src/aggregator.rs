//! Response aggregation
//!
//! Turns a tool result into one markdown body: text, then tables, then a
//! short note naming the answering tool when more than one was tried.
//! Chart references pass through untouched.

use crate::models::{ChartRef, Intent, ToolInvocation, ToolResult};

pub fn aggregate(result: &ToolResult, intent: &Intent, invocation: &ToolInvocation) -> (String, Vec<ChartRef>) {
    let mut body = result.text.trim().to_string();

    for table in result.tables.iter().filter(|t| !t.rows.is_empty()) {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(table.to_markdown().trim_end());
    }

    let tried = invocation.tools_attempted();
    if tried.len() > 1 {
        let failed: Vec<String> = tried
            .iter()
            .filter(|t| **t != intent.tool)
            .map(|t| format!("`{}`", t))
            .collect();
        body.push_str(&format!(
            "\n\n_Answered by `{}` after {} failed._",
            intent.tool,
            failed.join(", ")
        ));
    }

    (body, result.chart_refs.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::models::{AttemptOutcome, Cell, DataTable, InvocationAttempt, ToolName};
    use chrono::Utc;
    use serde_json::{json, Value};

    fn attempt(tool: ToolName, outcome: AttemptOutcome) -> InvocationAttempt {
        InvocationAttempt {
            tool,
            arguments: json!({}),
            outcome,
            retry: false,
            execution_time_ms: 1,
            started_at: Utc::now(),
        }
    }

    fn intent(tool: ToolName) -> Intent {
        Intent {
            tool,
            confidence: 1.0,
            arguments: Value::Null,
        }
    }

    #[test]
    fn test_single_tool_has_no_disclosure() {
        let result = ToolResult {
            text: "Revenue grew.".into(),
            tables: vec![DataTable::new(
                vec!["Quarter".into(), "Total".into()],
                vec![vec![Cell::Text("Q1".into()), Cell::Number(10.0)]],
            )],
            chart_refs: vec![ChartRef {
                chart_id: "c1".into(),
                filename: "m_financial_trend_analysis.json".into(),
            }],
            ..Default::default()
        };
        let mut invocation = ToolInvocation::new();
        invocation
            .attempts
            .push(attempt(ToolName::FinancialTrendAnalysis, AttemptOutcome::Succeeded));

        let (text, charts) = aggregate(&result, &intent(ToolName::FinancialTrendAnalysis), &invocation);
        assert!(text.starts_with("Revenue grew.\n\n| Quarter | Total |"));
        assert!(!text.contains("Answered by"));
        assert_eq!(charts, result.chart_refs);
    }

    #[test]
    fn test_fallback_is_disclosed() {
        let mut invocation = ToolInvocation::new();
        invocation.attempts.push(attempt(
            ToolName::WebResearch,
            AttemptOutcome::Failed {
                kind: ToolErrorKind::Unreachable,
                detail: "down".into(),
            },
        ));
        invocation
            .attempts
            .push(attempt(ToolName::GeneralQuery, AttemptOutcome::Succeeded));

        let (text, _) = aggregate(
            &ToolResult::text("Here is what I know."),
            &intent(ToolName::GeneralQuery),
            &invocation,
        );
        assert!(text.ends_with("_Answered by `general_query` after `web_research` failed._"));
    }
}
