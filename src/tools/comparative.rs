//! Comparative analysis across documents
//!
//! Totals the same metrics in two or more documents (in the order given)
//! and reports the change between consecutive documents.

use super::chart::{persist_chart, ChartKind, ChartSpec, Series};
use super::table::format_number;
use super::trend::{find_period_column, growth_rate, normalise_quarter, row_quarters};
use super::{descriptor_for, parse_args, ready_document, Tool, ToolContext};
use crate::collaborators::{ChartStore, DocumentService};
use crate::error::ToolError;
use crate::models::{Cell, Coverage, DataTable, DocumentRef, ToolDescriptor, ToolName, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Metrics compared when none were requested.
const MAX_DEFAULT_METRICS: usize = 5;

#[derive(Debug, Deserialize)]
struct ComparativeArgs {
    document_ids: Vec<String>,
    #[serde(default)]
    metrics: Vec<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    quarters: Vec<String>,
}

pub fn change_assessment(change: f64) -> &'static str {
    if change > 20.0 {
        "significant increase"
    } else if change > 5.0 {
        "moderate increase"
    } else if change < -20.0 {
        "significant decrease"
    } else if change < -5.0 {
        "moderate decrease"
    } else {
        "stable"
    }
}

/// Sum of `target` over the first table that has it as a numeric column,
/// restricted to `quarters` when the table carries periods. A period table
/// with no rows in those quarters does not count as a match.
fn metric_total(tables: &[DataTable], target: &str, quarters: &[u8]) -> Option<(String, f64)> {
    for table in tables {
        let Some(column) = table
            .find_column(target)
            .filter(|c| table.numeric_columns().contains(c))
        else {
            continue;
        };

        let period = if quarters.is_empty() {
            None
        } else {
            find_period_column(table)
        };
        let total = match period {
            Some(period) => {
                let values: Vec<f64> = row_quarters(table, period)
                    .into_iter()
                    .enumerate()
                    .filter(|(_, q)| q.is_some_and(|q| quarters.contains(&q)))
                    .filter_map(|(row, _)| table.cell(row, column).as_number())
                    .collect();
                if values.is_empty() {
                    continue;
                }
                values.iter().sum()
            }
            None => table.column_values(column).iter().sum(),
        };
        return Some((table.columns[column].clone(), total));
    }
    None
}

/// Quarters that occur in any period table, as `Q1`..`Q4`.
fn present_quarters<'a>(tables: impl Iterator<Item = &'a DataTable>) -> Vec<String> {
    let mut seen = [false; 4];
    for table in tables {
        if let Some(period) = find_period_column(table) {
            for q in row_quarters(table, period).into_iter().flatten() {
                if (1..=4).contains(&q) {
                    seen[(q - 1) as usize] = true;
                }
            }
        }
    }
    (0..4)
        .filter(|&i| seen[i])
        .map(|i| format!("Q{}", i + 1))
        .collect()
}

pub struct ComparativeAnalysisTool {
    descriptor: ToolDescriptor,
    documents: Arc<dyn DocumentService>,
    charts: Arc<dyn ChartStore>,
}

impl ComparativeAnalysisTool {
    pub fn new(documents: Arc<dyn DocumentService>, charts: Arc<dyn ChartStore>) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::ComparativeAnalysis),
            documents,
            charts,
        }
    }

    async fn load_tables(&self, document: &DocumentRef) -> Result<Vec<DataTable>, ToolError> {
        let extracted = self.documents.get_document(&document.ref_id).await?;
        Ok(extracted
            .tables
            .into_iter()
            .filter(|t| !t.rows.is_empty())
            .collect())
    }
}

#[async_trait::async_trait]
impl Tool for ComparativeAnalysisTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: ComparativeArgs = parse_args(args)?;

        let mut ids: Vec<&str> = Vec::new();
        for id in &args.document_ids {
            if !id.trim().is_empty() && !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        if ids.len() < 2 {
            return Err(ToolError::InvalidArguments(
                "comparison needs at least two distinct documents".to_string(),
            ));
        }

        let mut quarters = Vec::new();
        for raw in &args.quarters {
            let q = normalise_quarter(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!("'{}' is not a quarter (Q1-Q4)", raw))
            })?;
            let n: u8 = q[1..].parse().unwrap_or(1);
            if !quarters.contains(&n) {
                quarters.push(n);
            }
        }

        let documents: Vec<&DocumentRef> = ids
            .iter()
            .map(|id| ready_document(ctx, self.name(), id))
            .collect::<Result<_, _>>()?;

        let mut loaded = Vec::new();
        for document in &documents {
            loaded.push((*document, self.load_tables(document).await?));
        }

        let mut available: Vec<String> = Vec::new();
        let mut name_counts: BTreeMap<String, (String, usize)> = BTreeMap::new();
        for (_, tables) in &loaded {
            let mut seen = Vec::new();
            for table in tables {
                for name in table.numeric_column_names() {
                    if !available.contains(&name) {
                        available.push(name.clone());
                    }
                    let key = name.trim().to_lowercase();
                    if !seen.contains(&key) {
                        seen.push(key.clone());
                        name_counts.entry(key).or_insert((name, 0)).1 += 1;
                    }
                }
            }
        }

        let mut requested: Vec<String> = Vec::new();
        for target in args.metrics.iter().chain(args.columns.iter()) {
            if !target.trim().is_empty() && !requested.contains(target) {
                requested.push(target.clone());
            }
        }
        let targets: Vec<String> = if requested.is_empty() {
            available
                .iter()
                .filter(|name| {
                    name_counts
                        .get(&name.trim().to_lowercase())
                        .is_some_and(|(_, n)| *n >= 2)
                })
                .take(MAX_DEFAULT_METRICS)
                .cloned()
                .collect()
        } else {
            requested.clone()
        };

        // metric -> per-document total, in document order
        let mut compared: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        for target in &targets {
            let mut label = None;
            let totals: Vec<Option<f64>> = loaded
                .iter()
                .map(|(_, tables)| {
                    metric_total(tables, target, &quarters).map(|(column, total)| {
                        if label.is_none() {
                            label = Some(column);
                        }
                        total
                    })
                })
                .collect();
            if totals.iter().filter(|t| t.is_some()).count() >= 2 {
                compared.push((label.unwrap_or_else(|| target.clone()), totals));
            }
        }

        if compared.is_empty() && !quarters.is_empty() {
            let outside_quarters = targets.iter().any(|target| {
                loaded
                    .iter()
                    .filter(|(_, tables)| metric_total(tables, target, &[]).is_some())
                    .count()
                    >= 2
            });
            if outside_quarters {
                let labels: Vec<String> = quarters.iter().map(|q| format!("Q{}", q)).collect();
                return Err(ToolError::Empty {
                    reason: format!("no {} values for {}", targets.join(", "), labels.join(", ")),
                    available: present_quarters(loaded.iter().flat_map(|(_, tables)| tables.iter())),
                });
            }
        }

        if compared.is_empty() {
            return Err(ToolError::Empty {
                reason: if requested.is_empty() {
                    "the documents share no numeric columns".to_string()
                } else {
                    format!("{} not found in at least two documents", requested.join(", "))
                },
                available,
            });
        }

        debug!(metrics = compared.len(), documents = loaded.len(), "Comparing documents");

        let names: Vec<String> = loaded.iter().map(|(d, _)| d.name.clone()).collect();
        let mut text = format!("### Comparison of {}\n", names.join(", "));
        if !quarters.is_empty() {
            let labels: Vec<String> = quarters.iter().map(|q| format!("Q{}", q)).collect();
            text.push_str(&format!("\nRestricted to {} where the data has periods.\n", labels.join(", ")));
        }

        let mut changes_data = Vec::new();
        for (metric, totals) in &compared {
            text.push_str(&format!("\n**{}**\n", metric));

            let present: Vec<(usize, f64)> = totals
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.map(|t| (i, t)))
                .collect();
            for pair in present.windows(2) {
                let ((from_i, from), (to_i, to)) = (pair[0], pair[1]);
                match growth_rate(from, to) {
                    Some(change) => {
                        text.push_str(&format!(
                            "- {} → {}: {} → {} ({:+.1}%, {})\n",
                            names[from_i],
                            names[to_i],
                            format_number(from),
                            format_number(to),
                            change,
                            change_assessment(change)
                        ));
                        changes_data.push(json!({
                            "metric": metric,
                            "from": ids[from_i],
                            "to": ids[to_i],
                            "change_pct": change,
                        }));
                    }
                    None => text.push_str(&format!(
                        "- {} → {}: {} → {}\n",
                        names[from_i],
                        names[to_i],
                        format_number(from),
                        format_number(to)
                    )),
                }
            }

            let highest = present.iter().copied().max_by(|a, b| a.1.total_cmp(&b.1));
            let lowest = present.iter().copied().min_by(|a, b| a.1.total_cmp(&b.1));
            if let (Some(high), Some(low)) = (highest, lowest) {
                text.push_str(&format!(
                    "- Highest: {} ({}); lowest: {} ({})\n",
                    names[high.0],
                    format_number(high.1),
                    names[low.0],
                    format_number(low.1)
                ));
            }

            let missing: Vec<&str> = totals
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_none())
                .map(|(i, _)| names[i].as_str())
                .collect();
            if !missing.is_empty() {
                text.push_str(&format!("- Not present in: {}\n", missing.join(", ")));
            }
        }

        let mut columns = vec!["Document".to_string()];
        columns.extend(compared.iter().map(|(m, _)| m.clone()));
        let rows = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut row = vec![Cell::Text(name.clone())];
                row.extend(
                    compared
                        .iter()
                        .map(|(_, totals)| totals[i].map(Cell::Number).unwrap_or(Cell::Empty)),
                );
                row
            })
            .collect();
        let table = DataTable::new(columns, rows).titled("Totals by document");

        let spec = ChartSpec {
            kind: ChartKind::Bar,
            title: "Comparison by document".into(),
            x_label: "Document".into(),
            y_label: "Total".into(),
            categories: names.clone(),
            series: compared
                .iter()
                .map(|(metric, totals)| Series {
                    name: metric.clone(),
                    values: totals.clone(),
                })
                .collect(),
        };
        let chart_refs = persist_chart(self.charts.as_ref(), ctx.message_id, self.name(), &spec)
            .await
            .into_iter()
            .collect();

        Ok(ToolResult {
            text,
            tables: vec![table],
            chart_refs,
            coverage: Some(Coverage {
                requested,
                found: compared.iter().map(|(m, _)| m.clone()).collect(),
                available,
            }),
            data: json!({
                "document_ids": ids,
                "totals": compared.iter().map(|(m, t)| json!({"metric": m, "values": t})).collect::<Vec<_>>(),
                "changes": changes_data,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spreadsheet_session, test_services};

    fn quarter_table(revenue: [f64; 2], cost: f64) -> DataTable {
        DataTable::new(
            vec!["Quarter".into(), "Revenue".into(), "Cost".into()],
            vec![
                vec![Cell::Text("Q1".into()), Cell::Number(revenue[0]), Cell::Number(cost)],
                vec![Cell::Text("Q2".into()), Cell::Number(revenue[1]), Cell::Number(cost)],
            ],
        )
    }

    #[test]
    fn test_change_assessment_bands() {
        assert_eq!(change_assessment(25.0), "significant increase");
        assert_eq!(change_assessment(10.0), "moderate increase");
        assert_eq!(change_assessment(0.0), "stable");
        assert_eq!(change_assessment(-10.0), "moderate decrease");
        assert_eq!(change_assessment(-25.0), "significant decrease");
    }

    #[tokio::test]
    async fn test_compares_common_columns_in_document_order() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("a", vec![quarter_table([100.0, 100.0], 50.0)]).await;
        handles.add_spreadsheet("b", vec![quarter_table([150.0, 150.0], 50.0)]).await;
        let session = spreadsheet_session(&["a", "b"]);
        let tool = ComparativeAnalysisTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool
            .invoke(&json!({"document_ids": ["a", "b"]}), &ctx)
            .await
            .unwrap();

        let coverage = result.coverage.unwrap();
        assert_eq!(coverage.found, vec!["Revenue".to_string(), "Cost".to_string()]);
        assert_eq!(result.data["changes"][0]["change_pct"], 50.0);
        assert!(result.text.contains("significant increase"));
        assert!(result.text.contains("stable"));
        assert_eq!(result.chart_refs.len(), 1);
    }

    #[tokio::test]
    async fn test_quarter_filter_applies_to_period_tables() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("a", vec![quarter_table([100.0, 300.0], 50.0)]).await;
        handles.add_spreadsheet("b", vec![quarter_table([110.0, 900.0], 50.0)]).await;
        let session = spreadsheet_session(&["a", "b"]);
        let tool = ComparativeAnalysisTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool
            .invoke(
                &json!({"document_ids": ["a", "b"], "metrics": ["revenue"], "quarters": ["Q1"]}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(result.data["totals"][0]["values"], json!([100.0, 110.0]));
    }

    #[tokio::test]
    async fn test_quarter_without_data_is_empty_with_present_quarters() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("a", vec![quarter_table([100.0, 300.0], 50.0)]).await;
        handles.add_spreadsheet("b", vec![quarter_table([110.0, 900.0], 50.0)]).await;
        let session = spreadsheet_session(&["a", "b"]);
        let tool = ComparativeAnalysisTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(
                &json!({"document_ids": ["a", "b"], "metrics": ["revenue"], "quarters": ["Q4"]}),
                &ctx,
            )
            .await
            .unwrap_err();

        match err {
            ToolError::Empty { reason, available } => {
                assert!(reason.contains("Q4"));
                assert_eq!(available, vec!["Q1".to_string(), "Q2".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requires_two_distinct_documents() {
        let (services, _handles) = test_services();
        let session = spreadsheet_session(&["a"]);
        let tool = ComparativeAnalysisTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(&json!({"document_ids": ["a", "a"]}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_unknown_metric_is_empty_with_available() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("a", vec![quarter_table([1.0, 2.0], 3.0)]).await;
        handles.add_spreadsheet("b", vec![quarter_table([1.0, 2.0], 3.0)]).await;
        let session = spreadsheet_session(&["a", "b"]);
        let tool = ComparativeAnalysisTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(&json!({"document_ids": ["a", "b"], "columns": ["headcount"]}), &ctx)
            .await
            .unwrap_err();
        match err {
            ToolError::Empty { available, .. } => {
                assert_eq!(available, vec!["Revenue".to_string(), "Cost".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
