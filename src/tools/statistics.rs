//! Descriptive statistics over spreadsheet columns

use super::table::format_number;
use super::{descriptor_for, fetch_tables, parse_args, ready_document, require_non_empty, Tool, ToolContext};
use crate::collaborators::DocumentService;
use crate::error::ToolError;
use crate::models::{Cell, Coverage, DataTable, ToolDescriptor, ToolName, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub mode: Option<f64>,
    /// Sample standard deviation; undefined below two values.
    pub std_dev: Option<f64>,
    pub variance: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub q1: f64,
    pub q3: f64,
    pub outliers: Vec<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
    pub unique: usize,
}

/// Quantile with linear interpolation between closest ranks.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Statistics of a non-empty sample.
pub fn describe(column: &str, values: &[f64]) -> Option<ColumnStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mean = values.iter().sum::<f64>() / n;
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let (low_fence, high_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let central = |power: i32| values.iter().map(|v| (v - mean).powi(power)).sum::<f64>() / n;
    let population_var = central(2);
    let (skewness, kurtosis) = if values.len() >= 3 && population_var > 0.0 {
        (
            Some(central(3) / population_var.powf(1.5)),
            Some(central(4) / population_var.powi(2) - 3.0),
        )
    } else {
        (None, None)
    };
    let variance = (values.len() >= 2)
        .then(|| values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0));

    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for v in &sorted {
        counts.entry(v.to_bits()).or_insert((*v, 0)).1 += 1;
    }
    let unique = counts.len();
    let mode = counts
        .values()
        .filter(|(_, c)| *c > 1)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.total_cmp(&a.0)))
        .map(|(v, _)| *v);

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];

    Some(ColumnStats {
        column: column.to_string(),
        count: values.len(),
        mean,
        median: quantile(&sorted, 0.5),
        mode,
        std_dev: variance.map(f64::sqrt),
        variance,
        min,
        max,
        range: max - min,
        q1,
        q3,
        outliers: sorted
            .iter()
            .copied()
            .filter(|v| *v < low_fence || *v > high_fence)
            .collect(),
        skewness,
        kurtosis,
        unique,
    })
}

#[derive(Debug, Deserialize)]
struct StatisticsArgs {
    document_id: String,
    #[serde(default)]
    columns: Vec<String>,
}

pub struct StatisticalAnalysisTool {
    descriptor: ToolDescriptor,
    documents: Arc<dyn DocumentService>,
}

impl StatisticalAnalysisTool {
    pub fn new(documents: Arc<dyn DocumentService>) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::StatisticalAnalysis),
            documents,
        }
    }
}

#[async_trait::async_trait]
impl Tool for StatisticalAnalysisTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: StatisticsArgs = parse_args(args)?;
        require_non_empty("document_id", &args.document_id)?;
        let document = ready_document(ctx, self.name(), &args.document_id)?;
        let tables = fetch_tables(self.documents.as_ref(), &document.ref_id).await?;

        let mut available: Vec<String> = Vec::new();
        let mut numeric: Vec<(&DataTable, usize)> = Vec::new();
        for table in &tables {
            for c in table.numeric_columns() {
                if !available.iter().any(|a| a.eq_ignore_ascii_case(&table.columns[c])) {
                    available.push(table.columns[c].clone());
                    numeric.push((table, c));
                }
            }
        }

        // first table carrying each requested column wins
        let selected: Vec<(&DataTable, usize)> = if args.columns.is_empty() {
            numeric
        } else {
            let mut picked: Vec<(&DataTable, usize)> = Vec::new();
            for name in &args.columns {
                let found = tables.iter().find_map(|table| {
                    table
                        .find_column(name)
                        .filter(|c| table.numeric_columns().contains(c))
                        .map(|c| (table, c))
                });
                if let Some((table, c)) = found {
                    if !picked.iter().any(|(t, p)| std::ptr::eq(*t, table) && *p == c) {
                        picked.push((table, c));
                    }
                }
            }
            picked
        };

        let stats: Vec<ColumnStats> = selected
            .iter()
            .filter_map(|&(table, c)| describe(&table.columns[c], &table.column_values(c)))
            .collect();

        if stats.is_empty() {
            return Err(ToolError::Empty {
                reason: if args.columns.is_empty() {
                    format!("{} has no numeric columns", document.name)
                } else {
                    format!("{} not found among numeric columns", args.columns.join(", "))
                },
                available,
            });
        }

        let optional = |v: Option<f64>| v.map(Cell::Number).unwrap_or(Cell::Empty);
        let rows = stats
            .iter()
            .map(|s| {
                vec![
                    Cell::Text(s.column.clone()),
                    Cell::Number(s.count as f64),
                    Cell::Number(s.mean),
                    Cell::Number(s.median),
                    optional(s.std_dev),
                    Cell::Number(s.min),
                    Cell::Number(s.q1),
                    Cell::Number(s.q3),
                    Cell::Number(s.max),
                    Cell::Number(s.outliers.len() as f64),
                ]
            })
            .collect();
        let out = DataTable::new(
            ["Column", "Count", "Mean", "Median", "Std Dev", "Min", "Q1", "Q3", "Max", "Outliers"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows,
        )
        .titled(format!("Descriptive statistics for {}", document.name));

        let mut text = format!("### Statistics for {}\n\n", document.name);
        for s in &stats {
            text.push_str(&format!(
                "- **{}**: mean {}, median {}, range {} to {}",
                s.column,
                format_number(s.mean),
                format_number(s.median),
                format_number(s.min),
                format_number(s.max)
            ));
            if !s.outliers.is_empty() {
                let outliers: Vec<String> = s.outliers.iter().map(|v| format_number(*v)).collect();
                text.push_str(&format!("; outliers: {}", outliers.join(", ")));
            }
            if let Some(skew) = s.skewness {
                if skew.abs() > 1.0 {
                    text.push_str(&format!(
                        "; strongly {} skewed",
                        if skew > 0.0 { "right" } else { "left" }
                    ));
                }
            }
            text.push('\n');
        }

        Ok(ToolResult {
            text,
            tables: vec![out],
            chart_refs: Vec::new(),
            coverage: Some(Coverage {
                requested: args.columns.clone(),
                found: stats.iter().map(|s| s.column.clone()).collect(),
                available,
            }),
            data: json!({ "document_id": document.ref_id, "columns": stats }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spreadsheet_session, test_services};

    #[test]
    fn test_describe_basic_sample() {
        let s = describe("x", &[1.0, 2.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(s.count, 5);
        assert_eq!(s.mean, 2.4);
        assert_eq!(s.median, 2.0);
        assert_eq!(s.mode, Some(2.0));
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.q1, 2.0);
        assert_eq!(s.q3, 3.0);
        assert_eq!(s.unique, 4);
        assert!((s.variance.unwrap() - 1.3).abs() < 1e-9);
        assert!(s.outliers.is_empty());
    }

    #[test]
    fn test_describe_single_value_and_outliers() {
        let single = describe("x", &[7.0]).unwrap();
        assert_eq!(single.std_dev, None);
        assert_eq!(single.skewness, None);
        assert_eq!(single.median, 7.0);

        let skewed = describe("x", &[10.0, 11.0, 12.0, 11.0, 10.0, 95.0]).unwrap();
        assert_eq!(skewed.outliers, vec![95.0]);
        assert!(skewed.skewness.unwrap() > 1.0);

        assert!(describe("x", &[]).is_none());
    }

    #[tokio::test]
    async fn test_unknown_column_lists_numeric_columns() {
        let (services, handles) = test_services();
        handles
            .add_spreadsheet(
                "sheet",
                vec![DataTable::new(
                    vec!["Name".into(), "Revenue".into()],
                    vec![
                        vec![Cell::Text("a".into()), Cell::Number(1.0)],
                        vec![Cell::Text("b".into()), Cell::Number(3.0)],
                    ],
                )],
            )
            .await;
        let session = spreadsheet_session(&["sheet"]);
        let tool = StatisticalAnalysisTool::new(services.documents.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(&json!({"document_id": "sheet", "columns": ["headcount"]}), &ctx)
            .await
            .unwrap_err();
        match err {
            ToolError::Empty { available, .. } => assert_eq!(available, vec!["Revenue".to_string()]),
            other => panic!("unexpected error: {:?}", other),
        }

        let result = tool
            .invoke(&json!({"document_id": "sheet"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.data["columns"][0]["mean"], 2.0);
    }

    #[tokio::test]
    async fn test_column_on_second_sheet_is_found() {
        let (services, handles) = test_services();
        handles
            .add_spreadsheet(
                "book",
                vec![
                    DataTable::new(
                        vec!["Name".into(), "Revenue".into()],
                        vec![vec![Cell::Text("a".into()), Cell::Number(1.0)]],
                    ),
                    DataTable::new(
                        vec!["Team".into(), "Headcount".into()],
                        vec![
                            vec![Cell::Text("x".into()), Cell::Number(4.0)],
                            vec![Cell::Text("y".into()), Cell::Number(8.0)],
                        ],
                    ),
                ],
            )
            .await;
        let session = spreadsheet_session(&["book"]);
        let tool = StatisticalAnalysisTool::new(services.documents.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool
            .invoke(&json!({"document_id": "book", "columns": ["headcount"]}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.data["columns"][0]["column"], "Headcount");
        assert_eq!(result.data["columns"][0]["mean"], 6.0);
        let coverage = result.coverage.unwrap();
        assert_eq!(coverage.available, vec!["Revenue".to_string(), "Headcount".to_string()]);
    }
}
