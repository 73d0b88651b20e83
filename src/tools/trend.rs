//! Financial trend analysis
//!
//! Buckets one metric of a spreadsheet by quarter and reports totals,
//! growth between the requested quarters and a recommendation.

use super::chart::{persist_chart, ChartKind, ChartSpec, Series};
use super::table::format_number;
use super::{descriptor_for, fetch_tables, parse_args, ready_document, require_non_empty, Tool, ToolContext};
use crate::collaborators::{ChartStore, DocumentService};
use crate::error::ToolError;
use crate::models::{Cell, Coverage, DataTable, ToolDescriptor, ToolName, ToolResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref QUARTER_LABEL: Regex = Regex::new(r"(?i)\bq([1-4])\b").unwrap();
    static ref ISO_DATE: Regex = Regex::new(r"\b\d{4}[-/](\d{1,2})(?:[-/]\d{1,2})?\b").unwrap();
    static ref US_DATE: Regex = Regex::new(r"\b(\d{1,2})/\d{1,2}/\d{2,4}\b").unwrap();
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// "q2" / "Q2" / " Q2 " -> "Q2".
pub fn normalise_quarter(raw: &str) -> Option<String> {
    QUARTER_LABEL
        .captures(raw.trim())
        .map(|c| format!("Q{}", &c[1]))
}

fn quarter_of_month(month: u32) -> Option<u8> {
    (1..=12).contains(&month).then(|| ((month - 1) / 3 + 1) as u8)
}

/// Quarter a period cell belongs to: quarter labels, ISO or US dates,
/// month names, or a bare month number in a month column.
fn quarter_of_cell(cell: &Cell, month_column: bool) -> Option<u8> {
    if let Cell::Number(n) = cell {
        return if month_column && n.fract() == 0.0 {
            quarter_of_month(*n as u32)
        } else {
            None
        };
    }

    let text = cell.as_text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(c) = QUARTER_LABEL.captures(text) {
        return c[1].parse().ok();
    }
    if let Some(c) = ISO_DATE.captures(text) {
        return c[1].parse().ok().and_then(quarter_of_month);
    }
    if let Some(c) = US_DATE.captures(text) {
        return c[1].parse().ok().and_then(quarter_of_month);
    }

    let lower = text.to_lowercase();
    for word in lower.split(|c: char| !c.is_alphabetic()) {
        if word.len() >= 3 {
            if let Some(i) = MONTHS.iter().position(|m| word.starts_with(m)) {
                return quarter_of_month(i as u32 + 1);
            }
        }
    }

    if month_column {
        if let Ok(month) = text.parse::<u32>() {
            return quarter_of_month(month);
        }
    }
    None
}

/// Column holding periods: a quarter/date/month/period header, otherwise the
/// first column whose cells mostly map to a quarter.
pub(crate) fn find_period_column(table: &DataTable) -> Option<(usize, bool)> {
    for (i, name) in table.columns.iter().enumerate() {
        let lower = name.to_lowercase();
        if ["quarter", "period", "date", "month"].iter().any(|k| lower.contains(k)) {
            return Some((i, lower.contains("month")));
        }
    }

    (0..table.columns.len())
        .find(|&c| {
            let mapped = (0..table.rows.len())
                .filter(|&r| quarter_of_cell(table.cell(r, c), false).is_some())
                .count();
            mapped > 0 && mapped * 2 >= table.rows.len()
        })
        .map(|c| (c, false))
}

/// Quarter of every row, given the period column.
pub(crate) fn row_quarters(table: &DataTable, period: (usize, bool)) -> Vec<Option<u8>> {
    (0..table.rows.len())
        .map(|r| quarter_of_cell(table.cell(r, period.0), period.1))
        .collect()
}

/// Direction label and recommendation for a growth percentage.
pub fn growth_assessment(growth: f64) -> (&'static str, &'static str) {
    if growth > 15.0 {
        ("strong growth", "Strong momentum. Consider scaling the drivers behind this growth.")
    } else if growth > 5.0 {
        ("moderate growth", "Healthy growth. Keep monitoring the drivers to sustain it.")
    } else if growth > 0.0 {
        ("slight growth", "Marginal improvement. Look for levers to accelerate growth.")
    } else if growth > -5.0 {
        ("slight decline", "Slight dip. Review recent changes for early warning signs.")
    } else if growth > -15.0 {
        ("moderate decline", "Noticeable decline. Investigate root causes and corrective actions.")
    } else {
        ("significant decline", "Significant decline. An immediate review of strategy and costs is recommended.")
    }
}

pub fn growth_rate(from: f64, to: f64) -> Option<f64> {
    (from != 0.0).then(|| (to - from) / from.abs() * 100.0)
}

#[derive(Debug, Deserialize)]
struct TrendArgs {
    document_id: String,
    metric: String,
    #[serde(default)]
    quarters: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct QuarterFigures {
    total: f64,
    count: usize,
}

pub struct FinancialTrendTool {
    descriptor: ToolDescriptor,
    documents: Arc<dyn DocumentService>,
    charts: Arc<dyn ChartStore>,
}

impl FinancialTrendTool {
    pub fn new(documents: Arc<dyn DocumentService>, charts: Arc<dyn ChartStore>) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::FinancialTrendAnalysis),
            documents,
            charts,
        }
    }

    fn validate(args: &Value) -> Result<(TrendArgs, Vec<String>), ToolError> {
        let parsed: TrendArgs = parse_args(args)?;
        require_non_empty("document_id", &parsed.document_id)?;
        require_non_empty("metric", &parsed.metric)?;

        let mut quarters = Vec::new();
        for raw in &parsed.quarters {
            let quarter = normalise_quarter(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!("'{}' is not a quarter (Q1-Q4)", raw))
            })?;
            if !quarters.contains(&quarter) {
                quarters.push(quarter);
            }
        }
        if quarters.is_empty() {
            return Err(ToolError::InvalidArguments(
                "at least one quarter is required".to_string(),
            ));
        }
        Ok((parsed, quarters))
    }
}

#[async_trait::async_trait]
impl Tool for FinancialTrendTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let (args, quarters) = Self::validate(args)?;
        let document = ready_document(ctx, self.name(), &args.document_id)?;
        let tables = fetch_tables(self.documents.as_ref(), &document.ref_id).await?;

        let mut available: Vec<String> = Vec::new();
        let mut located = None;
        for table in &tables {
            let numeric = table.numeric_columns();
            for name in table.numeric_column_names() {
                if !available.contains(&name) {
                    available.push(name);
                }
            }
            let metric_col = table.find_column(&args.metric).filter(|c| numeric.contains(c));
            if let (Some(metric_col), Some(period)) = (metric_col, find_period_column(table)) {
                located = Some((table, metric_col, period));
                break;
            }
        }

        let Some((table, metric_col, period)) = located else {
            return Err(ToolError::Empty {
                reason: format!(
                    "metric '{}' with a date or quarter column was not found in {}",
                    args.metric, document.name
                ),
                available,
            });
        };

        let mut figures = [QuarterFigures::default(); 4];
        for (row, quarter) in row_quarters(table, period).into_iter().enumerate() {
            let (Some(q), Some(value)) = (quarter, table.cell(row, metric_col).as_number()) else {
                continue;
            };
            let slot = &mut figures[(q - 1) as usize];
            slot.total += value;
            slot.count += 1;
        }

        let present: Vec<String> = (0..4)
            .filter(|&i| figures[i].count > 0)
            .map(|i| format!("Q{}", i + 1))
            .collect();

        let requested: Vec<(String, QuarterFigures)> = quarters
            .iter()
            .map(|q| {
                let index = q[1..].parse::<usize>().unwrap_or(1) - 1;
                (q.clone(), figures[index])
            })
            .collect();

        if requested.iter().all(|(_, f)| f.count == 0) {
            return Err(ToolError::Empty {
                reason: format!(
                    "no {} values for {} in {}",
                    args.metric,
                    quarters.join(", "),
                    document.name
                ),
                available: present,
            });
        }

        let column_name = table.columns[metric_col].clone();
        debug!(metric = %column_name, quarters = ?quarters, "Computing quarterly trend");

        let mut rows = Vec::new();
        let mut previous: Option<f64> = None;
        let mut changes = Vec::new();
        for (quarter, f) in &requested {
            let total = (f.count > 0).then_some(f.total);
            let change = match (previous, total) {
                (Some(p), Some(t)) => growth_rate(p, t),
                _ => None,
            };
            if let Some(change) = change {
                changes.push((quarter.clone(), change));
            }
            rows.push(vec![
                Cell::Text(quarter.clone()),
                total.map(Cell::Number).unwrap_or(Cell::Empty),
                total
                    .map(|t| Cell::Number(t / f.count as f64))
                    .unwrap_or(Cell::Empty),
                Cell::Number(f.count as f64),
                change
                    .map(|c| Cell::Text(format!("{:+.1}%", c)))
                    .unwrap_or(Cell::Empty),
            ]);
            if total.is_some() {
                previous = total;
            }
        }

        let with_data: Vec<&(String, QuarterFigures)> =
            requested.iter().filter(|(_, f)| f.count > 0).collect();
        let overall = match (with_data.first(), with_data.last()) {
            (Some(first), Some(last)) if with_data.len() > 1 => {
                growth_rate(first.1.total, last.1.total).map(|g| (first.0.clone(), last.0.clone(), g))
            }
            _ => None,
        };

        let mut text = format!("### {} trend for {}\n\n", column_name, document.name);
        for (quarter, f) in &with_data {
            text.push_str(&format!(
                "- **{}**: total {} across {} entries\n",
                quarter,
                format_number(f.total),
                f.count
            ));
        }
        match &overall {
            Some((from, to, growth)) => {
                let (direction, recommendation) = growth_assessment(*growth);
                text.push_str(&format!(
                    "\n{} changed **{:+.1}%** from {} to {} ({}).\n\n**Recommendation:** {}\n",
                    column_name, growth, from, to, direction, recommendation
                ));
            }
            None if with_data.len() == 1 => {
                text.push_str("\nOnly one of the requested quarters has data, so no growth rate can be computed.\n");
            }
            None => {
                text.push_str("\nGrowth could not be computed because the starting quarter total is zero.\n");
            }
        }

        let table_out = DataTable::new(
            vec![
                "Quarter".into(),
                "Total".into(),
                "Average".into(),
                "Count".into(),
                "Change".into(),
            ],
            rows,
        )
        .titled(format!("{} by quarter", column_name));

        let spec = ChartSpec {
            kind: ChartKind::Line,
            title: format!("{} by quarter", column_name),
            x_label: "Quarter".into(),
            y_label: column_name.clone(),
            categories: quarters.clone(),
            series: vec![Series {
                name: column_name.clone(),
                values: requested
                    .iter()
                    .map(|(_, f)| (f.count > 0).then_some(f.total))
                    .collect(),
            }],
        };
        let chart_refs = persist_chart(self.charts.as_ref(), ctx.message_id, self.name(), &spec)
            .await
            .into_iter()
            .collect();

        Ok(ToolResult {
            text,
            tables: vec![table_out],
            chart_refs,
            coverage: Some(Coverage {
                requested: vec![args.metric.clone()],
                found: vec![column_name.clone()],
                available,
            }),
            data: json!({
                "document_id": document.ref_id,
                "metric": column_name,
                "quarters": requested.iter().map(|(q, f)| json!({
                    "quarter": q,
                    "total": (f.count > 0).then_some(f.total),
                    "count": f.count,
                })).collect::<Vec<_>>(),
                "changes": changes.iter().map(|(q, c)| json!({"quarter": q, "change_pct": c})).collect::<Vec<_>>(),
                "overall_growth_pct": overall.as_ref().map(|o| o.2),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spreadsheet_session, test_services};

    fn sales_table() -> DataTable {
        let rows = [
            ("2024-01-15", "1000"),
            ("2024-02-15", "1200"),
            ("2024-03-15", "800"),
            ("2024-04-15", "1500"),
            ("2024-05-15", "1400"),
            ("2024-06-15", "$1,100"),
        ];
        DataTable::new(
            vec!["Date".into(), "Sales".into(), "Units".into()],
            rows.iter()
                .map(|(d, s)| vec![Cell::Text(d.to_string()), Cell::Text(s.to_string()), Cell::Number(5.0)])
                .collect(),
        )
    }

    #[test]
    fn test_quarter_of_cell_formats() {
        let cases = vec![
            (Cell::Text("Q3 2024".into()), false, Some(3)),
            (Cell::Text("2024-10-01".into()), false, Some(4)),
            (Cell::Text("11/03/2023".into()), false, Some(4)),
            (Cell::Text("February".into()), false, Some(1)),
            (Cell::Text("sept".into()), false, Some(3)),
            (Cell::Number(5.0), true, Some(2)),
            (Cell::Number(5.0), false, None),
            (Cell::Text("total".into()), false, None),
        ];
        for (cell, month_column, expected) in cases {
            assert_eq!(quarter_of_cell(&cell, month_column), expected, "cell: {:?}", cell);
        }
    }

    #[test]
    fn test_growth_assessment_bands() {
        let cases = vec![
            (20.0, "strong growth"),
            (10.0, "moderate growth"),
            (1.0, "slight growth"),
            (-2.0, "slight decline"),
            (-10.0, "moderate decline"),
            (-30.0, "significant decline"),
        ];
        for (growth, expected) in cases {
            assert_eq!(growth_assessment(growth).0, expected);
        }
        assert_eq!(growth_rate(0.0, 10.0), None);
        assert_eq!(growth_rate(100.0, 125.0), Some(25.0));
    }

    #[tokio::test]
    async fn test_trend_reports_quarter_totals_and_growth() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("sheet-1", vec![sales_table()]).await;
        let session = spreadsheet_session(&["sheet-1"]);
        let tool = FinancialTrendTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let result = tool
            .invoke(
                &json!({"document_id": "sheet-1", "metric": "revenue", "quarters": ["q1", "Q2"]}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(result.data["quarters"][0]["total"], 3000.0);
        assert_eq!(result.data["quarters"][1]["total"], 4000.0);
        let growth = result.data["overall_growth_pct"].as_f64().unwrap();
        assert!((growth - 33.333).abs() < 0.01);
        assert!(result.text.contains("strong growth"));
        assert_eq!(result.coverage.unwrap().found, vec!["Sales".to_string()]);
        assert_eq!(result.chart_refs.len(), 1);
        assert_eq!(handles.charts.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_metric_is_empty_with_available_columns() {
        let (services, handles) = test_services();
        handles.add_spreadsheet("sheet-1", vec![sales_table()]).await;
        let session = spreadsheet_session(&["sheet-1"]);
        let tool = FinancialTrendTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(
                &json!({"document_id": "sheet-1", "metric": "profit", "quarters": ["Q1"]}),
                &ctx,
            )
            .await
            .unwrap_err();

        match err {
            ToolError::Empty { available, .. } => {
                assert_eq!(available, vec!["Sales".to_string(), "Units".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_quarter_is_rejected_before_fetch() {
        let (services, _handles) = test_services();
        let session = spreadsheet_session(&["sheet-1"]);
        let tool = FinancialTrendTool::new(services.documents.clone(), services.charts.clone());
        let ctx = ToolContext {
            session: &session,
            message_id: uuid::Uuid::new_v4(),
        };

        let err = tool
            .invoke(
                &json!({"document_id": "sheet-1", "metric": "sales", "quarters": ["Q7"]}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ToolErrorKind::InvalidArguments);
    }
}
