//! Table data extraction
//!
//! Pulls rows out of a spreadsheet: everything, top N by a column,
//! filtered, searched, or aggregated (optionally grouped).

use super::table::{format_number, parse_number};
use super::{descriptor_for, fetch_tables, parse_args, ready_document, require_non_empty, Tool, ToolContext};
use crate::collaborators::DocumentService;
use crate::error::ToolError;
use crate::models::{Cell, Coverage, DataTable, ToolDescriptor, ToolName, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_N_RESULTS: usize = 10;
const DEFAULT_ALL_ROWS: usize = 50;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionType {
    #[default]
    All,
    TopN,
    Filter,
    Search,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Contains,
}

impl<'de> Deserialize<'de> for FilterOperator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim() {
            ">" => Ok(FilterOperator::Gt),
            "<" => Ok(FilterOperator::Lt),
            ">=" => Ok(FilterOperator::Ge),
            "<=" => Ok(FilterOperator::Le),
            "==" | "=" => Ok(FilterOperator::Eq),
            "!=" => Ok(FilterOperator::Ne),
            "contains" => Ok(FilterOperator::Contains),
            other => Err(serde::de::Error::custom(format!("unknown operator '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(deserialize_with = "value_as_string")]
    pub value: String,
}

fn value_as_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl FilterSpec {
    fn matches(&self, cell: &Cell) -> bool {
        if self.operator == FilterOperator::Contains {
            return cell
                .as_text()
                .to_lowercase()
                .contains(&self.value.to_lowercase());
        }

        let ordering = match (cell.as_number(), parse_number(&self.value)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(
                cell.as_text()
                    .trim()
                    .to_lowercase()
                    .cmp(&self.value.trim().to_lowercase()),
            ),
        };
        let Some(ordering) = ordering else {
            return false;
        };

        match self.operator {
            FilterOperator::Gt => ordering == Ordering::Greater,
            FilterOperator::Lt => ordering == Ordering::Less,
            FilterOperator::Ge => ordering != Ordering::Less,
            FilterOperator::Le => ordering != Ordering::Greater,
            FilterOperator::Eq => ordering == Ordering::Equal,
            FilterOperator::Ne => ordering != Ordering::Equal,
            FilterOperator::Contains => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionArgs {
    document_id: String,
    #[serde(default)]
    extraction_type: ExtractionType,
    #[serde(default)]
    n_results: Option<usize>,
    #[serde(default)]
    sort_column: Option<String>,
    #[serde(default)]
    ascending: bool,
    #[serde(default)]
    filters: Vec<FilterSpec>,
    #[serde(default)]
    search_term: Option<String>,
    #[serde(default)]
    group_column: Option<String>,
}

pub struct TableExtractionTool {
    descriptor: ToolDescriptor,
    documents: Arc<dyn DocumentService>,
}

fn missing_column(table: &DataTable, column: &str) -> ToolError {
    ToolError::Empty {
        reason: format!("column '{}' not found", column),
        available: table.columns.clone(),
    }
}

fn resolve(table: &DataTable, column: &str) -> Result<usize, ToolError> {
    table
        .find_column(column)
        .ok_or_else(|| missing_column(table, column))
}

/// First table carrying every column the arguments name, else the first table.
fn pick_table<'a>(tables: &'a [DataTable], args: &ExtractionArgs) -> &'a DataTable {
    let named: Vec<&str> = args
        .sort_column
        .iter()
        .map(String::as_str)
        .chain(args.filters.iter().map(|f| f.column.as_str()))
        .chain(args.group_column.iter().map(String::as_str))
        .collect();
    tables
        .iter()
        .find(|t| named.iter().all(|c| t.find_column(c).is_some()))
        .unwrap_or(&tables[0])
}

fn subset(table: &DataTable, rows: impl IntoIterator<Item = usize>) -> DataTable {
    DataTable::new(
        table.columns.clone(),
        rows.into_iter().map(|r| table.rows[r].clone()).collect(),
    )
}

impl TableExtractionTool {
    pub fn new(documents: Arc<dyn DocumentService>) -> Self {
        Self {
            descriptor: descriptor_for(ToolName::ExtractTableData),
            documents,
        }
    }

    fn top_n(table: &DataTable, args: &ExtractionArgs) -> Result<(DataTable, String, Vec<String>), ToolError> {
        let column = match &args.sort_column {
            Some(name) => resolve(table, name)?,
            None => *table.numeric_columns().first().ok_or_else(|| ToolError::Empty {
                reason: "no numeric column to rank by".to_string(),
                available: table.columns.clone(),
            })?,
        };
        let n = args.n_results.unwrap_or(DEFAULT_N_RESULTS).max(1);

        let mut ranked: Vec<(usize, f64)> = (0..table.rows.len())
            .filter_map(|r| table.cell(r, column).as_number().map(|v| (r, v)))
            .collect();
        ranked.sort_by(|a, b| {
            let ord = a.1.total_cmp(&b.1);
            if args.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        ranked.truncate(n);

        let name = table.columns[column].clone();
        let label = format!(
            "{} {} rows by {}",
            if args.ascending { "Bottom" } else { "Top" },
            ranked.len(),
            name
        );
        Ok((subset(table, ranked.into_iter().map(|(r, _)| r)), label, vec![name]))
    }

    fn filter(table: &DataTable, filters: &[FilterSpec]) -> Result<(DataTable, String, Vec<String>), ToolError> {
        if filters.is_empty() {
            return Err(ToolError::InvalidArguments(
                "filter extraction needs at least one filter".to_string(),
            ));
        }
        let resolved: Vec<(usize, &FilterSpec)> = filters
            .iter()
            .map(|f| resolve(table, &f.column).map(|c| (c, f)))
            .collect::<Result<_, _>>()?;

        let rows = (0..table.rows.len())
            .filter(|&r| resolved.iter().all(|(c, f)| f.matches(table.cell(r, *c))));
        let out = subset(table, rows);
        let found = resolved.iter().map(|(c, _)| table.columns[*c].clone()).collect();
        let label = format!("{} rows matching the filters", out.rows.len());
        Ok((out, label, found))
    }

    fn search(table: &DataTable, term: Option<&str>) -> Result<(DataTable, String, Vec<String>), ToolError> {
        let term = term.unwrap_or_default().trim().to_lowercase();
        if term.is_empty() {
            return Err(ToolError::InvalidArguments(
                "search extraction needs a search_term".to_string(),
            ));
        }
        let rows = (0..table.rows.len()).filter(|&r| {
            table.rows[r]
                .iter()
                .any(|cell| cell.as_text().to_lowercase().contains(&term))
        });
        let out = subset(table, rows);
        let label = format!("{} rows mentioning '{}'", out.rows.len(), term);
        Ok((out, label, Vec::new()))
    }

    fn aggregate(table: &DataTable, group: Option<&str>) -> Result<(DataTable, String, Vec<String>), ToolError> {
        let numeric: Vec<usize> = table.numeric_columns();
        if numeric.is_empty() {
            return Err(ToolError::Empty {
                reason: "no numeric columns to aggregate".to_string(),
                available: table.columns.clone(),
            });
        }

        let summarize = |label: String, rows: &[usize]| -> Vec<Vec<Cell>> {
            numeric
                .iter()
                .map(|&c| {
                    let values: Vec<f64> = rows
                        .iter()
                        .filter_map(|&r| table.cell(r, c).as_number())
                        .collect();
                    let sum: f64 = values.iter().sum();
                    let count = values.len();
                    let stat = |v: Option<f64>| v.map(Cell::Number).unwrap_or(Cell::Empty);
                    vec![
                        Cell::Text(label.clone()),
                        Cell::Text(table.columns[c].clone()),
                        Cell::Number(sum),
                        stat((count > 0).then(|| sum / count as f64)),
                        Cell::Number(count as f64),
                        stat(values.iter().copied().reduce(f64::min)),
                        stat(values.iter().copied().reduce(f64::max)),
                    ]
                })
                .collect()
        };

        let (rows, found, label) = match group {
            Some(name) => {
                let g = resolve(table, name)?;
                let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for r in 0..table.rows.len() {
                    groups.entry(table.cell(r, g).as_text()).or_default().push(r);
                }
                let rows: Vec<Vec<Cell>> = groups
                    .iter()
                    .flat_map(|(key, members)| summarize(key.clone(), members.as_slice()))
                    .collect();
                let column = table.columns[g].clone();
                (rows, vec![column.clone()], format!("Aggregates grouped by {}", column))
            }
            None => {
                let all: Vec<usize> = (0..table.rows.len()).collect();
                (summarize("All rows".to_string(), &all), Vec::new(), "Aggregates".to_string())
            }
        };

        let out = DataTable::new(
            vec![
                "Group".into(),
                "Column".into(),
                "Sum".into(),
                "Mean".into(),
                "Count".into(),
                "Min".into(),
                "Max".into(),
            ],
            rows,
        );
        Ok((out, label, found))
    }
}

#[async_trait::async_trait]
impl Tool for TableExtractionTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: ExtractionArgs = parse_args(args)?;
        require_non_empty("document_id", &args.document_id)?;
        let document = ready_document(ctx, self.name(), &args.document_id)?;
        let tables = fetch_tables(self.documents.as_ref(), &document.ref_id).await?;
        let table = pick_table(&tables, &args);

        let (mut out, label, found) = match args.extraction_type {
            ExtractionType::All => {
                let n = args.n_results.unwrap_or(DEFAULT_ALL_ROWS).max(1);
                let out = subset(table, 0..table.rows.len().min(n));
                let label = format!("First {} of {} rows", out.rows.len(), table.rows.len());
                (out, label, Vec::new())
            }
            ExtractionType::TopN => Self::top_n(table, &args)?,
            ExtractionType::Filter => Self::filter(table, &args.filters)?,
            ExtractionType::Search => Self::search(table, args.search_term.as_deref())?,
            ExtractionType::Aggregate => Self::aggregate(table, args.group_column.as_deref())?,
        };

        if out.rows.is_empty() {
            return Err(ToolError::Empty {
                reason: format!("{} in {}", label.to_lowercase(), document.name),
                available: table.columns.clone(),
            });
        }

        let mut requested: Vec<String> = args.sort_column.iter().cloned().collect();
        requested.extend(args.filters.iter().map(|f| f.column.clone()));
        requested.extend(args.group_column.iter().cloned());

        let row_count = out.rows.len();
        out = out.titled(label.clone());
        let text = match args.extraction_type {
            ExtractionType::Aggregate => format!("{} for {}.", label, document.name),
            _ => format!(
                "{} from {} ({} {}).",
                label,
                document.name,
                format_number(row_count as f64),
                if row_count == 1 { "row" } else { "rows" }
            ),
        };

        Ok(ToolResult {
            text,
            coverage: Some(Coverage {
                requested,
                found,
                available: table.columns.clone(),
            }),
            data: json!({
                "document_id": document.ref_id,
                "row_count": row_count,
            }),
            tables: vec![out],
            chart_refs: Vec::new(),
        })
    }
}
