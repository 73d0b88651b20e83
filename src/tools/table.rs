//! Table helpers shared by the data-bound tools
//!
//! Cells arrive from the document service as loosely typed text; these
//! helpers find columns by fuzzy name, read numeric values out of currency
//! formatted strings and render tables as markdown.

use crate::models::{Cell, DataTable};
use std::collections::HashMap;

/// Keyword groups treated as the same metric.
const METRIC_SYNONYMS: &[&[&str]] = &[
    &["revenue", "sales", "turnover", "income"],
    &["profit", "earnings", "net income", "margin"],
    &["expense", "expenses", "cost", "costs", "expenditure", "spend"],
];

impl Cell {
    /// Numeric value of a cell, accepting "$1,200", "12%" and "(300)".
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Number(_) | Cell::Empty => None,
            Cell::Text(s) => parse_number(s),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Number(n) => format_number(*n),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | '₹' | ',' | '%' | '(' | ')' | ' '))
        .map(|c| if c == '−' { '-' } else { c })
        .collect();

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Two decimals, trailing zeros trimmed, thousands separated.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let frac = frac_part.trim_end_matches('0');
    let sign = if rounded < 0.0 { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

fn normalise(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '-'], " ")
}

impl DataTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            title: None,
            columns,
            rows,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&Cell::Empty)
    }

    /// Locate a column: exact name, then substring, then metric synonyms.
    pub fn find_column(&self, target: &str) -> Option<usize> {
        let wanted = normalise(target);
        if wanted.is_empty() {
            return None;
        }

        let names: Vec<String> = self.columns.iter().map(|c| normalise(c)).collect();

        if let Some(i) = names.iter().position(|n| *n == wanted) {
            return Some(i);
        }
        if let Some(i) = names.iter().position(|n| n.contains(&wanted)) {
            return Some(i);
        }

        let group = METRIC_SYNONYMS
            .iter()
            .find(|group| group.iter().any(|s| wanted.contains(s) || s.contains(&wanted)))?;
        names
            .iter()
            .position(|n| group.iter().any(|s| n.contains(s)))
    }

    /// Values of a column that parse as numbers.
    pub fn column_values(&self, column: usize) -> Vec<f64> {
        (0..self.rows.len())
            .filter_map(|r| self.cell(r, column).as_number())
            .collect()
    }

    /// Columns where more than half the non-empty cells are numeric.
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&c| {
                let non_empty = (0..self.rows.len())
                    .filter(|&r| !self.cell(r, c).is_empty())
                    .count();
                let numeric = self.column_values(c).len();
                non_empty > 0 && numeric * 2 > non_empty
            })
            .collect()
    }

    pub fn numeric_column_names(&self) -> Vec<String> {
        self.numeric_columns()
            .into_iter()
            .map(|c| self.columns[c].clone())
            .collect()
    }

    /// Sum of each numeric column keyed by column name.
    pub fn column_totals(&self) -> HashMap<String, f64> {
        self.numeric_columns()
            .into_iter()
            .map(|c| (self.columns[c].clone(), self.column_values(c).iter().sum()))
            .collect()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&format!("**{}**\n\n", title));
        }
        if self.columns.is_empty() {
            return out;
        }

        out.push_str(&format!("| {} |\n", self.columns.join(" | ")));
        out.push_str(&format!(
            "|{}|\n",
            self.columns.iter().map(|_| "---").collect::<Vec<_>>().join("|")
        ));
        for row in &self.rows {
            let cells: Vec<String> = (0..self.columns.len())
                .map(|c| {
                    let text = row.get(c).map(Cell::as_text).unwrap_or_default();
                    if text.is_empty() {
                        "—".to_string()
                    } else {
                        text.replace('|', "\\|")
                    }
                })
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out
    }

    /// Plain-text rendering for prompts.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(&self.columns.join("\t"));
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Cell::as_text).collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataTable {
        DataTable::new(
            vec!["Month".into(), "Total Sales".into(), "Operating_Cost".into(), "Region".into()],
            vec![
                vec![Cell::Text("Jan".into()), Cell::Text("$1,200".into()), Cell::Number(300.0), Cell::Text("North".into())],
                vec![Cell::Text("Feb".into()), Cell::Text("1500".into()), Cell::Text("(50)".into()), Cell::Text("South".into())],
                vec![Cell::Text("Mar".into()), Cell::Empty, Cell::Text("n/a".into()), Cell::Text("North".into())],
            ],
        )
    }

    #[test]
    fn test_parse_number_formats() {
        let cases = vec![
            ("$1,200.50", Some(1200.5)),
            ("12%", Some(12.0)),
            ("(300)", Some(-300.0)),
            ("−4", Some(-4.0)),
            ("₹ 2,000", Some(2000.0)),
            ("n/a", None),
            ("", None),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_number(raw), expected, "raw: {}", raw);
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.0), "1,234,567");
        assert_eq!(format_number(-1200.5), "-1,200.5");
        assert_eq!(format_number(0.125), "0.13");
        assert_eq!(format_number(999.0), "999");
    }

    #[test]
    fn test_find_column_exact_partial_and_synonym() {
        let t = table();
        assert_eq!(t.find_column("month"), Some(0));
        assert_eq!(t.find_column("sales"), Some(1));
        assert_eq!(t.find_column("revenue"), Some(1));
        assert_eq!(t.find_column("operating cost"), Some(2));
        assert_eq!(t.find_column("expenses"), Some(2));
        assert_eq!(t.find_column("headcount"), None);
    }

    #[test]
    fn test_numeric_columns_and_totals() {
        let t = table();
        assert_eq!(t.numeric_columns(), vec![1, 2]);
        let totals = t.column_totals();
        assert_eq!(totals["Total Sales"], 2700.0);
        assert_eq!(totals["Operating_Cost"], 250.0);
    }

    #[test]
    fn test_markdown_rendering() {
        let t = DataTable::new(
            vec!["Quarter".into(), "Total".into()],
            vec![vec![Cell::Text("Q1".into()), Cell::Number(1500.0)], vec![Cell::Text("Q2".into()), Cell::Empty]],
        )
        .titled("Revenue by quarter");

        let md = t.to_markdown();
        assert!(md.starts_with("**Revenue by quarter**"));
        assert!(md.contains("| Quarter | Total |\n|---|---|\n"));
        assert!(md.contains("| Q1 | 1,500 |"));
        assert!(md.contains("| Q2 | — |"));
    }
}
