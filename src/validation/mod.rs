//! Result validation
//!
//! Rules-based soft checks on a tool result before it is accepted.
//! A failed validation is treated like an empty result: retryable once,
//! then fallen back from.

use crate::models::{CapabilityTag, ToolDescriptor, ToolResult};
use tracing::debug;

/// Trait for validation rules
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, descriptor: &ToolDescriptor, result: &ToolResult) -> ValidationCheckResult;
}

pub struct ValidationCheckResult {
    pub passed: bool,
    pub details: String,
}

impl ValidationCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            details: String::new(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub passed: bool,
    pub issues: Vec<String>,
    /// What the tool saw, forwarded into the retry hint.
    pub available: Vec<String>,
}

pub struct ValidationEngine {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, descriptor: &ToolDescriptor, result: &ToolResult) -> ValidationReport {
        let issues: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let check = rule.validate(descriptor, result);
                (!check.passed).then(|| format!("{}: {}", rule.name(), check.details))
            })
            .collect();

        let passed = issues.is_empty();
        debug!(
            tool = %descriptor.name,
            rule_count = self.rules.len(),
            passed,
            "Validation completed"
        );

        ValidationReport {
            passed,
            issues,
            available: result
                .coverage
                .as_ref()
                .map(|c| c.available.clone())
                .unwrap_or_default(),
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Rule: the result carries some text or table rows
pub struct NonEmptyResultRule;

impl ValidationRule for NonEmptyResultRule {
    fn name(&self) -> &'static str {
        "non_empty_result"
    }

    fn validate(&self, _descriptor: &ToolDescriptor, result: &ToolResult) -> ValidationCheckResult {
        if result.is_empty() {
            ValidationCheckResult::fail("result has no text and no table rows")
        } else {
            ValidationCheckResult::pass()
        }
    }
}

/// Rule: data-bound tools report coverage and found something they were asked for
pub struct RequestedDataFoundRule;

impl ValidationRule for RequestedDataFoundRule {
    fn name(&self) -> &'static str {
        "requested_data_found"
    }

    fn validate(&self, descriptor: &ToolDescriptor, result: &ToolResult) -> ValidationCheckResult {
        if descriptor.capability != CapabilityTag::DataBound {
            return ValidationCheckResult::pass();
        }
        match &result.coverage {
            None => ValidationCheckResult::fail("data-bound result reported no coverage"),
            Some(c) if !c.requested.is_empty() && c.found.is_empty() => ValidationCheckResult::fail(
                format!("none of {} were found", c.requested.join(", ")),
            ),
            Some(_) => ValidationCheckResult::pass(),
        }
    }
}

/// Rule: chart references are ids plus bare filenames
pub struct ChartRefsWellFormedRule;

impl ValidationRule for ChartRefsWellFormedRule {
    fn name(&self) -> &'static str {
        "chart_refs_well_formed"
    }

    fn validate(&self, _descriptor: &ToolDescriptor, result: &ToolResult) -> ValidationCheckResult {
        let bad: Vec<&str> = result
            .chart_refs
            .iter()
            .filter(|c| {
                c.chart_id.trim().is_empty()
                    || c.filename.trim().is_empty()
                    || c.filename.contains(['/', '\\'])
            })
            .map(|c| c.filename.as_str())
            .collect();

        if bad.is_empty() {
            ValidationCheckResult::pass()
        } else {
            ValidationCheckResult::fail(format!("malformed chart references: {:?}", bad))
        }
    }
}

pub fn create_default_validation_engine() -> ValidationEngine {
    let mut engine = ValidationEngine::new();
    engine.add_rule(Box::new(NonEmptyResultRule));
    engine.add_rule(Box::new(RequestedDataFoundRule));
    engine.add_rule(Box::new(ChartRefsWellFormedRule));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartRef, Coverage, ToolName};
    use crate::tools::descriptor_for;

    #[test]
    fn test_valid_data_result_passes() {
        let engine = create_default_validation_engine();
        let result = ToolResult {
            text: "Revenue grew".into(),
            coverage: Some(Coverage {
                requested: vec!["revenue".into()],
                found: vec!["Sales".into()],
                available: vec!["Sales".into()],
            }),
            chart_refs: vec![ChartRef {
                chart_id: "ab12".into(),
                filename: "x_financial_trend_analysis.json".into(),
            }],
            ..Default::default()
        };

        let report = engine.validate(&descriptor_for(ToolName::FinancialTrendAnalysis), &result);
        assert!(report.passed, "{:?}", report.issues);
    }

    #[test]
    fn test_data_bound_without_found_fails_with_available() {
        let engine = create_default_validation_engine();
        let result = ToolResult {
            text: "Nothing".into(),
            coverage: Some(Coverage {
                requested: vec!["profit".into()],
                found: vec![],
                available: vec!["Sales".into(), "Cost".into()],
            }),
            ..Default::default()
        };

        let report = engine.validate(&descriptor_for(ToolName::StatisticalAnalysis), &result);
        assert!(!report.passed);
        assert_eq!(report.available, vec!["Sales".to_string(), "Cost".to_string()]);
        assert!(report.issues[0].starts_with("requested_data_found"));
    }

    #[test]
    fn test_general_results_only_need_text() {
        let engine = create_default_validation_engine();
        let descriptor = descriptor_for(ToolName::GeneralQuery);

        assert!(engine.validate(&descriptor, &ToolResult::text("Hello")).passed);
        assert!(!engine.validate(&descriptor, &ToolResult::text("   ")).passed);

        let bad_chart = ToolResult {
            text: "chart".into(),
            chart_refs: vec![ChartRef {
                chart_id: "id".into(),
                filename: "../escape.json".into(),
            }],
            ..Default::default()
        };
        assert!(!engine.validate(&descriptor, &bad_chart).passed);
    }
}
