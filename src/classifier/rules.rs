//! Deterministic classification rules
//!
//! Regex signal priors, eligibility and draft arguments. Everything here is
//! computed locally before any model call, so a model outage still leaves
//! usable scores and arguments.

use crate::models::{DocumentKind, DocumentRef, Session, ToolDescriptor, ToolName, CapabilityTag};
use crate::session::condensed_history;
use crate::tools::trend::normalise_quarter;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Failure information handed to the retry's argument extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetryHint {
    pub reason: String,
    pub available: Vec<String>,
}

/// Metric keywords, in lookup order.
const METRICS: &[&str] = &["revenue", "sales", "profit", "expenses", "income", "cost"];

fn patterns(raw: &[&str]) -> Vec<Regex> {
    raw.iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
}

lazy_static! {
    static ref TOOL_SIGNALS: Vec<(ToolName, Vec<Regex>)> = vec![
        (ToolName::FinancialTrendAnalysis, patterns(&[
            r"\btrends?\b",
            r"\bgrowth\b|\bgrew\b",
            r"\bover\s+time\b",
            r"\bquarter(?:ly|s)?\b|\bq[1-4]\b",
            r"\bquarter[- ]over[- ]quarter\b|\bqoq\b",
        ])),
        (ToolName::ComparativeAnalysis, patterns(&[
            r"\bcompar(?:e|es|ed|ing|ison|ative)\b",
            r"\bvs\.?\b|\bversus\b",
            r"\bdifference\s+between\b",
            r"\bside\s+by\s+side\b",
            r"\b(?:both|all|two)\s+(?:documents|files|reports|sheets)\b",
        ])),
        (ToolName::ExtractTableData, patterns(&[
            r"\bextract\b",
            r"\btables?\b",
            r"\b(?:top|bottom|first)\s+\d+\b",
            r"\bfilter\b|\bwhere\b",
            r"\b(?:rows?|records?|entries)\b",
            r"\bsearch\s+for\b",
        ])),
        (ToolName::StatisticalAnalysis, patterns(&[
            r"\bstatistic(?:s|al)?\b",
            r"\bmean\b|\baverage\b",
            r"\bmedian\b",
            r"\bstandard\s+deviation\b|\bvariance\b",
            r"\boutliers?\b",
            r"\bdistribution\b|\bdescriptive\b",
        ])),
        (ToolName::DocumentSummarizer, patterns(&[
            r"\bsummar(?:y|ies|ize|ise|izing|ising)\b",
            r"\b(?:key|main)\s+points\b",
            r"\boverview\b",
            r"\b(?:pdf|docx|document|report)\b",
        ])),
        (ToolName::WebResearch, patterns(&[
            r"\bwebsite\b|\bweb\s*page\b|\bweb\b",
            r"\bnews\b",
            r"\bonline\b",
            r"\burl\b|\blink\b",
            r"\bcurrent\s+market\b",
        ])),
        (ToolName::GeneralQuery, patterns(&[
            r"^\s*(?:hi|hello|hey)\b",
            r"\bthanks?\b|\bthank\s+you\b",
            r"\bwhat\s+is\b|\bexplain\b|\bhow\s+(?:do|does|to)\b",
            r"\bhelp\b",
        ])),
    ];

    static ref URL: Regex = Regex::new(r#"https?://[^\s<>"'\)\]]+"#).unwrap();
    static ref QUARTER_PHRASE: Regex =
        Regex::new(r"(?i)\b(?:(first|1st)|(second|2nd)|(third|3rd)|(fourth|4th))\s+quarter\b").unwrap();
    static ref QUARTER_TOKEN: Regex = Regex::new(r"(?i)\bq[1-4]\b").unwrap();

    static ref COUNT: Regex =
        Regex::new(r"(?i)\b(?:(top|first|show)|(bottom|last))\s+(\d+)\b|\b(\d+)\s+(?:rows?|records?|entries|results?)\b").unwrap();
    static ref SORT_BY: Regex = Regex::new(r"(?i)\b(?:sort|order)(?:ed)?\s+by\s+([a-z_]+)").unwrap();
    static ref EXTREME: Regex =
        Regex::new(r"(?i)\b(?:(highest|largest|maximum|biggest)|(lowest|smallest|minimum))\s+([a-z_]+)").unwrap();
    static ref FILTER: Regex = Regex::new(r"(?i)\b([a-z_]+)\s*(>=|<=|==|!=|>|<|=)\s*([^\s,]+)").unwrap();
    static ref SEARCH: Regex =
        Regex::new(r#"(?i)\b(?:search|look)\s+for\s+["']?([^"'?.,]+?)["']?(?:\s+in\b|[?.,]|$)"#).unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)\b(?:group(?:ed)?\s+by|per)\s+([a-z_]+)").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"(?i)\b(?:aggregate|totals?|sum)\b").unwrap();
}

//
// ================= Priors =================
//

pub fn signal_hits(tool: ToolName, query: &str) -> usize {
    let hits = TOOL_SIGNALS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, patterns)| patterns.iter().filter(|p| p.is_match(query)).count())
        .unwrap_or(0);

    if tool == ToolName::WebResearch && find_url(query).is_some() {
        hits + 2
    } else {
        hits
    }
}

/// Rule prior: 1 hit 0.6, 2 hits 0.75, 3 or more 0.85.
pub fn prior_score(tool: ToolName, query: &str) -> f32 {
    match signal_hits(tool, query) {
        0 => 0.0,
        1 => 0.6,
        2 => 0.75,
        _ => 0.85,
    }
}

pub fn find_url(query: &str) -> Option<String> {
    URL.find(query)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
}

//
// ================= Eligibility =================
//

pub fn is_eligible(descriptor: &ToolDescriptor, query: &str, session: &Session) -> bool {
    match descriptor.capability {
        CapabilityTag::General => true,
        CapabilityTag::WebBound => {
            find_url(query).is_some()
                || session.ready_count(|k| k == DocumentKind::WebLink) > 0
                || signal_hits(ToolName::WebResearch, query) > 0
        }
        CapabilityTag::DataBound | CapabilityTag::DocumentBound => {
            let tool = descriptor.name;
            session.ready_count(|k| tool.accepts(k)) >= descriptor.min_ready_documents.max(1)
        }
    }
}

//
// ================= Draft Arguments =================
//

/// Quarters in mention order, e.g. "Q1", "second quarter" -> ["Q1", "Q2"].
pub fn extract_quarters(query: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = QUARTER_TOKEN
        .find_iter(query)
        .filter_map(|m| normalise_quarter(m.as_str()).map(|q| (m.start(), q)))
        .collect();

    for caps in QUARTER_PHRASE.captures_iter(query) {
        if let Some(n) = (1..=4).find(|&i| caps.get(i).is_some()) {
            let start = caps.get(0).map_or(0, |m| m.start());
            found.push((start, format!("Q{}", n)));
        }
    }

    found.sort_by_key(|(start, _)| *start);
    let mut quarters: Vec<String> = Vec::new();
    for (_, q) in found {
        if !quarters.contains(&q) {
            quarters.push(q);
        }
    }
    quarters
}

pub fn extract_metrics(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    METRICS
        .iter()
        .filter(|m| lower.contains(*m))
        .map(|m| m.to_string())
        .collect()
}

pub fn extract_metric(query: &str) -> String {
    extract_metrics(query)
        .into_iter()
        .next()
        .unwrap_or_else(|| "revenue".to_string())
}

fn mentions(query_lower: &str, document: &DocumentRef) -> bool {
    let name = document.name.to_lowercase();
    let stem = name.rsplit_once('.').map_or(name.as_str(), |(stem, _)| stem);
    query_lower.contains(&name) || (stem.len() >= 3 && query_lower.contains(stem))
}

/// Ready documents the tool accepts, in registration order.
fn candidates<'a>(tool: ToolName, session: &'a Session) -> Vec<&'a DocumentRef> {
    let mut docs: Vec<&DocumentRef> = session
        .ready_documents()
        .filter(|d| tool.accepts(d.kind))
        .collect();
    docs.sort_by_key(|d| d.registered_at);
    docs
}

/// Document named in the query, otherwise the most recently registered one.
pub fn pick_document(tool: ToolName, query: &str, session: &Session) -> Option<String> {
    let docs = candidates(tool, session);
    let lower = query.to_lowercase();
    docs.iter()
        .find(|d| mentions(&lower, d))
        .or_else(|| docs.last())
        .map(|d| d.ref_id.clone())
}

/// Documents named in the query when at least two are, otherwise all.
fn pick_documents(tool: ToolName, query: &str, session: &Session) -> Vec<String> {
    let docs = candidates(tool, session);
    let lower = query.to_lowercase();
    let named: Vec<String> = docs
        .iter()
        .filter(|d| mentions(&lower, d))
        .map(|d| d.ref_id.clone())
        .collect();
    if named.len() >= 2 {
        named
    } else {
        docs.iter().map(|d| d.ref_id.clone()).collect()
    }
}

fn table_parameters(query: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut extraction_type = "all";
    let mut ascending = false;

    if let Some(caps) = COUNT.captures(query) {
        let n = caps
            .get(3)
            .or_else(|| caps.get(4))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        if let Some(n) = n {
            params.insert("n_results".into(), json!(n));
            extraction_type = "top_n";
            ascending = caps.get(2).is_some();
        }
    }

    if let Some(caps) = SORT_BY.captures(query) {
        params.insert("sort_column".into(), json!(caps[1].to_lowercase()));
        let lower = query.to_lowercase();
        if lower.contains("ascending") || lower.contains(" asc") {
            ascending = true;
        }
        extraction_type = "top_n";
    } else if let Some(caps) = EXTREME.captures(query) {
        params.insert("sort_column".into(), json!(caps[3].to_lowercase()));
        ascending = caps.get(2).is_some();
        extraction_type = "top_n";
    }

    let filters: Vec<Value> = FILTER
        .captures_iter(query)
        .map(|caps| {
            let operator = if &caps[2] == "=" { "==" } else { &caps[2] };
            json!({"column": caps[1].to_lowercase(), "operator": operator, "value": &caps[3]})
        })
        .collect();
    if !filters.is_empty() {
        if extraction_type == "all" {
            extraction_type = "filter";
        }
        params.insert("filters".into(), Value::Array(filters));
    }

    if let Some(caps) = SEARCH.captures(query) {
        params.insert("search_term".into(), json!(caps[1].trim()));
        if extraction_type == "all" {
            extraction_type = "search";
        }
    }

    if let Some(caps) = GROUP_BY.captures(query) {
        params.insert("group_column".into(), json!(caps[1].to_lowercase()));
        extraction_type = "aggregate";
    } else if extraction_type == "all" && AGGREGATE.is_match(query) {
        extraction_type = "aggregate";
    }

    if extraction_type == "top_n" {
        params.insert("ascending".into(), json!(ascending));
    }
    params.insert("extraction_type".into(), json!(extraction_type));
    params
}

/// Prompt-history settings used for the general-query context.
#[derive(Debug, Clone, Copy)]
pub struct HistorySettings {
    pub messages: usize,
    pub message_chars: usize,
}

pub fn draft_arguments(tool: ToolName, query: &str, session: &Session, history: HistorySettings) -> Value {
    match tool {
        ToolName::FinancialTrendAnalysis => {
            let mut quarters = extract_quarters(query);
            if quarters.is_empty() {
                quarters = vec!["Q1".to_string(), "Q2".to_string()];
            }
            json!({
                "document_id": pick_document(tool, query, session),
                "metric": extract_metric(query),
                "quarters": quarters,
            })
        }
        ToolName::ComparativeAnalysis => json!({
            "document_ids": pick_documents(tool, query, session),
            "metrics": extract_metrics(query),
            "columns": [],
            "quarters": extract_quarters(query),
        }),
        ToolName::ExtractTableData => {
            let mut params = table_parameters(query);
            params.insert("document_id".into(), json!(pick_document(tool, query, session)));
            Value::Object(params)
        }
        ToolName::StatisticalAnalysis => json!({
            "document_id": pick_document(tool, query, session),
            "columns": extract_metrics(query),
        }),
        ToolName::DocumentSummarizer => json!({
            "document_id": pick_document(tool, query, session),
        }),
        ToolName::WebResearch => {
            let url = find_url(query).or_else(|| {
                candidates(tool, session)
                    .last()
                    .and_then(|d| d.source.clone())
            });
            json!({ "url": url, "query": query })
        }
        ToolName::GeneralQuery => json!({
            "query": query,
            "context": condensed_history(session, history.messages, history.message_chars),
        }),
    }
}

//
// ================= Retry Relaxation =================
//

fn known_column(available: &[String], column: &str) -> bool {
    let column = column.trim().to_lowercase();
    available.iter().any(|a| {
        let a = a.to_lowercase();
        a.contains(&column) || column.contains(&a)
    })
}

/// Loosen arguments after a failure using what the tool reported it saw.
pub fn relax_arguments(tool: ToolName, arguments: &Value, hint: &RetryHint) -> Value {
    let mut relaxed = arguments.clone();
    let Some(args) = relaxed.as_object_mut() else {
        return relaxed;
    };

    match tool {
        ToolName::FinancialTrendAnalysis => {
            let quarters: Vec<String> = hint
                .available
                .iter()
                .filter_map(|a| normalise_quarter(a))
                .collect();
            if !quarters.is_empty() && quarters.len() == hint.available.len() {
                args.insert("quarters".into(), json!(quarters));
            } else if let Some(first) = hint.available.first() {
                args.insert("metric".into(), json!(first));
            }
        }
        ToolName::ComparativeAnalysis => {
            args.insert("metrics".into(), json!([]));
            args.insert("columns".into(), json!([]));
        }
        ToolName::StatisticalAnalysis => {
            args.insert("columns".into(), json!([]));
        }
        ToolName::ExtractTableData => {
            if let Some(sort) = args.get("sort_column").and_then(Value::as_str) {
                if !hint.available.is_empty() && !known_column(&hint.available, sort) {
                    args.remove("sort_column");
                }
            }

            let kept: Vec<Value> = args
                .get("filters")
                .and_then(Value::as_array)
                .map(|filters| {
                    filters
                        .iter()
                        .filter(|f| {
                            f.get("column")
                                .and_then(Value::as_str)
                                .is_some_and(|c| hint.available.is_empty() || known_column(&hint.available, c))
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let filtering = args.get("extraction_type").and_then(Value::as_str) == Some("filter");
            if kept.is_empty() {
                args.remove("filters");
                if filtering {
                    args.insert("extraction_type".into(), json!("all"));
                }
            } else {
                args.insert("filters".into(), Value::Array(kept));
            }
        }
        ToolName::DocumentSummarizer | ToolName::WebResearch | ToolName::GeneralQuery => {}
    }
    relaxed
}
