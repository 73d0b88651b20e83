//! Chart artifacts
//!
//! Tools describe charts as a serialisable spec; rendering to an image is
//! the chart renderer's job. The spec is persisted through the chart store
//! and only the returned reference travels with the result.

use crate::collaborators::ChartStore;
use crate::models::{ChartRef, ToolName};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
}

impl ChartSpec {
    pub fn filename(message_id: Uuid, tool: ToolName) -> String {
        format!("{}_{}.json", message_id, tool)
    }
}

/// Store a chart spec. A storage failure only costs the chart, not the
/// answer, so it is logged and reported as `None`.
pub async fn persist_chart(
    store: &dyn ChartStore,
    message_id: Uuid,
    tool: ToolName,
    spec: &ChartSpec,
) -> Option<ChartRef> {
    let bytes = match serde_json::to_vec(spec) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%tool, error = %e, "Chart spec serialization failed");
            return None;
        }
    };

    match store.store(&ChartSpec::filename(message_id, tool), bytes).await {
        Ok(chart) => Some(chart),
        Err(e) => {
            warn!(%tool, error = %e, "Chart storage failed, continuing without chart");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryChartStore;

    #[tokio::test]
    async fn test_persist_chart_returns_reference_only() {
        let store = InMemoryChartStore::new();
        let message_id = Uuid::new_v4();
        let spec = ChartSpec {
            kind: ChartKind::Line,
            title: "Revenue".into(),
            x_label: "Quarter".into(),
            y_label: "Revenue".into(),
            categories: vec!["Q1".into(), "Q2".into()],
            series: vec![Series {
                name: "Revenue".into(),
                values: vec![Some(100.0), None],
            }],
        };

        let chart = persist_chart(&store, message_id, ToolName::FinancialTrendAnalysis, &spec)
            .await
            .unwrap();
        assert_eq!(
            chart.filename,
            format!("{}_financial_trend_analysis.json", message_id)
        );

        let stored: ChartSpec = serde_json::from_slice(&store.resolve(&chart).await.unwrap()).unwrap();
        assert_eq!(stored, spec);
    }
}
