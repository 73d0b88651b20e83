//! Chart-storage collaborators

use super::{chart_id, ChartStore, CollaboratorResult};
use crate::error::CollaboratorError;
use crate::models::ChartRef;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Charts held in process memory.
#[derive(Default, Clone)]
pub struct InMemoryChartStore {
    charts: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryChartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.charts.read().await.len()
    }
}

#[async_trait::async_trait]
impl ChartStore for InMemoryChartStore {
    async fn store(&self, filename: &str, bytes: Vec<u8>) -> CollaboratorResult<ChartRef> {
        let chart = ChartRef {
            chart_id: chart_id(&bytes),
            filename: filename.to_string(),
        };
        let mut charts = self.charts.write().await;
        charts.insert(chart.chart_id.clone(), bytes);
        Ok(chart)
    }

    async fn resolve(&self, chart: &ChartRef) -> CollaboratorResult<Vec<u8>> {
        let charts = self.charts.read().await;
        charts
            .get(&chart.chart_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("chart {}", chart.chart_id)))
    }
}

/// Charts written as files under one directory.
pub struct FsChartStore {
    root: PathBuf,
}

impl FsChartStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, filename: &str) -> CollaboratorResult<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(CollaboratorError::NotFound(format!(
                "invalid chart filename {:?}",
                filename
            )));
        }
        Ok(self.root.join(filename))
    }
}

#[async_trait::async_trait]
impl ChartStore for FsChartStore {
    async fn store(&self, filename: &str, bytes: Vec<u8>) -> CollaboratorResult<ChartRef> {
        let path = self.path_for(filename)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("chart dir: {}", e)))?;

        let chart = ChartRef {
            chart_id: chart_id(&bytes),
            filename: filename.to_string(),
        };
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("chart write: {}", e)))?;

        info!(chart_id = %chart.chart_id, path = %path.display(), "Chart stored");
        Ok(chart)
    }

    async fn resolve(&self, chart: &ChartRef) -> CollaboratorResult<Vec<u8>> {
        let path = self.path_for(&chart.filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                CollaboratorError::NotFound(format!("chart {}", chart.filename)),
            ),
            Err(e) => Err(CollaboratorError::Unavailable(format!("chart read: {}", e))),
        }
    }
}
