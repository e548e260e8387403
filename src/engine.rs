//! The engine owns every live dataset and routes operations by access id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::StagingError;
use crate::response::{DatasetSummary, ProcessResponse, QueryResponse, SchemaResponse};

/// Registry of staged datasets, keyed by access id.
///
/// Clones share the registry. Each dataset's store serializes its own
/// operations, so the outer lock is only held long enough to resolve the
/// access id.
#[derive(Clone)]
pub struct StagingEngine {
    config: EngineConfig,
    datasets: Arc<RwLock<HashMap<String, Arc<Dataset>>>>,
}

impl StagingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            datasets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mint a fresh access id. Unguessable, and never reused.
    pub fn mint_access_id() -> String {
        format!("ds_{}", Uuid::new_v4().simple())
    }

    /// Stage a document under `access_id`, creating the dataset on first
    /// use. Never fails on an unknown id.
    pub async fn process(&self, access_id: &str, document: &Value) -> ProcessResponse {
        let dataset = match self.get_or_create(access_id).await {
            Ok(dataset) => dataset,
            Err(err) => return ProcessResponse::failure(format!("Failed to open dataset: {err}")),
        };
        dataset.process(document)
    }

    /// Run a governed query against an existing dataset.
    pub async fn query(&self, access_id: &str, sql: &str) -> Result<QueryResponse, StagingError> {
        let dataset = self.get(access_id).await?;
        Ok(dataset.query(sql))
    }

    /// Introspect an existing dataset's relational schema.
    pub async fn schema(&self, access_id: &str) -> Result<SchemaResponse, StagingError> {
        let dataset = self.get(access_id).await?;
        dataset.schema()
    }

    /// Drop a dataset and everything staged in it. Returns whether the
    /// access id was live.
    pub async fn delete(&self, access_id: &str) -> bool {
        let removed = self.datasets.write().await.remove(access_id).is_some();
        if removed {
            info!(access_id, "dataset deleted");
        }
        removed
    }

    /// Summaries of every live dataset, ordered by access id.
    pub async fn list_datasets(&self) -> Result<Vec<DatasetSummary>, StagingError> {
        let datasets: Vec<Arc<Dataset>> =
            self.datasets.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            summaries.push(dataset.summary()?);
        }
        summaries.sort_by(|a, b| a.access_id.cmp(&b.access_id));
        Ok(summaries)
    }

    async fn get(&self, access_id: &str) -> Result<Arc<Dataset>, StagingError> {
        self.datasets
            .read()
            .await
            .get(access_id)
            .cloned()
            .ok_or_else(|| StagingError::DatasetNotFound {
                access_id: access_id.to_string(),
            })
    }

    async fn get_or_create(&self, access_id: &str) -> Result<Arc<Dataset>, StagingError> {
        if let Some(dataset) = self.datasets.read().await.get(access_id) {
            return Ok(dataset.clone());
        }
        let mut datasets = self.datasets.write().await;
        // Re-check under the write lock; another caller may have won.
        if let Some(dataset) = datasets.get(access_id) {
            return Ok(dataset.clone());
        }
        let dataset = Arc::new(Dataset::new(access_id.to_string(), self.config.clone())?);
        info!(access_id, "dataset created");
        datasets.insert(access_id.to_string(), dataset.clone());
        Ok(dataset)
    }
}

impl Default for StagingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
