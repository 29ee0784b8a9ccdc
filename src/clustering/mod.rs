//! Client for the external remark-clustering service.
//!
//! The service receives remark texts grouped by review category and answers
//! with groups of near-duplicates, each reduced to one synthesized remark.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ClusteringConfig;

/// Remark texts keyed by category key, as sent to the service.
pub type RemarkPayload = BTreeMap<String, Vec<String>>;

/// Clustered groups keyed by category key.
pub type ClusteredRemarks = BTreeMap<String, Vec<RemarkGroup>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemarkGroup {
    pub group_name: String,
    pub synthesized_remark: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub original_duplicates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClusteringResponse {
    success: bool,
    #[serde(default)]
    data: BTreeMap<String, Option<Vec<RemarkGroup>>>,
    #[serde(default)]
    error: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum ClusteringError {
    /// Anything other than `202 Accepted`.
    #[error("clustering service returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("clustering service reported failure: {0}")]
    Unsuccessful(String),

    #[error("malformed clustering response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait RemarkClusterer: Send + Sync {
    async fn cluster(&self, payload: &RemarkPayload) -> Result<ClusteredRemarks, ClusteringError>;
}

pub struct ClusteringClient {
    client: Client,
    endpoint: String,
}

impl ClusteringClient {
    pub fn new(config: &ClusteringConfig) -> Result<Self, ClusteringError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/remarks", config.url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RemarkClusterer for ClusteringClient {
    async fn cluster(&self, payload: &RemarkPayload) -> Result<ClusteredRemarks, ClusteringError> {
        let total: usize = payload.values().map(Vec::len).sum();
        debug!(endpoint = %self.endpoint, categories = payload.len(), remarks = total, "posting remarks");

        let response = self.client.post(&self.endpoint).json(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::ACCEPTED {
            return Err(ClusteringError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ClusteringResponse = serde_json::from_str(&body)?;
        if !parsed.success {
            return Err(ClusteringError::Unsuccessful(
                parsed.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }

        let clustered: ClusteredRemarks = parsed
            .data
            .into_iter()
            .map(|(category, groups)| (category, groups.unwrap_or_default()))
            .collect();
        info!(
            categories = clustered.len(),
            groups = clustered.values().map(Vec::len).sum::<usize>(),
            "remarks clustered"
        );
        Ok(clustered)
    }
}
