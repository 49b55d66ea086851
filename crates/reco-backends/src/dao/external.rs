//! External-service DAO adapter.
//!
//! Speaks a small JSON contract against a remote service:
//!
//! ```text
//! POST {endpoint_url}/items     {"key": "...", "limit": N}
//!   -> {"items": [{"id", "item_type"?, "score"?, "properties"?}, ...]}
//! POST {endpoint_url}/features  {"keys": ["id", ...]}
//!   -> {"features": {"id": {"name": value, ...}, ...}}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use reco_kernel::config::DaoConfig;
use reco_kernel::context::RequestContext;
use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::item::{Item, PropertyValue};
use reco_kernel::traits::{FeatureTable, RecommendDao};

#[derive(Serialize)]
struct ItemsRequest<'a> {
    key: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct ItemsResponse {
    items: Vec<ItemRow>,
}

#[derive(Deserialize)]
struct ItemRow {
    id: String,
    #[serde(default)]
    item_type: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    properties: HashMap<String, PropertyValue>,
}

#[derive(Serialize)]
struct FeaturesRequest<'a> {
    keys: &'a [String],
}

#[derive(Deserialize)]
struct FeaturesResponse {
    features: FeatureTable,
}

pub struct ExternalHttpDao {
    name: String,
    endpoint_url: String,
    timeout_ms: u64,
    auth_headers: HashMap<String, String>,
    http: reqwest::Client,
}

impl ExternalHttpDao {
    pub fn from_config(cfg: &DaoConfig) -> Result<Self, String> {
        let endpoint_url = cfg
            .endpoint_url
            .as_ref()
            .ok_or_else(|| "missing endpoint_url".to_string())?
            .trim_end_matches('/')
            .to_string();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| format!("dao client construction failed: {e}"))?;
        Ok(Self {
            name: cfg.name.clone(),
            endpoint_url,
            timeout_ms: cfg.timeout_ms,
            auth_headers: cfg.auth_headers.clone(),
            http,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> BackendResult<R> {
        let mut request = self
            .http
            .post(format!("{}/{path}", self.endpoint_url))
            .json(body);
        for (name, value) in &self.auth_headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout_ms)
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| BackendError::BadResponse(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BackendError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl RecommendDao for ExternalHttpDao {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_by_key(
        &self,
        key: &str,
        limit: usize,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        let body: ItemsResponse = self.post("items", &ItemsRequest { key, limit }).await?;
        Ok(body
            .items
            .into_iter()
            .take(limit)
            .map(|row| {
                let mut item = Item::new(row.id, row.item_type.as_deref().unwrap_or("item"))
                    .with_score(row.score);
                item.properties = row.properties;
                item
            })
            .collect())
    }

    async fn batch_features(
        &self,
        keys: &[String],
        _ctx: &RequestContext,
    ) -> BackendResult<FeatureTable> {
        if keys.is_empty() {
            return Ok(FeatureTable::new());
        }
        let body: FeaturesResponse = self.post("features", &FeaturesRequest { keys }).await?;
        Ok(body.features)
    }
}
