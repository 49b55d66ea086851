//! HTTP clients for vector-similarity backends.
//!
//! Two variants share one wire shape: a bare similarity server queried at
//! its root search route, and a vector database addressed by collection.
//! Both answer `(id, distance)` pairs; distances convert to similarity
//! scores per the configured metric.

use serde::{Deserialize, Serialize};

use reco_kernel::config::{VectorDatabaseSettings, VectorMetric, VectorSearchSettings};
use reco_kernel::context::RequestContext;
use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::scoring::{AlgoInput, ScoredRecord};

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: String,
    distance: f64,
}

/// Convert a backend distance to a similarity score, higher is better.
pub fn similarity(metric: VectorMetric, distance: f64) -> f64 {
    match metric {
        VectorMetric::Cosine => 1.0 - distance,
        VectorMetric::L2 => 1.0 / (1.0 + distance.max(0.0)),
        VectorMetric::InnerProduct => distance,
    }
}

fn build_client(timeout_ms: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| format!("vector client construction failed: {e}"))
}

fn transport_error(timeout_ms: u64, err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout_ms)
    } else {
        BackendError::Transport(err.to_string())
    }
}

async fn search(
    http: &reqwest::Client,
    url: &str,
    timeout_ms: u64,
    metric: VectorMetric,
    query: &[f32],
    top_k: usize,
) -> BackendResult<Vec<ScoredRecord>> {
    let response = http
        .post(url)
        .json(&SearchRequest { vector: query, top_k })
        .send()
        .await
        .map_err(|e| transport_error(timeout_ms, e))?
        .error_for_status()
        .map_err(|e| BackendError::BadResponse(e.to_string()))?;

    let body: SearchResponse = response
        .json()
        .await
        .map_err(|e| BackendError::BadResponse(e.to_string()))?;

    Ok(body
        .results
        .into_iter()
        .map(|hit| ScoredRecord::new(similarity(metric, hit.distance)).with_id(hit.id))
        .collect())
}

fn query_of(input: &AlgoInput) -> BackendResult<(&[f32], usize)> {
    match input {
        AlgoInput::Vector { query, top_k } => Ok((query.as_slice(), *top_k)),
        _ => Err(BackendError::BadInput(
            "vector search expects a query vector".into(),
        )),
    }
}

/// Client of a bare similarity server.
pub struct VectorSearchClient {
    server_address: String,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl VectorSearchClient {
    pub fn new(settings: &VectorSearchSettings) -> Result<Self, String> {
        Ok(Self {
            server_address: settings.server_address.trim_end_matches('/').to_string(),
            timeout_ms: settings.timeout_ms,
            http: build_client(settings.timeout_ms)?,
        })
    }

    pub async fn search(
        &self,
        input: &AlgoInput,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<ScoredRecord>> {
        let (query, top_k) = query_of(input)?;
        let url = format!("{}/search", self.server_address);
        search(
            &self.http,
            &url,
            self.timeout_ms,
            VectorMetric::Cosine,
            query,
            top_k,
        )
        .await
    }
}

/// Client of a named collection in a vector database.
pub struct VectorDatabaseClient {
    server_address: String,
    collection: String,
    metric: VectorMetric,
    top_k: usize,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl VectorDatabaseClient {
    pub fn new(settings: &VectorDatabaseSettings) -> Result<Self, String> {
        Ok(Self {
            server_address: settings.server_address.trim_end_matches('/').to_string(),
            collection: settings.collection.clone(),
            metric: settings.metric,
            top_k: settings.top_k,
            timeout_ms: settings.timeout_ms,
            http: build_client(settings.timeout_ms)?,
        })
    }

    pub async fn search(
        &self,
        input: &AlgoInput,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<ScoredRecord>> {
        let (query, requested_k) = query_of(input)?;
        // The collection's configured top_k bounds what a caller may ask for.
        let top_k = if requested_k == 0 {
            self.top_k
        } else {
            requested_k.min(self.top_k)
        };
        let url = format!(
            "{}/collections/{}/search",
            self.server_address, self.collection
        );
        search(&self.http, &url, self.timeout_ms, self.metric, query, top_k).await
    }
}
