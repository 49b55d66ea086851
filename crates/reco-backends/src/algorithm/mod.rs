//! The algorithm dispatch layer.
//!
//! Scoring goes through one entry point, [`AlgorithmDispatcher::run`]:
//! the named instance is resolved from the registry (so a request
//! captures its handle and hot reloads never tear an in-flight call), the
//! optional pre-dispatch transform is applied, the backend variant is
//! invoked under the remaining deadline, and non-finite scores are
//! clamped before anything reaches a caller.

mod field_lookup;
mod parsers;
mod remote_ml;
mod vector;

pub use field_lookup::FieldLookup;
pub use parsers::{ResponseParser, parser_by_name};
pub use remote_ml::RemoteMlClient;
pub use vector::{VectorDatabaseClient, VectorSearchClient, similarity};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use reco_kernel::Registry;
use reco_kernel::config::{AlgorithmConfig, AlgorithmKind};
use reco_kernel::context::RequestContext;
use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::registry::RegistryError;
use reco_kernel::scoring::{AlgoInput, NEUTRAL_SCORE, ScoredRecord, TransformFn};
use reco_kernel::traits::ScoringBackend;

/// Failure of one dispatch.
///
/// Callers decide the fallback: the rank phase degrades to neutral
/// scores, vector recalls yield no items.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resolution(#[from] RegistryError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Connection state and configuration of one backend variant.
enum Backend {
    FieldLookup(FieldLookup),
    VectorSearch(VectorSearchClient),
    VectorDatabase(VectorDatabaseClient),
    RemoteMl(RemoteMlClient),
    Custom(Arc<dyn ScoringBackend>),
}

/// A configured scoring algorithm instance.
///
/// Owns its backend's connection state; the state is released when the
/// instance is replaced by a reload and the last in-flight handle drops.
pub struct Algorithm {
    name: String,
    transform: Option<TransformFn>,
    backend: Backend,
}

#[async_trait]
impl ScoringBackend for Algorithm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        input: AlgoInput,
        ctx: &RequestContext,
    ) -> BackendResult<Vec<ScoredRecord>> {
        let input = match &self.transform {
            Some(transform) => transform(input),
            None => input,
        };
        match &self.backend {
            Backend::FieldLookup(lookup) => lookup.score(&input, ctx),
            Backend::VectorSearch(client) => client.search(&input, ctx).await,
            Backend::VectorDatabase(client) => client.search(&input, ctx).await,
            Backend::RemoteMl(client) => client.invoke(&input, ctx).await,
            Backend::Custom(custom) => custom.invoke(input, ctx).await,
        }
    }
}

/// Named transforms and custom backends available to the builder.
///
/// Both are registered in code before startup; configuration references
/// them by name.
#[derive(Default, Clone)]
pub struct AlgorithmHooks {
    transforms: HashMap<String, TransformFn>,
    customs: HashMap<String, Arc<dyn ScoringBackend>>,
}

impl AlgorithmHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transform(&mut self, name: impl Into<String>, transform: TransformFn) {
        self.transforms.insert(name.into(), transform);
    }

    pub fn register_custom(&mut self, name: impl Into<String>, backend: Arc<dyn ScoringBackend>) {
        self.customs.insert(name.into(), backend);
    }
}

/// Construct an algorithm instance from its configuration subtree.
pub fn build_algorithm(
    cfg: &AlgorithmConfig,
    hooks: &AlgorithmHooks,
) -> Result<Arc<dyn ScoringBackend>, String> {
    let transform = match &cfg.transform {
        Some(name) => Some(
            hooks
                .transforms
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unknown transform {name:?}"))?,
        ),
        None => None,
    };

    let backend = match cfg.kind {
        AlgorithmKind::FieldLookup => {
            let settings = cfg
                .field_lookup
                .as_ref()
                .ok_or_else(|| "missing field_lookup settings".to_string())?;
            Backend::FieldLookup(FieldLookup::new(settings))
        }
        AlgorithmKind::VectorSearch => {
            let settings = cfg
                .vector_search
                .as_ref()
                .ok_or_else(|| "missing vector_search settings".to_string())?;
            Backend::VectorSearch(VectorSearchClient::new(settings)?)
        }
        AlgorithmKind::VectorDatabase => {
            let settings = cfg
                .vector_database
                .as_ref()
                .ok_or_else(|| "missing vector_database settings".to_string())?;
            Backend::VectorDatabase(VectorDatabaseClient::new(settings)?)
        }
        AlgorithmKind::RemoteMl => {
            let settings = cfg
                .remote_ml
                .as_ref()
                .ok_or_else(|| "missing remote_ml settings".to_string())?;
            Backend::RemoteMl(RemoteMlClient::new(settings)?)
        }
        AlgorithmKind::Custom => Backend::Custom(
            hooks
                .customs
                .get(&cfg.name)
                .cloned()
                .ok_or_else(|| format!("no custom backend registered as {:?}", cfg.name))?,
        ),
    };

    Ok(Arc::new(Algorithm {
        name: cfg.name.clone(),
        transform,
        backend,
    }))
}

/// Uniform scoring entry point over the registry.
pub struct AlgorithmDispatcher {
    registry: Arc<Registry>,
}

impl AlgorithmDispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Resolve `name`, invoke it under the remaining request deadline and
    /// clamp invalid scores to the neutral default.
    pub async fn run(
        &self,
        name: &str,
        input: AlgoInput,
        ctx: &RequestContext,
    ) -> Result<Vec<ScoredRecord>, DispatchError> {
        let backend = self.registry.lookup_algorithm(name)?;

        let remaining = ctx.deadline_remaining();
        if remaining.is_zero() {
            return Err(BackendError::Timeout(0).into());
        }

        let mut records = tokio::time::timeout(remaining, backend.invoke(input, ctx))
            .await
            .map_err(|_| BackendError::Timeout(remaining.as_millis() as u64))??;

        for record in &mut records {
            if !record.score.is_finite() {
                ctx.log_warn(format!(
                    "algorithm {name} returned non-finite score, clamping to {NEUTRAL_SCORE}"
                ));
                ctx.count_invariant_violation();
                record.score = NEUTRAL_SCORE;
            }
            if let Some(map) = &mut record.score_map {
                map.retain(|_, v| v.is_finite());
            }
        }
        Ok(records)
    }
}
