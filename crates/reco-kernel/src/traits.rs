//! Component contracts resolved through the [`Registry`](crate::Registry).
//!
//! These traits are the seams between the pipeline runtime and the
//! concrete backends: recalls produce candidates, filters prune them,
//! sorters order them, scoring backends assign scores and DAOs read from
//! stores. Implementations must be `Send + Sync` so they can be shared
//! across Tokio tasks without additional synchronization by the caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::BackendResult;
use crate::item::{Item, PropertyValue};
use crate::scoring::{AlgoInput, ScoredRecord};
use crate::user::User;

/// A named candidate generator.
///
/// Recalls execute concurrently and in isolation; an error (or panic)
/// inside one recall is confined to it and yields no items. Items must be
/// returned already sorted by source-specific relevance and truncated to
/// the instance's own limit.
#[async_trait]
pub trait RecallSource: Send + Sync {
    /// Stable identifier, used in logs and as the `retrieve_source` tag.
    fn name(&self) -> &str;

    /// Category tag stamped on emitted items.
    fn item_type(&self) -> &str;

    /// Maximum candidates this instance may return. The phase truncates
    /// anything beyond it before merging.
    fn limit(&self) -> usize {
        usize::MAX
    }

    /// Produce candidates for the user.
    async fn recall(&self, user: &Arc<User>, ctx: &RequestContext) -> BackendResult<Vec<Item>>;
}

/// A business-rule transformation of the candidate list.
///
/// Filters are applied strictly in configured order, must preserve the
/// relative order of retained items, and must be deterministic given
/// identical input. A filter that errors is skipped; the pipeline
/// proceeds with the unfiltered slice at that step.
#[async_trait]
pub trait CandidateFilter: Send + Sync {
    /// Stable identifier for this filter (used in logs).
    fn name(&self) -> &str;

    /// Return the retained items, order-preserving.
    async fn apply(
        &self,
        items: Vec<Item>,
        user: &Arc<User>,
        ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>>;
}

/// A final-ordering step. CPU-bound and infallible; sorters reorder the
/// slice in place and never change its membership.
pub trait CandidateSorter: Send + Sync {
    /// Stable identifier for this sorter (used in logs).
    fn name(&self) -> &str;

    fn sort(&self, items: &mut [Item], ctx: &RequestContext);
}

/// A scoring backend invoked through the algorithm dispatch layer.
///
/// Whatever the transport, the response is a sequence of
/// [`ScoredRecord`]s pairing with the input (positionally, or by id for
/// top-K backends).
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Stable identifier for this backend (used in logs).
    fn name(&self) -> &str;

    async fn invoke(&self, input: AlgoInput, ctx: &RequestContext)
    -> BackendResult<Vec<ScoredRecord>>;
}

/// Feature maps keyed by item id, as returned by batched feature reads.
pub type FeatureTable = HashMap<String, HashMap<String, PropertyValue>>;

/// Data-access object over a concrete store.
///
/// Recalls read candidate lists by key; the rank phase reads feature
/// tables in batches. Adapters that have no feature capability keep the
/// default empty implementation.
#[async_trait]
pub trait RecommendDao: Send + Sync {
    /// Stable identifier for this DAO (used in logs).
    fn name(&self) -> &str;

    /// Items stored under `key`, sorted by source-specific relevance,
    /// at most `limit` of them.
    async fn list_by_key(
        &self,
        key: &str,
        limit: usize,
        ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>>;

    /// Batched feature read for the given item ids.
    async fn batch_features(
        &self,
        _keys: &[String],
        _ctx: &RequestContext,
    ) -> BackendResult<FeatureTable> {
        Ok(FeatureTable::new())
    }
}

impl std::fmt::Debug for dyn RecommendDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendDao").field("name", &self.name()).finish()
    }
}
