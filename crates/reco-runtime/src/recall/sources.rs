//! Configured recall instances.
//!
//! One struct covers every configured kind; the flavor enum holds what
//! differs. DAO and algorithm handles are captured at build time, so a
//! recall built against one configuration serves against it until the
//! registry swaps the instance.

use futures::future::join_all;
use std::sync::Arc;

use async_trait::async_trait;

use reco_kernel::Registry;
use reco_kernel::cache::RecallCache;
use reco_kernel::config::{CacheScope, CollaborativeMode, RecallConfig, RecallKind};
use reco_kernel::context::RequestContext;
use reco_kernel::error::BackendResult;
use reco_kernel::item::Item;
use reco_kernel::scoring::AlgoInput;
use reco_kernel::traits::{RecallSource, RecommendDao, ScoringBackend};
use reco_kernel::user::User;

/// Default DAO key of global popularity lists.
const POPULARITY_KEY: &str = "popularity";

/// Default DAO key of cold-start seed lists.
const COLD_START_KEY: &str = "cold_start";

/// How a keyed recall derives its DAO lookup key for a request.
enum KeyStrategy {
    /// Always the same key (global popularity, cold-start seeds).
    Fixed(String),
    /// `base:group` from a user property, falling back to the base key
    /// when the user has no group.
    Grouped { base: String, property: String },
    /// The user's uid (realtime U2I, user-based collaborative, external
    /// services keyed by user).
    Uid,
}

impl KeyStrategy {
    fn key_for(&self, user: &User) -> String {
        match self {
            KeyStrategy::Fixed(key) => key.clone(),
            KeyStrategy::Grouped { base, property } => match user.string_property(property) {
                Some(group) if !group.is_empty() => format!("{base}:{group}"),
                _ => base.clone(),
            },
            KeyStrategy::Uid => user.uid().to_string(),
        }
    }
}

enum RecallFlavor {
    /// One DAO lookup under a request-derived key.
    Keyed {
        dao: Arc<dyn RecommendDao>,
        strategy: KeyStrategy,
    },
    /// Seed items from the user's history expanded through an
    /// item-to-item DAO, with per-seed-rank and per-hop score decay.
    Trigger {
        dao: Arc<dyn RecommendDao>,
        trigger_property: String,
        trigger_count: usize,
        hops: usize,
        hop_decay: f64,
    },
    /// The user's embedding dispatched to a vector algorithm.
    Vector { backend: Arc<dyn ScoringBackend> },
}

/// A recall instance assembled from its configuration subtree.
pub struct ConfiguredRecall {
    name: String,
    item_type: String,
    limit: usize,
    cache: Option<(RecallCache, CacheScope)>,
    flavor: RecallFlavor,
}

#[async_trait]
impl RecallSource for ConfiguredRecall {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> &str {
        &self.item_type
    }

    fn limit(&self) -> usize {
        self.limit
    }

    async fn recall(&self, user: &Arc<User>, ctx: &RequestContext) -> BackendResult<Vec<Item>> {
        let cache_key = self
            .cache
            .as_ref()
            .map(|(_, scope)| RecallCache::key_for(*scope, &self.name, user.uid()));

        if let (Some((cache, _)), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                ctx.log_debug(format!("recall {} served from cache", self.name));
                return Ok((*hit).clone());
            }
        }

        let mut items = match &self.flavor {
            RecallFlavor::Keyed { dao, strategy } => {
                let key = strategy.key_for(user);
                dao.list_by_key(&key, self.limit, ctx).await?
            }
            RecallFlavor::Trigger {
                dao,
                trigger_property,
                trigger_count,
                hops,
                hop_decay,
            } => {
                self.expand_triggers(
                    dao,
                    user,
                    ctx,
                    trigger_property,
                    *trigger_count,
                    *hops,
                    *hop_decay,
                )
                .await?
            }
            RecallFlavor::Vector { backend } => {
                let Some(query) = user.embedding() else {
                    ctx.log_debug(format!(
                        "recall {}: user has no embedding, yielding nothing",
                        self.name
                    ));
                    return Ok(Vec::new());
                };
                let records = backend
                    .invoke(
                        AlgoInput::Vector {
                            query,
                            top_k: self.limit,
                        },
                        ctx,
                    )
                    .await?;
                records
                    .into_iter()
                    .filter_map(|record| {
                        let id = record.id?;
                        let mut item = Item::new(id, &self.item_type).with_score(record.score);
                        if let Some(map) = record.score_map {
                            item.score_map = map;
                        }
                        Some(item)
                    })
                    .collect()
            }
        };

        for item in &mut items {
            item.item_type = self.item_type.clone();
            item.retrieve_sources.insert(self.name.clone());
        }
        items.sort_by(reco_kernel::item::ranking_cmp);
        items.truncate(self.limit);

        if let (Some((cache, _)), Some(key)) = (&self.cache, cache_key) {
            cache.put(key, items.clone());
        }
        Ok(items)
    }
}

impl ConfiguredRecall {
    #[allow(clippy::too_many_arguments)]
    async fn expand_triggers(
        &self,
        dao: &Arc<dyn RecommendDao>,
        user: &Arc<User>,
        ctx: &RequestContext,
        trigger_property: &str,
        trigger_count: usize,
        hops: usize,
        hop_decay: f64,
    ) -> BackendResult<Vec<Item>> {
        let seeds: Vec<String> = user
            .string_list_property(trigger_property)
            .into_iter()
            .take(trigger_count)
            .collect();
        if seeds.is_empty() {
            ctx.log_debug(format!("recall {}: no trigger items", self.name));
            return Ok(Vec::new());
        }

        // (key, score scale); seeds decay by their rank in the history.
        let mut frontier: Vec<(String, f64)> = seeds
            .iter()
            .enumerate()
            .map(|(rank, id)| (id.clone(), hop_decay.powi(rank as i32)))
            .collect();
        let mut out: Vec<Item> = Vec::new();

        for hop in 0..hops.max(1) {
            let lookups = join_all(frontier.iter().map(|(key, _)| {
                let dao = Arc::clone(dao);
                let key = key.clone();
                async move { dao.list_by_key(&key, self.limit, ctx).await }
            }))
            .await;

            let mut next_frontier = Vec::new();
            for ((_, scale), result) in frontier.iter().zip(lookups) {
                match result {
                    Ok(neighbors) => {
                        for mut item in neighbors {
                            item.score *= scale * hop_decay.powi(hop as i32);
                            next_frontier.push((item.id.clone(), item.score.max(0.0)));
                            out.push(item);
                        }
                    }
                    Err(e) => ctx.log_warn(format!("recall {}: trigger lookup: {e}", self.name)),
                }
            }
            if out.len() >= self.limit || next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        Ok(out)
    }
}

/// Construct a recall instance from its configuration subtree.
///
/// DAO and algorithm handles are resolved from the registry, which the
/// reload pass has already refreshed for this configuration.
pub fn build_recall(
    cfg: &RecallConfig,
    registry: &Registry,
) -> Result<Arc<dyn RecallSource>, String> {
    let dao = |name: &Option<String>| -> Result<Arc<dyn RecommendDao>, String> {
        let name = name.as_ref().ok_or_else(|| "missing dao_name".to_string())?;
        registry.lookup_dao(name).map_err(|e| e.to_string())
    };

    let flavor = match cfg.kind {
        RecallKind::Popularity => RecallFlavor::Keyed {
            dao: dao(&cfg.dao_name)?,
            strategy: match &cfg.group_property {
                Some(property) => KeyStrategy::Grouped {
                    base: cfg.key.clone().unwrap_or_else(|| POPULARITY_KEY.to_string()),
                    property: property.clone(),
                },
                None => KeyStrategy::Fixed(
                    cfg.key.clone().unwrap_or_else(|| POPULARITY_KEY.to_string()),
                ),
            },
        },
        RecallKind::ColdStart => RecallFlavor::Keyed {
            dao: dao(&cfg.dao_name)?,
            strategy: KeyStrategy::Fixed(
                cfg.key.clone().unwrap_or_else(|| COLD_START_KEY.to_string()),
            ),
        },
        RecallKind::RealtimeU2i | RecallKind::ExternalService => RecallFlavor::Keyed {
            dao: dao(&cfg.dao_name)?,
            strategy: KeyStrategy::Uid,
        },
        RecallKind::Collaborative => match cfg.collaborative_mode {
            CollaborativeMode::UserBased => RecallFlavor::Keyed {
                dao: dao(&cfg.dao_name)?,
                strategy: KeyStrategy::Uid,
            },
            CollaborativeMode::ItemBased => RecallFlavor::Trigger {
                dao: dao(&cfg.dao_name)?,
                trigger_property: cfg.trigger_property.clone(),
                trigger_count: cfg.trigger_count,
                hops: 1,
                hop_decay: cfg.hop_decay,
            },
        },
        RecallKind::GraphBased => RecallFlavor::Trigger {
            dao: dao(&cfg.dao_name)?,
            trigger_property: cfg.trigger_property.clone(),
            trigger_count: cfg.trigger_count,
            hops: cfg.hops,
            hop_decay: cfg.hop_decay,
        },
        RecallKind::VectorSimilarity => {
            let name = cfg
                .algorithm_name
                .as_ref()
                .ok_or_else(|| "missing algorithm_name".to_string())?;
            RecallFlavor::Vector {
                backend: registry.lookup_algorithm(name).map_err(|e| e.to_string())?,
            }
        }
    };

    Ok(Arc::new(ConfiguredRecall {
        name: cfg.name.clone(),
        item_type: cfg.item_type.clone(),
        limit: cfg.limit,
        cache: cfg
            .cache
            .as_ref()
            .map(|settings| (RecallCache::new(settings), settings.scope)),
        flavor,
    }))
}
