//! The recommend-config tree.
//!
//! A deployment is described by one [`RecommendConfig`]: an ordered list
//! of scene configurations plus the named algorithm, recall, filter, sort
//! and DAO instances they reference, and engine-wide bounds. Every
//! instance has a `name` (unique within its kind) and a `type` tag
//! selecting the backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ConfigError;
use crate::item::PropertyValue;

/// Root of the configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
    #[serde(default)]
    pub algorithms: Vec<AlgorithmConfig>,
    #[serde(default)]
    pub recalls: Vec<RecallConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub sorts: Vec<SortConfig>,
    #[serde(default)]
    pub daos: Vec<DaoConfig>,
}

impl RecommendConfig {
    /// Resolve the scene for `scene_id` + `category`, falling back to the
    /// scene's `"default"` category when the exact category is absent.
    pub fn scene(&self, scene_id: &str, category: &str) -> Option<&SceneConfig> {
        self.scenes
            .iter()
            .find(|s| s.scene_id == scene_id && s.category == category)
            .or_else(|| {
                self.scenes
                    .iter()
                    .find(|s| s.scene_id == scene_id && s.category == DEFAULT_CATEGORY)
            })
    }

    /// Structural validation: unique names per kind, resolvable
    /// references, per-kind settings present, sane numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unique("scene", self.scenes.iter().map(|s| s.key()))?;
        check_unique("algorithm", self.algorithms.iter().map(|a| a.name.clone()))?;
        check_unique("recall", self.recalls.iter().map(|r| r.name.clone()))?;
        check_unique("filter", self.filters.iter().map(|f| f.name.clone()))?;
        check_unique("sort", self.sorts.iter().map(|s| s.name.clone()))?;
        check_unique("dao", self.daos.iter().map(|d| d.name.clone()))?;

        for algo in &self.algorithms {
            algo.validate()?;
        }
        for recall in &self.recalls {
            recall.validate(self)?;
        }
        for dao in &self.daos {
            dao.validate()?;
        }

        for scene in &self.scenes {
            if scene.final_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "scene {}: final_size must be positive",
                    scene.key()
                )));
            }
            for name in &scene.recall_names {
                self.require("recall", name, self.recalls.iter().any(|r| &r.name == name))?;
            }
            for name in &scene.filter_names {
                self.require("filter", name, self.filters.iter().any(|f| &f.name == name))?;
            }
            for name in &scene.sort_names {
                self.require("sort", name, self.sorts.iter().any(|s| &s.name == name))?;
            }
            for rank_algo in &scene.rank.algorithms {
                self.require(
                    "algorithm",
                    &rank_algo.name,
                    self.algorithms.iter().any(|a| a.name == rank_algo.name),
                )?;
            }
            if scene.rank.algorithms.len() > 1 {
                let total: f64 = scene.rank.algorithms.iter().map(|a| a.weight).sum();
                if total <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "scene {}: ensemble weights must sum to a positive value",
                        scene.key()
                    )));
                }
            }
        }
        Ok(())
    }

    fn require(&self, kind: &str, name: &str, found: bool) -> Result<(), ConfigError> {
        if found {
            Ok(())
        } else {
            Err(ConfigError::UnknownReference {
                kind: kind.to_string(),
                name: name.to_string(),
            })
        }
    }
}

fn check_unique(kind: &str, names: impl Iterator<Item = String>) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name.clone()) {
            return Err(ConfigError::Duplicate {
                kind: kind.to_string(),
                name,
            });
        }
    }
    Ok(())
}

pub const DEFAULT_CATEGORY: &str = "default";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Engine-wide bounds and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum concurrently served requests; beyond this the entry layer
    /// rejects with a service-unavailable error before any phase runs.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Request-level deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Item count applied when a request omits `size`.
    #[serde(default = "default_size")]
    pub default_size: usize,
}

fn default_max_in_flight() -> usize {
    1024
}
fn default_request_timeout_ms() -> u64 {
    300
}
fn default_size() -> usize {
    10
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            request_timeout_ms: default_request_timeout_ms(),
            default_size: default_size(),
        }
    }
}

/// Per-phase upper bounds, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseBudgets {
    #[serde(default = "default_recall_ms")]
    pub recall_ms: u64,
    #[serde(default = "default_filter_ms")]
    pub filter_ms: u64,
    #[serde(default = "default_rank_ms")]
    pub rank_ms: u64,
    #[serde(default = "default_sort_ms")]
    pub sort_ms: u64,
}

fn default_recall_ms() -> u64 {
    150
}
fn default_filter_ms() -> u64 {
    30
}
fn default_rank_ms() -> u64 {
    120
}
fn default_sort_ms() -> u64 {
    20
}

impl Default for PhaseBudgets {
    fn default() -> Self {
        Self {
            recall_ms: default_recall_ms(),
            filter_ms: default_filter_ms(),
            rank_ms: default_rank_ms(),
            sort_ms: default_sort_ms(),
        }
    }
}

/// One pipeline configuration, selected per request by
/// `scene_id` + `category`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    pub scene_id: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub recall_names: Vec<String>,
    #[serde(default)]
    pub filter_names: Vec<String>,
    #[serde(default)]
    pub sort_names: Vec<String>,
    #[serde(default)]
    pub rank: RankSettings,
    /// Upper bound on the merged candidate list leaving Recall.
    #[serde(default = "default_recall_cap")]
    pub recall_cap: usize,
    /// Upper bound on the response item list.
    #[serde(default = "default_size")]
    pub final_size: usize,
    #[serde(default)]
    pub budgets: PhaseBudgets,
}

fn default_recall_cap() -> usize {
    500
}

impl SceneConfig {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            category: default_category(),
            recall_names: Vec::new(),
            filter_names: Vec::new(),
            sort_names: Vec::new(),
            rank: RankSettings::default(),
            recall_cap: default_recall_cap(),
            final_size: default_size(),
            budgets: PhaseBudgets::default(),
        }
    }

    /// Registry key: `scene_id` qualified by category.
    pub fn key(&self) -> String {
        format!("{}/{}", self.scene_id, self.category)
    }
}

/// How multiple per-algorithm scores combine into the final primary score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Combiner {
    /// `sum(w_i * s_i) / sum(w_i)`
    #[default]
    Weighted,
    /// Mean reciprocal rank across the per-algorithm orderings
    Rank,
    /// Product of the per-algorithm scores
    Product,
}

/// One scoring algorithm participating in the rank ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankAlgorithm {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Rank-phase configuration of a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankSettings {
    /// Scoring algorithms with ensemble weights; empty disables ranking
    /// (candidates keep their recall scores).
    #[serde(default)]
    pub algorithms: Vec<RankAlgorithm>,
    #[serde(default)]
    pub combiner: Combiner,
    /// Per-call batch size for score dispatch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Score assigned when a backend answer is invalid or late.
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,
    /// User-bag keys copied into every candidate's feature map, prefixed
    /// with `user__`.
    #[serde(default)]
    pub user_features: Vec<String>,
    /// DAO providing batched item features, when one is configured.
    #[serde(default)]
    pub feature_dao: Option<String>,
}

fn default_batch_size() -> usize {
    100
}
fn default_neutral_score() -> f64 {
    0.5
}

impl Default for RankSettings {
    fn default() -> Self {
        Self {
            algorithms: Vec::new(),
            combiner: Combiner::default(),
            batch_size: default_batch_size(),
            neutral_score: default_neutral_score(),
            user_features: Vec::new(),
            feature_dao: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Algorithm instances
// ─────────────────────────────────────────────────────────────────────────

/// Backend variant tag of an algorithm instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    FieldLookup,
    VectorSearch,
    VectorDatabase,
    RemoteMl,
    Custom,
}

/// A named scoring backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AlgorithmKind,
    /// Named pre-dispatch input transform, when one applies.
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub field_lookup: Option<FieldLookupSettings>,
    #[serde(default)]
    pub vector_search: Option<VectorSearchSettings>,
    #[serde(default)]
    pub vector_database: Option<VectorDatabaseSettings>,
    #[serde(default)]
    pub remote_ml: Option<RemoteMlSettings>,
}

impl AlgorithmConfig {
    fn base(name: impl Into<String>, kind: AlgorithmKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: None,
            field_lookup: None,
            vector_search: None,
            vector_database: None,
            remote_ml: None,
        }
    }

    /// Field-lookup algorithm reading `field_name` off the feature map.
    pub fn field_lookup(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            field_lookup: Some(FieldLookupSettings {
                field_name: field_name.into(),
                default_score: default_neutral_score(),
            }),
            ..Self::base(name, AlgorithmKind::FieldLookup)
        }
    }

    /// Remote model-serving algorithm.
    pub fn remote_ml(name: impl Into<String>, settings: RemoteMlSettings) -> Self {
        Self {
            remote_ml: Some(settings),
            ..Self::base(name, AlgorithmKind::RemoteMl)
        }
    }

    /// Vector-database algorithm.
    pub fn vector_database(name: impl Into<String>, settings: VectorDatabaseSettings) -> Self {
        Self {
            vector_database: Some(settings),
            ..Self::base(name, AlgorithmKind::VectorDatabase)
        }
    }

    /// Custom algorithm bound to a code-registered backend of this name.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::base(name, AlgorithmKind::Custom)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ok = match self.kind {
            AlgorithmKind::FieldLookup => self.field_lookup.is_some(),
            AlgorithmKind::VectorSearch => self.vector_search.is_some(),
            AlgorithmKind::VectorDatabase => self.vector_database.is_some(),
            AlgorithmKind::RemoteMl => self.remote_ml.is_some(),
            AlgorithmKind::Custom => true,
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::Missing {
                name: self.name.clone(),
                what: format!("settings section for algorithm type {:?}", self.kind),
            })
        }
    }
}

/// Extract a configured field from the input feature map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldLookupSettings {
    pub field_name: String,
    /// Emitted when the field is absent or non-numeric.
    #[serde(default = "default_neutral_score")]
    pub default_score: f64,
}

/// Similarity search against a remote vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchSettings {
    pub server_address: String,
    #[serde(default = "default_vector_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_vector_timeout_ms() -> u64 {
    100
}

/// Distance metric of a vector collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VectorMetric {
    #[default]
    Cosine,
    L2,
    InnerProduct,
}

/// Similarity search against a named collection of a vector database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDatabaseSettings {
    pub server_address: String,
    #[serde(default = "default_vector_timeout_ms")]
    pub timeout_ms: u64,
    pub collection: String,
    #[serde(default)]
    pub metric: VectorMetric,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    100
}

/// Remote model-serving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMlSettings {
    pub endpoint_url: String,
    /// Serialization profile for the request payload.
    #[serde(default = "default_processor_kind")]
    pub processor_kind: String,
    #[serde(default)]
    pub auth_headers: HashMap<String, String>,
    #[serde(default = "default_ml_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_times: u32,
    /// Parser applied to the response body.
    #[serde(default = "default_parser_name")]
    pub response_parser_name: String,
    /// Output tensors/heads requested from the model server.
    #[serde(default)]
    pub requested_outputs: Vec<String>,
}

fn default_processor_kind() -> String {
    "json".to_string()
}
fn default_ml_timeout_ms() -> u64 {
    200
}
fn default_parser_name() -> String {
    "score-list".to_string()
}

// ─────────────────────────────────────────────────────────────────────────
// Recall instances
// ─────────────────────────────────────────────────────────────────────────

/// Candidate-generation strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallKind {
    Popularity,
    Collaborative,
    VectorSimilarity,
    ColdStart,
    RealtimeU2i,
    ExternalService,
    GraphBased,
}

/// Collaborative-filtering flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollaborativeMode {
    /// Items liked by users similar to this one; the DAO is keyed by uid.
    #[default]
    UserBased,
    /// Items similar to the user's recent items; the DAO is keyed by
    /// trigger item id.
    ItemBased,
}

/// Cache scope of a recall instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    PerUser,
    Global,
}

/// Per-recall result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub scope: CacheScope,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_ttl_secs() -> u64 {
    60
}
fn default_cache_capacity() -> usize {
    1024
}

/// A named candidate-generation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RecallKind,
    /// Category tag stamped on emitted items.
    #[serde(default = "default_item_type")]
    pub item_type: String,
    /// Maximum candidates this instance may return.
    #[serde(default = "default_recall_limit")]
    pub limit: usize,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
    /// Backing store; required for every kind except vector-similarity.
    #[serde(default)]
    pub dao_name: Option<String>,
    /// Vector algorithm; required for vector-similarity.
    #[serde(default)]
    pub algorithm_name: Option<String>,
    /// Grouped popularity: user-bag key selecting the group; absent means
    /// global popularity.
    #[serde(default)]
    pub group_property: Option<String>,
    /// User-bag key holding the trigger item list for item-based
    /// collaborative and graph recalls.
    #[serde(default = "default_trigger_property")]
    pub trigger_property: String,
    /// How many trigger items to expand.
    #[serde(default = "default_trigger_count")]
    pub trigger_count: usize,
    #[serde(default)]
    pub collaborative_mode: CollaborativeMode,
    /// Fixed lookup key for cold-start style recalls.
    #[serde(default)]
    pub key: Option<String>,
    /// Graph expansion depth.
    #[serde(default = "default_hops")]
    pub hops: usize,
    /// Score decay applied per graph hop and per trigger rank.
    #[serde(default = "default_hop_decay")]
    pub hop_decay: f64,
}

fn default_item_type() -> String {
    "item".to_string()
}
fn default_recall_limit() -> usize {
    100
}
fn default_trigger_property() -> String {
    crate::user::RECENT_ITEMS.to_string()
}
fn default_trigger_count() -> usize {
    5
}
fn default_hops() -> usize {
    1
}
fn default_hop_decay() -> f64 {
    0.8
}

impl RecallConfig {
    /// Create a recall config with every knob at its default.
    pub fn new(name: impl Into<String>, kind: RecallKind) -> Self {
        Self {
            name: name.into(),
            kind,
            item_type: default_item_type(),
            limit: default_recall_limit(),
            cache: None,
            dao_name: None,
            algorithm_name: None,
            group_property: None,
            trigger_property: default_trigger_property(),
            trigger_count: default_trigger_count(),
            collaborative_mode: CollaborativeMode::default(),
            key: None,
            hops: default_hops(),
            hop_decay: default_hop_decay(),
        }
    }

    pub fn with_dao(mut self, name: impl Into<String>) -> Self {
        self.dao_name = Some(name.into());
        self
    }

    pub fn with_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm_name = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    fn validate(&self, root: &RecommendConfig) -> Result<(), ConfigError> {
        match self.kind {
            RecallKind::VectorSimilarity => {
                let algo = self.algorithm_name.as_ref().ok_or_else(|| ConfigError::Missing {
                    name: self.name.clone(),
                    what: "algorithm_name for vector-similarity recall".to_string(),
                })?;
                if !root.algorithms.iter().any(|a| &a.name == algo) {
                    return Err(ConfigError::UnknownReference {
                        kind: "algorithm".to_string(),
                        name: algo.clone(),
                    });
                }
            }
            _ => {
                let dao = self.dao_name.as_ref().ok_or_else(|| ConfigError::Missing {
                    name: self.name.clone(),
                    what: "dao_name".to_string(),
                })?;
                if !root.daos.iter().any(|d| &d.name == dao) {
                    return Err(ConfigError::UnknownReference {
                        kind: "dao".to_string(),
                        name: dao.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Filter and sort instances
// ─────────────────────────────────────────────────────────────────────────

/// Built-in filter rule tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    /// Drop items whose numeric property is below a bound.
    PropertyThreshold,
    /// Keep at most N items sharing a category property.
    CategoryQuota,
    /// Drop items the user has already been shown.
    Exposure,
    /// Drop items whose state property is not in the allow-list.
    ItemState,
}

/// A named filter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub category_property: Option<String>,
    #[serde(default)]
    pub max_per_category: Option<usize>,
    /// User-bag key holding the seen-item list.
    #[serde(default)]
    pub exposure_property: Option<String>,
    #[serde(default)]
    pub state_property: Option<String>,
    #[serde(default)]
    pub allowed_states: Vec<String>,
}

/// Built-in sorter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKind {
    /// Score descending with deterministic tie-break.
    Score,
    /// Multiplicative boosts keyed on item property matches.
    Boost,
    /// Bounded run-length of a shared category attribute.
    Diversity,
}

/// One multiplicative boost rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostRule {
    pub property: String,
    pub equals: String,
    pub factor: f64,
}

/// A named sorter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SortKind,
    #[serde(default)]
    pub boosts: Vec<BoostRule>,
    #[serde(default)]
    pub category_property: Option<String>,
    #[serde(default = "default_max_run_length")]
    pub max_run_length: usize,
}

fn default_max_run_length() -> usize {
    2
}

// ─────────────────────────────────────────────────────────────────────────
// DAO instances
// ─────────────────────────────────────────────────────────────────────────

/// Adapter tag of a DAO instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DaoKind {
    /// In-process tables fed from configuration or code.
    Memory,
    /// Remote JSON service.
    ExternalHttp,
}

/// One item row of an in-memory DAO table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedItem {
    pub id: String,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

/// A named data-access instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaoConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DaoKind,
    /// Memory adapter: candidate lists keyed by lookup key.
    #[serde(default)]
    pub data: HashMap<String, Vec<SeedItem>>,
    /// Memory adapter: feature maps keyed by item id.
    #[serde(default)]
    pub features: HashMap<String, HashMap<String, PropertyValue>>,
    /// External adapter: service base URL.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_dao_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auth_headers: HashMap<String, String>,
}

fn default_dao_timeout_ms() -> u64 {
    100
}

impl SeedItem {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            item_type: None,
            score,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl DaoConfig {
    /// In-memory DAO with no tables yet.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DaoKind::Memory,
            data: HashMap::new(),
            features: HashMap::new(),
            endpoint_url: None,
            timeout_ms: default_dao_timeout_ms(),
            auth_headers: HashMap::new(),
        }
    }

    /// External JSON-service DAO.
    pub fn external_http(name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DaoKind::ExternalHttp,
            data: HashMap::new(),
            features: HashMap::new(),
            endpoint_url: Some(endpoint_url.into()),
            timeout_ms: default_dao_timeout_ms(),
            auth_headers: HashMap::new(),
        }
    }

    /// Add a candidate row under `key` (memory adapter).
    pub fn with_row(mut self, key: impl Into<String>, row: SeedItem) -> Self {
        self.data.entry(key.into()).or_default().push(row);
        self
    }

    /// Add a feature map for an item id (memory adapter).
    pub fn with_feature_row(
        mut self,
        id: impl Into<String>,
        features: HashMap<String, PropertyValue>,
    ) -> Self {
        self.features.insert(id.into(), features);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == DaoKind::ExternalHttp && self.endpoint_url.is_none() {
            return Err(ConfigError::Missing {
                name: self.name.clone(),
                what: "endpoint_url for external-http dao".to_string(),
            });
        }
        Ok(())
    }
}
