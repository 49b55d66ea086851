//! In-memory DAO adapter.
//!
//! Tables are fed from the configuration subtree (or from code in tests)
//! and served without I/O. Suited to popularity lists, cold-start seeds
//! and small item-to-item tables that fit in the process; larger
//! deployments point the same recalls at an external adapter instead.

use async_trait::async_trait;
use std::collections::HashMap;

use reco_kernel::config::DaoConfig;
use reco_kernel::context::RequestContext;
use reco_kernel::error::BackendResult;
use reco_kernel::item::Item;
use reco_kernel::traits::{FeatureTable, RecommendDao};

pub struct MemoryDao {
    name: String,
    tables: HashMap<String, Vec<Item>>,
    features: FeatureTable,
}

impl MemoryDao {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: HashMap::new(),
            features: FeatureTable::new(),
        }
    }

    pub fn from_config(cfg: &DaoConfig) -> Self {
        let mut dao = Self::new(&cfg.name);
        for (key, rows) in &cfg.data {
            let items = rows
                .iter()
                .map(|row| {
                    let mut item = Item::new(
                        &row.id,
                        row.item_type.as_deref().unwrap_or("item"),
                    )
                    .with_score(row.score);
                    item.properties = row.properties.clone();
                    item
                })
                .collect();
            dao = dao.with_table(key, items);
        }
        dao.features = cfg.features.clone();
        dao
    }

    /// Install a candidate list under `key`, kept sorted by score.
    pub fn with_table(mut self, key: impl Into<String>, mut items: Vec<Item>) -> Self {
        items.sort_by(reco_kernel::item::ranking_cmp);
        self.tables.insert(key.into(), items);
        self
    }

    /// Install a feature row for an item id.
    pub fn with_features(
        mut self,
        id: impl Into<String>,
        features: HashMap<String, reco_kernel::item::PropertyValue>,
    ) -> Self {
        self.features.insert(id.into(), features);
        self
    }
}

#[async_trait]
impl RecommendDao for MemoryDao {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_by_key(
        &self,
        key: &str,
        limit: usize,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        Ok(self
            .tables
            .get(key)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn batch_features(
        &self,
        keys: &[String],
        _ctx: &RequestContext,
    ) -> BackendResult<FeatureTable> {
        Ok(keys
            .iter()
            .filter_map(|k| self.features.get(k).map(|f| (k.clone(), f.clone())))
            .collect())
    }
}
