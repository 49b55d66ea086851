//! Built-in filter rules.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reco_kernel::config::{FilterConfig, FilterKind};
use reco_kernel::context::RequestContext;
use reco_kernel::error::BackendResult;
use reco_kernel::item::Item;
use reco_kernel::traits::CandidateFilter;
use reco_kernel::user::{EXPOSED_ITEMS, User};

/// Drops items whose numeric property is below the bound.
///
/// An absent or non-numeric property fails the bound, so unscored items
/// never slip through a quality gate.
pub struct PropertyThresholdFilter {
    name: String,
    property: String,
    min_value: f64,
}

#[async_trait]
impl CandidateFilter for PropertyThresholdFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        items: Vec<Item>,
        _user: &Arc<User>,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        Ok(items
            .into_iter()
            .filter(|item| {
                item.float_property(&self.property)
                    .is_some_and(|v| v >= self.min_value)
            })
            .collect())
    }
}

/// Keeps at most N items sharing a category property, in list order.
///
/// Items without the property share one implicit bucket.
pub struct CategoryQuotaFilter {
    name: String,
    category_property: String,
    max_per_category: usize,
}

#[async_trait]
impl CandidateFilter for CategoryQuotaFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        items: Vec<Item>,
        _user: &Arc<User>,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        Ok(items
            .into_iter()
            .filter(|item| {
                let category = item
                    .string_property(&self.category_property)
                    .unwrap_or_default()
                    .to_string();
                let seen = counts.entry(category).or_insert(0);
                *seen += 1;
                *seen <= self.max_per_category
            })
            .collect())
    }
}

/// Drops items already shown to the user.
pub struct ExposureFilter {
    name: String,
    exposure_property: String,
}

#[async_trait]
impl CandidateFilter for ExposureFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        items: Vec<Item>,
        user: &Arc<User>,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        let seen: HashSet<String> = user
            .string_list_property(&self.exposure_property)
            .into_iter()
            .collect();
        if seen.is_empty() {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .filter(|item| !seen.contains(&item.id))
            .collect())
    }
}

/// Keeps only items whose state property is in the allow-list.
pub struct ItemStateFilter {
    name: String,
    state_property: String,
    allowed: HashSet<String>,
}

#[async_trait]
impl CandidateFilter for ItemStateFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        items: Vec<Item>,
        _user: &Arc<User>,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        Ok(items
            .into_iter()
            .filter(|item| {
                item.string_property(&self.state_property)
                    .is_some_and(|state| self.allowed.contains(state))
            })
            .collect())
    }
}

/// Construct a filter instance from its configuration subtree.
pub fn build_filter(cfg: &FilterConfig) -> Result<Arc<dyn CandidateFilter>, String> {
    match cfg.kind {
        FilterKind::PropertyThreshold => {
            let property = cfg
                .property
                .clone()
                .ok_or_else(|| "missing property".to_string())?;
            let min_value = cfg
                .min_value
                .ok_or_else(|| "missing min_value".to_string())?;
            Ok(Arc::new(PropertyThresholdFilter {
                name: cfg.name.clone(),
                property,
                min_value,
            }))
        }
        FilterKind::CategoryQuota => {
            let category_property = cfg
                .category_property
                .clone()
                .ok_or_else(|| "missing category_property".to_string())?;
            let max_per_category = cfg
                .max_per_category
                .ok_or_else(|| "missing max_per_category".to_string())?;
            Ok(Arc::new(CategoryQuotaFilter {
                name: cfg.name.clone(),
                category_property,
                max_per_category,
            }))
        }
        FilterKind::Exposure => Ok(Arc::new(ExposureFilter {
            name: cfg.name.clone(),
            exposure_property: cfg
                .exposure_property
                .clone()
                .unwrap_or_else(|| EXPOSED_ITEMS.to_string()),
        })),
        FilterKind::ItemState => {
            let state_property = cfg
                .state_property
                .clone()
                .ok_or_else(|| "missing state_property".to_string())?;
            if cfg.allowed_states.is_empty() {
                return Err("allowed_states must not be empty".to_string());
            }
            Ok(Arc::new(ItemStateFilter {
                name: cfg.name.clone(),
                state_property,
                allowed: cfg.allowed_states.iter().cloned().collect(),
            }))
        }
    }
}
