//! Typed name→instance tables with hot-swap by signature.
//!
//! The registry is the single owner of configured component instances.
//! Readers (every request) resolve names without blocking on reloads and
//! receive an `Arc` handle scoped to their request; writers (reload)
//! serialize among themselves behind a guard. Swapping an entry never
//! interrupts in-flight uses of the previous instance, because callers
//! captured the `Arc` at resolution time and the old instance lives until
//! the last handle drops.
//!
//! Reload is driven by [`Registry::reload_from_config`]: configured
//! instances are diffed against the current tables by a deterministic
//! signature of their config subtree. New names are constructed and
//! installed, unchanged signatures are skipped, changed signatures are
//! rebuilt and atomically swapped, and names absent from the new
//! configuration are removed. A construction error leaves the previous
//! instance in place and is surfaced in the reload report.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{
    AlgorithmConfig, ConfigError, DaoConfig, FilterConfig, RecallConfig, RecommendConfig,
    SortConfig, signature_of,
};
use crate::traits::{CandidateFilter, CandidateSorter, RecallSource, RecommendDao, ScoringBackend};

/// The component kinds the registry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Recall,
    Filter,
    Sort,
    Algorithm,
    Dao,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Recall => "recall",
            ComponentKind::Filter => "filter",
            ComponentKind::Sort => "sort",
            ComponentKind::Algorithm => "algorithm",
            ComponentKind::Dao => "dao",
        };
        f.write_str(s)
    }
}

/// Registry lookup/reload error.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A request referenced a name with no registered instance.
    #[error("no {kind} registered under name {name:?}")]
    NotFound { kind: ComponentKind, name: String },

    /// A factory failed to construct an instance from its configuration.
    #[error("failed to build {kind} {name:?}: {reason}")]
    Build {
        kind: ComponentKind,
        name: String,
        reason: String,
    },
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("recalls", &self.recalls.len())
            .field("filters", &self.filters.len())
            .field("sorts", &self.sorts.len())
            .field("algorithms", &self.algorithms.len())
            .field("daos", &self.daos.len())
            .finish()
    }
}

/// An installed instance together with the signature it was built from.
struct Slot<T: ?Sized> {
    instance: Arc<T>,
    signature: String,
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            instance: Arc::clone(&self.instance),
            signature: self.signature.clone(),
        }
    }
}

/// Constructs concrete instances from their configuration subtrees.
///
/// Implemented by the runtime crate, which knows every backend. The
/// registry passes itself to the recall builder so the factory can
/// resolve the DAO / algorithm handles a recall captures at build time.
pub trait ComponentFactory: Send + Sync {
    fn build_algorithm(&self, cfg: &AlgorithmConfig) -> Result<Arc<dyn ScoringBackend>, String>;
    fn build_dao(&self, cfg: &DaoConfig) -> Result<Arc<dyn RecommendDao>, String>;
    fn build_recall(
        &self,
        cfg: &RecallConfig,
        registry: &Registry,
    ) -> Result<Arc<dyn RecallSource>, String>;
    fn build_filter(&self, cfg: &FilterConfig) -> Result<Arc<dyn CandidateFilter>, String>;
    fn build_sorter(&self, cfg: &SortConfig) -> Result<Arc<dyn CandidateSorter>, String>;
}

/// Outcome of one [`Registry::reload_from_config`] pass.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub built: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failures: Vec<RegistryError>,
}

impl ReloadReport {
    /// True when every configured instance was installed or retained.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Typed name→instance tables for recalls, filters, sorters, algorithms
/// and DAOs.
pub struct Registry {
    recalls: DashMap<String, Slot<dyn RecallSource>>,
    filters: DashMap<String, Slot<dyn CandidateFilter>>,
    sorts: DashMap<String, Slot<dyn CandidateSorter>>,
    algorithms: DashMap<String, Slot<dyn ScoringBackend>>,
    daos: DashMap<String, Slot<dyn RecommendDao>>,
    /// Writers (reload passes) serialize here; readers never take it.
    reload_guard: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            recalls: DashMap::new(),
            filters: DashMap::new(),
            sorts: DashMap::new(),
            algorithms: DashMap::new(),
            daos: DashMap::new(),
            reload_guard: Mutex::new(()),
        }
    }

    // ── install / lookup ────────────────────────────────────────────────

    pub fn register_recall(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        instance: Arc<dyn RecallSource>,
    ) {
        self.recalls.insert(
            name.into(),
            Slot {
                instance,
                signature: signature.into(),
            },
        );
    }

    pub fn register_filter(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        instance: Arc<dyn CandidateFilter>,
    ) {
        self.filters.insert(
            name.into(),
            Slot {
                instance,
                signature: signature.into(),
            },
        );
    }

    pub fn register_sorter(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        instance: Arc<dyn CandidateSorter>,
    ) {
        self.sorts.insert(
            name.into(),
            Slot {
                instance,
                signature: signature.into(),
            },
        );
    }

    pub fn register_algorithm(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        instance: Arc<dyn ScoringBackend>,
    ) {
        self.algorithms.insert(
            name.into(),
            Slot {
                instance,
                signature: signature.into(),
            },
        );
    }

    pub fn register_dao(
        &self,
        name: impl Into<String>,
        signature: impl Into<String>,
        instance: Arc<dyn RecommendDao>,
    ) {
        self.daos.insert(
            name.into(),
            Slot {
                instance,
                signature: signature.into(),
            },
        );
    }

    pub fn lookup_recall(&self, name: &str) -> Result<Arc<dyn RecallSource>, RegistryError> {
        self.recalls
            .get(name)
            .map(|s| Arc::clone(&s.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: ComponentKind::Recall,
                name: name.to_string(),
            })
    }

    pub fn lookup_filter(&self, name: &str) -> Result<Arc<dyn CandidateFilter>, RegistryError> {
        self.filters
            .get(name)
            .map(|s| Arc::clone(&s.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: ComponentKind::Filter,
                name: name.to_string(),
            })
    }

    pub fn lookup_sorter(&self, name: &str) -> Result<Arc<dyn CandidateSorter>, RegistryError> {
        self.sorts
            .get(name)
            .map(|s| Arc::clone(&s.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: ComponentKind::Sort,
                name: name.to_string(),
            })
    }

    pub fn lookup_algorithm(&self, name: &str) -> Result<Arc<dyn ScoringBackend>, RegistryError> {
        self.algorithms
            .get(name)
            .map(|s| Arc::clone(&s.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: ComponentKind::Algorithm,
                name: name.to_string(),
            })
    }

    pub fn lookup_dao(&self, name: &str) -> Result<Arc<dyn RecommendDao>, RegistryError> {
        self.daos
            .get(name)
            .map(|s| Arc::clone(&s.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: ComponentKind::Dao,
                name: name.to_string(),
            })
    }

    /// Signature the named instance was built from, if it is installed.
    pub fn signature(&self, kind: ComponentKind, name: &str) -> Option<String> {
        match kind {
            ComponentKind::Recall => self.recalls.get(name).map(|s| s.signature.clone()),
            ComponentKind::Filter => self.filters.get(name).map(|s| s.signature.clone()),
            ComponentKind::Sort => self.sorts.get(name).map(|s| s.signature.clone()),
            ComponentKind::Algorithm => self.algorithms.get(name).map(|s| s.signature.clone()),
            ComponentKind::Dao => self.daos.get(name).map(|s| s.signature.clone()),
        }
    }

    // ── reload ──────────────────────────────────────────────────────────

    /// Diff the configured instances against the current tables and
    /// install what changed.
    ///
    /// A recall's signature covers its own subtree plus the subtrees of
    /// the DAO and algorithm it references, so reconfiguring a DAO also
    /// rebuilds the recalls that captured a handle to it.
    ///
    /// Construction failures are collected in the report; each failed
    /// name keeps its previous instance when one exists. The caller
    /// decides fatality (startup treats failures as fatal, reload does
    /// not).
    pub fn reload_from_config(
        &self,
        cfg: &RecommendConfig,
        factory: &dyn ComponentFactory,
    ) -> Result<ReloadReport, ConfigError> {
        let _guard = self.reload_guard.lock();
        let mut report = ReloadReport::default();

        // DAOs and algorithms first: recalls capture handles to them.
        for dao_cfg in &cfg.daos {
            let sig = signature_of(dao_cfg)?;
            if self.signature(ComponentKind::Dao, &dao_cfg.name).as_deref() == Some(sig.as_str()) {
                report.skipped += 1;
                continue;
            }
            match factory.build_dao(dao_cfg) {
                Ok(instance) => {
                    self.register_dao(&dao_cfg.name, sig, instance);
                    report.built += 1;
                }
                Err(reason) => report.fail(ComponentKind::Dao, &dao_cfg.name, reason),
            }
        }

        for algo_cfg in &cfg.algorithms {
            let sig = signature_of(algo_cfg)?;
            if self
                .signature(ComponentKind::Algorithm, &algo_cfg.name)
                .as_deref()
                == Some(sig.as_str())
            {
                report.skipped += 1;
                continue;
            }
            match factory.build_algorithm(algo_cfg) {
                Ok(instance) => {
                    self.register_algorithm(&algo_cfg.name, sig, instance);
                    report.built += 1;
                }
                Err(reason) => report.fail(ComponentKind::Algorithm, &algo_cfg.name, reason),
            }
        }

        for recall_cfg in &cfg.recalls {
            let dao_cfg = recall_cfg
                .dao_name
                .as_ref()
                .and_then(|n| cfg.daos.iter().find(|d| &d.name == n));
            let algo_cfg = recall_cfg
                .algorithm_name
                .as_ref()
                .and_then(|n| cfg.algorithms.iter().find(|a| &a.name == n));
            let sig = signature_of(&(recall_cfg, dao_cfg, algo_cfg))?;
            if self
                .signature(ComponentKind::Recall, &recall_cfg.name)
                .as_deref()
                == Some(sig.as_str())
            {
                report.skipped += 1;
                continue;
            }
            match factory.build_recall(recall_cfg, self) {
                Ok(instance) => {
                    self.register_recall(&recall_cfg.name, sig, instance);
                    report.built += 1;
                }
                Err(reason) => report.fail(ComponentKind::Recall, &recall_cfg.name, reason),
            }
        }

        for filter_cfg in &cfg.filters {
            let sig = signature_of(filter_cfg)?;
            if self
                .signature(ComponentKind::Filter, &filter_cfg.name)
                .as_deref()
                == Some(sig.as_str())
            {
                report.skipped += 1;
                continue;
            }
            match factory.build_filter(filter_cfg) {
                Ok(instance) => {
                    self.register_filter(&filter_cfg.name, sig, instance);
                    report.built += 1;
                }
                Err(reason) => report.fail(ComponentKind::Filter, &filter_cfg.name, reason),
            }
        }

        for sort_cfg in &cfg.sorts {
            let sig = signature_of(sort_cfg)?;
            if self.signature(ComponentKind::Sort, &sort_cfg.name).as_deref() == Some(sig.as_str())
            {
                report.skipped += 1;
                continue;
            }
            match factory.build_sorter(sort_cfg) {
                Ok(instance) => {
                    self.register_sorter(&sort_cfg.name, sig, instance);
                    report.built += 1;
                }
                Err(reason) => report.fail(ComponentKind::Sort, &sort_cfg.name, reason),
            }
        }

        report.removed += retain_named(&self.daos, cfg.daos.iter().map(|d| d.name.as_str()));
        report.removed += retain_named(
            &self.algorithms,
            cfg.algorithms.iter().map(|a| a.name.as_str()),
        );
        report.removed += retain_named(&self.recalls, cfg.recalls.iter().map(|r| r.name.as_str()));
        report.removed += retain_named(&self.filters, cfg.filters.iter().map(|f| f.name.as_str()));
        report.removed += retain_named(&self.sorts, cfg.sorts.iter().map(|s| s.name.as_str()));

        info!(
            built = report.built,
            skipped = report.skipped,
            removed = report.removed,
            failed = report.failures.len(),
            "registry reload finished"
        );
        Ok(report)
    }
}

impl ReloadReport {
    fn fail(&mut self, kind: ComponentKind, name: &str, reason: String) {
        error!(%kind, name, reason, "instance construction failed; previous instance retained");
        self.failures.push(RegistryError::Build {
            kind,
            name: name.to_string(),
            reason,
        });
    }
}

/// Drop entries whose name is not in the configured set. Custom entries
/// registered under names the configuration never mentions are kept only
/// if the caller re-registers them after each reload; configured kinds
/// always win.
fn retain_named<'a, T: ?Sized>(
    table: &DashMap<String, Slot<T>>,
    configured: impl Iterator<Item = &'a str>,
) -> usize {
    let keep: HashSet<&str> = configured.collect();
    let stale: Vec<String> = table
        .iter()
        .filter(|entry| !keep.contains(entry.key().as_str()))
        .map(|entry| entry.key().clone())
        .collect();
    let removed = stale.len();
    for name in stale {
        table.remove(&name);
    }
    removed
}

#[cfg(test)]
mod tests;
