use super::*;
use crate::config::{DaoKind, RecallKind};
use crate::context::RequestContext;
use crate::error::BackendResult;
use crate::item::Item;
use crate::scoring::{AlgoInput, ScoredRecord};
use crate::user::User;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

struct StubRecall {
    name: String,
}

#[async_trait]
impl RecallSource for StubRecall {
    fn name(&self) -> &str {
        &self.name
    }
    fn item_type(&self) -> &str {
        "item"
    }
    async fn recall(&self, _user: &Arc<User>, _ctx: &RequestContext) -> BackendResult<Vec<Item>> {
        Ok(Vec::new())
    }
}

struct StubFilter {
    name: String,
}

#[async_trait]
impl CandidateFilter for StubFilter {
    fn name(&self) -> &str {
        &self.name
    }
    async fn apply(
        &self,
        items: Vec<Item>,
        _user: &Arc<User>,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        Ok(items)
    }
}

struct StubSorter {
    name: String,
}

impl CandidateSorter for StubSorter {
    fn name(&self) -> &str {
        &self.name
    }
    fn sort(&self, _items: &mut [Item], _ctx: &RequestContext) {}
}

struct StubScorer {
    name: String,
}

#[async_trait]
impl ScoringBackend for StubScorer {
    fn name(&self) -> &str {
        &self.name
    }
    async fn invoke(
        &self,
        _input: AlgoInput,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<ScoredRecord>> {
        Ok(Vec::new())
    }
}

struct StubDao {
    name: String,
}

#[async_trait]
impl RecommendDao for StubDao {
    fn name(&self) -> &str {
        &self.name
    }
    async fn list_by_key(
        &self,
        _key: &str,
        _limit: usize,
        _ctx: &RequestContext,
    ) -> BackendResult<Vec<Item>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CountingFactory {
    builds: AtomicUsize,
    fail_name: Option<String>,
}

impl CountingFactory {
    fn built(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn check(&self, name: &str) -> Result<(), String> {
        if self.fail_name.as_deref() == Some(name) {
            return Err("boom".to_string());
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ComponentFactory for CountingFactory {
    fn build_algorithm(&self, cfg: &AlgorithmConfig) -> Result<Arc<dyn ScoringBackend>, String> {
        self.check(&cfg.name)?;
        Ok(Arc::new(StubScorer {
            name: cfg.name.clone(),
        }))
    }

    fn build_dao(&self, cfg: &DaoConfig) -> Result<Arc<dyn RecommendDao>, String> {
        self.check(&cfg.name)?;
        Ok(Arc::new(StubDao {
            name: cfg.name.clone(),
        }))
    }

    fn build_recall(
        &self,
        cfg: &RecallConfig,
        registry: &Registry,
    ) -> Result<Arc<dyn RecallSource>, String> {
        // DAOs install before recalls within one pass.
        if let Some(dao) = &cfg.dao_name {
            registry.lookup_dao(dao).map_err(|e| e.to_string())?;
        }
        self.check(&cfg.name)?;
        Ok(Arc::new(StubRecall {
            name: cfg.name.clone(),
        }))
    }

    fn build_filter(&self, cfg: &FilterConfig) -> Result<Arc<dyn CandidateFilter>, String> {
        self.check(&cfg.name)?;
        Ok(Arc::new(StubFilter {
            name: cfg.name.clone(),
        }))
    }

    fn build_sorter(&self, cfg: &SortConfig) -> Result<Arc<dyn CandidateSorter>, String> {
        self.check(&cfg.name)?;
        Ok(Arc::new(StubSorter {
            name: cfg.name.clone(),
        }))
    }
}

fn sample_config() -> RecommendConfig {
    let mut cfg = RecommendConfig::default();
    cfg.daos.push(DaoConfig {
        name: "pop_table".into(),
        kind: DaoKind::Memory,
        data: Default::default(),
        features: Default::default(),
        endpoint_url: None,
        timeout_ms: 100,
        auth_headers: Default::default(),
    });
    cfg.recalls.push(RecallConfig {
        name: "pop".into(),
        kind: RecallKind::Popularity,
        item_type: "item".into(),
        limit: 10,
        cache: None,
        dao_name: Some("pop_table".into()),
        algorithm_name: None,
        group_property: None,
        trigger_property: "recent_items".into(),
        trigger_count: 5,
        collaborative_mode: Default::default(),
        key: None,
        hops: 1,
        hop_decay: 0.8,
    });
    cfg.algorithms.push(AlgorithmConfig {
        name: "rel".into(),
        kind: crate::config::AlgorithmKind::FieldLookup,
        transform: None,
        field_lookup: Some(crate::config::FieldLookupSettings {
            field_name: "rel".into(),
            default_score: 0.5,
        }),
        vector_search: None,
        vector_database: None,
        remote_ml: None,
    });
    cfg
}

#[test]
fn register_and_lookup() {
    let registry = Registry::new();
    registry.register_dao("d", "sig", Arc::new(StubDao { name: "d".into() }));

    assert!(registry.lookup_dao("d").is_ok());
    let err = registry.lookup_dao("missing").unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert_eq!(registry.signature(ComponentKind::Dao, "d").as_deref(), Some("sig"));
}

#[test]
fn reload_installs_then_identical_reload_is_noop() {
    let registry = Registry::new();
    let factory = CountingFactory::default();
    let cfg = sample_config();

    let report = registry.reload_from_config(&cfg, &factory).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.built, 3);
    let builds_after_first = factory.built();

    let report = registry.reload_from_config(&cfg, &factory).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.built, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(factory.built(), builds_after_first);
}

#[test]
fn changed_subtree_swaps_only_that_instance() {
    let registry = Registry::new();
    let factory = CountingFactory::default();
    let mut cfg = sample_config();
    registry.reload_from_config(&cfg, &factory).unwrap();

    let before = registry
        .signature(ComponentKind::Algorithm, "rel")
        .unwrap();

    cfg.algorithms[0].field_lookup = Some(crate::config::FieldLookupSettings {
        field_name: "quality".into(),
        default_score: 0.5,
    });
    let report = registry.reload_from_config(&cfg, &factory).unwrap();
    assert_eq!(report.built, 1);
    assert_eq!(report.skipped, 2);

    let after = registry
        .signature(ComponentKind::Algorithm, "rel")
        .unwrap();
    assert_ne!(before, after);
}

#[test]
fn dao_change_rebuilds_referencing_recall() {
    let registry = Registry::new();
    let factory = CountingFactory::default();
    let mut cfg = sample_config();
    registry.reload_from_config(&cfg, &factory).unwrap();

    cfg.daos[0].timeout_ms = 250;
    let report = registry.reload_from_config(&cfg, &factory).unwrap();
    // The DAO and the recall that captured it; the algorithm is untouched.
    assert_eq!(report.built, 2);
    assert_eq!(report.skipped, 1);
}

#[test]
fn build_failure_keeps_previous_instance() {
    let registry = Registry::new();
    let ok_factory = CountingFactory::default();
    let mut cfg = sample_config();
    registry.reload_from_config(&cfg, &ok_factory).unwrap();

    let old_instance = registry.lookup_dao("pop_table").unwrap();

    cfg.daos[0].timeout_ms = 999;
    let failing = CountingFactory {
        builds: AtomicUsize::new(0),
        fail_name: Some("pop_table".into()),
    };
    let report = registry.reload_from_config(&cfg, &failing).unwrap();
    assert!(!report.is_clean());
    assert!(matches!(
        report.failures[0],
        RegistryError::Build { kind: ComponentKind::Dao, .. }
    ));

    // Old instance still served.
    let current = registry.lookup_dao("pop_table").unwrap();
    assert!(Arc::ptr_eq(&old_instance, &current));
}

#[test]
fn unconfigured_names_are_removed() {
    let registry = Registry::new();
    let factory = CountingFactory::default();
    let cfg = sample_config();
    registry.reload_from_config(&cfg, &factory).unwrap();

    let mut pruned = cfg.clone();
    pruned.recalls.clear();
    let report = registry.reload_from_config(&pruned, &factory).unwrap();
    assert_eq!(report.removed, 1);
    assert!(registry.lookup_recall("pop").is_err());
    assert!(registry.lookup_dao("pop_table").is_ok());
}

#[test]
fn readers_see_old_or_new_during_reload() {
    let registry = Arc::new(Registry::new());
    let factory = CountingFactory::default();
    let mut cfg = sample_config();
    registry.reload_from_config(&cfg, &factory).unwrap();

    let reader = {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            for _ in 0..5_000 {
                // Never absent, never a partially constructed slot.
                let dao = registry.lookup_dao("pop_table").unwrap();
                assert_eq!(dao.name(), "pop_table");
            }
        })
    };

    for round in 0..50 {
        cfg.daos[0].timeout_ms = 100 + round;
        registry.reload_from_config(&cfg, &factory).unwrap();
    }
    reader.join().unwrap();
}
