//! The runtime's component factory.
//!
//! Binds the registry's reload machinery to the concrete builders: DAO
//! adapters and scoring backends from `reco-backends`, recalls, filters
//! and sorters from this crate. Custom scorers and pre-dispatch
//! transforms registered in code flow in through [`AlgorithmHooks`].

use std::sync::Arc;

use reco_backends::AlgorithmHooks;
use reco_kernel::Registry;
use reco_kernel::config::{AlgorithmConfig, DaoConfig, FilterConfig, RecallConfig, SortConfig};
use reco_kernel::registry::ComponentFactory;
use reco_kernel::traits::{
    CandidateFilter, CandidateSorter, RecallSource, RecommendDao, ScoringBackend,
};

/// Factory wired with the in-code extension points.
#[derive(Default)]
pub struct EngineFactory {
    hooks: AlgorithmHooks,
}

impl EngineFactory {
    pub fn new(hooks: AlgorithmHooks) -> Self {
        Self { hooks }
    }
}

impl ComponentFactory for EngineFactory {
    fn build_algorithm(&self, cfg: &AlgorithmConfig) -> Result<Arc<dyn ScoringBackend>, String> {
        reco_backends::algorithm::build_algorithm(cfg, &self.hooks)
    }

    fn build_dao(&self, cfg: &DaoConfig) -> Result<Arc<dyn RecommendDao>, String> {
        reco_backends::dao::build_dao(cfg)
    }

    fn build_recall(
        &self,
        cfg: &RecallConfig,
        registry: &Registry,
    ) -> Result<Arc<dyn RecallSource>, String> {
        crate::recall::build_recall(cfg, registry)
    }

    fn build_filter(&self, cfg: &FilterConfig) -> Result<Arc<dyn CandidateFilter>, String> {
        crate::filter::build_filter(cfg)
    }

    fn build_sorter(&self, cfg: &SortConfig) -> Result<Arc<dyn CandidateSorter>, String> {
        crate::sort::build_sorter(cfg)
    }
}
