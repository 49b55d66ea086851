//! DAO adapters and the factory dispatching on the configured kind.

mod external;
mod memory;

pub use external::ExternalHttpDao;
pub use memory::MemoryDao;

use std::sync::Arc;

use reco_kernel::config::{DaoConfig, DaoKind};
use reco_kernel::traits::RecommendDao;

/// Construct a DAO instance from its configuration subtree.
pub fn build_dao(cfg: &DaoConfig) -> Result<Arc<dyn RecommendDao>, String> {
    match cfg.kind {
        DaoKind::Memory => Ok(Arc::new(MemoryDao::from_config(cfg))),
        DaoKind::ExternalHttp => Ok(Arc::new(ExternalHttpDao::from_config(cfg)?)),
    }
}
