//! Shared helpers for the integration suite.

use std::sync::Once;

use reco_kernel::config::{FileFormat, RecommendConfig};
use reco_kernel::error::{EngineError, EngineResult};
use reco_runtime::{Engine, EngineFactory};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Build an engine from an inline YAML configuration.
pub fn engine_from_yaml(yaml: &str) -> EngineResult<Engine> {
    let cfg: RecommendConfig =
        reco_kernel::config::from_str(yaml, FileFormat::Yaml).map_err(EngineError::from)?;
    Engine::new(cfg, EngineFactory::default())
}
