// candidate generation phase
pub mod recall;

// filter phase
pub mod filter;

// rank phase
pub mod rank;

// sort phase
pub mod sort;

// pipeline orchestrator
pub mod pipeline;
pub use pipeline::Engine;

// config -> instance construction
pub mod factory;
pub use factory::EngineFactory;

// config-file watching and hot reload
pub mod reload;
pub use reload::{WatchConfig, WatchHandle, spawn_config_watch};
