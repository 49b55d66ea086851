// algorithm dispatch layer
pub mod algorithm;
pub use algorithm::{AlgorithmDispatcher, AlgorithmHooks, DispatchError};

// DAO adapters
pub mod dao;

// retry policies for backend calls
pub mod retry;
pub use retry::{RetryConfig, RetryPolicy};
