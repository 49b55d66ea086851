//! Crate-level error types for `reco-kernel`.
//!
//! Provides a unified [`EngineError`] that composes errors from every
//! sub-module (config, registry, IO, serialization) together with
//! [`error_stack::Report`] for rich, context-carrying error propagation at
//! the startup/reload boundary.
//!
//! Inside the request path these types are used differently: backend and
//! phase failures are recovered locally (a failed recall yields no items,
//! a failed filter is skipped, a late rank batch keeps neutral scores), so
//! [`BackendError`] values are logged where they occur and never abort the
//! pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;

/// Crate-level error type for `reco-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically. Use
/// [`error_stack::Report<EngineError>`] (via [`EngineResult`]) to attach
/// human-readable context as the error propagates up the call stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed or inconsistent configuration. Fatal at startup,
    /// non-fatal on reload (the previous config is retained).
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A request referenced a name with no registered instance.
    #[error("Resolution error: {0}")]
    Resolution(#[from] RegistryError),

    /// An algorithm or DAO call failed or timed out.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The request-level budget was exhausted.
    #[error("deadline exceeded after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<EngineError>>`.
pub type EngineResult<T> = Result<T, error_stack::Report<EngineError>>;

/// A recoverable failure of an algorithm or DAO call.
///
/// These never abort the pipeline; each phase applies its own degradation
/// policy and logs the failure.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The call did not complete within its configured timeout.
    #[error("timeout after {0} ms")]
    Timeout(u64),

    /// Transport-level failure (connect, send, receive).
    #[error("transport: {0}")]
    Transport(String),

    /// The backend answered with something the parser rejected.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// The input could not be turned into a backend request.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Result alias for algorithm and DAO calls.
pub type BackendResult<T> = Result<T, BackendError>;
