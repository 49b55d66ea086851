//! Input and output contract of the scoring dispatch layer.
//!
//! Every scoring backend, whatever its transport, accepts an [`AlgoInput`]
//! and returns a sequence of [`ScoredRecord`]s. The record count equals
//! the input count, except for top-K pairings (vector search) where the
//! backend declares its own cardinality.

use std::collections::HashMap;
use std::sync::Arc;

use crate::item::PropertyValue;

/// Score substituted for invalid (non-finite) or missing backend answers.
///
/// Deployments may override it per scene / per field-lookup instance; this
/// constant is the engine-wide convention.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// One feature map per candidate, in candidate order.
pub type FeatureMatrix = Vec<HashMap<String, PropertyValue>>;

/// Input accepted by a scoring backend.
#[derive(Debug, Clone)]
pub enum AlgoInput {
    /// Batched per-candidate feature maps (remote ML, field lookup)
    Features(FeatureMatrix),
    /// A query vector and the number of neighbors wanted (vector search)
    Vector { query: Vec<f32>, top_k: usize },
    /// Raw payload for custom backends
    Value(serde_json::Value),
}

impl AlgoInput {
    /// Number of candidates this input describes.
    pub fn len(&self) -> usize {
        match self {
            AlgoInput::Features(maps) => maps.len(),
            AlgoInput::Vector { top_k, .. } => *top_k,
            AlgoInput::Value(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AlgoInput::Features(maps) => maps.is_empty(),
            AlgoInput::Vector { query, .. } => query.is_empty(),
            AlgoInput::Value(v) => v.is_null(),
        }
    }
}

/// Uniform response record produced by every scoring backend.
#[derive(Debug, Clone, Default)]
pub struct ScoredRecord {
    /// Target item id, for backends whose responses carry identity
    /// (vector search). `None` for positional pairings.
    pub id: Option<String>,
    /// Primary score; finite, monotonic with utility
    pub score: f64,
    /// Auxiliary named scores for multi-objective use
    pub score_map: Option<HashMap<String, f64>>,
    /// Classifier outputs keyed by head name
    pub classify_map: Option<HashMap<String, Vec<f64>>>,
}

impl ScoredRecord {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_score_map(mut self, map: HashMap<String, f64>) -> Self {
        self.score_map = Some(map);
        self
    }
}

/// Named pre-dispatch input transform, applied before the backend call.
pub type TransformFn = Arc<dyn Fn(AlgoInput) -> AlgoInput + Send + Sync>;
