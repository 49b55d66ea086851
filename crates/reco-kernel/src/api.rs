//! Request and response shapes consumed at the system boundary.
//!
//! Transport, parsing and framing live outside the engine; these are the
//! plain data types the outer layer hands in and receives back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::item::{Item, PropertyValue};

/// An incoming recommendation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendRequest {
    /// Scene selecting the pipeline configuration. Required.
    pub scene_id: String,
    /// Opaque user identifier. Required.
    pub uid: String,
    /// Desired item count; the scene/engine default applies when omitted.
    #[serde(default)]
    pub size: Option<usize>,
    /// Scene category; `"default"` when omitted.
    #[serde(default)]
    pub category: Option<String>,
    /// Retain debug log lines and attach a trace to the response.
    #[serde(default)]
    pub debug: bool,
    /// Already-resolved experiment variant, when an experiment layer sits
    /// in front of the engine.
    #[serde(default)]
    pub variant: Option<String>,
    /// Open feature map seeded into the user's property bag.
    #[serde(default)]
    pub features: HashMap<String, PropertyValue>,
}

impl RecommendRequest {
    pub fn new(scene_id: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            uid: uid.into(),
            size: None,
            category: None,
            debug: false,
            variant: None,
            features: HashMap::new(),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_feature(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.features.insert(key.into(), value.into());
        self
    }
}

/// Response codes of the engine.
pub mod codes {
    pub const OK: u32 = 200;
    pub const BAD_REQUEST: u32 = 400;
    pub const UNAVAILABLE: u32 = 503;
}

/// One recommended item as serialized to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    pub id: String,
    pub score: f64,
    pub item_type: String,
    /// Which recall instances produced the item.
    #[serde(default)]
    pub retrieve_sources: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

impl From<Item> for ItemPayload {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            score: item.score,
            item_type: item.item_type,
            retrieve_sources: item.retrieve_sources,
            properties: item.properties,
        }
    }
}

/// Timing and counts of one pipeline phase, for the debug trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTrace {
    pub phase: String,
    pub count_in: usize,
    pub count_out: usize,
    pub elapsed_ms: u64,
    /// The phase stopped early because its budget or the request deadline
    /// was exhausted.
    #[serde(default)]
    pub deadline_hit: bool,
}

/// Structured trace attached to the response when the request ran with
/// `debug = true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugTrace {
    #[serde(default)]
    pub variant: Option<String>,
    pub phases: Vec<PhaseTrace>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub invariant_violations: u32,
}

/// The engine's answer to one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub code: u32,
    pub message: String,
    pub request_id: String,
    pub items: Vec<ItemPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugTrace>,
}

impl RecommendResponse {
    pub fn success(request_id: impl Into<String>, items: Vec<ItemPayload>) -> Self {
        Self {
            code: codes::OK,
            message: "success".to_string(),
            request_id: request_id.into(),
            items,
            debug: None,
        }
    }

    pub fn error(request_id: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: request_id.into(),
            items: Vec::new(),
            debug: None,
        }
    }

    pub fn with_debug(mut self, trace: DebugTrace) -> Self {
        self.debug = Some(trace);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::OK
    }
}
