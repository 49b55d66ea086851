//! The user a request recommends for.
//!
//! A [`User`] is created at request entry from the request's feature map,
//! enriched by DAO loads during the Recall and Rank phases, and dropped
//! with the request. The identity never changes after construction; the
//! property bag only grows.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::item::PropertyValue;

/// Conventional property key holding the user's recent interaction
/// history as a list of item ids, newest first.
pub const RECENT_ITEMS: &str = "recent_items";

/// Conventional property key holding item ids already shown to the user.
pub const EXPOSED_ITEMS: &str = "exposed_items";

/// Conventional property key holding the user's embedding vector.
pub const EMBEDDING: &str = "embedding";

/// A user identified by an opaque `uid` with an append-only property bag.
///
/// Shared across phases as `Arc<User>`; the bag is guarded so concurrent
/// recalls may add loaded profile attributes without coordination.
#[derive(Debug)]
pub struct User {
    uid: String,
    properties: RwLock<HashMap<String, PropertyValue>>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            properties: RwLock::new(HashMap::new()),
        }
    }

    /// Create a user pre-seeded with the request's feature map.
    pub fn with_properties(
        uid: impl Into<String>,
        properties: HashMap<String, PropertyValue>,
    ) -> Self {
        Self {
            uid: uid.into(),
            properties: RwLock::new(properties),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Add a property. Existing keys are kept; the bag is append-only
    /// within a request, so the first writer wins.
    pub fn add_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties
            .write()
            .entry(key.into())
            .or_insert_with(|| value.into());
    }

    /// Bulk variant of [`add_property`](Self::add_property).
    pub fn add_properties(&self, properties: HashMap<String, PropertyValue>) {
        let mut bag = self.properties.write();
        for (k, v) in properties {
            bag.entry(k).or_insert(v);
        }
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.read().get(key).cloned()
    }

    pub fn string_property(&self, key: &str) -> Option<String> {
        self.property(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn float_property(&self, key: &str) -> Option<f64> {
        self.property(key).and_then(|v| v.as_f64())
    }

    /// History-style accessor: the property as a list of strings.
    pub fn string_list_property(&self, key: &str) -> Vec<String> {
        self.property(key)
            .and_then(|v| v.as_string_list())
            .unwrap_or_default()
    }

    /// The user's embedding vector, if one was loaded.
    pub fn embedding(&self) -> Option<Vec<f32>> {
        self.property(EMBEDDING).and_then(|v| match v {
            PropertyValue::List(l) => Some(
                l.iter()
                    .filter_map(|x| x.as_f64().map(|f| f as f32))
                    .collect(),
            ),
            _ => None,
        })
    }

    /// Snapshot of the bag for feature assembly.
    pub fn snapshot(&self) -> HashMap<String, PropertyValue> {
        self.properties.read().clone()
    }
}
