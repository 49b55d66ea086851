//! Candidate items and the open property bag they carry.
//!
//! An [`Item`] is a recommendable object flowing through the pipeline. Its
//! identity is the `(item_type, id)` pair; everything else (score, score
//! map, retrieve sources, properties) is mutated by the phases as the
//! request progresses.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Value type of the open property bags on [`Item`] and
/// [`User`](crate::user::User).
///
/// Property bags carry features loaded dynamically from DAOs or passed in
/// on the request. Per-field semantics are documented in scene
/// configuration, not in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// UTF-8 string value
    String(String),
    /// Numeric value (all numbers widen to f64)
    Number(f64),
    /// Boolean flag
    Bool(bool),
    /// Nested list
    List(Vec<PropertyValue>),
    /// Nested map
    Map(HashMap<String, PropertyValue>),
    /// Raw bytes (not reachable from JSON; set programmatically)
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Numeric view of the value.
    ///
    /// Strings holding a parseable number are accepted so that feature
    /// tables may store numbers as text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::String(s) => s.trim().parse::<f64>().ok(),
            PropertyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// List view of the value.
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// List of strings, for history-style properties.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        self.as_list().map(|l| {
            l.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Number(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Number(v as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::List(v.into_iter().map(PropertyValue::String).collect())
    }
}

/// Identity of an item inside a candidate list.
///
/// Two items with the same key are the same candidate regardless of which
/// recall produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub item_type: String,
    pub id: String,
}

/// A recommendable object with a score and an open property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Opaque identifier, unique within `item_type`
    pub id: String,
    /// Category tag
    pub item_type: String,
    /// Current relevance; starts at 0, assigned by ranking
    #[serde(default)]
    pub score: f64,
    /// Names of the recall instances that produced this item
    #[serde(default)]
    pub retrieve_sources: BTreeSet<String>,
    /// Auxiliary named scores for multi-objective use
    #[serde(default)]
    pub score_map: HashMap<String, f64>,
    /// Open feature bag used by filters and ranking
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

impl Item {
    /// Create an item with a zero score and no retrieve source.
    pub fn new(id: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            score: 0.0,
            retrieve_sources: BTreeSet::new(),
            score_map: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Set the score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Record the recall instance that produced this item.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.retrieve_sources.insert(source.into());
        self
    }

    /// Set a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Dedup identity of this item.
    pub fn key(&self) -> ItemKey {
        ItemKey {
            item_type: self.item_type.clone(),
            id: self.id.clone(),
        }
    }

    /// Look up a property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Numeric property accessor.
    pub fn float_property(&self, key: &str) -> Option<f64> {
        self.property(key).and_then(PropertyValue::as_f64)
    }

    /// String property accessor.
    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(PropertyValue::as_str)
    }

    /// Set a property in place.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Fold a duplicate of the same candidate into this item.
    ///
    /// Keeps the higher primary score (whose copy also wins property
    /// conflicts), unions retrieve sources, merges the score maps by
    /// per-key maximum and fills in properties the winning copy is
    /// missing.
    pub fn absorb(&mut self, mut other: Item) {
        if other.score > self.score {
            self.score = other.score;
            std::mem::swap(&mut self.properties, &mut other.properties);
        }
        self.retrieve_sources.extend(other.retrieve_sources);
        for (k, v) in other.score_map {
            let slot = self.score_map.entry(k).or_insert(f64::NEG_INFINITY);
            if v > *slot {
                *slot = v;
            }
        }
        for (k, v) in other.properties {
            self.properties.entry(k).or_insert(v);
        }
    }

    /// Whether this item may legally reach the final ordering phase.
    pub fn is_sortable(&self) -> bool {
        !self.id.is_empty() && !self.retrieve_sources.is_empty() && self.score.is_finite()
    }
}

/// Total order used everywhere a candidate list must be deterministic:
/// score descending, then `(item_type, id)` ascending.
///
/// Non-finite scores are pushed to the end so that a clamping bug upstream
/// cannot poison the ordering.
pub fn ranking_cmp(a: &Item, b: &Item) -> Ordering {
    match (a.score.is_finite(), b.score.is_finite()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_type.cmp(&b.item_type))
        .then_with(|| a.id.cmp(&b.id))
}
