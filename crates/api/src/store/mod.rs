//! Key-value store contract.
//!
//! Everything durable lives in a partition+sort keyed store. The contract
//! here is the small set of primitives the rest of the crate is allowed to
//! rely on: point reads/writes, conditional updates (the compare-and-swap
//! used for warehouse binding), atomic additive updates (quantity
//! accumulation), batched deletes, and paginated partition/index/scan
//! enumeration.
//!
//! Two implementations exist: [`dynamo::DynamoStore`] over DynamoDB and
//! [`memory::MemoryStore`] for tests. Row attribute names and sort-key
//! prefix encodings are the business of the modules that own each table
//! (`cart::rows`, `stock`, ...), not of this contract.

pub mod dynamo;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A single stored attribute value.
///
/// The store distinguishes strings, numbers, and booleans. Numbers are kept
/// as `i64` whenever they are integral so that JSON responses carry plain
/// integers rather than a high-precision decimal representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A UTF-8 string.
    Text(String),
    /// An integral number.
    Int(i64),
    /// A non-integral number.
    Float(f64),
    /// A boolean flag.
    Bool(bool),
}

impl Value {
    /// Build a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// The contained string, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The contained integer, if this is an integral number.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The contained number widened to `f64`, if numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The contained boolean, if this is a bool value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Canonical string form, used by [`memory::MemoryStore`] as a map key.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(s) => format!("s:{s}"),
            // Zero-padded with an explicit sign slot so string order matches
            // numeric order for the id ranges we store.
            Self::Int(n) => format!("n:{n:+021}"),
            Self::Float(f) => format!("f:{f}"),
            Self::Bool(b) => format!("b:{b}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A stored row: attribute name to value.
pub type Item = HashMap<String, Value>;

/// Primary key of a row: partition attribute plus optional sort attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    partition: (String, Value),
    sort: Option<(String, Value)>,
}

impl Key {
    /// Key for a table with a partition key only.
    pub fn new(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            partition: (attr.into(), value.into()),
            sort: None,
        }
    }

    /// Add the sort component for a composite-keyed table.
    #[must_use]
    pub fn with_sort(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sort = Some((attr.into(), value.into()));
        self
    }

    /// Partition attribute name and value.
    #[must_use]
    pub fn partition(&self) -> (&str, &Value) {
        (&self.partition.0, &self.partition.1)
    }

    /// Sort attribute name and value, when present.
    #[must_use]
    pub fn sort(&self) -> Option<(&str, &Value)> {
        self.sort.as_ref().map(|(a, v)| (a.as_str(), v))
    }

    /// The key as a row fragment (used for puts and delete requests).
    #[must_use]
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(self.partition.0.clone(), self.partition.1.clone());
        if let Some((attr, value)) = &self.sort {
            item.insert(attr.clone(), value.clone());
        }
        item
    }
}

/// One mutation applied by [`KeyValueStore::update`].
///
/// All actions in a single `update` call apply atomically; `Add` is an
/// atomic increment that treats an absent attribute as zero, which is what
/// keeps concurrent quantity increments lossless.
#[derive(Debug, Clone)]
pub enum UpdateAction {
    /// Unconditionally set an attribute.
    Set {
        /// Attribute name.
        attr: String,
        /// New value.
        value: Value,
    },
    /// Set an attribute only when it is currently absent.
    SetIfAbsent {
        /// Attribute name.
        attr: String,
        /// Value to set when absent.
        value: Value,
    },
    /// Atomically add to an integer attribute, treating absent as zero.
    Add {
        /// Attribute name.
        attr: String,
        /// Signed delta.
        delta: i64,
    },
}

impl UpdateAction {
    /// Build a `Set` action.
    pub fn set(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Build a `SetIfAbsent` action.
    pub fn set_if_absent(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::SetIfAbsent {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Build an `Add` action.
    pub fn add(attr: impl Into<String>, delta: i64) -> Self {
        Self::Add {
            attr: attr.into(),
            delta,
        }
    }
}

/// Precondition for [`KeyValueStore::update`].
#[derive(Debug, Clone)]
pub enum Condition {
    /// Apply unconditionally.
    Always,
    /// Apply only when the attribute is absent or already equals the value.
    ///
    /// This is the store-native compare-and-swap used to make warehouse
    /// binding first-writer-wins without a lock.
    AbsentOrEquals {
        /// Attribute name.
        attr: String,
        /// Required value when the attribute exists.
        value: Value,
    },
}

/// One page of an enumeration.
///
/// `next` is an opaque exclusive-start key; callers loop until it is
/// `None`. Its shape is store-specific and must be passed back verbatim.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Rows in this page.
    pub items: Vec<Item>,
    /// Continuation key, when the enumeration is not exhausted.
    pub next: Option<Item>,
}

/// Store failures.
///
/// `ConditionFailed` is distinguished from the generic variants because a
/// failed condition carries business meaning (a bind conflict) and must
/// never collapse into transient-fault handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional update's precondition did not hold.
    #[error("conditional check failed")]
    ConditionFailed,

    /// The store throttled or timed out; the caller may retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row did not have the expected shape.
    #[error("malformed stored row: {0}")]
    Corrupt(String),

    /// Any other request failure.
    #[error("store request failed: {0}")]
    Request(String),
}

/// The durable key-value store the backend runs against.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point-read a row.
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Write a full row (the item must contain its key attributes).
    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError>;

    /// Atomically apply `actions` to a row under `condition`.
    ///
    /// Creates the row (with its key attributes) when it does not exist,
    /// matching the upsert semantics of the underlying store.
    async fn update(
        &self,
        table: &str,
        key: &Key,
        actions: Vec<UpdateAction>,
        condition: Condition,
    ) -> Result<(), StoreError>;

    /// Delete a row. Deleting an absent row is a no-op.
    async fn delete(&self, table: &str, key: &Key) -> Result<(), StoreError>;

    /// Delete many rows, batching as the store allows.
    ///
    /// Returns the number of deletes the store confirmed; a shortfall means
    /// the caller should re-invoke (deletes are idempotent).
    async fn delete_batch(&self, table: &str, keys: Vec<Key>) -> Result<usize, StoreError>;

    /// One page of rows sharing a partition key value.
    async fn query_partition(
        &self,
        table: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError>;

    /// One page of rows from a secondary index.
    async fn query_index(
        &self,
        table: &str,
        index: &str,
        attr: &str,
        value: &Value,
        start: Option<Item>,
    ) -> Result<Page, StoreError>;

    /// One page of a full-table scan, projected to `projection` attributes
    /// (empty projection means all attributes).
    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        start: Option<Item>,
    ) -> Result<Page, StoreError>;
}
