//! Newtype IDs for type-safe entity references.
//!
//! Numeric catalog identifiers use the `define_numeric_id!` macro; entities
//! keyed by opaque strings (carts, warehouses, users) use
//! `define_string_id!`. Both prevent accidentally mixing IDs from different
//! entity types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to define a type-safe numeric ID wrapper.
///
/// Creates a newtype wrapper around `i64` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Conversion methods: `new()`, `as_i64()`
/// - `From<i64>` and `Into<i64>` implementations
///
/// # Example
///
/// ```rust
/// # use cartage_core::define_numeric_id;
/// define_numeric_id!(ItemId);
///
/// let item = ItemId::new(42);
/// assert_eq!(item.as_i64(), 42);
/// ```
#[macro_export]
macro_rules! define_numeric_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create a new ID from an i64 value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the underlying i64 value.
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with serde transparency, the
/// usual derives, and `new()` / `as_str()` / `into_inner()` accessors.
#[macro_export]
macro_rules! define_string_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return its inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the ID is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Catalog items carry integer identifiers (the stock table's partition key
// is numeric, so everything item-shaped stays numeric end to end).
define_numeric_id!(ItemId);

// String-keyed entities.
define_string_id!(WarehouseId);
define_string_id!(UserId);
define_string_id!(CartId);

impl UserId {
    /// Generate a fresh random user ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl CartId {
    /// Generate a fresh opaque cart token for an anonymous caller.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

/// Serde helpers shared by API boundary types.
pub mod parse {
    use super::ItemId;

    /// Parse an item identifier from a loosely-typed JSON value.
    ///
    /// Clients send item IDs as JSON numbers or numeric strings; both
    /// coerce to [`ItemId`]. Anything else is rejected.
    #[must_use]
    pub fn item_id_from_json(value: &serde_json::Value) -> Option<ItemId> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(ItemId::new),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok().map(ItemId::new),
            _ => None,
        }
    }
}
