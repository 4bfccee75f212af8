//! On-store representation of cart rows.
//!
//! A cart is one partition: a `META` header row plus one `ITEM#<id>` row
//! per line. The sort-key prefix encoding lives here and nowhere else;
//! everything above this module works with the [`CartRow`] variant.

use chrono::{DateTime, Utc};
use serde::Serialize;

use cartage_core::{CartId, ItemId, UserId, WarehouseId};

use crate::store::{Item, Key, StoreError, Value};

/// Sort key of the cart header row.
const META_SORT_KEY: &str = "META";

/// Sort-key prefix of line rows.
const LINE_PREFIX: &str = "ITEM#";

/// Attribute names of the cart table.
pub(crate) mod attr {
    pub const CART_ID: &str = "cart_id";
    pub const ITEM_KEY: &str = "item_key";
    pub const USER_ID: &str = "user_id";
    pub const WAREHOUSE_ID: &str = "warehouse_id";
    pub const UPDATED_AT: &str = "updated_at";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const ITEM_ID: &str = "item_id";
    pub const QUANTITY: &str = "quantity";
    pub const ADDED_AT: &str = "added_at";
}

/// Key of a cart's META row.
pub(crate) fn meta_key(cart: &CartId) -> Key {
    Key::new(attr::CART_ID, cart.as_str()).with_sort(attr::ITEM_KEY, META_SORT_KEY)
}

/// Key of a cart's line row for `item`.
pub(crate) fn line_key(cart: &CartId, item: ItemId) -> Key {
    Key::new(attr::CART_ID, cart.as_str())
        .with_sort(attr::ITEM_KEY, format!("{LINE_PREFIX}{item}"))
}

/// The cart header: binding and expiration state.
#[derive(Debug, Clone, Serialize)]
pub struct CartMeta {
    /// The cart identifier (partition key).
    pub cart_id: CartId,
    /// Owning account, present iff the cart belongs to an authenticated
    /// caller.
    pub user_id: Option<UserId>,
    /// The fulfillment warehouse this cart is bound to; set at most once.
    pub warehouse_id: Option<WarehouseId>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Absolute expiry (epoch seconds), rolled forward on every mutation.
    pub expires_at: i64,
}

/// One line item: a product's requested quantity.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    /// The catalog item.
    pub item_id: ItemId,
    /// Always equals the cart's bound warehouse.
    pub warehouse_id: WarehouseId,
    /// Requested quantity, always > 0 (a zero line is deleted instead).
    pub quantity: i64,
    /// When the line was first created; immutable afterwards.
    pub added_at: DateTime<Utc>,
}

/// A decoded cart row.
#[derive(Debug, Clone)]
pub enum CartRow {
    /// The header row.
    Meta(CartMeta),
    /// A line row.
    Line(CartLine),
}

impl CartRow {
    /// Decode a stored row into the tagged variant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when the row is missing required
    /// attributes or carries an unrecognized sort key.
    pub fn decode(item: &Item) -> Result<Self, StoreError> {
        let sort = text(item, attr::ITEM_KEY)?;
        if sort == META_SORT_KEY {
            return Ok(Self::Meta(decode_meta(item)?));
        }
        if sort.starts_with(LINE_PREFIX) {
            return Ok(Self::Line(decode_line(item)?));
        }
        Err(StoreError::Corrupt(format!(
            "unrecognized cart sort key: {sort}"
        )))
    }
}

fn decode_meta(item: &Item) -> Result<CartMeta, StoreError> {
    Ok(CartMeta {
        cart_id: CartId::new(text(item, attr::CART_ID)?),
        user_id: item
            .get(attr::USER_ID)
            .and_then(Value::as_text)
            .map(UserId::new),
        warehouse_id: item
            .get(attr::WAREHOUSE_ID)
            .and_then(Value::as_text)
            .map(WarehouseId::new),
        updated_at: timestamp(item, attr::UPDATED_AT)?,
        expires_at: int(item, attr::EXPIRES_AT)?,
    })
}

fn decode_line(item: &Item) -> Result<CartLine, StoreError> {
    Ok(CartLine {
        item_id: ItemId::new(int(item, attr::ITEM_ID)?),
        warehouse_id: WarehouseId::new(text(item, attr::WAREHOUSE_ID)?),
        quantity: int(item, attr::QUANTITY)?,
        added_at: timestamp(item, attr::ADDED_AT)?,
    })
}

fn text<'a>(item: &'a Item, attr: &str) -> Result<&'a str, StoreError> {
    item.get(attr)
        .and_then(Value::as_text)
        .ok_or_else(|| StoreError::Corrupt(format!("cart row is missing {attr}")))
}

fn int(item: &Item, attr: &str) -> Result<i64, StoreError> {
    item.get(attr)
        .and_then(Value::as_int)
        .ok_or_else(|| StoreError::Corrupt(format!("cart row is missing numeric {attr}")))
}

fn timestamp(item: &Item, attr: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = text(item, attr)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("cart row has invalid {attr}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn meta_item(cart: &str, user: Option<&str>, expires_at: i64) -> Item {
        let mut item = Item::new();
        item.insert(attr::CART_ID.into(), Value::text(cart));
        item.insert(attr::ITEM_KEY.into(), Value::text(META_SORT_KEY));
        if let Some(user) = user {
            item.insert(attr::USER_ID.into(), Value::text(user));
        }
        item.insert(attr::UPDATED_AT.into(), Value::text(Utc::now().to_rfc3339()));
        item.insert(attr::EXPIRES_AT.into(), Value::Int(expires_at));
        item
    }

    #[test]
    fn meta_row_decodes() {
        let item = meta_item("c1", Some("u1"), 123_456);
        let row = CartRow::decode(&item).unwrap();
        let CartRow::Meta(meta) = row else {
            panic!("expected META row");
        };
        assert_eq!(meta.cart_id, CartId::new("c1"));
        assert_eq!(meta.user_id, Some(UserId::new("u1")));
        assert_eq!(meta.warehouse_id, None);
        assert_eq!(meta.expires_at, 123_456);
    }

    #[test]
    fn anonymous_meta_has_no_user() {
        let item = meta_item("c1", None, 1);
        let CartRow::Meta(meta) = CartRow::decode(&item).unwrap() else {
            panic!("expected META row");
        };
        assert!(meta.user_id.is_none());
    }

    #[test]
    fn line_row_decodes() {
        let mut item = Item::new();
        item.insert(attr::CART_ID.into(), Value::text("c1"));
        item.insert(attr::ITEM_KEY.into(), Value::text("ITEM#42"));
        item.insert(attr::ITEM_ID.into(), Value::Int(42));
        item.insert(attr::WAREHOUSE_ID.into(), Value::text("w1"));
        item.insert(attr::QUANTITY.into(), Value::Int(3));
        item.insert(
            attr::ADDED_AT.into(),
            Value::text(Utc::now().to_rfc3339()),
        );

        let CartRow::Line(line) = CartRow::decode(&item).unwrap() else {
            panic!("expected LINE row");
        };
        assert_eq!(line.item_id, ItemId::new(42));
        assert_eq!(line.quantity, 3);
        assert_eq!(line.warehouse_id, WarehouseId::new("w1"));
    }

    #[test]
    fn unknown_sort_key_is_corrupt() {
        let mut item = Item::new();
        item.insert(attr::CART_ID.into(), Value::text("c1"));
        item.insert(attr::ITEM_KEY.into(), Value::text("OTHER"));
        assert!(matches!(
            CartRow::decode(&item),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn line_key_carries_prefix() {
        let key = line_key(&CartId::new("c1"), ItemId::new(7));
        let (_, sort) = key.sort().unwrap();
        assert_eq!(sort.as_text(), Some("ITEM#7"));
    }
}
