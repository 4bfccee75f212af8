//! The cart mutation protocol.
//!
//! All coordination between concurrent requests happens through the
//! store's atomic primitives: the warehouse binding is a conditional
//! write (first writer wins), quantity accumulation is an additive update
//! (sum wins), and quantity overwrite is a plain set (last writer wins).
//! There is no lock, queue, or transaction; multi-step operations are
//! sequences of independently idempotent writes with documented
//! partial-failure behavior.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use cartage_core::{CartId, ItemId, WarehouseId};

use super::identity::CartIdentity;
use super::rows::{self, CartLine, CartMeta, CartRow, attr};
use crate::stock::StockOracle;
use crate::store::{Condition, Key, KeyValueStore, StoreError, UpdateAction, Value};

/// Cart operation failures.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity outside the allowed range for the operation.
    #[error("qty must be a positive integer")]
    InvalidQuantity,

    /// The warehouse identifier was empty.
    #[error("warehouse_id must not be empty")]
    InvalidWarehouse,

    /// The item has no stock at the requested warehouse.
    #[error("out of stock in warehouse {0}")]
    OutOfStock(WarehouseId),

    /// The cart is already bound to a different warehouse. Carries the
    /// currently bound warehouse so the caller can react; retrying with a
    /// different warehouse silently is never correct.
    #[error("cart is bound to a different warehouse")]
    WarehouseConflict {
        /// The warehouse the cart is actually bound to.
        bound: Option<WarehouseId>,
    },

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a set-quantity call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityUpdate {
    /// The line now carries the given quantity.
    Updated {
        /// The new quantity.
        qty: i64,
    },
    /// The line was deleted (quantity reached zero).
    Removed,
}

/// A cart as read from the store.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    /// The header row; `None` when the cart does not exist.
    pub meta: Option<CartMeta>,
    /// All line rows.
    pub lines: Vec<CartLine>,
}

/// Repository owning all reads and writes of the cart table.
#[derive(Clone)]
pub struct CartRepository {
    store: Arc<dyn KeyValueStore>,
    stock: Arc<dyn StockOracle>,
    table: String,
    ttl: Duration,
}

impl CartRepository {
    /// Create a repository over `table` with the given cart TTL.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        stock: Arc<dyn StockOracle>,
        table: impl Into<String>,
        ttl_days: i64,
    ) -> Self {
        Self {
            store,
            stock,
            table: table.into(),
            ttl: Duration::days(ttl_days),
        }
    }

    /// Seconds of TTL applied to anonymous cart cookies.
    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    fn expires_at(&self, now: DateTime<Utc>) -> i64 {
        (now + self.ttl).timestamp()
    }

    /// Create the META row when absent; otherwise leave the cart as-is.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Store`] on store failure.
    pub async fn create_or_get(&self, identity: &CartIdentity) -> Result<(), CartError> {
        self.ensure_meta(identity).await
    }

    /// Create the META row when absent.
    ///
    /// The slow path is an upsert whose actions are all set-if-absent, so a
    /// concurrent request that already bound the cart is never clobbered
    /// (a plain put here would let a stale creator erase the binding).
    async fn ensure_meta(&self, identity: &CartIdentity) -> Result<(), CartError> {
        let key = rows::meta_key(&identity.cart_id);
        if self.store.get(&self.table, &key).await?.is_some() {
            return Ok(());
        }

        let now = Utc::now();
        let mut actions = vec![
            UpdateAction::set_if_absent(attr::UPDATED_AT, now.to_rfc3339()),
            UpdateAction::set_if_absent(attr::EXPIRES_AT, self.expires_at(now)),
        ];
        if let Some(user) = &identity.user_id {
            actions.push(UpdateAction::set_if_absent(attr::USER_ID, user.as_str()));
        }
        self.store
            .update(&self.table, &key, actions, Condition::Always)
            .await?;
        debug!(cart_id = %identity.cart_id, "created cart META");
        Ok(())
    }

    /// Bind the cart to a warehouse, first writer wins.
    ///
    /// Ensures META exists, then issues a single conditional write: set
    /// the binding only when absent, or require it to already equal the
    /// requested warehouse; `updated_at`/`expires_at` refresh
    /// unconditionally in the same write. A concurrent or prior bind to a
    /// different warehouse surfaces as [`CartError::WarehouseConflict`]
    /// carrying the actual binding.
    ///
    /// # Errors
    ///
    /// [`CartError::InvalidWarehouse`], [`CartError::WarehouseConflict`],
    /// or [`CartError::Store`].
    pub async fn bind_warehouse(
        &self,
        identity: &CartIdentity,
        warehouse: &WarehouseId,
    ) -> Result<(), CartError> {
        if warehouse.is_empty() {
            return Err(CartError::InvalidWarehouse);
        }
        self.ensure_meta(identity).await?;
        self.bind(&identity.cart_id, warehouse).await
    }

    async fn bind(&self, cart: &CartId, warehouse: &WarehouseId) -> Result<(), CartError> {
        let now = Utc::now();
        let result = self
            .store
            .update(
                &self.table,
                &rows::meta_key(cart),
                vec![
                    UpdateAction::set_if_absent(attr::WAREHOUSE_ID, warehouse.as_str()),
                    UpdateAction::set(attr::UPDATED_AT, now.to_rfc3339()),
                    UpdateAction::set(attr::EXPIRES_AT, self.expires_at(now)),
                ],
                Condition::AbsentOrEquals {
                    attr: attr::WAREHOUSE_ID.to_owned(),
                    value: Value::text(warehouse.as_str()),
                },
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => {
                // Already bound elsewhere; fetch the binding to report it.
                let bound = self
                    .store
                    .get(&self.table, &rows::meta_key(cart))
                    .await?
                    .as_ref()
                    .and_then(|item| item.get(attr::WAREHOUSE_ID))
                    .and_then(Value::as_text)
                    .map(WarehouseId::new);
                Err(CartError::WarehouseConflict { bound })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Add `qty` of an item to the cart, binding the cart to `warehouse`
    /// on first touch.
    ///
    /// The operation is a sequence of independent writes, in this order:
    /// bind, stock check, line upsert, META touch. A stock rejection
    /// happens after the bind has committed, so a cart whose very first
    /// add is rejected for stock is still bound to that warehouse; the
    /// binding is deliberately not rolled back.
    ///
    /// The line upsert is a single additive update, so concurrent adds for
    /// the same line sum their quantities.
    ///
    /// # Errors
    ///
    /// [`CartError::InvalidWarehouse`] / [`CartError::InvalidQuantity`]
    /// before any store write, [`CartError::WarehouseConflict`],
    /// [`CartError::OutOfStock`], or [`CartError::Store`].
    pub async fn add_item(
        &self,
        identity: &CartIdentity,
        warehouse: &WarehouseId,
        item: ItemId,
        qty: i64,
    ) -> Result<(), CartError> {
        if warehouse.is_empty() {
            return Err(CartError::InvalidWarehouse);
        }
        if qty <= 0 {
            return Err(CartError::InvalidQuantity);
        }

        self.ensure_meta(identity).await?;
        self.bind(&identity.cart_id, warehouse).await?;

        let on_hand = self.stock.on_hand(item, warehouse).await?;
        if on_hand <= 0 {
            return Err(CartError::OutOfStock(warehouse.clone()));
        }

        let now = Utc::now();
        self.store
            .update(
                &self.table,
                &rows::line_key(&identity.cart_id, item),
                vec![
                    UpdateAction::set(attr::ITEM_ID, item.as_i64()),
                    UpdateAction::set(attr::WAREHOUSE_ID, warehouse.as_str()),
                    UpdateAction::add(attr::QUANTITY, qty),
                    UpdateAction::set_if_absent(attr::ADDED_AT, now.to_rfc3339()),
                ],
                Condition::Always,
            )
            .await?;

        self.touch_meta(&identity.cart_id).await?;
        debug!(cart_id = %identity.cart_id, item_id = %item, qty, "added line");
        Ok(())
    }

    /// Overwrite a line's quantity; zero deletes the line.
    ///
    /// No stock re-check happens here: this endpoint trusts the caller to
    /// have validated availability, a deliberate asymmetry from
    /// [`Self::add_item`]. Overwrites are last-write-wins.
    ///
    /// # Errors
    ///
    /// [`CartError::InvalidQuantity`] for negative quantities, otherwise
    /// [`CartError::Store`].
    pub async fn set_quantity(
        &self,
        cart: &CartId,
        item: ItemId,
        qty: i64,
    ) -> Result<QuantityUpdate, CartError> {
        if qty < 0 {
            return Err(CartError::InvalidQuantity);
        }

        if qty == 0 {
            // Deleting an already-absent line is a no-op and still Removed.
            self.store
                .delete(&self.table, &rows::line_key(cart, item))
                .await?;
            self.touch_meta(cart).await?;
            return Ok(QuantityUpdate::Removed);
        }

        // The write is an upsert; when it creates the line it must carry
        // the full row shape, so the warehouse comes from the cart's
        // binding (set-if-absent leaves an existing line untouched).
        let bound = self
            .store
            .get(&self.table, &rows::meta_key(cart))
            .await?
            .as_ref()
            .and_then(|meta| meta.get(attr::WAREHOUSE_ID))
            .and_then(Value::as_text)
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        let now = Utc::now();

        self.store
            .update(
                &self.table,
                &rows::line_key(cart, item),
                vec![
                    UpdateAction::set(attr::ITEM_ID, item.as_i64()),
                    UpdateAction::set(attr::QUANTITY, qty),
                    UpdateAction::set_if_absent(attr::WAREHOUSE_ID, bound),
                    UpdateAction::set_if_absent(attr::ADDED_AT, now.to_rfc3339()),
                ],
                Condition::Always,
            )
            .await?;
        self.touch_meta(cart).await?;
        Ok(QuantityUpdate::Updated { qty })
    }

    /// Delete the entire cart (META and every line).
    ///
    /// Enumerates the partition page by page, then deletes in batches.
    /// Returns the number of rows actually deleted; re-invoking on an
    /// already-empty cart returns zero.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Store`] on store failure.
    pub async fn clear(&self, cart: &CartId) -> Result<usize, CartError> {
        let mut keys = Vec::new();
        let mut start = None;
        loop {
            let page = self
                .store
                .query_partition(
                    &self.table,
                    attr::CART_ID,
                    &Value::text(cart.as_str()),
                    start,
                )
                .await?;
            for item in &page.items {
                let sort = item
                    .get(attr::ITEM_KEY)
                    .and_then(Value::as_text)
                    .ok_or_else(|| {
                        StoreError::Corrupt("cart row is missing item_key".to_owned())
                    })?;
                keys.push(
                    Key::new(attr::CART_ID, cart.as_str()).with_sort(attr::ITEM_KEY, sort),
                );
            }
            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let requested = keys.len();
        let deleted = self.store.delete_batch(&self.table, keys).await?;
        if deleted < requested {
            tracing::warn!(
                cart_id = %cart,
                requested,
                deleted,
                "cart clear left rows behind; caller may re-invoke"
            );
        }
        Ok(deleted)
    }

    /// Read the full cart. Never mutates and never extends the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Store`] on store failure or malformed rows.
    pub async fn read(&self, cart: &CartId) -> Result<CartSnapshot, CartError> {
        let mut meta = None;
        let mut lines = Vec::new();
        let mut start = None;
        loop {
            let page = self
                .store
                .query_partition(
                    &self.table,
                    attr::CART_ID,
                    &Value::text(cart.as_str()),
                    start,
                )
                .await?;
            for item in &page.items {
                match CartRow::decode(item)? {
                    CartRow::Meta(m) => meta = Some(m),
                    CartRow::Line(line) => lines.push(line),
                }
            }
            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        Ok(CartSnapshot { meta, lines })
    }

    /// Roll the cart's `updated_at`/`expires_at` forward.
    async fn touch_meta(&self, cart: &CartId) -> Result<(), CartError> {
        let now = Utc::now();
        self.store
            .update(
                &self.table,
                &rows::meta_key(cart),
                vec![
                    UpdateAction::set(attr::UPDATED_AT, now.to_rfc3339()),
                    UpdateAction::set(attr::EXPIRES_AT, self.expires_at(now)),
                ],
                Condition::Always,
            )
            .await?;
        Ok(())
    }
}
