//! Stock oracle: read-only per-warehouse availability.
//!
//! The cart repository consults [`StockOracle::on_hand`] before admitting a
//! new line. This is an eventually-consistent point read, not a
//! reservation; a zero is a legitimate business answer and is never
//! retried.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use cartage_core::{ItemId, WarehouseId};

use crate::store::{Item, Key, KeyValueStore, StoreError, Value};

/// Attribute names of the stock table.
mod attr {
    pub const ITEM_ID: &str = "item_id";
    pub const WAREHOUSE_ID: &str = "warehouse_id";
    pub const ON_HAND: &str = "on_hand";
}

/// Availability of one item at one warehouse.
#[derive(Debug, Clone, Serialize)]
pub struct StockRecord {
    /// The catalog item.
    pub item_id: ItemId,
    /// The warehouse holding the stock.
    pub warehouse_id: WarehouseId,
    /// Current quantity on hand.
    pub on_hand: i64,
}

/// Read-only availability lookups.
#[async_trait]
pub trait StockOracle: Send + Sync {
    /// Current on-hand quantity for `(item, warehouse)`; a missing record
    /// reads as zero.
    async fn on_hand(&self, item: ItemId, warehouse: &WarehouseId) -> Result<i64, StoreError>;

    /// Up to `limit` in-stock records for a warehouse.
    async fn list_in_stock(
        &self,
        warehouse: &WarehouseId,
        limit: usize,
    ) -> Result<Vec<StockRecord>, StoreError>;

    /// The full set of item ids with positive stock at a warehouse.
    async fn in_stock_ids(&self, warehouse: &WarehouseId) -> Result<HashSet<ItemId>, StoreError>;
}

/// Store-backed [`StockOracle`] reading the stock table and its
/// per-warehouse index.
pub struct StoreStockOracle {
    store: Arc<dyn KeyValueStore>,
    table: String,
    warehouse_index: String,
}

impl StoreStockOracle {
    /// Create an oracle over `table`, using `warehouse_index` for
    /// per-warehouse enumeration.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table: impl Into<String>,
        warehouse_index: impl Into<String>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            warehouse_index: warehouse_index.into(),
        }
    }

    async fn collect_in_stock(
        &self,
        warehouse: &WarehouseId,
        limit: usize,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut records = Vec::new();
        let mut start = None;
        loop {
            let page = self
                .store
                .query_index(
                    &self.table,
                    &self.warehouse_index,
                    attr::WAREHOUSE_ID,
                    &Value::text(warehouse.as_str()),
                    start,
                )
                .await?;

            for item in &page.items {
                let record = decode_record(item)?;
                if record.on_hand > 0 {
                    records.push(record);
                    if records.len() >= limit {
                        return Ok(records);
                    }
                }
            }

            match page.next {
                Some(next) => start = Some(next),
                None => return Ok(records),
            }
        }
    }
}

#[async_trait]
impl StockOracle for StoreStockOracle {
    async fn on_hand(&self, item: ItemId, warehouse: &WarehouseId) -> Result<i64, StoreError> {
        let key = Key::new(attr::ITEM_ID, item.as_i64())
            .with_sort(attr::WAREHOUSE_ID, warehouse.as_str());
        let record = self.store.get(&self.table, &key).await?;
        Ok(record
            .as_ref()
            .and_then(|item| item.get(attr::ON_HAND))
            .and_then(Value::as_int)
            .unwrap_or(0))
    }

    async fn list_in_stock(
        &self,
        warehouse: &WarehouseId,
        limit: usize,
    ) -> Result<Vec<StockRecord>, StoreError> {
        self.collect_in_stock(warehouse, limit.max(1)).await
    }

    async fn in_stock_ids(&self, warehouse: &WarehouseId) -> Result<HashSet<ItemId>, StoreError> {
        let records = self.collect_in_stock(warehouse, usize::MAX).await?;
        Ok(records.into_iter().map(|r| r.item_id).collect())
    }
}

fn decode_record(item: &Item) -> Result<StockRecord, StoreError> {
    let item_id = item
        .get(attr::ITEM_ID)
        .and_then(Value::as_int)
        .ok_or_else(|| StoreError::Corrupt("stock record is missing item_id".to_owned()))?;
    let warehouse_id = item
        .get(attr::WAREHOUSE_ID)
        .and_then(Value::as_text)
        .ok_or_else(|| StoreError::Corrupt("stock record is missing warehouse_id".to_owned()))?;
    Ok(StockRecord {
        item_id: ItemId::new(item_id),
        warehouse_id: WarehouseId::new(warehouse_id),
        on_hand: item
            .get(attr::ON_HAND)
            .and_then(Value::as_int)
            .unwrap_or(0),
    })
}

/// Build a stock row in storage shape (seeding and tests).
#[must_use]
pub fn stock_item(item: ItemId, warehouse: &WarehouseId, on_hand: i64) -> Item {
    let mut row = Item::new();
    row.insert(attr::ITEM_ID.to_owned(), Value::Int(item.as_i64()));
    row.insert(
        attr::WAREHOUSE_ID.to_owned(),
        Value::text(warehouse.as_str()),
    );
    row.insert(attr::ON_HAND.to_owned(), Value::Int(on_hand));
    row
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    async fn seeded() -> StoreStockOracle {
        let store = MemoryStore::with_page_size(2);
        store
            .create_table("stock", "item_id", Some("warehouse_id"))
            .await;
        let w1 = WarehouseId::new("w1");
        let w2 = WarehouseId::new("w2");
        for (item, warehouse, qty) in [
            (1, &w1, 5),
            (2, &w1, 0),
            (3, &w1, 2),
            (4, &w1, 9),
            (1, &w2, 7),
        ] {
            store
                .put("stock", stock_item(ItemId::new(item), warehouse, qty))
                .await
                .unwrap();
        }
        StoreStockOracle::new(Arc::new(store), "stock", "warehouse_id_index")
    }

    #[tokio::test]
    async fn on_hand_reads_point_value() {
        let oracle = seeded().await;
        let w1 = WarehouseId::new("w1");
        assert_eq!(oracle.on_hand(ItemId::new(1), &w1).await.unwrap(), 5);
        assert_eq!(oracle.on_hand(ItemId::new(2), &w1).await.unwrap(), 0);
        // Absent record reads as zero, not an error.
        assert_eq!(oracle.on_hand(ItemId::new(99), &w1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_in_stock_filters_and_limits() {
        let oracle = seeded().await;
        let w1 = WarehouseId::new("w1");

        let all = oracle.list_in_stock(&w1, 100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.on_hand > 0));

        let capped = oracle.list_in_stock(&w1, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn in_stock_ids_spans_pages() {
        let oracle = seeded().await;
        let ids = oracle.in_stock_ids(&WarehouseId::new("w1")).await.unwrap();
        assert_eq!(
            ids,
            [ItemId::new(1), ItemId::new(3), ItemId::new(4)].into()
        );
    }
}
