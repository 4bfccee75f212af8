//! Warehouse locator: nearest-warehouse lookup and per-warehouse stock
//! listing.
//!
//! The active-warehouse list is a full-table scan cached in a TTL-bounded
//! cache owned by the locator (read-mostly, safe to race; staleness is
//! bounded by the TTL and a manual [`WarehouseLocator::invalidate`] is
//! available). Distances are great-circle (haversine).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use moka::future::Cache;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use cartage_core::WarehouseId;

use crate::store::{Item, KeyValueStore, StoreError, Value};

/// Mean Earth radius in kilometers (IUGG).
const EARTH_RADIUS_KM: f64 = 6371.008_8;

/// Attribute names of the warehouse table.
mod attr {
    pub const WAREHOUSE_ID: &str = "warehouse_id";
    pub const NAME: &str = "name";
    pub const ACTIVE: &str = "active";
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";
    pub const CITY: &str = "city";
    pub const REGION: &str = "region";
}

/// An active warehouse.
#[derive(Debug, Clone, Serialize)]
pub struct Warehouse {
    /// Warehouse identifier.
    pub warehouse_id: WarehouseId,
    /// Display name.
    pub name: Option<String>,
    /// City, when recorded.
    pub city: Option<String>,
    /// Region, when recorded.
    pub region: Option<String>,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// A warehouse ranked by distance from a query point.
#[derive(Debug, Clone, Serialize)]
pub struct RankedWarehouse {
    /// The warehouse.
    #[serde(flatten)]
    pub warehouse: Warehouse,
    /// Great-circle distance from the query point, rounded to 0.1 km.
    pub distance_km: f64,
}

/// Locator failures.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// Latitude or longitude outside the valid range.
    #[error("Provide valid lat & lon")]
    InvalidCoordinates,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Great-circle distance between two coordinates in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = lat1.to_radians();
    let p2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlmb = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlmb / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * (2.0 * a.sqrt().atan2((1.0 - a).sqrt()))
}

/// Validate a query coordinate.
///
/// # Errors
///
/// Returns [`LocatorError::InvalidCoordinates`] when out of range or
/// non-finite.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), LocatorError> {
    if lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
    {
        Ok(())
    } else {
        Err(LocatorError::InvalidCoordinates)
    }
}

/// Read-side locator over the warehouse table.
#[derive(Clone)]
pub struct WarehouseLocator {
    store: Arc<dyn KeyValueStore>,
    table: String,
    cache: Cache<(), Arc<Vec<Warehouse>>>,
}

impl WarehouseLocator {
    /// Create a locator caching the active-warehouse list for `cache_ttl`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table: impl Into<String>,
        cache_ttl: StdDuration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(cache_ttl)
            .build();
        Self {
            store,
            table: table.into(),
            cache,
        }
    }

    /// Drop the cached warehouse list; the next call reloads it.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }

    /// The active warehouses, from cache or a fresh scan.
    async fn active(&self) -> Result<Arc<Vec<Warehouse>>, LocatorError> {
        if let Some(cached) = self.cache.get(&()).await {
            return Ok(cached);
        }

        let mut warehouses = Vec::new();
        let mut start = None;
        loop {
            let page = self.store.scan(&self.table, &[], start).await?;
            for item in &page.items {
                if let Some(warehouse) = decode_active(item) {
                    warehouses.push(warehouse);
                }
            }
            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        debug!(count = warehouses.len(), "loaded active warehouses");

        let warehouses = Arc::new(warehouses);
        self.cache.insert((), Arc::clone(&warehouses)).await;
        Ok(warehouses)
    }

    /// The nearest active warehouse, or `None` when no warehouse is
    /// active. Distance ties keep the first-enumerated warehouse.
    ///
    /// # Errors
    ///
    /// [`LocatorError::InvalidCoordinates`] or [`LocatorError::Store`].
    pub async fn nearest(&self, lat: f64, lon: f64) -> Result<Option<RankedWarehouse>, LocatorError> {
        Ok(self.list_nearest(lat, lon, 1).await?.into_iter().next())
    }

    /// The `k` nearest active warehouses, ascending by distance. Ties keep
    /// enumeration order (stable sort).
    ///
    /// # Errors
    ///
    /// [`LocatorError::InvalidCoordinates`] or [`LocatorError::Store`].
    pub async fn list_nearest(
        &self,
        lat: f64,
        lon: f64,
        k: usize,
    ) -> Result<Vec<RankedWarehouse>, LocatorError> {
        validate_coordinates(lat, lon)?;

        let mut ranked: Vec<RankedWarehouse> = self
            .active()
            .await?
            .iter()
            .map(|warehouse| {
                let distance = haversine_km(lat, lon, warehouse.lat, warehouse.lon);
                RankedWarehouse {
                    warehouse: warehouse.clone(),
                    distance_km: (distance * 10.0).round() / 10.0,
                }
            })
            .collect();

        ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        ranked.truncate(k.max(1));
        Ok(ranked)
    }
}

/// Decode a warehouse row, returning `None` for inactive or unusable rows.
fn decode_active(item: &Item) -> Option<Warehouse> {
    if !is_active(item.get(attr::ACTIVE)) {
        return None;
    }
    Some(Warehouse {
        warehouse_id: WarehouseId::new(item.get(attr::WAREHOUSE_ID)?.as_text()?),
        name: item
            .get(attr::NAME)
            .and_then(Value::as_text)
            .map(ToOwned::to_owned),
        city: item
            .get(attr::CITY)
            .and_then(Value::as_text)
            .map(ToOwned::to_owned),
        region: item
            .get(attr::REGION)
            .and_then(Value::as_text)
            .map(ToOwned::to_owned),
        lat: item.get(attr::LAT)?.as_float()?,
        lon: item.get(attr::LON)?.as_float()?,
    })
}

/// The active flag is stored inconsistently across ingest paths; accept a
/// boolean, the strings "true"/"1", or the number 1.
fn is_active(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Text(s)) => {
            let s = s.to_ascii_lowercase();
            s == "true" || s == "1"
        }
        Some(Value::Int(n)) => *n == 1,
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn warehouse_row(id: &str, lat: f64, lon: f64, active: Value) -> Item {
        let mut item = Item::new();
        item.insert(attr::WAREHOUSE_ID.into(), Value::text(id));
        item.insert(attr::NAME.into(), Value::text(format!("Warehouse {id}")));
        item.insert(attr::LAT.into(), Value::Float(lat));
        item.insert(attr::LON.into(), Value::Float(lon));
        item.insert(attr::ACTIVE.into(), active);
        item
    }

    async fn locator_with(rows: Vec<Item>) -> WarehouseLocator {
        let store = MemoryStore::with_page_size(2);
        store.create_table("warehouses", "warehouse_id", None).await;
        for row in rows {
            store.put("warehouses", row).await.unwrap();
        }
        WarehouseLocator::new(Arc::new(store), "warehouses", StdDuration::from_secs(300))
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of longitude on the equator is ~111.19 km.
        let d = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
        // Zero distance for identical points.
        assert!(haversine_km(52.0, 21.0, 52.0, 21.0).abs() < f64::EPSILON);
    }

    #[test]
    fn coordinate_validation() {
        assert!(validate_coordinates(0.0, 0.0).is_ok());
        assert!(validate_coordinates(90.0, -180.0).is_ok());
        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, 180.1).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[tokio::test]
    async fn nearest_minimizes_haversine() {
        let locator = locator_with(vec![
            warehouse_row("a", 0.0, 0.0, Value::Bool(true)),
            warehouse_row("b", 10.0, 10.0, Value::Bool(true)),
        ])
        .await;

        // Query at (0, 1): warehouse at the origin is closer.
        let nearest = locator.nearest(0.0, 1.0).await.unwrap().unwrap();
        assert_eq!(nearest.warehouse.warehouse_id, WarehouseId::new("a"));
        assert!((nearest.distance_km - 111.2).abs() < 0.2);
    }

    #[tokio::test]
    async fn list_nearest_sorts_ascending() {
        let locator = locator_with(vec![
            warehouse_row("far", 40.0, 40.0, Value::Bool(true)),
            warehouse_row("near", 1.0, 1.0, Value::Bool(true)),
            warehouse_row("mid", 10.0, 10.0, Value::Bool(true)),
        ])
        .await;

        let ranked = locator.list_nearest(0.0, 0.0, 3).await.unwrap();
        let ids: Vec<&str> = ranked
            .iter()
            .map(|r| r.warehouse.warehouse_id.as_str())
            .collect();
        assert_eq!(ids, ["near", "mid", "far"]);
        assert!(ranked.windows(2).all(|w| {
            w.first().unwrap().distance_km <= w.get(1).unwrap().distance_km
        }));

        // k truncates.
        assert_eq!(locator.list_nearest(0.0, 0.0, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn inactive_warehouses_are_excluded() {
        let locator = locator_with(vec![
            warehouse_row("on", 1.0, 1.0, Value::text("true")),
            warehouse_row("legacy", 2.0, 2.0, Value::text("1")),
            warehouse_row("off", 0.1, 0.1, Value::Bool(false)),
            warehouse_row("off2", 0.2, 0.2, Value::text("false")),
        ])
        .await;

        let ranked = locator.list_nearest(0.0, 0.0, 10).await.unwrap();
        let ids: Vec<&str> = ranked
            .iter()
            .map(|r| r.warehouse.warehouse_id.as_str())
            .collect();
        assert_eq!(ids, ["on", "legacy"]);
    }

    #[tokio::test]
    async fn empty_table_yields_none() {
        let locator = locator_with(vec![]).await;
        assert!(locator.nearest(0.0, 0.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_query_coordinates_rejected() {
        let locator = locator_with(vec![]).await;
        assert!(matches!(
            locator.nearest(91.0, 0.0).await,
            Err(LocatorError::InvalidCoordinates)
        ));
    }

    #[tokio::test]
    async fn invalidate_reloads_list() {
        let store = MemoryStore::new();
        store.create_table("warehouses", "warehouse_id", None).await;
        store
            .put("warehouses", warehouse_row("a", 0.0, 0.0, Value::Bool(true)))
            .await
            .unwrap();
        let locator = WarehouseLocator::new(
            Arc::new(store.clone()),
            "warehouses",
            StdDuration::from_secs(300),
        );

        assert_eq!(locator.list_nearest(0.0, 0.0, 10).await.unwrap().len(), 1);

        // New warehouse is invisible until invalidation.
        store
            .put("warehouses", warehouse_row("b", 1.0, 1.0, Value::Bool(true)))
            .await
            .unwrap();
        assert_eq!(locator.list_nearest(0.0, 0.0, 10).await.unwrap().len(), 1);

        locator.invalidate().await;
        assert_eq!(locator.list_nearest(0.0, 0.0, 10).await.unwrap().len(), 2);
    }
}
