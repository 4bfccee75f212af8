//! Warehouse route handlers.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stock::StockRecord;
use crate::warehouse::RankedWarehouse;

/// Deserialize empty strings as None for optional numeric fields.
fn empty_string_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Query parameters for both warehouse lookups.
#[derive(Debug, Deserialize)]
pub struct GeoQuery {
    /// Query latitude.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub lat: Option<f64>,
    /// Query longitude.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub lon: Option<f64>,
    /// Result count (nearest-list only).
    #[serde(default)]
    pub limit: Option<usize>,
}

fn coordinates(query: &GeoQuery) -> Result<(f64, f64)> {
    match (query.lat, query.lon) {
        (Some(lat), Some(lon)) => Ok((lat, lon)),
        _ => Err(AppError::BadRequest("Provide valid lat & lon".to_owned())),
    }
}

/// Nearest-warehouses response body.
#[derive(Debug, Serialize)]
pub struct NearestResponse {
    /// Warehouses ascending by distance.
    pub warehouses: Vec<RankedWarehouse>,
}

/// The `limit` closest active warehouses, ascending by distance.
#[instrument(skip(state))]
pub async fn nearest(
    State(state): State<AppState>,
    Query(query): Query<GeoQuery>,
) -> Result<Json<NearestResponse>> {
    let (lat, lon) = coordinates(&query)?;
    let limit = query.limit.unwrap_or(state.config().nearby_limit).max(1);

    let warehouses = state.locator().list_nearest(lat, lon, limit).await?;
    Ok(Json(NearestResponse { warehouses }))
}

/// Closest-warehouse response body.
#[derive(Debug, Serialize)]
pub struct ClosestResponse {
    /// The closest active warehouse.
    pub closest_warehouse: RankedWarehouse,
    /// Its in-stock items (bounded).
    pub items: Vec<StockRecord>,
}

/// The closest active warehouse plus its in-stock items.
///
/// 503 when no warehouse is active: the resource is mandatory here, unlike
/// the empty-list answer of the ranked lookup.
#[instrument(skip(state))]
pub async fn closest(
    State(state): State<AppState>,
    Query(query): Query<GeoQuery>,
) -> Result<Json<ClosestResponse>> {
    let (lat, lon) = coordinates(&query)?;

    let Some(closest) = state.locator().nearest(lat, lon).await? else {
        return Err(AppError::NoActiveWarehouses);
    };
    let items = state
        .stock()
        .list_in_stock(
            &closest.warehouse.warehouse_id,
            state.config().closest_items_limit,
        )
        .await?;

    Ok(Json(ClosestResponse {
        closest_warehouse: closest,
        items,
    }))
}
