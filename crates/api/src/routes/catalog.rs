//! Catalog search route handlers.

use axum::{
    Json,
    extract::{Query, State},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cartage_core::WarehouseId;

use crate::error::{AppError, Result};
use crate::search::{SearchHit, SearchQuery};
use crate::state::AppState;
use crate::store::Item;

/// Catalog search query parameters.
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    /// Free-text query (required).
    #[serde(default)]
    pub query: Option<String>,
    /// Similarity cutoff in `[0, 100]`.
    #[serde(default)]
    pub cutoff: Option<f64>,
    /// Maximum result count.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Warehouse scope (required).
    #[serde(default)]
    pub warehouse_id: Option<String>,
}

/// Catalog search response body.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    /// Ordered hits.
    pub results: Vec<SearchHit>,
    /// Scan resume point when the response is partial.
    pub next_cursor: Option<Item>,
}

/// Fuzzy name search over a warehouse's in-stock catalog.
///
/// Partial coverage (the scan stopped at its caps) is flagged via the
/// `X-Partial-Results` response header.
#[instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Response> {
    let term = query
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'query' parameter".to_owned()))?;
    let warehouse = query
        .warehouse_id
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'warehouse_id' parameter".to_owned()))?;

    let results = state
        .search()
        .search(&SearchQuery {
            query: term.to_owned(),
            cutoff: query.cutoff.unwrap_or(state.config().search_cutoff),
            limit: query.limit.unwrap_or(state.config().search_limit),
            warehouse: WarehouseId::new(warehouse),
        })
        .await?;

    let partial = if results.partial { "true" } else { "false" };
    Ok((
        AppendHeaders([("X-Partial-Results", partial)]),
        Json(CatalogResponse {
            results: results.results,
            next_cursor: results.next_cursor,
        }),
    )
        .into_response())
}
