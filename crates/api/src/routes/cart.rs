//! Cart route handlers.
//!
//! Anonymous cart identity rides a `cart_id` cookie (or the `x-cart-id`
//! header, which wins when both are present); every response to an
//! anonymous caller refreshes the cookie so the token outlives the
//! request. Authenticated callers are keyed by their subject claim and
//! carry no cookie.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cartage_core::{CartId, ItemId, parse::item_id_from_json};

use crate::cart::{CartContext, CartIdentity, CartLine, CartMeta, MaybeCart, QuantityUpdate, RequireCart};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Attach the anonymous cart cookie to a response.
///
/// A token that is not propagated back makes the cart unreachable, so this
/// runs on every anonymous response from a cart endpoint.
fn with_cart_cookie(response: Response, identity: &CartIdentity, ttl_seconds: i64) -> Response {
    if identity.is_authenticated() {
        return response;
    }
    let cookie = format!(
        "cart_id={}; Path=/; Max-Age={ttl_seconds}; SameSite=Lax",
        identity.cart_id
    );
    let mut response = response;
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Create-or-get response body.
#[derive(Debug, Serialize)]
pub struct CreateOrGetResponse {
    /// The resolved cart identifier.
    pub cart_id: CartId,
    /// Whether the caller is authenticated.
    pub logged: bool,
}

/// Create the cart if needed and return its identity.
#[instrument(skip(state, identity), fields(cart_id = %identity.0.cart_id))]
pub async fn create_or_get(
    State(state): State<AppState>,
    identity: CartContext,
) -> Result<Response> {
    let CartContext(identity) = identity;
    state.carts().create_or_get(&identity).await?;

    let body = Json(CreateOrGetResponse {
        cart_id: identity.cart_id.clone(),
        logged: identity.is_authenticated(),
    });
    Ok(with_cart_cookie(
        body.into_response(),
        &identity,
        state.carts().ttl_seconds(),
    ))
}

/// Read-cart response body.
#[derive(Debug, Serialize)]
pub struct ReadCartResponse {
    /// The cart contents.
    pub cart: CartBody,
}

/// Cart contents: header plus lines.
#[derive(Debug, Serialize)]
pub struct CartBody {
    /// Header row, `null` when the cart does not exist.
    pub meta: Option<CartMeta>,
    /// Line items.
    pub items: Vec<CartLine>,
}

/// Read the full cart; an unknown caller gets an empty cart, not an error.
/// Never refreshes the TTL.
#[instrument(skip(state, identity))]
pub async fn read(
    State(state): State<AppState>,
    identity: MaybeCart,
) -> Result<Json<ReadCartResponse>> {
    let MaybeCart(identity) = identity;
    let cart = match identity {
        Some(identity) => {
            let snapshot = state.carts().read(&identity.cart_id).await?;
            CartBody {
                meta: snapshot.meta,
                items: snapshot.lines,
            }
        }
        None => CartBody {
            meta: None,
            items: Vec::new(),
        },
    };
    Ok(Json(ReadCartResponse { cart }))
}

/// Add-item request body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    /// Warehouse to bind the cart to (and check stock against).
    #[serde(default)]
    pub warehouse_id: Option<String>,
    /// Item identifier; a JSON number or numeric string.
    #[serde(default)]
    pub item_id: Option<serde_json::Value>,
    /// Quantity to add; defaults to 1.
    #[serde(default)]
    pub qty: Option<i64>,
}

/// Add-item response body.
#[derive(Debug, Serialize)]
pub struct AddItemResponse {
    /// Always true on success.
    pub ok: bool,
    /// The cart the item landed in.
    pub cart_id: CartId,
}

/// Bind the cart to a warehouse (first writer wins) and add an item.
#[instrument(skip(state, identity, body), fields(cart_id = %identity.0.cart_id))]
pub async fn add_item(
    State(state): State<AppState>,
    identity: CartContext,
    Json(body): Json<AddItemRequest>,
) -> Result<Response> {
    let CartContext(identity) = identity;

    let warehouse = body
        .warehouse_id
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("warehouse_id, item_id and qty>0 required".to_owned())
        })?;
    let item = body
        .item_id
        .as_ref()
        .ok_or_else(|| {
            AppError::BadRequest("warehouse_id, item_id and qty>0 required".to_owned())
        })
        .and_then(|raw| {
            item_id_from_json(raw).ok_or_else(|| {
                AppError::BadRequest("item_id must be integer-compatible".to_owned())
            })
        })?;
    let qty = body.qty.unwrap_or(1);

    state
        .carts()
        .add_item(&identity, &warehouse.into(), item, qty)
        .await?;

    let body = Json(AddItemResponse {
        ok: true,
        cart_id: identity.cart_id.clone(),
    });
    Ok(with_cart_cookie(
        body.into_response(),
        &identity,
        state.carts().ttl_seconds(),
    ))
}

/// Set-quantity request body.
#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    /// New quantity; zero removes the line.
    #[serde(default)]
    pub qty: Option<i64>,
}

/// Overwrite a line's quantity; zero deletes the line.
#[instrument(skip(state, identity, body), fields(cart_id = %identity.0.cart_id))]
pub async fn set_quantity(
    State(state): State<AppState>,
    identity: RequireCart,
    Path(item_id): Path<String>,
    Json(body): Json<SetQuantityRequest>,
) -> Result<Json<serde_json::Value>> {
    let RequireCart(identity) = identity;

    let item = item_id
        .trim()
        .parse::<i64>()
        .map(ItemId::new)
        .map_err(|_| AppError::BadRequest("item_id must be integer-compatible".to_owned()))?;
    let qty = body
        .qty
        .ok_or_else(|| AppError::BadRequest("qty required and must be >= 0".to_owned()))?;

    let outcome = state
        .carts()
        .set_quantity(&identity.cart_id, item, qty)
        .await?;

    let body = match outcome {
        QuantityUpdate::Updated { qty } => serde_json::json!({
            "ok": true,
            "item_id": item,
            "qty": qty,
        }),
        QuantityUpdate::Removed => serde_json::json!({
            "ok": true,
            "removed": item,
        }),
    };
    Ok(Json(body))
}

/// Clear-cart response body.
#[derive(Debug, Serialize)]
pub struct ClearCartResponse {
    /// Always true on success.
    pub ok: bool,
    /// Number of rows deleted (META included).
    pub deleted: usize,
}

/// Delete the cart and all of its lines. Idempotent.
#[instrument(skip(state, identity), fields(cart_id = %identity.0.cart_id))]
pub async fn clear(
    State(state): State<AppState>,
    identity: RequireCart,
) -> Result<Json<ClearCartResponse>> {
    let RequireCart(identity) = identity;
    let deleted = state.carts().clear(&identity.cart_id).await?;
    Ok(Json(ClearCartResponse { ok: true, deleted }))
}
