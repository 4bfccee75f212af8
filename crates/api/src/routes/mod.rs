//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! # Cart
//! POST   /cart                    - Create-or-get the caller's cart
//! GET    /cart                    - Read the cart (empty if absent)
//! DELETE /cart                    - Clear the cart
//! POST   /cart/items              - Bind-and-add an item
//! PUT    /cart/items/{item_id}    - Overwrite a line's quantity (0 removes)
//!
//! # Warehouses
//! GET /warehouses/nearest         - Ranked nearest warehouses
//! GET /warehouses/closest         - Closest warehouse plus its stocked items
//!
//! # Catalog
//! GET /catalog/items              - Fuzzy name search scoped to a warehouse
//!
//! # Accounts
//! POST /users                     - Provision an account
//! PUT  /users/{user_id}           - Partial profile update
//! ```

pub mod cart;
pub mod catalog;
pub mod users;
pub mod warehouses;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

/// Assemble all application routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cart",
            post(cart::create_or_get).get(cart::read).delete(cart::clear),
        )
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/{item_id}", put(cart::set_quantity))
        .route("/warehouses/nearest", get(warehouses::nearest))
        .route("/warehouses/closest", get(warehouses::closest))
        .route("/catalog/items", get(catalog::search))
        .route("/users", post(users::create))
        .route("/users/{user_id}", put(users::update))
}
