//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` that captures server faults to Sentry
//! before responding. All route handlers return `Result<T, AppError>`;
//! module errors convert in via `From`, keeping the taxonomy in one place:
//! validation failures are 400 and never retried, business conflicts are
//! 409 and carry the conflicting value, transient upstream faults are 502
//! and retryable, unexpected faults are a generic 500.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use cartage_core::WarehouseId;

use crate::cart::CartError;
use crate::search::SearchError;
use crate::store::StoreError;
use crate::users::ProvisionError;
use crate::users::identity::IdentityError;
use crate::warehouse::LocatorError;

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input; detected before any store mutation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Business rejection: no stock at the requested warehouse.
    #[error("Out of stock in this warehouse")]
    OutOfStock,

    /// The cart is bound to a different warehouse. The response body
    /// carries the bound warehouse so the caller can react.
    #[error("Cart is bound to a different warehouse")]
    CartWarehouseConflict {
        /// The warehouse the cart is actually bound to.
        bound: Option<WarehouseId>,
    },

    /// A uniqueness or state conflict (e.g., duplicate account email).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No active warehouse exists; the lookup cannot be served.
    #[error("No active warehouses")]
    NoActiveWarehouses,

    /// A dependency throttled or timed out; the caller may retry with
    /// backoff.
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Unexpected fault; detail is logged, not returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server faults to Sentry before responding.
        if matches!(self, Self::Internal(_) | Self::Upstream(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::BadRequest(_) | Self::OutOfStock => StatusCode::BAD_REQUEST,
            Self::CartWarehouseConflict { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NoActiveWarehouses => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            Self::CartWarehouseConflict { bound } => json!({
                "error": "Cart is bound to a different warehouse",
                "cart_warehouse_id": bound,
            }),
            Self::BadRequest(message) => json!({ "error": message }),
            Self::OutOfStock => json!({ "error": "Out of stock in this warehouse" }),
            Self::Conflict(message) => json!({ "error": message }),
            Self::NoActiveWarehouses => json!({ "error": "No active warehouses" }),
            // Don't expose internal detail to clients.
            Self::Upstream(_) => json!({ "error": "Upstream temporarily unavailable" }),
            Self::Internal(_) => json!({ "error": "Internal server error" }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::Upstream(message),
            // A bare conditional failure reaching the handler layer means a
            // repository forgot to translate it; treat as a fault.
            StoreError::ConditionFailed => {
                Self::Internal("untranslated conditional failure".to_owned())
            }
            StoreError::Corrupt(message) | StoreError::Request(message) => Self::Internal(message),
        }
    }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::InvalidQuantity | CartError::InvalidWarehouse => {
                Self::BadRequest(err.to_string())
            }
            CartError::OutOfStock(_) => Self::OutOfStock,
            CartError::WarehouseConflict { bound } => Self::CartWarehouseConflict { bound },
            CartError::Store(store) => store.into(),
        }
    }
}

impl From<LocatorError> for AppError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::InvalidCoordinates => Self::BadRequest(err.to_string()),
            LocatorError::Store(store) => store.into(),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyQuery => Self::BadRequest(err.to_string()),
            SearchError::Store(store) => store.into(),
        }
    }
}

impl From<ProvisionError> for AppError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidEmail(_)
            | ProvisionError::MissingField(_)
            | ProvisionError::RejectedPassword(_)
            | ProvisionError::UnknownUser
            | ProvisionError::NothingToUpdate => Self::BadRequest(err.to_string()),
            ProvisionError::EmailTaken => Self::Conflict(err.to_string()),
            ProvisionError::Identity(identity) => identity.into(),
            ProvisionError::Store(store) => store.into(),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AlreadyExists => Self::Conflict(err.to_string()),
            IdentityError::RejectedPassword(_) | IdentityError::InvalidParameter(_) => {
                Self::BadRequest(err.to_string())
            }
            IdentityError::Unavailable(message) => Self::Upstream(message),
            IdentityError::Service(message) => Self::Internal(message),
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
