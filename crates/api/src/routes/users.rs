//! Account route handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use cartage_core::UserId;

use crate::error::Result;
use crate::state::AppState;
use crate::users::{NewAccount, ProfileChanges};

/// Account creation response body.
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    /// Human-readable confirmation.
    pub message: &'static str,
    /// The generated user id.
    pub user_id: UserId,
}

/// Provision a new account.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<NewAccount>,
) -> Result<Json<CreateUserResponse>> {
    let user_id = state.accounts().create(body).await?;
    Ok(Json(CreateUserResponse {
        message: "User created successfully",
        user_id,
    }))
}

/// Apply a partial profile update.
#[instrument(skip(state, body))]
pub async fn update(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<ProfileChanges>,
) -> Result<Json<Value>> {
    state
        .accounts()
        .update(&UserId::new(user_id), body)
        .await?;
    Ok(Json(json!({ "ok": true })))
}
