// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saved garment images.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::ValidJson;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::WardrobeItem;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/wardrobe", get(list_items).post(add_item))
        .route("/wardrobe/{id}", delete(remove_item))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Image is required"))]
    image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WardrobeItemResponse {
    pub id: String,
    pub image: String,
    pub created_at: String,
}

impl From<WardrobeItem> for WardrobeItemResponse {
    fn from(item: WardrobeItem) -> Self {
        Self {
            id: item.id,
            image: item.image_data,
            created_at: item.created_at,
        }
    }
}

/// Newest first.
async fn list_items(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<WardrobeItemResponse>>> {
    let items = state.store.list_wardrobe(&auth.user_id).await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}

async fn add_item(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidJson(req): ValidJson<AddItemRequest>,
) -> Result<(StatusCode, Json<WardrobeItemResponse>)> {
    let item = state.store.add_wardrobe_item(&auth.user_id, req.image).await?;
    tracing::debug!(user_id = %auth.user_id, item_id = %item.id, "Wardrobe item saved");
    Ok((StatusCode::CREATED, Json(item.into())))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(item_id): Path<String>,
) -> Result<StatusCode> {
    if state.store.remove_wardrobe_item(&auth.user_id, &item_id).await? {
        tracing::debug!(user_id = %auth.user_id, item_id = %item_id, "Wardrobe item removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Wardrobe item {} not found", item_id)))
    }
}
