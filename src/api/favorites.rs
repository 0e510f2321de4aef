//! Favorite API endpoints.
//!
//! The acting user comes from the request (`user_id` query, body or path) and
//! the `x-user-id` header; see [`UserContext::resolve`].

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::auth::UserContext;
use crate::models::{Favorite, FavoriteRequest, ToggleFavoriteResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FavoritesQuery {
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
}

/// GET /api/favorites - List a user's favorites, newest first.
pub async fn list_favorites(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<FavoritesQuery>,
) -> ApiResult<Vec<Favorite>> {
    let user_id = user.resolve(query.user_id.as_deref())?;
    success(state.repo.list_favorites(&user_id).await?)
}

/// POST /api/favorites - Add a favorite.
pub async fn add_favorite(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<FavoriteRequest>,
) -> ApiResult<Favorite> {
    let user_id = user.resolve(request.user_id.as_deref())?;
    let favorite = state
        .repo
        .add_favorite(&user_id, request.product_id.trim())
        .await?;

    tracing::debug!(%user_id, product_id = %favorite.product_id, "Added favorite");
    success(favorite)
}

/// DELETE /api/favorites/user/{user_id}/product/{product_id} - Remove a favorite.
pub async fn remove_favorite(
    State(state): State<AppState>,
    user: UserContext,
    Path((user_id, product_id)): Path<(String, String)>,
) -> ApiResult<()> {
    let user_id = user.resolve(Some(&user_id))?;
    state.repo.remove_favorite(&user_id, &product_id).await?;
    success(())
}

/// POST /api/favorites/toggle - Add the favorite if absent, otherwise remove it.
pub async fn toggle_favorite(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<FavoriteRequest>,
) -> ApiResult<ToggleFavoriteResponse> {
    let user_id = user.resolve(request.user_id.as_deref())?;
    let product_id = request.product_id.trim().to_string();
    let favorited = state.repo.toggle_favorite(&user_id, &product_id).await?;

    success(ToggleFavoriteResponse {
        user_id,
        product_id,
        favorited,
    })
}
