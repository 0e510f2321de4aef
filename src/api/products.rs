//! Product API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, PriceHistoryEntry, PriceStats, Product, ProductFilter,
    UpdateProductRequest,
};
use crate::scraper::validate_url;
use crate::AppState;

/// GET /api/products - List products.
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> ApiResult<Vec<Product>> {
    success(state.repo.list_products(&filter).await?)
}

/// GET /api/products/{id} - Get a single product.
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Product> {
    match state.repo.get_product(&id).await? {
        Some(product) => success(product),
        None => Err(AppError::NotFound(format!("Product {} not found", id))),
    }
}

/// POST /api/products - Create a product by hand.
pub async fn create_product(
    State(state): State<AppState>,
    Json(mut request): Json<CreateProductRequest>,
) -> ApiResult<Product> {
    // Same key normalization as scraping, so a later scrape finds this row.
    request.url = validate_url(&request.url)?.to_string();

    let product = state.repo.create_product(&request).await?;
    index_product(&state, &product).await;
    success(product)
}

/// PUT /api/products/{id} - Partially update a product.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<Product> {
    let product = state.repo.update_product(&id, &request).await?;
    index_product(&state, &product).await;
    success(product)
}

/// DELETE /api/products/{id} - Delete a product with its history and favorites.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.repo.delete_product(&id).await?;

    if let Err(e) = state.search.remove_product(&id).await {
        tracing::warn!("Failed to remove product from index: {}", e);
    }

    success(())
}

/// GET /api/products/{id}/history - Price history in recorded order.
pub async fn get_price_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<PriceHistoryEntry>> {
    success(state.repo.list_history(&id).await?)
}

/// GET /api/products/{id}/stats - Price statistics.
pub async fn get_price_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PriceStats> {
    success(state.repo.price_stats(&id).await?)
}

/// Index a stored product. The database write already succeeded, so failures only log.
pub(crate) async fn index_product(state: &AppState, product: &Product) {
    if let Err(e) = state.search.index_product(product).await {
        tracing::warn!(id = %product.id, "Failed to index product: {}", e);
    }
}
