//! Search API endpoints.

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::models::Product;
use crate::search::MAX_PAGE_SIZE;
use crate::AppState;

const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    /// Matches across all pages, not just this one.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub product: Product,
    pub score: f32,
}

/// GET /api/search - Full-text product search.
pub async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    run_search(&state, &params.q, params.limit, params.offset).await
}

/// GET /api/search/{query} - Path form of the search endpoint.
pub async fn search_products_by_path(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> ApiResult<SearchResponse> {
    run_search(&state, &query, DEFAULT_SEARCH_LIMIT, 0).await
}

async fn run_search(
    state: &AppState,
    query: &str,
    limit: usize,
    offset: usize,
) -> ApiResult<SearchResponse> {
    let limit = limit.min(MAX_PAGE_SIZE);
    let found = state.search.search(query, limit, offset)?;

    // The index may briefly lag a delete; skip ids no longer in the database.
    let mut results = Vec::with_capacity(found.hits.len());
    for hit in found.hits {
        if let Some(product) = state.repo.get_product(&hit.product_id).await? {
            results.push(SearchResultItem {
                product,
                score: hit.score,
            });
        }
    }

    success(SearchResponse {
        total: found.total,
        results,
        limit,
        offset,
    })
}
