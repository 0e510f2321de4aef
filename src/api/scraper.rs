//! Scrape endpoints: fetch a page, extract the product and record the observation.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use super::products::index_product;
use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    AnalyzeQuery, ObservationOutcome, Product, ProductAnalysis, ScrapeRequest, ScrapeResponse,
};
use crate::AppState;

/// POST /api/scraper/scrape - Scrape a URL and upsert the product.
///
/// Failures keep the scrape response shape, with the error code and a status
/// that tells the caller which stage failed.
pub async fn scrape_product(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> (StatusCode, Json<ScrapeResponse>) {
    match scrape_and_record(&state, &request.url, None).await {
        Ok((product, outcome)) => (
            StatusCode::OK,
            Json(ScrapeResponse {
                success: true,
                product: Some(product),
                message: outcome.message().to_string(),
                outcome: Some(outcome),
                code: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(url = %request.url, code = e.error_code(), "Scrape failed: {}", e.message());
            (
                e.status_code(),
                Json(ScrapeResponse {
                    success: false,
                    product: None,
                    message: e.message().to_string(),
                    outcome: None,
                    code: Some(e.error_code().to_string()),
                }),
            )
        }
    }
}

/// GET /api/product/analyze - Scrape, record, and return the product with its price stats.
pub async fn analyze_product(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
) -> ApiResult<ProductAnalysis> {
    let (product, outcome) = scrape_and_record(&state, &query.url, query.name.as_deref()).await?;

    let stats = match state.repo.price_stats(&product.id).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(id = %product.id, "Failed to compute price stats: {}", e);
            None
        }
    };

    success(ProductAnalysis {
        product,
        outcome,
        stats,
    })
}

async fn scrape_and_record(
    state: &AppState,
    url: &str,
    name_override: Option<&str>,
) -> Result<(Product, ObservationOutcome), AppError> {
    let mut extracted = state.scraper.scrape(url).await?;
    if let Some(name) = name_override.map(str::trim).filter(|n| !n.is_empty()) {
        extracted.name = name.to_string();
    }

    let (product, outcome) = state.repo.record_observation(&extracted).await?;
    index_product(state, &product).await;
    Ok((product, outcome))
}
