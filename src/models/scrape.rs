//! Scrape request/response models and the record produced by extraction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Availability, PriceStats, Product};

/// Structured product record produced by the extractor for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedProduct {
    /// Normalized page URL, used as the upsert key.
    pub url: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub retailer: Option<String>,
    pub category: Option<String>,
    pub availability: Availability,
}

/// What persisting an observation did to the stored product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// New product and first history entry.
    Created,
    /// Price differed; one history entry appended.
    PriceChanged,
    /// Same price; only timestamps and metadata refreshed.
    Unchanged,
}

impl ObservationOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            ObservationOutcome::Created => "Product scraped and added successfully",
            ObservationOutcome::PriceChanged => "Product updated with a new price",
            ObservationOutcome::Unchanged => "Product checked, price unchanged",
        }
    }
}

/// Request body for `POST /api/scraper/scrape`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

/// Response for scrape calls, used for both success and failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ObservationOutcome>,
    /// Error code when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Query parameters for `GET /api/product/analyze`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeQuery {
    pub url: String,
    /// Overrides the extracted product name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Product analysis: the stored product plus its price statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAnalysis {
    pub product: Product,
    pub outcome: ObservationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PriceStats>,
}
