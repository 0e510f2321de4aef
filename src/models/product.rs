//! Product model matching the frontend Product interface.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stock status reported by the retailer page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Preorder,
    #[default]
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Preorder => "preorder",
            Availability::Unknown => "unknown",
        }
    }

    /// Parse the stored column value; anything unrecognized is `Unknown`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "in_stock" => Availability::InStock,
            "out_of_stock" => Availability::OutOfStock,
            "preorder" => Availability::Preorder,
            _ => Availability::Unknown,
        }
    }
}

/// A tracked product. `current_price` always mirrors the latest history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub url: String,
    pub name: String,
    pub current_price: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retailer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub availability: Availability,
    pub created_at: String,
    pub updated_at: String,
    pub last_checked_at: String,
}

/// Request body for creating a product by hand.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    pub url: String,
    #[serde(alias = "current_price")]
    pub current_price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, alias = "image_url")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub retailer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub availability: Availability,
}

pub fn default_currency() -> String {
    "USD".to_string()
}

/// Request body for a partial product update. The URL is immutable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "current_price")]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "image_url")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub retailer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub availability: Option<Availability>,
}

/// Query parameters for listing products.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    /// Substring match on name or description.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}
