//! Favorite model: a user-to-product bookmark.

use serde::{Deserialize, Serialize};

use super::Product;

/// A favorite with the referenced product embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub created_at: String,
    pub product: Product,
}

/// Request body for adding, removing or toggling a favorite.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    /// Falls back to the request's user context when omitted.
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(alias = "product_id")]
    pub product_id: String,
}

/// Result of a toggle: whether the pair is a favorite afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFavoriteResponse {
    pub user_id: String,
    pub product_id: String,
    pub favorited: bool,
}
