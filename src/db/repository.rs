//! Database repository for products, price history and favorites.
//!
//! Writes that touch more than one table run in a transaction.

use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::errors::AppError;
use crate::models::{
    Availability, CreateProductRequest, ExtractedProduct, Favorite, ObservationOutcome,
    PriceHistoryEntry, PriceStats, Product, ProductFilter, UpdateProductRequest,
};

const PRODUCT_COLUMNS: &str = "id, url, name, current_price, currency, image_url, retailer, \
     category, description, availability, created_at, updated_at, last_checked_at";

/// Product columns qualified for joins against `products p`.
const JOINED_PRODUCT_COLUMNS: &str = "p.id, p.url, p.name, p.current_price, p.currency, \
     p.image_url, p.retailer, p.category, p.description, p.availability, p.created_at, \
     p.updated_at, p.last_checked_at";

const HISTORY_COLUMNS: &str =
    "id, product_id, price, currency, availability, retailer, recorded_at";

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== PRODUCT OPERATIONS ====================

    /// List products, most recently updated first.
    pub async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, AppError> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let skip = filter.skip.unwrap_or(0).max(0);
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));
        let category = filter
            .category
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut sql = format!("SELECT {} FROM products WHERE 1 = 1", PRODUCT_COLUMNS);
        if search.is_some() {
            sql.push_str(
                " AND (name LIKE ? ESCAPE '\\' OR IFNULL(description, '') LIKE ? ESCAPE '\\')",
            );
        }
        if category.is_some() {
            sql.push_str(" AND category = ? COLLATE NOCASE");
        }
        sql.push_str(" ORDER BY updated_at DESC, id LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(pattern) = &search {
            query = query.bind(pattern.clone()).bind(pattern.clone());
        }
        if let Some(category) = category {
            query = query.bind(category.to_string());
        }
        let rows = query.bind(limit).bind(skip).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Every stored product, for rebuilding the search index.
    pub async fn all_products(&self) -> Result<Vec<Product>, AppError> {
        let sql = format!("SELECT {} FROM products ORDER BY created_at", PRODUCT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Get a product by ID.
    pub async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(product_from_row).transpose()?)
    }

    /// Create a product by hand, writing its first history entry.
    pub async fn create_product(&self, request: &CreateProductRequest) -> Result<Product, AppError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Product name is required".to_string()));
        }
        check_price(request.current_price)?;
        let currency = normalize_currency_code(&request.currency)?;

        let now = timestamp();
        let product = Product {
            id: uuid::Uuid::new_v4().to_string(),
            url: request.url.clone(),
            name: name.to_string(),
            current_price: request.current_price,
            currency,
            image_url: request.image_url.clone(),
            retailer: request.retailer.clone(),
            category: request.category.clone(),
            description: request.description.clone(),
            availability: request.availability,
            created_at: now.clone(),
            updated_at: now.clone(),
            last_checked_at: now,
        };

        let mut tx = self.pool.begin().await?;
        match insert_product(&mut tx, &product).await {
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict(format!(
                    "A product with URL {} already exists",
                    product.url
                )));
            }
            other => other?,
        }
        insert_history(&mut tx, &product).await?;
        tx.commit().await?;

        tracing::info!(id = %product.id, url = %product.url, "Created product");
        Ok(product)
    }

    /// Apply a partial update. A price or currency change appends history.
    pub async fn update_product(
        &self,
        id: &str,
        request: &UpdateProductRequest,
    ) -> Result<Product, AppError> {
        if let Some(price) = request.current_price {
            check_price(price)?;
        }
        let currency = request
            .currency
            .as_deref()
            .map(normalize_currency_code)
            .transpose()?;
        if request.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::Validation("Product name cannot be empty".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let existing = fetch_product(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))?;

        let updated = Product {
            name: request
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| existing.name.clone()),
            current_price: request.current_price.unwrap_or(existing.current_price),
            currency: currency.unwrap_or_else(|| existing.currency.clone()),
            image_url: request.image_url.clone().or(existing.image_url.clone()),
            retailer: request.retailer.clone().or(existing.retailer.clone()),
            category: request.category.clone().or(existing.category.clone()),
            description: request.description.clone().or(existing.description.clone()),
            availability: request.availability.unwrap_or(existing.availability),
            updated_at: timestamp(),
            ..existing.clone()
        };

        update_product_row(&mut tx, &updated).await?;
        if price_differs(&existing, updated.current_price, &updated.currency) {
            insert_history(&mut tx, &updated).await?;
        }
        tx.commit().await?;

        Ok(updated)
    }

    /// Delete a product. History and favorites cascade.
    pub async fn delete_product(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Product {} not found", id)));
        }

        tracing::info!(%id, "Deleted product");
        Ok(())
    }

    // ==================== HISTORY OPERATIONS ====================

    /// Price history for a product in recorded order.
    pub async fn list_history(&self, product_id: &str) -> Result<Vec<PriceHistoryEntry>, AppError> {
        if self.get_product(product_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        let sql = format!(
            "SELECT {} FROM price_history WHERE product_id = ? ORDER BY recorded_at, id",
            HISTORY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(history_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Statistics over a product's price history.
    pub async fn price_stats(&self, product_id: &str) -> Result<PriceStats, AppError> {
        let history = self.list_history(product_id).await?;
        PriceStats::from_history(&history).ok_or_else(|| {
            AppError::NotFound(format!("No price history for product {}", product_id))
        })
    }

    /// Persist one scrape observation, keyed by URL.
    ///
    /// A concurrent first insert of the same URL loses the unique constraint
    /// (or a stale read snapshot) and is retried once, which then takes the
    /// update path.
    pub async fn record_observation(
        &self,
        observed: &ExtractedProduct,
    ) -> Result<(Product, ObservationOutcome), AppError> {
        check_price(observed.price)?;

        match self.observe_once(observed).await {
            Err(e) if is_unique_violation(&e) || is_busy(&e) => {
                tracing::debug!(url = %observed.url, "Concurrent write detected, retrying observation");
                Ok(self.observe_once(observed).await?)
            }
            other => Ok(other?),
        }
    }

    async fn observe_once(
        &self,
        observed: &ExtractedProduct,
    ) -> Result<(Product, ObservationOutcome), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = timestamp();

        let sql = format!("SELECT {} FROM products WHERE url = ?", PRODUCT_COLUMNS);
        let existing = sqlx::query(&sql)
            .bind(&observed.url)
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(product_from_row)
            .transpose()?;

        let (product, outcome) = match existing {
            None => {
                let product = Product {
                    id: uuid::Uuid::new_v4().to_string(),
                    url: observed.url.clone(),
                    name: observed.name.clone(),
                    current_price: observed.price,
                    currency: observed.currency.clone(),
                    image_url: observed.image_url.clone(),
                    retailer: observed.retailer.clone(),
                    category: observed.category.clone(),
                    description: observed.description.clone(),
                    availability: observed.availability,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                    last_checked_at: now,
                };
                insert_product(&mut tx, &product).await?;
                insert_history(&mut tx, &product).await?;
                (product, ObservationOutcome::Created)
            }
            Some(existing) => {
                let changed = price_differs(&existing, observed.price, &observed.currency);
                let product = Product {
                    name: observed.name.clone(),
                    current_price: observed.price,
                    currency: observed.currency.clone(),
                    image_url: observed.image_url.clone().or(existing.image_url.clone()),
                    retailer: observed.retailer.clone().or(existing.retailer.clone()),
                    category: observed.category.clone().or(existing.category.clone()),
                    description: observed
                        .description
                        .clone()
                        .or(existing.description.clone()),
                    availability: observed.availability,
                    updated_at: now.clone(),
                    last_checked_at: now,
                    ..existing
                };
                update_product_row(&mut tx, &product).await?;
                if changed {
                    insert_history(&mut tx, &product).await?;
                    (product, ObservationOutcome::PriceChanged)
                } else {
                    (product, ObservationOutcome::Unchanged)
                }
            }
        };

        tx.commit().await?;

        tracing::info!(
            id = %product.id,
            url = %product.url,
            outcome = ?outcome,
            "Recorded observation"
        );
        Ok((product, outcome))
    }

    // ==================== FAVORITE OPERATIONS ====================

    /// Favorites of a user, newest first.
    pub async fn list_favorites(&self, user_id: &str) -> Result<Vec<Favorite>, AppError> {
        let sql = format!(
            r#"SELECT f.id AS favorite_id, f.user_id AS favorite_user_id,
                      f.created_at AS favorited_at, {}
               FROM favorites f JOIN products p ON p.id = f.product_id
               WHERE f.user_id = ?
               ORDER BY f.created_at DESC, f.rowid DESC"#,
            JOINED_PRODUCT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(favorite_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark a product as a user's favorite.
    pub async fn add_favorite(&self, user_id: &str, product_id: &str) -> Result<Favorite, AppError> {
        let product = self
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", product_id)))?;

        let favorite = Favorite {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            created_at: timestamp(),
            product,
        };

        let result = sqlx::query(
            "INSERT INTO favorites (id, user_id, product_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&favorite.id)
        .bind(&favorite.user_id)
        .bind(&favorite.product_id)
        .bind(&favorite.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(favorite),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
                "Product {} is already a favorite",
                product_id
            ))),
            // Product deleted between the lookup and the insert.
            Err(e) if is_foreign_key_violation(&e) => Err(AppError::NotFound(format!(
                "Product {} not found",
                product_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a favorite.
    pub async fn remove_favorite(&self, user_id: &str, product_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND product_id = ?")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Favorite for product {} not found",
                product_id
            )));
        }
        Ok(())
    }

    /// Add the favorite if absent, else remove it. Returns whether it is now a favorite.
    pub async fn toggle_favorite(&self, user_id: &str, product_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND product_id = ?")
            .bind(user_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if !removed {
            if fetch_product(&mut tx, product_id).await?.is_none() {
                return Err(AppError::NotFound(format!(
                    "Product {} not found",
                    product_id
                )));
            }
            sqlx::query(
                "INSERT INTO favorites (id, user_id, product_id, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(product_id)
            .bind(timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(!removed)
    }
}

// Statement helpers shared by the transactional paths

async fn fetch_product(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<Product>, sqlx::Error> {
    let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .as_ref()
        .map(product_from_row)
        .transpose()
}

async fn insert_product(
    tx: &mut Transaction<'_, Sqlite>,
    product: &Product,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO products
               (id, url, name, current_price, currency, image_url, retailer, category,
                description, availability, created_at, updated_at, last_checked_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&product.id)
    .bind(&product.url)
    .bind(&product.name)
    .bind(product.current_price.to_string())
    .bind(&product.currency)
    .bind(&product.image_url)
    .bind(&product.retailer)
    .bind(&product.category)
    .bind(&product.description)
    .bind(product.availability.as_str())
    .bind(&product.created_at)
    .bind(&product.updated_at)
    .bind(&product.last_checked_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_product_row(
    tx: &mut Transaction<'_, Sqlite>,
    product: &Product,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE products SET
               name = ?, current_price = ?, currency = ?, image_url = ?, retailer = ?,
               category = ?, description = ?, availability = ?, updated_at = ?,
               last_checked_at = ?
           WHERE id = ?"#,
    )
    .bind(&product.name)
    .bind(product.current_price.to_string())
    .bind(&product.currency)
    .bind(&product.image_url)
    .bind(&product.retailer)
    .bind(&product.category)
    .bind(&product.description)
    .bind(product.availability.as_str())
    .bind(&product.updated_at)
    .bind(&product.last_checked_at)
    .bind(&product.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append a history entry mirroring the product's current price.
async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    product: &Product,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO price_history
               (product_id, price, currency, availability, retailer, recorded_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&product.id)
    .bind(product.current_price.to_string())
    .bind(&product.currency)
    .bind(product.availability.as_str())
    .bind(&product.retailer)
    .bind(&product.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// Helper functions for row conversion

fn product_from_row(row: &SqliteRow) -> Result<Product, sqlx::Error> {
    let availability: String = row.get("availability");
    Ok(Product {
        id: row.get("id"),
        url: row.get("url"),
        name: row.get("name"),
        current_price: decimal_column(row, "current_price")?,
        currency: row.get("currency"),
        image_url: row.get("image_url"),
        retailer: row.get("retailer"),
        category: row.get("category"),
        description: row.get("description"),
        availability: Availability::from_db(&availability),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_checked_at: row.get("last_checked_at"),
    })
}

fn history_from_row(row: &SqliteRow) -> Result<PriceHistoryEntry, sqlx::Error> {
    let availability: Option<String> = row.get("availability");
    Ok(PriceHistoryEntry {
        id: row.get("id"),
        product_id: row.get("product_id"),
        price: decimal_column(row, "price")?,
        currency: row.get("currency"),
        recorded_at: row.get("recorded_at"),
        availability: availability.as_deref().map(Availability::from_db),
        retailer: row.get("retailer"),
    })
}

fn favorite_from_row(row: &SqliteRow) -> Result<Favorite, sqlx::Error> {
    let product = product_from_row(row)?;
    Ok(Favorite {
        id: row.get("favorite_id"),
        user_id: row.get("favorite_user_id"),
        product_id: product.id.clone(),
        created_at: row.get("favorited_at"),
        product,
    })
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLITE_BUSY or SQLITE_BUSY_SNAPSHOT.
fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("5") | Some("517")))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn price_differs(existing: &Product, price: Decimal, currency: &str) -> bool {
    existing.current_price != price || existing.currency != currency
}

fn check_price(price: Decimal) -> Result<(), AppError> {
    if price.is_sign_negative() {
        return Err(AppError::Validation("Price cannot be negative".to_string()));
    }
    Ok(())
}

fn normalize_currency_code(raw: &str) -> Result<String, AppError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(format!(
            "Currency must be a 3-letter ISO code, got '{}'",
            raw
        )));
    }
    Ok(code)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// RFC 3339 UTC timestamp with microseconds; sorts lexicographically.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        (Repository::new(pool), dir)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn observation(url: &str, price: &str) -> ExtractedProduct {
        ExtractedProduct {
            url: url.to_string(),
            name: "Desk Lamp".to_string(),
            price: dec(price),
            currency: "USD".to_string(),
            image_url: None,
            description: None,
            retailer: Some("example.com".to_string()),
            category: Some("Home & Garden".to_string()),
            availability: Availability::InStock,
        }
    }

    fn create_request(url: &str, price: &str) -> CreateProductRequest {
        CreateProductRequest {
            name: "Desk Lamp".to_string(),
            url: url.to_string(),
            current_price: dec(price),
            currency: "usd".to_string(),
            image_url: None,
            retailer: None,
            category: Some("Home & Garden".to_string()),
            description: Some("Adjustable LED lamp".to_string()),
            availability: Availability::Unknown,
        }
    }

    #[tokio::test]
    async fn test_observation_history_only_grows_on_price_change() {
        let (repo, _dir) = repo().await;
        let url = "https://example.com/lamp";

        let (first, outcome) = repo.record_observation(&observation(url, "19.99")).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::Created);

        let (same, outcome) = repo.record_observation(&observation(url, "19.99")).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::Unchanged);
        assert_eq!(same.id, first.id);
        assert!(same.last_checked_at > first.last_checked_at);
        assert_eq!(repo.list_history(&first.id).await.unwrap().len(), 1);

        let (changed, outcome) = repo.record_observation(&observation(url, "17.50")).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::PriceChanged);
        assert_eq!(changed.current_price, dec("17.50"));

        let history = repo.list_history(&first.id).await.unwrap();
        let prices: Vec<_> = history.iter().map(|h| h.price).collect();
        assert_eq!(prices, vec![dec("19.99"), dec("17.50")]);
        assert_eq!(history.last().unwrap().price, changed.current_price);
    }

    #[tokio::test]
    async fn test_trailing_zero_is_not_a_price_change() {
        let (repo, _dir) = repo().await;
        let url = "https://example.com/lamp";

        repo.record_observation(&observation(url, "20.0")).await.unwrap();
        let (_, outcome) = repo.record_observation(&observation(url, "20.00")).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_create_product_rejects_duplicate_url() {
        let (repo, _dir) = repo().await;
        let product = repo
            .create_product(&create_request("https://example.com/lamp", "10"))
            .await
            .unwrap();
        assert_eq!(product.currency, "USD");
        assert_eq!(repo.list_history(&product.id).await.unwrap().len(), 1);

        let err = repo
            .create_product(&create_request("https://example.com/lamp", "12"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_product_validation() {
        let (repo, _dir) = repo().await;

        let mut request = create_request("https://example.com/a", "-1");
        assert!(matches!(
            repo.create_product(&request).await,
            Err(AppError::Validation(_))
        ));

        request.current_price = dec("5");
        request.currency = "dollars".to_string();
        assert!(matches!(
            repo.create_product(&request).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_product_appends_history_on_price_change() {
        let (repo, _dir) = repo().await;
        let product = repo
            .create_product(&create_request("https://example.com/lamp", "10"))
            .await
            .unwrap();

        let renamed = repo
            .update_product(
                &product.id,
                &UpdateProductRequest {
                    name: Some("Floor Lamp".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Floor Lamp");
        assert_eq!(renamed.url, product.url);
        assert_eq!(repo.list_history(&product.id).await.unwrap().len(), 1);

        let repriced = repo
            .update_product(
                &product.id,
                &UpdateProductRequest {
                    current_price: Some(dec("8.50")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(repriced.current_price, dec("8.50"));
        assert_eq!(repriced.name, "Floor Lamp");
        assert_eq!(repo.list_history(&product.id).await.unwrap().len(), 2);

        let missing = repo
            .update_product("nope", &UpdateProductRequest::default())
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_history_and_favorites() {
        let (repo, _dir) = repo().await;
        let (product, _) = repo
            .record_observation(&observation("https://example.com/lamp", "19.99"))
            .await
            .unwrap();
        repo.add_favorite("alice", &product.id).await.unwrap();

        repo.delete_product(&product.id).await.unwrap();

        assert!(repo.get_product(&product.id).await.unwrap().is_none());
        assert!(matches!(
            repo.list_history(&product.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(repo.list_favorites("alice").await.unwrap().is_empty());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        assert!(matches!(
            repo.delete_product(&product.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_products_filters() {
        let (repo, _dir) = repo().await;
        repo.create_product(&create_request("https://example.com/lamp", "10"))
            .await
            .unwrap();
        let mut other = create_request("https://example.com/beans", "4");
        other.name = "Coffee Beans 100% Arabica".to_string();
        other.category = Some("Food & Beverage".to_string());
        other.description = None;
        repo.create_product(&other).await.unwrap();

        let all = repo.list_products(&ProductFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let by_search = repo
            .list_products(&ProductFilter {
                search: Some("led".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].name, "Desk Lamp");

        let percent = repo
            .list_products(&ProductFilter {
                search: Some("100%".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(percent.len(), 1);

        let by_category = repo
            .list_products(&ProductFilter {
                category: Some("food & beverage".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_category.len(), 1);

        let paged = repo
            .list_products(&ProductFilter {
                skip: Some(1),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn test_favorites() {
        let (repo, _dir) = repo().await;
        let (lamp, _) = repo
            .record_observation(&observation("https://example.com/lamp", "19.99"))
            .await
            .unwrap();
        let (desk, _) = repo
            .record_observation(&observation("https://example.com/desk", "199"))
            .await
            .unwrap();

        repo.add_favorite("alice", &lamp.id).await.unwrap();
        repo.add_favorite("alice", &desk.id).await.unwrap();
        assert!(matches!(
            repo.add_favorite("alice", &lamp.id).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            repo.add_favorite("alice", "missing").await,
            Err(AppError::NotFound(_))
        ));

        let favorites = repo.list_favorites("alice").await.unwrap();
        let ids: Vec<_> = favorites.iter().map(|f| f.product_id.as_str()).collect();
        assert_eq!(ids, vec![desk.id.as_str(), lamp.id.as_str()]);
        assert_eq!(favorites[0].product.url, "https://example.com/desk");
        assert!(repo.list_favorites("bob").await.unwrap().is_empty());

        repo.remove_favorite("alice", &desk.id).await.unwrap();
        assert!(matches!(
            repo.remove_favorite("alice", &desk.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_favorite_round_trip() {
        let (repo, _dir) = repo().await;
        let (lamp, _) = repo
            .record_observation(&observation("https://example.com/lamp", "19.99"))
            .await
            .unwrap();

        assert!(repo.toggle_favorite("alice", &lamp.id).await.unwrap());
        assert_eq!(repo.list_favorites("alice").await.unwrap().len(), 1);
        assert!(!repo.toggle_favorite("alice", &lamp.id).await.unwrap());
        assert!(repo.list_favorites("alice").await.unwrap().is_empty());

        assert!(matches!(
            repo.toggle_favorite("alice", "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_price_stats() {
        let (repo, _dir) = repo().await;
        let url = "https://example.com/lamp";
        let (product, _) = repo.record_observation(&observation(url, "19.99")).await.unwrap();
        repo.record_observation(&observation(url, "17.50")).await.unwrap();

        let stats = repo.price_stats(&product.id).await.unwrap();
        assert_eq!(stats.lowest_price, dec("17.50"));
        assert_eq!(stats.highest_price, dec("19.99"));
        assert_eq!(stats.change, dec("-2.49"));
        assert_eq!(stats.total_entries, 2);
    }
}
