//! Tantivy-based full-text index over products.
//!
//! SQLite stays the source of truth; the index stores only product ids and is
//! rebuilt from the repository at startup.

use std::path::Path;
use std::sync::Arc;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Product;

const BOOST_NAME: f32 = 10.0;
const BOOST_CATEGORY: f32 = 6.0;
const BOOST_RETAILER: f32 = 4.0;
const BOOST_DESCRIPTION: f32 = 3.0;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Largest page the index will collect.
pub const MAX_PAGE_SIZE: usize = 100;

/// Deepest result offset served. The collector allocates `limit + offset` slots.
pub const MAX_OFFSET: usize = 10_000;

/// A matching product id with its relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub product_id: String,
    pub score: f32,
}

/// One page of hits plus the number of documents matching the query.
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub hits: Vec<SearchResult>,
    pub total: usize,
}

struct SearchFields {
    product_id: Field,
    name: Field,
    description: Field,
    category: Field,
    retailer: Field,
}

/// Search index for products.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        // Raw-string indexed so documents can be deleted by id.
        let product_id = schema_builder.add_text_field("product_id", STRING | STORED);
        let name = schema_builder.add_text_field("name", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let category = schema_builder.add_text_field("category", TEXT);
        let retailer = schema_builder.add_text_field("retailer", TEXT);
        let schema = schema_builder.build();

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields: SearchFields {
                product_id,
                name,
                description,
                category,
                retailer,
            },
        })
    }

    /// Replace the whole index with `products`.
    pub async fn rebuild(&self, products: &[Product]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for product in products {
            writer.add_document(self.document(product))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} products", products.len());
        Ok(())
    }

    /// Add or replace one product.
    pub async fn index_product(&self, product: &Product) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.product_id, &product.id));
        writer.add_document(self.document(product))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    pub async fn remove_product(&self, product_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.product_id, product_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// One page of product ids matching `query_str`, best first.
    ///
    /// Query syntax errors are tolerated: the parsable part of the query is used.
    /// `limit` is capped at [`MAX_PAGE_SIZE`]; an `offset` past [`MAX_OFFSET`]
    /// is a validation error.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<SearchHits, AppError> {
        if offset > MAX_OFFSET {
            return Err(AppError::Validation(format!(
                "offset must not exceed {}",
                MAX_OFFSET
            )));
        }
        let limit = limit.min(MAX_PAGE_SIZE);
        if query_str.trim().is_empty() || limit == 0 {
            return Ok(SearchHits::default());
        }

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.name,
                self.fields.category,
                self.fields.retailer,
                self.fields.description,
            ],
        );
        parser.set_field_boost(self.fields.name, BOOST_NAME);
        parser.set_field_boost(self.fields.category, BOOST_CATEGORY);
        parser.set_field_boost(self.fields.retailer, BOOST_RETAILER);
        parser.set_field_boost(self.fields.description, BOOST_DESCRIPTION);

        let (query, errors) = parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            tracing::debug!(query = %query_str, "Ignored {} query syntax errors", errors.len());
        }

        let searcher = self.reader.searcher();
        let (top_docs, total) = searcher
            .search(
                &query,
                &(TopDocs::with_limit(limit).and_offset(offset), Count),
            )
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let hits = top_docs
            .into_iter()
            .filter_map(|(score, address)| {
                let doc: TantivyDocument = searcher.doc(address).ok()?;
                let product_id = doc.get_first(self.fields.product_id)?.as_str()?.to_string();
                Some(SearchResult { product_id, score })
            })
            .collect();

        Ok(SearchHits { hits, total })
    }

    fn document(&self, product: &Product) -> TantivyDocument {
        doc!(
            self.fields.product_id => product.id.clone(),
            self.fields.name => product.name.clone(),
            self.fields.description => product.description.clone().unwrap_or_default(),
            self.fields.category => product.category.clone().unwrap_or_default(),
            self.fields.retailer => product.retailer.clone().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Availability;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn product(id: &str, name: &str, category: &str) -> Product {
        Product {
            id: id.to_string(),
            url: format!("https://example.com/{}", id),
            name: name.to_string(),
            current_price: Decimal::new(1999, 2),
            currency: "USD".to_string(),
            image_url: None,
            retailer: Some("example.com".to_string()),
            category: Some(category.to_string()),
            description: None,
            availability: Availability::InStock,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            last_checked_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rebuild_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                product("1", "Wireless Headphones", "Electronics"),
                product("2", "Trail Running Shoes", "Clothing"),
            ])
            .await
            .unwrap();

        let results = index.search("headphones", 10, 0).unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].product_id, "1");

        let by_category = index.search("clothing", 10, 0).unwrap();
        assert_eq!(by_category.hits[0].product_id, "2");
    }

    #[tokio::test]
    async fn test_index_and_remove_product() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        let mut lamp = product("1", "Desk Lamp", "Home & Garden");
        index.index_product(&lamp).await.unwrap();
        assert_eq!(index.search("lamp", 10, 0).unwrap().hits.len(), 1);

        lamp.name = "Floor Light".to_string();
        index.index_product(&lamp).await.unwrap();
        assert!(index.search("lamp", 10, 0).unwrap().hits.is_empty());
        assert_eq!(index.search("light", 10, 0).unwrap().hits.len(), 1);

        index.remove_product("1").await.unwrap();
        assert!(index.search("light", 10, 0).unwrap().hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_and_malformed_queries() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();
        index
            .rebuild(&[product("1", "USB-C Cable", "Electronics")])
            .await
            .unwrap();

        assert!(index.search("", 10, 0).unwrap().hits.is_empty());
        assert!(index.search("   ", 10, 0).unwrap().hits.is_empty());
        assert!(index.search("cable (", 10, 0).is_ok());
    }

    #[tokio::test]
    async fn test_search_pagination() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();
        index
            .rebuild(&[
                product("1", "Red Mug", "Home & Garden"),
                product("2", "Blue Mug", "Home & Garden"),
                product("3", "Green Mug", "Home & Garden"),
            ])
            .await
            .unwrap();

        let first = index.search("mug", 2, 0).unwrap();
        assert_eq!(first.hits.len(), 2);
        assert_eq!(first.total, 3);

        let second = index.search("mug", 2, 2).unwrap();
        assert_eq!(second.hits.len(), 1);
        assert_eq!(second.total, 3);
    }

    #[tokio::test]
    async fn test_search_rejects_deep_offsets() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();
        index
            .rebuild(&[product("1", "Red Mug", "Home & Garden")])
            .await
            .unwrap();

        assert!(index.search("mug", 20, MAX_OFFSET).unwrap().hits.is_empty());
        assert!(matches!(
            index.search("mug", 20, 1usize << 40),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            index.search("mug", 20, usize::MAX - 5),
            Err(AppError::Validation(_))
        ));
        assert_eq!(index.search("mug", usize::MAX, 0).unwrap().hits.len(), 1);
    }
}
