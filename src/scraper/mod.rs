//! Scrape pipeline: validate a URL, fetch the page, extract product data.

pub mod categorize;
pub mod extract;
pub mod fetch;
pub mod price;
pub mod validate;

use std::sync::Arc;

use crate::config::Config;
use crate::models::ExtractedProduct;

pub use categorize::Categorizer;
pub use extract::Extractor;
pub use fetch::{HttpFetcher, PageSource};
pub use validate::validate_url;

/// Failure of one scrape stage. Each variant maps to a distinct API error code.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("Extraction failed: {0}")]
    Extraction(String),
}

/// Runs the validate, fetch, extract and categorize stages in order.
pub struct Scraper {
    source: Arc<dyn PageSource>,
    extractor: Extractor,
    categorizer: Categorizer,
}

impl Scraper {
    pub fn new(source: Arc<dyn PageSource>, categorizer: Categorizer) -> Self {
        Self {
            source,
            extractor: Extractor::new(),
            categorizer,
        }
    }

    /// Scraper backed by a real HTTP client.
    pub fn from_config(config: &Config) -> Result<Self, ScrapeError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout, &config.user_agent)?;
        Ok(Self::new(
            Arc::new(fetcher),
            Categorizer::new(config.ai.clone()),
        ))
    }

    /// Scrape one product page.
    ///
    /// The returned product carries the normalized requested URL, which is
    /// the key used for persistence even when the fetch was redirected.
    pub async fn scrape(&self, raw_url: &str) -> Result<ExtractedProduct, ScrapeError> {
        let url = validate_url(raw_url)?;

        let page = self.source.fetch(&url).await?;
        if !page.is_markup() {
            return Err(ScrapeError::Extraction(format!(
                "Unsupported content type '{}'",
                page.content_type.as_deref().unwrap_or_default()
            )));
        }

        let mut product = self.extractor.extract(&page.body, &page.url)?;
        product.url = url.to_string();
        product.category = Some(
            self.categorizer
                .categorize(&product.name, product.description.as_deref())
                .await,
        );

        tracing::info!(
            url = %product.url,
            price = %product.price,
            currency = %product.currency,
            "Scraped product"
        );
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::fetch::FetchedPage;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct CannedSource {
        content_type: &'static str,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for CannedSource {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedPage {
                url: url.clone(),
                content_type: Some(self.content_type.to_string()),
                body: self.body.to_string(),
            })
        }
    }

    fn scraper(content_type: &'static str, body: &'static str) -> (Scraper, Arc<CannedSource>) {
        let source = Arc::new(CannedSource {
            content_type,
            body,
            calls: AtomicUsize::new(0),
        });
        let scraper = Scraper::new(source.clone(), Categorizer::keywords_only());
        (scraper, source)
    }

    #[tokio::test]
    async fn test_scrape_pipeline() {
        let (scraper, _) = scraper(
            "text/html",
            r#"<html><head>
                <meta property="og:title" content="Noise Cancelling Headphones">
                <meta property="product:price:amount" content="199.00">
                <meta property="product:price:currency" content="EUR">
            </head><body></body></html>"#,
        );

        let product = scraper
            .scrape("https://shop.example.com/headphones#reviews")
            .await
            .unwrap();
        assert_eq!(product.url, "https://shop.example.com/headphones");
        assert_eq!(product.name, "Noise Cancelling Headphones");
        assert_eq!(product.price.to_string(), "199.00");
        assert_eq!(product.currency, "EUR");
        assert_eq!(product.category.as_deref(), Some("Electronics"));
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_source() {
        let (scraper, source) = scraper("text/html", "<html></html>");

        let err = scraper.scrape("http://169.254.169.254/latest").await.unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_markup_response_is_extraction_error() {
        let (scraper, _) = scraper("image/png", "\u{89}PNG");

        let err = scraper.scrape("https://example.com/image").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Extraction(_)));
    }
}
