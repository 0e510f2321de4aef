//! Outbound page fetching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::redirect::Policy;
use url::Url;

use super::validate::{ensure_public_host, resolve_public, validate_url};
use super::ScrapeError;

/// Maximum redirects followed for one fetch.
const MAX_REDIRECTS: usize = 5;

/// Response bodies larger than this are refused.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// How far into the body a `<meta charset>` declaration is looked for.
const META_SNIFF_BYTES: usize = 1024;

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .expect("valid meta charset pattern")
});

/// Raw page returned by a [`PageSource`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: Url,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    /// True when the content type is absent or looks like HTML/XML/text.
    pub fn is_markup(&self) -> bool {
        match &self.content_type {
            None => true,
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")
            }
        }
    }
}

/// Source of product pages. The URL has already passed [`validate_url`].
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, ScrapeError>;
}

/// Resolver for the HTTP client. Names with any non-public address fail to
/// resolve, so the client never connects to one, whichever hop it is on.
struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_addrs(name.as_str().to_string()))
    }
}

async fn resolve_addrs(host: String) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    // The client substitutes the port from the URL.
    let addrs = resolve_public(&host, 0).await?;
    Ok(Box::new(addrs.into_iter()))
}

/// Fetches pages over HTTP with a single attempt and a fixed timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .no_proxy()
            .dns_resolver(Arc::new(PublicOnlyResolver))
            .redirect(Policy::custom(|attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    return attempt.error(ScrapeError::Fetch(format!(
                        "more than {} redirects",
                        MAX_REDIRECTS
                    )));
                }
                // Address literals skip the resolver, so each hop is checked here too.
                match validate_url(attempt.url().as_str()) {
                    Ok(_) => attempt.follow(),
                    Err(e) => attempt.error(e),
                }
            }))
            .build()
            .map_err(|e| ScrapeError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn describe(&self, url: &Url, err: &reqwest::Error) -> ScrapeError {
        let cause = if err.is_timeout() {
            format!("timed out after {}s", self.timeout.as_secs())
        } else if err.is_redirect() {
            format!("redirect refused ({})", root_cause(err))
        } else if err.is_connect() {
            format!("connection failed ({})", root_cause(err))
        } else {
            err.to_string()
        };
        ScrapeError::Fetch(format!("Failed to fetch {}: {}", url, cause))
    }

    /// GET the page and read the body, without the up-front host check.
    async fn download(&self, url: &Url) -> Result<FetchedPage, ScrapeError> {
        tracing::debug!(%url, "Fetching page");

        let mut response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| self.describe(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Fetch(format!(
                "Failed to fetch {}: HTTP {}",
                url, status
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_BODY_BYTES as u64)
        {
            return Err(ScrapeError::Fetch(format!(
                "Failed to fetch {}: response larger than {} bytes",
                url, MAX_BODY_BYTES
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().clone();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.describe(url, &e))?
        {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(ScrapeError::Fetch(format!(
                    "Failed to fetch {}: response larger than {} bytes",
                    url, MAX_BODY_BYTES
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(%url, status = status.as_u16(), bytes = body.len(), "Fetched page");

        Ok(FetchedPage {
            url: final_url,
            body: decode_body(&body, content_type.as_deref()),
            content_type,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, ScrapeError> {
        ensure_public_host(url).await?;
        self.download(url).await
    }
}

fn root_cause(err: &reqwest::Error) -> String {
    let mut cause: &dyn std::error::Error = err;
    while let Some(next) = cause.source() {
        cause = next;
    }
    cause.to_string()
}

/// Decode with the Content-Type charset, else a `<meta charset>` near the
/// top of the document, else UTF-8. A byte order mark overrides all three.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(header_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| meta_charset(bytes))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "Page body had malformed sequences");
    }
    text.into_owned()
}

fn header_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SNIFF_BYTES)];
    let label = META_CHARSET_RE.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{response::Redirect, routing::get, Router};
    use std::str::FromStr;

    fn page(content_type: Option<&str>) -> FetchedPage {
        FetchedPage {
            url: Url::parse("https://example.com/").unwrap(),
            content_type: content_type.map(str::to_string),
            body: String::new(),
        }
    }

    /// Serve `app` on an ephemeral loopback port and return its base URL.
    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    #[test]
    fn test_is_markup() {
        assert!(page(None).is_markup());
        assert!(page(Some("text/html; charset=utf-8")).is_markup());
        assert!(page(Some("application/xhtml+xml")).is_markup());
        assert!(!page(Some("image/png")).is_markup());
        assert!(!page(Some("application/pdf")).is_markup());
    }

    #[tokio::test]
    async fn test_fetch_refuses_private_literal_before_connecting() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1), "test-agent").unwrap();
        let url = Url::parse("http://192.168.0.10/product").unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_redirect_to_private_address_is_refused() {
        let app = Router::new().route(
            "/",
            get(|| async { Redirect::temporary("http://10.0.0.1/product") }),
        );
        let url = serve(app).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test-agent").unwrap();

        let err = fetcher.download(&url).await.unwrap_err();
        match err {
            ScrapeError::Fetch(message) => assert!(message.contains("redirect refused"), "{}", message),
            other => panic!("expected fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redirect_to_internal_name_is_refused() {
        let app = Router::new().route(
            "/",
            get(|| async { Redirect::temporary("http://metadata.google.internal/computeMetadata/v1/") }),
        );
        let url = serve(app).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test-agent").unwrap();

        let err = fetcher.download(&url).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_download_decodes_declared_charset() {
        let app = Router::new().route(
            "/",
            get(|| async {
                (
                    [(CONTENT_TYPE, "text/html; charset=iso-8859-1")],
                    b"<p class=\"price\">\xa319.99</p>".to_vec(),
                )
            }),
        );
        let url = serve(app).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test-agent").unwrap();

        let page = fetcher.download(&url).await.unwrap();
        assert_eq!(page.body, "<p class=\"price\">£19.99</p>");
    }

    #[tokio::test]
    async fn test_resolver_refuses_loopback_names() {
        let name = Name::from_str("localhost").unwrap();
        assert!(PublicOnlyResolver.resolve(name).await.is_err());
    }

    #[test]
    fn test_decode_body_uses_header_charset() {
        let body = b"<span>\xa319.99</span>";
        assert_eq!(
            decode_body(body, Some("text/html; charset=\"ISO-8859-1\"")),
            "<span>£19.99</span>"
        );
    }

    #[test]
    fn test_decode_body_sniffs_meta_charset() {
        let body = b"<html><head><meta charset=\"windows-1252\"></head><body>\x8012,50</body></html>";
        assert!(decode_body(body, Some("text/html")).contains("€12,50"));

        let body = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\"><b>\xa35</b>";
        assert!(decode_body(body, None).contains("£5"));
    }

    #[test]
    fn test_decode_body_defaults_to_utf8() {
        let body = "<b>€12,50</b>".as_bytes();
        assert_eq!(decode_body(body, Some("text/html")), "<b>€12,50</b>");
        assert_eq!(decode_body(body, None), "<b>€12,50</b>");
    }
}
