//! Price Tracker Backend
//!
//! REST backend that scrapes product pages, records price history in SQLite
//! and serves products, favorites and Tantivy full-text search.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod scraper;
mod search;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, CorsOrigins};
use db::Repository;
use scraper::Scraper;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub scraper: Arc<Scraper>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Price Tracker Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (TRACKER_API_PSK). Authentication is disabled!");
    }
    if config.ai.is_none() {
        tracing::info!("No AI API key configured, using keyword categorization");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let search = Arc::new(SearchIndex::open(&config.index_path)?);
    let products = repo.all_products().await?;
    search.rebuild(&products).await?;

    let scraper = Arc::new(Scraper::from_config(&config)?);

    let state = AppState {
        repo,
        search,
        scraper,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Products
        .route(
            "/products",
            get(api::list_products).post(api::create_product),
        )
        .route(
            "/products/{id}",
            get(api::get_product)
                .put(api::update_product)
                .delete(api::delete_product),
        )
        .route("/products/{id}/history", get(api::get_price_history))
        .route("/products/{id}/stats", get(api::get_price_stats))
        // Scraping
        .route("/scraper/scrape", post(api::scrape_product))
        .route("/product/analyze", get(api::analyze_product))
        // Favorites
        .route(
            "/favorites",
            get(api::list_favorites).post(api::add_favorite),
        )
        .route("/favorites/toggle", post(api::toggle_favorite))
        .route(
            "/favorites/user/{user_id}/product/{product_id}",
            delete(api::remove_favorite),
        )
        // Search
        .route("/search", get(api::search_products))
        .route("/search/{query}", get(api::search_products_by_path))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let allow_origin = match origins {
        CorsOrigins::Any => AllowOrigin::from(Any),
        CorsOrigins::List(list) => AllowOrigin::list(list.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| tracing::warn!(%origin, "Ignoring invalid CORS origin"))
                .ok()
        })),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
