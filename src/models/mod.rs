//! Data models for the price tracker.
//!
//! Field names serialize in camelCase to match the frontend TypeScript interfaces.

mod favorite;
mod history;
mod product;
mod scrape;

pub use favorite::*;
pub use history::*;
pub use product::*;
pub use scrape::*;
