//! Product records and query parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized product listing, as persisted by the job controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Storage-assigned id; `None` until inserted.
    pub id: Option<i64>,
    /// Listing id on the source marketplace.
    pub external_id: String,
    /// Source platform name.
    pub platform: String,
    pub title: String,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    /// Canonical listing URL.
    pub product_url: String,
    /// Local paths of processed images.
    pub image_paths: Vec<String>,
    /// Display-hint path of the primary image, if any image survived.
    pub primary_image: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Filters applied to [`Storage::query`](super::Storage::query).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    pub platform: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Case-insensitive substring match against the title.
    pub title_contains: Option<String>,
}

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most recently scraped first.
    #[default]
    Newest,
    PriceAscending,
    PriceDescending,
}
