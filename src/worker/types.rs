//! Platform registry and raw extraction record types.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter as EnumIterMacro;

/// Supported marketplaces. Worker dispatch is a closed match on this enum,
/// so adding a platform means adding a variant and a worker implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, EnumIterMacro,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ebay,
    Amazon,
}

impl Platform {
    /// Stable lowercase name, also used as the rate limiter target key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ebay => "ebay",
            Platform::Amazon => "amazon",
        }
    }

    /// Parses a platform name as submitted by callers.
    pub fn parse(name: &str) -> Option<Platform> {
        match name.to_ascii_lowercase().as_str() {
            "ebay" => Some(Platform::Ebay),
            "amazon" => Some(Platform::Amazon),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured search constraints attached to a job.
///
/// All fields are optional; a default value places no constraint. Price
/// bounds are applied to extracted records after the fetch, since the
/// marketplaces encode them inconsistently in search URLs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub condition: Option<String>,
}

impl ScrapeFilters {
    /// Whether an extracted price satisfies the configured bounds. Records
    /// without a price pass only when no bound is set.
    pub fn price_matches(&self, amount: Option<f64>) -> bool {
        match (amount, self.min_price, self.max_price) {
            (None, None, None) => true,
            (None, _, _) => false,
            (Some(p), min, max) => {
                min.map_or(true, |m| p >= m) && max.map_or(true, |m| p <= m)
            }
        }
    }
}

/// One product as extracted from a detail page, before image processing
/// and persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    /// Platform-native listing id.
    pub external_id: String,
    pub title: String,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub product_url: String,
    pub image_urls: Vec<String>,
}
