//! Price string parsing.
//!
//! Marketplace listings render prices as free text ("US $1,299.00",
//! "£45.50", "1.234,56 €" is out of scope). Extraction pulls the first
//! numeric amount and maps a currency marker when one is present.

use std::sync::LazyLock;

use regex::Regex;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)")
        .expect("valid price regex")
});

/// Extracts `(amount, currency_code)` from a price string.
///
/// Returns `None` when no numeric amount is found. The currency code
/// defaults to `USD` when the text carries no recognizable marker, since
/// both supported marketplaces are queried through their US storefronts.
pub fn parse_price(text: &str) -> Option<(f64, String)> {
    let captures = AMOUNT_RE.captures(text)?;
    let amount: f64 = captures[1].replace(',', "").parse().ok()?;

    let currency = if text.contains('£') || text.contains("GBP") {
        "GBP"
    } else if text.contains('€') || text.contains("EUR") {
        "EUR"
    } else if text.contains("C $") || text.contains("CAD") {
        "CAD"
    } else if text.contains("AU $") || text.contains("AUD") {
        "AUD"
    } else {
        "USD"
    };
    Some((amount, currency.to_string()))
}
