//! Amazon search and detail-page extraction.

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::context::FetchContext;
use super::price::parse_price;
use super::types::{Platform, RawItem, ScrapeFilters};
use super::PlatformWorker;
use crate::error::StepError;

static RESULT_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div[data-component-type='s-search-result'] h2 a").expect("valid selector")
});
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#productTitle").expect("valid selector"));
static PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.a-price span.a-offscreen").expect("valid selector"));
static BYLINE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#bylineInfo").expect("valid selector"));
static FEATURE_BULLETS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#feature-bullets li span").expect("valid selector"));
static LANDING_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#landingImage").expect("valid selector"));
static ALT_IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#altImages img").expect("valid selector"));

pub struct AmazonWorker;

impl AmazonWorker {
    fn search_url(query: &str, filters: &ScrapeFilters) -> String {
        let mut url = format!("https://www.amazon.com/s?k={}", urlencoded(query));
        if let Some(min) = filters.min_price {
            url.push_str(&format!("&low-price={min}"));
        }
        if let Some(max) = filters.max_price {
            url.push_str(&format!("&high-price={max}"));
        }
        url
    }
}

#[async_trait]
impl PlatformWorker for AmazonWorker {
    fn platform(&self) -> Platform {
        Platform::Amazon
    }

    async fn search(
        &self,
        ctx: &FetchContext<'_>,
        query: &str,
        filters: &ScrapeFilters,
        max_items: usize,
    ) -> Result<Vec<String>, StepError> {
        let html = ctx.fetch(&Self::search_url(query, filters)).await?;
        let document = Html::parse_document(&html);
        let base = Url::parse("https://www.amazon.com")
            .map_err(|e| StepError::Fatal(format!("bad base url: {e}")))?;

        let mut urls = Vec::new();
        for element in document.select(&RESULT_LINK) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            // Only direct product links; skip sponsored redirect shells.
            if !href.contains("/dp/") {
                continue;
            }
            let Ok(absolute) = base.join(href) else {
                continue;
            };
            let canonical = canonical_product_url(&absolute);
            if !urls.contains(&canonical) {
                urls.push(canonical);
            }
            if urls.len() >= max_items * 2 {
                break;
            }
        }
        log::debug!("amazon search yielded {} candidate urls", urls.len());
        Ok(urls)
    }

    fn extract_fields(&self, html: &str, url: &str) -> Result<RawItem, StepError> {
        let document = Html::parse_document(html);

        let title = select_text(&document, &TITLE)
            .ok_or_else(|| StepError::Fatal(format!("no title found at {url}")))?;
        let price = select_text(&document, &PRICE).and_then(|text| parse_price(&text));
        let brand = select_text(&document, &BYLINE).map(|text| {
            text.trim_start_matches("Visit the ")
                .trim_end_matches(" Store")
                .trim_start_matches("Brand: ")
                .to_string()
        });
        let description = {
            let bullets: Vec<String> = document
                .select(&FEATURE_BULLETS)
                .map(|e| e.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if bullets.is_empty() {
                None
            } else {
                Some(bullets.join("\n"))
            }
        };

        let mut image_urls = Vec::new();
        if let Some(src) = document
            .select(&LANDING_IMAGE)
            .next()
            .and_then(|e| e.value().attr("src"))
        {
            image_urls.push(src.to_string());
        }
        for img in document.select(&ALT_IMAGES) {
            if let Some(src) = img.value().attr("src") {
                // Thumbnail variants carry a size token; request the full
                // rendition instead.
                let full = src.replace("._SS40_", "").replace("._SX38_SY50_", "");
                if full.starts_with("http") && !image_urls.contains(&full) {
                    image_urls.push(full);
                }
            }
        }

        Ok(RawItem {
            external_id: asin(url).unwrap_or_else(|| url.to_string()),
            title,
            price_amount: price.as_ref().map(|(amount, _)| *amount),
            price_currency: price.map(|(_, currency)| currency),
            description,
            category: None,
            brand,
            product_url: url.to_string(),
            image_urls,
        })
    }
}

fn select_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Reduces a product URL to `https://www.amazon.com/dp/<ASIN>`.
fn canonical_product_url(url: &Url) -> String {
    match asin(url.as_str()) {
        Some(asin) => format!("https://www.amazon.com/dp/{asin}"),
        None => url.to_string(),
    }
}

/// Pulls the ASIN from a /dp/ URL path.
fn asin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments
        .find(|s| *s == "dp")
        .and_then(|_| segments.next())
        .map(str::to_string)
}

fn urlencoded(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_with_price_filters() {
        let filters = ScrapeFilters {
            min_price: Some(25.0),
            max_price: Some(75.0),
            ..Default::default()
        };
        let url = AmazonWorker::search_url("silver necklace", &filters);
        assert!(url.contains("k=silver+necklace"));
        assert!(url.contains("low-price=25"));
        assert!(url.contains("high-price=75"));
    }

    #[test]
    fn test_asin_extraction() {
        assert_eq!(
            asin("https://www.amazon.com/Some-Product-Name/dp/B0ABCD1234/ref=sr_1_1"),
            Some("B0ABCD1234".to_string())
        );
        assert_eq!(asin("https://www.amazon.com/s?k=rings"), None);
    }

    #[test]
    fn test_extract_fields_from_detail_page() {
        let html = r#"
            <html><body>
              <span id="productTitle"> Sterling Silver Necklace </span>
              <a id="bylineInfo">Visit the Acme Store</a>
              <span class="a-price"><span class="a-offscreen">$34.99</span></span>
              <div id="feature-bullets"><ul>
                <li><span>925 sterling silver</span></li>
                <li><span>18 inch chain</span></li>
              </ul></div>
              <img id="landingImage" src="https://m.media-amazon.com/images/I/abc.jpg">
            </body></html>
        "#;
        let item = AmazonWorker
            .extract_fields(html, "https://www.amazon.com/dp/B0ABCD1234")
            .unwrap();
        assert_eq!(item.title, "Sterling Silver Necklace");
        assert_eq!(item.price_amount, Some(34.99));
        assert_eq!(item.brand.as_deref(), Some("Acme"));
        assert_eq!(item.external_id, "B0ABCD1234");
        assert_eq!(item.image_urls.len(), 1);
        assert!(item.description.unwrap().contains("sterling silver"));
    }
}
