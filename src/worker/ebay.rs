//! eBay search and detail-page extraction.

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::context::FetchContext;
use super::price::parse_price;
use super::types::{Platform, RawItem, ScrapeFilters};
use super::PlatformWorker;
use crate::error::StepError;

static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.s-item__link").expect("valid selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1.x-item-title__mainTitle span").expect("valid selector"));
static TITLE_FALLBACK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.x-price-primary span").expect("valid selector"));
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name='description']").expect("valid selector"));
static CAROUSEL_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.ux-image-carousel-item img").expect("valid selector"));
static BREADCRUMB: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("nav.breadcrumbs a span").expect("valid selector"));

pub struct EbayWorker;

impl EbayWorker {
    fn search_url(query: &str, filters: &ScrapeFilters) -> String {
        let mut url = format!(
            "https://www.ebay.com/sch/i.html?_nkw={}&_ipg=60",
            urlencoded(query)
        );
        if let Some(min) = filters.min_price {
            url.push_str(&format!("&_udlo={min}"));
        }
        if let Some(max) = filters.max_price {
            url.push_str(&format!("&_udhi={max}"));
        }
        if let Some(condition) = &filters.condition {
            // eBay condition ids: 1000 new, 3000 used.
            let id = match condition.to_ascii_lowercase().as_str() {
                "new" => Some("1000"),
                "used" => Some("3000"),
                _ => None,
            };
            if let Some(id) = id {
                url.push_str(&format!("&LH_ItemCondition={id}"));
            }
        }
        url
    }
}

#[async_trait]
impl PlatformWorker for EbayWorker {
    fn platform(&self) -> Platform {
        Platform::Ebay
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

        let mut urls = Vec::new();
        for element in document.select(&RESULT_LINK) {
            if let Some(href) = element.value().attr("href") {
                // The listing id lives in the /itm/ path; anything else is
                // sponsored chrome or a tracking shell.
                if !href.contains("/itm/") {
                    continue;
                }
                let canonical = strip_query(href);
                if !urls.contains(&canonical) {
                    urls.push(canonical);
                }
            }
            // Fetch extra candidates so per-item failures still fill the quota.
            if urls.len() >= max_items * 2 {
                break;
            }
        }
        log::debug!("ebay search yielded {} candidate urls", urls.len());
        Ok(urls)
    }

    fn extract_fields(&self, html: &str, url: &str) -> Result<RawItem, StepError> {
        let document = Html::parse_document(html);

        let title = select_text(&document, &TITLE)
            .or_else(|| select_text(&document, &TITLE_FALLBACK))
            .ok_or_else(|| StepError::Fatal(format!("no title found at {url}")))?;

        let price = select_text(&document, &PRICE).and_then(|text| parse_price(&text));
        let description = document
            .select(&DESCRIPTION)
            .next()
            .and_then(|e| e.value().attr("content"))
            .map(str::to_string);
        let category = document
            .select(&BREADCRUMB)
            .last()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        let mut image_urls = Vec::new();
        for img in document.select(&CAROUSEL_IMAGE) {
            let src = img
                .value()
                .attr("data-zoom-src")
                .or_else(|| img.value().attr("src"));
            if let Some(src) = src {
                if src.starts_with("http") && !image_urls.contains(&src.to_string()) {
                    image_urls.push(src.to_string());
                }
            }
        }

        Ok(RawItem {
            external_id: listing_id(url).unwrap_or_else(|| url.to_string()),
            title,
            price_amount: price.as_ref().map(|(amount, _)| *amount),
            price_currency: price.map(|(_, currency)| currency),
            description,
            category,
            brand: None,
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

/// Pulls the numeric listing id from an /itm/ URL.
fn listing_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments
        .find(|s| *s == "itm")
        .and_then(|_| segments.next())
        .map(str::to_string)
}

fn strip_query(href: &str) -> String {
    href.split('?').next().unwrap_or(href).to_string()
}

fn urlencoded(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}
