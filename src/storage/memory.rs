//! In-memory product storage used by tests and short-lived runs.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{ProductRecord, QueryFilters, SortOrder};
use super::Storage;
use crate::error::StorageError;

/// Keeps records in a Vec behind a mutex. Assigns ids sequentially.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<ProductRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn matches(record: &ProductRecord, filters: &QueryFilters) -> bool {
    if let Some(platform) = &filters.platform {
        if &record.platform != platform {
            return false;
        }
    }
    if let Some(category) = &filters.category {
        if record.category.as_deref() != Some(category.as_str()) {
            return false;
        }
    }
    if let Some(min) = filters.min_price {
        if record.price_amount.map_or(true, |p| p < min) {
            return false;
        }
    }
    if let Some(max) = filters.max_price {
        if record.price_amount.map_or(true, |p| p > max) {
            return false;
        }
    }
    if let Some(needle) = &filters.title_contains {
        // SQLite LIKE matches case-insensitively; mirror that here.
        if !record.title.to_lowercase().contains(&needle.to_lowercase()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert(&self, record: &ProductRecord) -> Result<i64, StorageError> {
        let mut records = self.records.lock().await;
        let id = records.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = Some(id);
        records.push(stored);
        Ok(id)
    }

    async fn query(
        &self,
        filters: &QueryFilters,
        page: u32,
        page_size: u32,
        sort: SortOrder,
    ) -> Result<(Vec<ProductRecord>, u64), StorageError> {
        let records = self.records.lock().await;
        let mut hits: Vec<ProductRecord> = records
            .iter()
            .filter(|r| matches(r, filters))
            .cloned()
            .collect();
        match sort {
            SortOrder::Newest => hits.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at)),
            SortOrder::PriceAscending => hits.sort_by(|a, b| {
                a.price_amount
                    .partial_cmp(&b.price_amount)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortOrder::PriceDescending => hits.sort_by(|a, b| {
                b.price_amount
                    .partial_cmp(&a.price_amount)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        let total = hits.len() as u64;
        let page = page.max(1);
        let start = ((page - 1) * page_size) as usize;
        let page_hits = hits
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok((page_hits, total))
    }

    async fn delete(&self, ids: &[i64]) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id.map_or(true, |id| !ids.contains(&id)));
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(title: &str, price: f64) -> ProductRecord {
        ProductRecord {
            id: None,
            external_id: title.to_string(),
            platform: "ebay".to_string(),
            title: title.to_string(),
            price_amount: Some(price),
            price_currency: Some("USD".to_string()),
            description: None,
            category: None,
            brand: None,
            product_url: format!("https://example.com/{title}"),
            image_paths: Vec::new(),
            primary_image: None,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.insert(&record("a", 1.0)).await.unwrap(), 1);
        assert_eq!(storage.insert(&record("b", 2.0)).await.unwrap(), 2);
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_title_filter_and_delete() {
        let storage = MemoryStorage::new();
        let id = storage.insert(&record("gold ring", 10.0)).await.unwrap();
        storage.insert(&record("silver chain", 20.0)).await.unwrap();

        let filters = QueryFilters {
            title_contains: Some("gold".to_string()),
            ..Default::default()
        };
        let (hits, total) = storage
            .query(&filters, 1, 10, SortOrder::Newest)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].title, "gold ring");

        assert!(storage.delete(&[id]).await.unwrap());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_title_filter_ignores_case() {
        let storage = MemoryStorage::new();
        storage.insert(&record("Gold Ring", 10.0)).await.unwrap();

        let filters = QueryFilters {
            title_contains: Some("gold".to_string()),
            ..Default::default()
        };
        let (hits, total) = storage
            .query(&filters, 1, 10, SortOrder::Newest)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].title, "Gold Ring");
    }
}
