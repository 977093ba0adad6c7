//! SQLite-backed product storage.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::types::{ProductRecord, QueryFilters, SortOrder};
use super::Storage;
use crate::error::StorageError;

/// Persistent product store on a single SQLite file.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (creating if missing) the database at `path` and applies the
    /// schema migration.
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        run_migrations(&pool).await?;
        Ok(SqliteStorage { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        run_migrations(&pool).await?;
        Ok(SqliteStorage { pool })
    }
}

/// Creates the products table and its indexes if they don't exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            title TEXT NOT NULL,
            price_amount REAL,
            price_currency TEXT,
            description TEXT,
            category TEXT,
            brand TEXT,
            product_url TEXT NOT NULL,
            image_paths TEXT NOT NULL DEFAULT '[]',
            primary_image TEXT,
            scraped_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_platform ON products(platform)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_scraped_at ON products(scraped_at)")
        .execute(pool)
        .await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<ProductRecord, StorageError> {
    let image_paths: String = row.get("image_paths");
    let scraped_at: String = row.get("scraped_at");
    Ok(ProductRecord {
        id: Some(row.get("id")),
        external_id: row.get("external_id"),
        platform: row.get("platform"),
        title: row.get("title"),
        price_amount: row.get("price_amount"),
        price_currency: row.get("price_currency"),
        description: row.get("description"),
        category: row.get("category"),
        brand: row.get("brand"),
        product_url: row.get("product_url"),
        image_paths: serde_json::from_str(&image_paths)?,
        primary_image: row.get("primary_image"),
        scraped_at: DateTime::parse_from_rfc3339(&scraped_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filters: &'a QueryFilters) {
    builder.push(" WHERE 1=1");
    if let Some(platform) = &filters.platform {
        builder.push(" AND platform = ").push_bind(platform);
    }
    if let Some(category) = &filters.category {
        builder.push(" AND category = ").push_bind(category);
    }
    if let Some(min) = filters.min_price {
        builder.push(" AND price_amount >= ").push_bind(min);
    }
    if let Some(max) = filters.max_price {
        builder.push(" AND price_amount <= ").push_bind(max);
    }
    if let Some(needle) = &filters.title_contains {
        builder
            .push(" AND title LIKE ")
            .push_bind(format!("%{needle}%"));
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert(&self, record: &ProductRecord) -> Result<i64, StorageError> {
        let image_paths = serde_json::to_string(&record.image_paths)?;
        let result = sqlx::query(
            r#"
            INSERT INTO products
                (external_id, platform, title, price_amount, price_currency,
                 description, category, brand, product_url, image_paths,
                 primary_image, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.external_id)
        .bind(&record.platform)
        .bind(&record.title)
        .bind(record.price_amount)
        .bind(&record.price_currency)
        .bind(&record.description)
        .bind(&record.category)
        .bind(&record.brand)
        .bind(&record.product_url)
        .bind(image_paths)
        .bind(&record.primary_image)
        .bind(record.scraped_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn query(
        &self,
        filters: &QueryFilters,
        page: u32,
        page_size: u32,
        sort: SortOrder,
    ) -> Result<(Vec<ProductRecord>, u64), StorageError> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) AS n FROM products");
        push_filters(&mut count_builder, filters);
        let total: i64 = count_builder
            .build()
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let mut builder = QueryBuilder::new("SELECT * FROM products");
        push_filters(&mut builder, filters);
        builder.push(match sort {
            SortOrder::Newest => " ORDER BY scraped_at DESC",
            SortOrder::PriceAscending => " ORDER BY price_amount ASC",
            SortOrder::PriceDescending => " ORDER BY price_amount DESC",
        });
        let page = page.max(1);
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::from((page - 1) * page_size));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total as u64))
    }

    async fn delete(&self, ids: &[i64]) -> Result<bool, StorageError> {
        if ids.is_empty() {
            return Ok(false);
        }
        let mut builder = QueryBuilder::new("DELETE FROM products WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        builder.push(")");
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, platform: &str, price: f64) -> ProductRecord {
        ProductRecord {
            id: None,
            external_id: format!("ext-{title}"),
            platform: platform.to_string(),
            title: title.to_string(),
            price_amount: Some(price),
            price_currency: Some("USD".to_string()),
            description: None,
            category: Some("rings".to_string()),
            brand: None,
            product_url: format!("https://example.com/{title}"),
            image_paths: vec![format!("images/{title}.jpg")],
            primary_image: Some(format!("images/{title}.jpg")),
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_query_round_trip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let id = storage.insert(&record("gold-ring", "ebay", 99.0)).await.unwrap();
        assert!(id > 0);

        let (records, total) = storage
            .query(&QueryFilters::default(), 1, 10, SortOrder::Newest)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(records[0].title, "gold-ring");
        assert_eq!(records[0].image_paths, vec!["images/gold-ring.jpg"]);
    }

    #[tokio::test]
    async fn test_query_filters_by_platform_and_price() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert(&record("cheap", "ebay", 10.0)).await.unwrap();
        storage.insert(&record("pricey", "ebay", 500.0)).await.unwrap();
        storage.insert(&record("other", "amazon", 50.0)).await.unwrap();

        let filters = QueryFilters {
            platform: Some("ebay".to_string()),
            min_price: Some(100.0),
            ..Default::default()
        };
        let (records, total) = storage
            .query(&filters, 1, 10, SortOrder::Newest)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(records[0].title, "pricey");
    }

    #[tokio::test]
    async fn test_query_pagination_and_sort() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        for (title, price) in [("a", 3.0), ("b", 1.0), ("c", 2.0)] {
            storage.insert(&record(title, "ebay", price)).await.unwrap();
        }

        let (page1, total) = storage
            .query(&QueryFilters::default(), 1, 2, SortOrder::PriceAscending)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].title, "b");

        let (page2, _) = storage
            .query(&QueryFilters::default(), 2, 2, SortOrder::PriceAscending)
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].title, "a");
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let id = storage.insert(&record("gone", "ebay", 1.0)).await.unwrap();
        assert!(storage.delete(&[id]).await.unwrap());
        assert!(!storage.delete(&[id]).await.unwrap());
        let (_, total) = storage
            .query(&QueryFilters::default(), 1, 10, SortOrder::Newest)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }
}
