//! Product persistence behind a storage trait with SQLite and in-memory
//! implementations.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{ProductRecord, QueryFilters, SortOrder};

use async_trait::async_trait;

use crate::error::StorageError;

/// Backend-agnostic product store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a record and returns its assigned id.
    async fn insert(&self, record: &ProductRecord) -> Result<i64, StorageError>;

    /// Returns a page of matching records plus the total match count.
    /// Pages are 1-based.
    async fn query(
        &self,
        filters: &QueryFilters,
        page: u32,
        page_size: u32,
        sort: SortOrder,
    ) -> Result<(Vec<ProductRecord>, u64), StorageError>;

    /// Deletes the given ids. Returns true if anything was removed.
    async fn delete(&self, ids: &[i64]) -> Result<bool, StorageError>;
}
