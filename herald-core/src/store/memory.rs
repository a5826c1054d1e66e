//! In-memory token store implementation.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{StoreError, TokenRecords, TokenStore};

/// In-memory token store for testing and ephemeral runs.
///
/// This store is not persistent; data is lost when the process exits.
pub struct MemoryStore {
    data: RwLock<TokenRecords>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(TokenRecords::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: TokenRecords) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Snapshot of the current records.
    pub fn snapshot(&self) -> TokenRecords {
        self.data.read().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.data.read().len())
            .finish()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn load(&self) -> Result<TokenRecords, StoreError> {
        Ok(self.data.read().clone())
    }

    async fn save(&self, records: &TokenRecords) -> Result<(), StoreError> {
        *self.data.write() = records.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PersistedTokenRecord;

    #[tokio::test]
    async fn test_memory_store_empty_by_default() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_save_replaces() {
        let store = MemoryStore::new();

        let mut records = TokenRecords::new();
        records.insert("a".into(), PersistedTokenRecord::new("rt-a", "at-a"));
        records.insert("b".into(), PersistedTokenRecord::new("rt-b", "at-b"));
        store.save(&records).await.unwrap();

        records.remove("a");
        store.save(&records).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["b"].secret.expose(), "rt-b");
    }
}
