//! Persisted source-id to partition bindings.
//!
//! Rows are keyed by `(hash, topic, escaped source id)` and hold the partition plus
//! the create and last-access times. Reads and upserts are separate round trips;
//! either can report [`StoreError::Aborted`] when a concurrent writer won the row.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub hash: u32,
    pub topic: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub partition: u32,
    pub create_time_ms: u64,
    pub access_time_ms: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction aborted by a concurrent update")]
    Aborted,
    #[error("binding store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn select(&self, key: &BindingKey) -> StoreResult<Option<Binding>>;
    async fn upsert(&self, key: &BindingKey, binding: Binding) -> StoreResult<()>;
}

/// Process-local binding table.
///
/// Abort injection lets tests reproduce the optimistic-concurrency race.
#[derive(Default)]
pub struct InMemoryBindingStore {
    rows: RwLock<HashMap<BindingKey, Binding>>,
    aborted_selects: AtomicU32,
    aborted_upserts: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` selects report `Aborted`.
    pub fn abort_next_selects(&self, count: u32) {
        self.aborted_selects.store(count, Ordering::SeqCst);
    }

    /// The next `count` upserts report `Aborted` and leave the row untouched.
    pub fn abort_next_upserts(&self, count: u32) {
        self.aborted_upserts.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &BindingKey) -> Option<Binding> {
        self.rows.read().await.get(key).copied()
    }

    pub async fn insert(&self, key: BindingKey, binding: Binding) {
        self.rows.write().await.insert(key, binding);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    fn check(&self, pending_aborts: &AtomicU32) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store disabled".to_string()));
        }
        let injected = pending_aborts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Aborted);
        }
        Ok(())
    }
}

#[async_trait]
impl BindingStore for InMemoryBindingStore {
    async fn select(&self, key: &BindingKey) -> StoreResult<Option<Binding>> {
        self.check(&self.aborted_selects)?;
        Ok(self.rows.read().await.get(key).copied())
    }

    async fn upsert(&self, key: &BindingKey, binding: Binding) -> StoreResult<()> {
        self.check(&self.aborted_upserts)?;
        self.rows.write().await.insert(key.clone(), binding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BindingKey {
        BindingKey {
            hash: 42,
            topic: "orders".to_string(),
            source_id: "00703031".to_string(),
        }
    }

    fn binding(partition: u32, at: u64) -> Binding {
        Binding {
            partition,
            create_time_ms: at,
            access_time_ms: at,
        }
    }

    #[tokio::test]
    async fn upsert_then_select() {
        let store = InMemoryBindingStore::new();
        assert_eq!(store.select(&key()).await.expect("select"), None);
        store.upsert(&key(), binding(2, 10)).await.expect("upsert");
        store
            .upsert(
                &key(),
                Binding {
                    access_time_ms: 20,
                    ..binding(2, 10)
                },
            )
            .await
            .expect("refresh");
        let row = store.select(&key()).await.expect("select").expect("row");
        assert_eq!(row.partition, 2);
        assert_eq!(row.create_time_ms, 10);
        assert_eq!(row.access_time_ms, 20);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn injected_aborts_are_consumed() {
        let store = InMemoryBindingStore::new();
        store.abort_next_upserts(2);
        for _ in 0..2 {
            let err = store
                .upsert(&key(), binding(1, 1))
                .await
                .expect_err("aborted");
            assert!(matches!(err, StoreError::Aborted));
        }
        assert!(store.get(&key()).await.is_none());
        store.upsert(&key(), binding(1, 1)).await.expect("upsert");

        store.abort_next_selects(1);
        assert!(matches!(
            store.select(&key()).await,
            Err(StoreError::Aborted)
        ));
        assert!(store.select(&key()).await.expect("select").is_some());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryBindingStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.select(&key()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.upsert(&key(), binding(0, 0)).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
