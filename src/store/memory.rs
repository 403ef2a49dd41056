//! In-memory message store: FIFO or LIFO ordering over a mutex-guarded deque.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Handle, MessageStore};
use crate::domain::Content;
use crate::error::{Result, StoreError};

/// Retrieval order for [`InMemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrder {
    /// First stored, first retrieved.
    Fifo,
    /// Last stored, first retrieved.
    Lifo,
}

struct Entry {
    content: Content,
}

/// An in-memory [`MessageStore`], fixed to FIFO or LIFO mode at construction.
///
/// Acknowledgement removes the specific entry bound to the handle, not
/// merely the head, so interleaved concurrent retrievals settle correctly.
pub struct InMemoryStore {
    order: StoreOrder,
    queue: Mutex<VecDeque<String>>,
    entries: Mutex<HashMap<String, Entry>>,
    reserved: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Create an empty store with the given ordering.
    pub fn new(order: StoreOrder) -> Self {
        Self {
            order,
            queue: Mutex::new(VecDeque::new()),
            entries: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn store(&self, content: Content) -> Result<(), StoreError> {
        let key = Uuid::now_v7().to_string();
        self.entries.lock().insert(key.clone(), Entry { content });
        self.queue.lock().push_back(key);
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<(Handle, Content)>, StoreError> {
        let key = {
            let mut queue = self.queue.lock();
            match self.order {
                StoreOrder::Fifo => queue.pop_front(),
                StoreOrder::Lifo => queue.pop_back(),
            }
        };
        let Some(key) = key else {
            return Ok(None);
        };
        let content = {
            let entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) => entry.content.clone(),
                None => return Ok(None),
            }
        };
        let handle = Uuid::now_v7().to_string();
        self.reserved.lock().insert(handle.clone(), key);
        Ok(Some((Handle(handle), content)))
    }

    async fn acknowledge(&self, handle: &Handle, success: bool) -> Result<(), StoreError> {
        let key = self
            .reserved
            .lock()
            .remove(&handle.0)
            .ok_or_else(|| StoreError::UnknownHandle(handle.0.clone()))?;
        if success {
            self.entries.lock().remove(&key);
        } else {
            self.queue.lock().push_front(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fifo_preserves_insertion_order() {
        let store = InMemoryStore::new(StoreOrder::Fifo);
        store.store(json!(1)).await.unwrap();
        store.store(json!(2)).await.unwrap();
        let (h1, c1) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&h1, true).await.unwrap();
        let (h2, c2) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&h2, true).await.unwrap();
        assert_eq!(c1, json!(1));
        assert_eq!(c2, json!(2));
    }

    #[tokio::test]
    async fn lifo_reverses_insertion_order() {
        let store = InMemoryStore::new(StoreOrder::Lifo);
        store.store(json!(1)).await.unwrap();
        store.store(json!(2)).await.unwrap();
        let (h1, c1) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&h1, true).await.unwrap();
        assert_eq!(c1, json!(2));
    }

    #[tokio::test]
    async fn empty_store_returns_none() {
        let store = InMemoryStore::new(StoreOrder::Fifo);
        assert!(store.retrieve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_retrieves_yield_distinct_handles() {
        let store = InMemoryStore::new(StoreOrder::Fifo);
        store.store(json!(1)).await.unwrap();
        store.store(json!(2)).await.unwrap();
        let (h1, _) = store.retrieve().await.unwrap().unwrap();
        let (h2, _) = store.retrieve().await.unwrap().unwrap();
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn negative_ack_requeues_at_front() {
        let store = InMemoryStore::new(StoreOrder::Fifo);
        store.store(json!(1)).await.unwrap();
        store.store(json!(2)).await.unwrap();
        let (h1, _) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&h1, false).await.unwrap();
        let (h1b, c1b) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&h1b, true).await.unwrap();
        assert_eq!(c1b, json!(1));
    }
}
