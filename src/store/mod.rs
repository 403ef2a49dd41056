//! Message stores: durable holding areas with an explicit
//! retrieve/acknowledge protocol.
//!
//! A store never exposes destructive reads. `retrieve` hands back a
//! [`Handle`] distinct from the message's own id; the handle is the only
//! token [`MessageStore::acknowledge`] accepts, and it must be settled
//! (positively or negatively) exactly once.

#[cfg(feature = "amqp")]
mod amqp;
mod local_directory;
mod memory;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBrokerStore;
pub use local_directory::LocalDirectoryStore;
pub use memory::{InMemoryStore, StoreOrder};

use async_trait::async_trait;

use crate::domain::Content;
use crate::error::{Result, StoreError};

/// Opaque token returned by [`MessageStore::retrieve`], required to settle
/// that retrieval via [`MessageStore::acknowledge`].
///
/// A handle is never derived from message content and carries no ordering
/// guarantees of its own; stores are free to pick any representation
/// (sequence numbers, file paths, broker delivery tags).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub String);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable holding area for message content.
///
/// Two concurrent `retrieve` calls on the same store must never return the
/// same handle. Implementations are responsible for their own internal
/// synchronization — callers may share a single store across many listeners.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a value to the store.
    async fn store(&self, content: Content) -> Result<(), StoreError>;

    /// Return the next value per the store's ordering, without removing it.
    ///
    /// Returns `Ok(None)` iff the store is empty at the instant of the call.
    /// The returned entry is reserved under its handle until acknowledged.
    async fn retrieve(&self) -> Result<Option<(Handle, Content)>, StoreError>;

    /// Settle a previously retrieved handle.
    ///
    /// `success = true` permanently removes the entry; `success = false`
    /// releases the reservation so a later `retrieve` can return it again.
    /// An unknown or already-settled handle is an error.
    async fn acknowledge(&self, handle: &Handle, success: bool) -> Result<(), StoreError>;
}

#[cfg(test)]
mod contract_tests {
    //! Shared behavioral contract exercised against every backend.
    use super::*;
    use serde_json::json;

    pub(crate) async fn ack_bijection(store: &dyn MessageStore) {
        store.store(json!("x")).await.unwrap();
        let (handle, _) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&handle, true).await.unwrap();
        assert!(store.acknowledge(&handle, true).await.is_err());
    }

    pub(crate) async fn negative_ack_round_trip(store: &dyn MessageStore) {
        store.store(json!("x")).await.unwrap();
        let (handle, content) = store.retrieve().await.unwrap().unwrap();
        store.acknowledge(&handle, false).await.unwrap();
        let (handle2, content2) = store.retrieve().await.unwrap().unwrap();
        assert_eq!(content, content2);
        store.acknowledge(&handle2, true).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_satisfies_contract() {
        let store = InMemoryStore::new(StoreOrder::Fifo);
        ack_bijection(&store).await;
        negative_ack_round_trip(&store).await;
    }
}
