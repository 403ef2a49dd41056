//! AMQP broker-backed message store (requires the `amqp` feature).

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use tokio_executor_trait::Tokio;
use tokio_reactor_trait::Tokio as TokioReactor;
use uuid::Uuid;

use super::{Handle, MessageStore};
use crate::domain::Content;
use crate::error::{Result, StoreError};

/// A [`MessageStore`] backed by a named AMQP queue.
///
/// `store` publishes with `BasicPublishOptions::default()`; `retrieve` polls
/// with `basic_get` and manual acknowledgement, returning `Ok(None)` when the
/// queue is empty rather than waiting on a streaming consumer. Content is
/// published as JSON bytes and opportunistically decoded back to [`Content`]
/// on retrieval; a payload that doesn't parse as JSON is carried as a base64
/// string instead of being dropped.
pub struct AmqpBrokerStore {
    channel: Channel,
    queue: String,
    pending: Mutex<HashMap<String, lapin::acker::Acker>>,
}

impl AmqpBrokerStore {
    /// Connect to `uri` and declare (idempotently) the given durable queue.
    pub async fn connect(uri: &str, queue: impl Into<String>) -> Result<Self, StoreError> {
        let queue = queue.into();
        let conn = Connection::connect(
            uri,
            ConnectionProperties::default()
                .with_executor(Tokio::current())
                .with_reactor(TokioReactor),
        )
        .await?;
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(&queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        Ok(Self {
            channel,
            queue,
            pending: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl MessageStore for AmqpBrokerStore {
    async fn store(&self, content: Content) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&content)?;
        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &bytes,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<(Handle, Content)>, StoreError> {
        let Some(message) = self
            .channel
            .basic_get(&self.queue, BasicGetOptions { no_ack: false })
            .await?
        else {
            return Ok(None);
        };
        let delivery = message.delivery;
        let content = serde_json::from_slice(&delivery.data).unwrap_or_else(|_| {
            Content::String(base64::engine::general_purpose::STANDARD.encode(&delivery.data))
        });
        let handle = Uuid::now_v7().to_string();
        self.pending.lock().insert(handle.clone(), delivery.acker);
        Ok(Some((Handle(handle), content)))
    }

    async fn acknowledge(&self, handle: &Handle, success: bool) -> Result<(), StoreError> {
        let acker = self
            .pending
            .lock()
            .remove(&handle.0)
            .ok_or_else(|| StoreError::UnknownHandle(handle.0.clone()))?;
        if success {
            acker.ack(BasicAckOptions::default()).await?;
        } else {
            acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await?;
        }
        Ok(())
    }
}
