//! Store Listener: a polling consumer that drives a handler against a
//! [`MessageStore`], applying retry, dead-letter and drop policies.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::Content;
use crate::error::{FabricError, Result};
use crate::store::MessageStore;

/// A handler invoked once per poll tick with the retrieved content.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Handler = Arc<dyn Fn(Content) -> HandlerFuture + Send + Sync>;

/// Listener configuration. Builder-style, with production-sane defaults.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Period between poll attempts.
    pub polling_interval: Duration,
    /// Additional attempts after the initial failure.
    pub max_retries: u32,
    /// Delay between retries.
    pub retry_interval: Duration,
    /// On exhausted retries with no dead-letter store: positive-ack (drop,
    /// `true`) vs negative-ack (keep, `false`).
    pub drop_message_after_max_retries: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
            drop_message_after_max_retries: true,
        }
    }
}

impl ListenerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the period between poll attempts.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the number of additional attempts after the initial failure.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retries.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set whether an exhausted-retries message with no DLQ is dropped
    /// (`true`) or kept in the store (`false`).
    pub fn with_drop_message_after_max_retries(mut self, drop: bool) -> Self {
        self.drop_message_after_max_retries = drop;
        self
    }
}

struct Attachment {
    handler: Handler,
    dead_letter_store: Option<Arc<dyn MessageStore>>,
}

/// Polls a [`MessageStore`], dispatching retrieved content to an attached
/// handler under a retry/DLQ/drop policy.
///
/// Exactly one handler may be attached at a time. `start` spawns a single
/// recurring task that runs one tick to completion before the next begins.
/// `immediate_stop` cancels that task without waiting for an in-flight tick;
/// `graceful_stop` waits for the current tick to drain.
pub struct StoreListener {
    store: Arc<dyn MessageStore>,
    config: ListenerConfig,
    attachment: Mutex<Option<Attachment>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<Option<CancellationToken>>,
    drain: Mutex<Option<watch::Sender<bool>>>,
}

impl StoreListener {
    /// Build a listener over `store` with the given configuration.
    pub fn new(store: Arc<dyn MessageStore>, config: ListenerConfig) -> Self {
        Self {
            store,
            config,
            attachment: Mutex::new(None),
            task: Mutex::new(None),
            cancel: Mutex::new(None),
            drain: Mutex::new(None),
        }
    }

    /// Attach a handler (and optional dead-letter store). Fails if a handler
    /// is already attached.
    pub fn attach<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Content) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.attach_with_dlq(handler, None)
    }

    /// Attach a handler with a dead-letter store that dominates the
    /// drop/keep policy on exhausted retries.
    pub fn attach_with_dlq<F, Fut>(
        &self,
        handler: F,
        dead_letter_store: Option<Arc<dyn MessageStore>>,
    ) -> Result<()>
    where
        F: Fn(Content) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let mut attachment = self.attachment.lock();
        if attachment.is_some() {
            return Err(FabricError::Listener(
                "a handler is already attached".into(),
            ));
        }
        *attachment = Some(Attachment {
            handler: Arc::new(move |content| Box::pin(handler(content))),
            dead_letter_store,
        });
        Ok(())
    }

    /// Detach the handler, stopping the poll job if running.
    pub async fn detach(&self) {
        self.immediate_stop().await;
        *self.attachment.lock() = None;
    }

    /// Start the recurring poll task. A no-op if no handler is attached or a
    /// poll job is already running.
    pub fn start(self: &Arc<Self>) {
        if self.attachment.lock().is_none() {
            return;
        }
        if self.task.lock().is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let (drain_tx, _drain_rx) = watch::channel(true);
        let listener = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_drain_tx = drain_tx.clone();
        let task = tokio::spawn(async move {
            let drain_tx = task_drain_tx;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(listener.config.polling_interval) => {}
                }
                if task_cancel.is_cancelled() {
                    break;
                }
                let _ = drain_tx.send(false);
                listener.tick().await;
                let _ = drain_tx.send(true);
            }
        });
        *self.cancel.lock() = Some(cancel);
        *self.task.lock() = Some(task);
        *self.drain.lock() = Some(drain_tx);
    }

    /// Cancel the poll task without waiting for an in-flight tick to finish.
    ///
    /// Any tick already in progress keeps running to completion in the
    /// background; this call does not block on it.
    pub async fn immediate_stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        self.task.lock().take();
        self.drain.lock().take();
    }

    /// Stop new polls and wait for any in-flight tick to finish.
    pub async fn graceful_stop(&self) {
        let drain_rx = self.drain.lock().as_ref().map(|tx| tx.subscribe());
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        if let Some(mut rx) = drain_rx {
            let _ = rx.wait_for(|draining| *draining).await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.drain.lock().take();
    }

    async fn tick(&self) {
        let (handle, content) = match self.store.retrieve().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                error!(error = %err, "store retrieve failed");
                return;
            }
        };

        let Some(attachment) = self.attachment.lock().as_ref().map(|a| {
            (a.handler.clone(), a.dead_letter_store.clone())
        }) else {
            return;
        };
        let (handler, dead_letter_store) = attachment;

        if Self::invoke_handler(&handler, content.clone()).await {
            debug!("handler succeeded on first attempt");
            self.ack(&handle, true).await;
            return;
        }

        let mut succeeded = false;
        for attempt in 1..=self.config.max_retries {
            tokio::time::sleep(self.config.retry_interval).await;
            debug!(attempt, "retrying handler");
            if Self::invoke_handler(&handler, content.clone()).await {
                succeeded = true;
                break;
            }
        }

        if succeeded {
            self.ack(&handle, true).await;
            return;
        }

        if let Some(dlq) = dead_letter_store {
            match dlq.store(content.clone()).await {
                Ok(()) => {
                    warn!("retries exhausted, routed to dead-letter store");
                    self.ack(&handle, true).await;
                    return;
                }
                Err(err) => {
                    error!(error = %err, "dead-letter store write failed");
                }
            }
        }

        if self.config.drop_message_after_max_retries {
            warn!("retries exhausted, dropping message");
            self.ack(&handle, true).await;
        } else {
            warn!("retries exhausted, keeping message in store");
            self.ack(&handle, false).await;
        }
    }

    /// Invoke `handler` with `content`, isolating a panic in the handler
    /// future the same way a panicking destination is isolated in the
    /// channel executor: a panic is caught and treated as a failed
    /// invocation rather than unwinding through the poll task.
    async fn invoke_handler(handler: &Handler, content: Content) -> bool {
        let handler = handler.clone();
        match tokio::spawn(async move { (handler)(content).await }).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(error = %err, "handler returned an error");
                false
            }
            Err(join_err) => {
                error!(error = %join_err, "handler panicked");
                false
            }
        }
    }

    async fn ack(&self, handle: &crate::store::Handle, success: bool) {
        if let Err(err) = self.store.acknowledge(handle, success).await {
            error!(error = %err, "acknowledge failed");
        }
    }
}
