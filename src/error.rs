//! Crate-wide error hierarchy.
//!
//! Every fallible public operation returns a [`FabricError`] (or a
//! store/listener-scoped alias over the same hierarchy). Handlers, stores and
//! the executor never panic on an expected failure mode — they report through
//! this type instead.

use std::collections::HashMap;

use crate::domain::Message;

/// Result alias used throughout the crate.
pub type Result<T, E = FabricError> = std::result::Result<T, E>;

/// Top-level error type for the fabric crate.
#[derive(thiserror::Error, Debug)]
pub enum FabricError {
    /// Channel construction failed: duplicate name, empty source flow, or a
    /// handler registered without a name.
    #[error("channel configuration error: {0}")]
    Config(String),

    /// A message store operation (store/retrieve/acknowledge) failed.
    #[error("message store error: {0}")]
    Store(#[from] StoreError),

    /// A store listener could not start, stop, or attach a handler.
    #[error("listener error: {0}")]
    Listener(String),

    /// A source processor failed; the pipeline run is aborted before any
    /// destination is invoked.
    #[error("processor {handler_name:?} failed: {message}")]
    Processor {
        /// Name of the processor that failed.
        handler_name: String,
        /// Human-readable description of the failure.
        message: String,
        /// The message as it stood immediately before the failing processor ran.
        failed_message: Box<Message>,
    },

    /// One or more destinations failed during a single pipeline run.
    #[error("{} destination(s) failed: {}", .failures.len(), join_failures(.failures))]
    Destination {
        /// Per-destination error description, keyed by destination name.
        failures: HashMap<String, String>,
        /// The message reflecting all destinations that *did* succeed.
        message: Box<Message>,
    },

    /// A processor/destination router failed while selecting the next step.
    #[error("router {handler_name:?} failed: {message}")]
    Routing {
        /// Name of the router that failed.
        handler_name: String,
        /// Human-readable description of the failure.
        message: String,
    },
}

fn join_failures(failures: &HashMap<String, String>) -> String {
    let mut parts: Vec<String> = failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect();
    parts.sort();
    parts.join(", ")
}

impl FabricError {
    /// The message carried by a processor/destination failure, if any.
    ///
    /// `execute`/`replay` use this to persist the failure-store entry without
    /// re-deriving the message from scratch.
    pub fn into_message(self) -> Option<Message> {
        match self {
            FabricError::Processor { failed_message, .. } => Some(*failed_message),
            FabricError::Destination { message, .. } => Some(*message),
            _ => None,
        }
    }

    /// Borrowing counterpart of [`FabricError::into_message`].
    pub fn message(&self) -> Option<&Message> {
        match self {
            FabricError::Processor { failed_message, .. } => Some(failed_message),
            FabricError::Destination { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Errors raised by [`crate::store::MessageStore`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failure (filesystem store).
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored content could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// `acknowledge` was called with a handle the store does not recognize,
    /// or that was already acknowledged.
    #[error("unknown or already-acknowledged handle: {0}")]
    UnknownHandle(String),

    /// AMQP broker-level failure.
    #[cfg(feature = "amqp")]
    #[error("AMQP broker error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Catch-all for backend-specific failures that don't fit the above.
    #[error("store backend error: {0}")]
    Backend(String),
}
