//! A reliable message-processing fabric: channels built from sequential
//! source processors feeding parallel destinations, pluggable message
//! stores, polling listeners, and replay-driven dead-lettering.

pub mod channel;
pub mod domain;
pub mod error;
pub mod listener;
pub mod store;

pub use channel::{Channel, ChannelBuilder, ChannelRegistry, ExecutionResult, FailureConfig};
pub use domain::{Content, Destination, DestinationsFlow, ErrorInfo, HandlerKind, Message, MessageContext, Processor};
pub use error::{FabricError, Result, StoreError};
pub use listener::{ListenerConfig, StoreListener};
pub use store::{Handle, InMemoryStore, LocalDirectoryStore, MessageStore, StoreOrder};

#[cfg(feature = "amqp")]
pub use store::AmqpBrokerStore;
