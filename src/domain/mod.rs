//! Domain types: the message model and handler abstractions every channel,
//! store and listener is built from.

mod context;
mod handler;
mod message;

pub use context::MessageContext;
pub use handler::{Destination, DestinationsFlow, HandlerKind, Processor};
pub(crate) use handler::ProcessorOutcome;
pub use message::{Content, ErrorInfo, Message, SKIP_DESTINATIONS_KEY};
