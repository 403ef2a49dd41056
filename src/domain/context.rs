//! [`MessageContext`]: the mutable run-scoped wrapper processors operate on.

use serde_json::Value;

use super::message::{Content, ErrorInfo, Message};

/// A mutable wrapper around a [`Message`] used during one `execute`/`replay`
/// run.
///
/// A context is owned by its run: it is never shared across concurrent runs.
/// Handing state to destinations' parallel tasks is always done through a
/// clone, so destinations cannot observe each other's mutations.
#[derive(Debug, Clone)]
pub struct MessageContext {
    message: Message,
}

impl MessageContext {
    /// Start a run from a fresh message (a new `execute` call).
    pub fn new(id: String, content: Content, skip_destinations: Vec<String>) -> Self {
        let mut message = Message::new(id, content);
        message.set_skip_destinations(skip_destinations);
        Self { message }
    }

    /// Start a run from a previously persisted message (a `replay` call).
    ///
    /// Clears `errorInfo` while preserving the skip-destinations set,
    /// matching `cleanErrorInfoForReplay`.
    pub fn from_message(mut message: Message) -> Self {
        message.clean_error_info_for_replay();
        Self { message }
    }

    /// The message id, assigned once at the start of the run.
    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Current content.
    pub fn content(&self) -> &Content {
        &self.message.content
    }

    /// Replace the content (a transformer's effect).
    pub fn set_content(&mut self, content: Content) {
        self.message.content = content;
    }

    /// Mutable access to free-form properties.
    pub fn properties_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        &mut self.message.properties
    }

    /// Read-only access to free-form properties.
    pub fn properties(&self) -> &serde_json::Map<String, Value> {
        &self.message.properties
    }

    /// Mutable access to metadata (excluding direct mutation of the reserved
    /// skip-destinations key — use [`MessageContext::add_skip_destinations`]
    /// for that).
    pub fn metadata_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        &mut self.message.metadata
    }

    /// Read-only access to metadata.
    pub fn metadata(&self) -> &serde_json::Map<String, Value> {
        &self.message.metadata
    }

    /// Destinations already known to have succeeded for this logical message.
    pub fn skip_destinations(&self) -> Vec<String> {
        self.message.skip_destinations()
    }

    /// Record that `name` succeeded in this run.
    pub fn add_skip_destination(&mut self, name: String) {
        self.message.add_skip_destinations([name]);
    }

    /// Record error info for this run.
    pub fn set_error_info(&mut self, error_info: ErrorInfo) {
        self.message.error_info = Some(error_info);
    }

    /// Snapshot the current state, for capture before a processor call.
    ///
    /// If the processor that follows fails, this snapshot (not any later
    /// mutation) is what gets persisted to the failure store.
    pub fn snapshot(&self) -> Message {
        self.message.deep_clone()
    }

    /// Export the current state as a [`Message`] for persistence or as the
    /// final pipeline result.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Export a clone of the current state as a [`Message`].
    pub fn to_message(&self) -> Message {
        self.message.deep_clone()
    }
}
