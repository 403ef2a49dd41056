//! The [`Message`] record: the unit of content that flows through a channel
//! and the durable shape written to a failure store.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schemaless content carried by a message.
///
/// Content crosses store and destination boundaries as a JSON-serializable
/// tree rather than a statically-typed payload, matching the dynamic
/// `anydata` content model processors are written against.
pub type Content = Value;

/// The reserved metadata key the executor uses to track destinations that
/// have already succeeded for this logical message.
pub const SKIP_DESTINATIONS_KEY: &str = "skipDestinations";

/// Error information captured when a pipeline run fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Human-readable summary of the failure.
    pub message: String,
    /// Per-handler error descriptions, keyed by handler name.
    #[serde(default)]
    pub causes: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Build error info for a single failing handler.
    pub fn single(handler_name: impl Into<String>, description: impl Into<String>) -> Self {
        let handler_name = handler_name.into();
        let description = description.into();
        let mut causes = BTreeMap::new();
        causes.insert(handler_name.clone(), description.clone());
        Self {
            message: format!("{handler_name}: {description}"),
            causes,
        }
    }

    /// Build error info from multiple failing destinations.
    pub fn from_destination_failures(failures: &HashMap<String, String>) -> Self {
        let mut causes = BTreeMap::new();
        for (name, err) in failures {
            causes.insert(name.clone(), err.clone());
        }
        let mut names: Vec<&String> = causes.keys().collect();
        names.sort();
        let message = names
            .iter()
            .map(|n| format!("{n}: {}", causes[*n]))
            .collect::<Vec<_>>()
            .join(", ");
        Self { message, causes }
    }
}

/// A persisted message: content plus the bookkeeping needed to replay it.
///
/// `id` is assigned exactly once, at the first `execute`, and survives
/// serialization into a failure store and back. `metadata.skipDestinations`
/// is strictly append-only across successive replays of the same logical
/// message — see [`Message::skip_destinations`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque, time-ordered, stable identifier.
    pub id: String,
    /// The message content.
    pub content: Content,
    /// Free-form metadata. Always contains the reserved `skipDestinations`
    /// key once the message has passed through a channel.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Free-form properties, mutated by processors.
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    /// Populated when the last run of this message failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}

impl Message {
    /// Create a fresh message with a newly assigned id and an empty skip set.
    pub fn new(id: String, content: Content) -> Self {
        let mut msg = Self {
            id,
            content,
            metadata: serde_json::Map::new(),
            properties: serde_json::Map::new(),
            error_info: None,
        };
        msg.set_skip_destinations(Vec::new());
        msg
    }

    /// Deep-clone the message.
    ///
    /// Content always crosses a store or destination boundary through a
    /// clone so callers never alias a caller-owned payload graph.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    /// The set of destinations already known to have succeeded.
    pub fn skip_destinations(&self) -> Vec<String> {
        self.metadata
            .get(SKIP_DESTINATIONS_KEY)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Overwrite the skip-destinations set in metadata.
    pub fn set_skip_destinations(&mut self, names: Vec<String>) {
        let arr = names.into_iter().map(Value::String).collect();
        self.metadata
            .insert(SKIP_DESTINATIONS_KEY.to_string(), Value::Array(arr));
    }

    /// Append destination names to the skip set, preserving append-only
    /// monotonicity across replays.
    pub fn add_skip_destinations<I: IntoIterator<Item = String>>(&mut self, names: I) {
        let mut current = self.skip_destinations();
        for name in names {
            if !current.contains(&name) {
                current.push(name);
            }
        }
        self.set_skip_destinations(current);
    }

    /// Clear previous error info while preserving the skip-destinations set.
    pub fn clean_error_info_for_replay(&mut self) {
        self.error_info = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_has_empty_skip_set() {
        let msg = Message::new("id-1".into(), Value::String("hi".into()));
        assert!(msg.skip_destinations().is_empty());
    }

    #[test]
    fn skip_destinations_append_only_and_deduped() {
        let mut msg = Message::new("id-1".into(), Value::Null);
        msg.add_skip_destinations(["A".to_string()]);
        msg.add_skip_destinations(["A".to_string(), "B".to_string()]);
        let mut skip = msg.skip_destinations();
        skip.sort();
        assert_eq!(skip, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn clean_error_info_preserves_skip_set() {
        let mut msg = Message::new("id-1".into(), Value::Null);
        msg.add_skip_destinations(["A".to_string()]);
        msg.error_info = Some(ErrorInfo::single("B", "boom"));
        msg.clean_error_info_for_replay();
        assert!(msg.error_info.is_none());
        assert_eq!(msg.skip_destinations(), vec!["A".to_string()]);
    }

    #[test]
    fn round_trips_through_json_preserving_extra_fields() {
        let mut msg = Message::new("id-1".into(), serde_json::json!({"a": 1}));
        msg.properties.insert("k".into(), Value::String("v".into()));
        msg.metadata.insert("extra".into(), Value::Bool(true));
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.metadata.get("extra"), Some(&Value::Bool(true)));
        assert_eq!(decoded.properties.get("k"), Some(&Value::String("v".into())));
    }

    #[test]
    fn error_info_from_destination_failures_is_comma_joined() {
        let mut failures = HashMap::new();
        failures.insert("A".to_string(), "boom-a".to_string());
        failures.insert("B".to_string(), "boom-b".to_string());
        let info = ErrorInfo::from_destination_failures(&failures);
        assert_eq!(info.message, "A: boom-a, B: boom-b");
    }
}
