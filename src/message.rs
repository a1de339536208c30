//! Message data model: commands, events, and domain events.
//!
//! A [`Message`] is the unit everything in this crate dispatches on. It is
//! consumed read-only: a stable identifier, a name/type tag, a type-erased
//! JSON payload, and ordered metadata. Domain events additionally carry the
//! identifier of the aggregate that owns them and a monotonically increasing
//! sequence number within that aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ordered message metadata. Keys are unique; iteration order is stable.
pub type Metadata = BTreeMap<String, Value>;

/// Discriminates the three message categories the dispatch core routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// An instruction to change state; carries a command name.
    Command,
    /// A plain notification that something happened.
    Event,
    /// An event owned by an event-sourced aggregate.
    DomainEvent {
        /// Identifier of the aggregate instance that produced the event.
        aggregate_id: String,
        /// Monotonically increasing sequence number within that aggregate.
        sequence: u64,
    },
}

/// An immutable, decoded message as delivered by the transport layer.
///
/// Construction goes through [`Message::command`], [`Message::event`], or
/// [`Message::domain_event`], each of which generates a fresh UUID
/// identifier; [`with_id`](Message::with_id) overrides it for replay and
/// tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: String,
    name: String,
    payload: Value,
    metadata: Metadata,
    kind: MessageKind,
}

impl Message {
    fn new(name: impl Into<String>, payload: Value, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            metadata: Metadata::new(),
            kind,
        }
    }

    /// Build a command message. The `name` doubles as the command name
    /// that pattern-gated interceptors match against.
    pub fn command(name: impl Into<String>, payload: Value) -> Self {
        Self::new(name, payload, MessageKind::Command)
    }

    /// Build a plain event message.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::new(name, payload, MessageKind::Event)
    }

    /// Build a domain event owned by the aggregate instance `aggregate_id`
    /// at position `sequence` in its history.
    pub fn domain_event(
        name: impl Into<String>,
        aggregate_id: impl Into<String>,
        sequence: u64,
        payload: Value,
    ) -> Self {
        Self::new(
            name,
            payload,
            MessageKind::DomainEvent {
                aggregate_id: aggregate_id.into(),
                sequence,
            },
        )
    }

    /// Replace the generated identifier with an explicit one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a single metadata entry. Inserting an existing key replaces
    /// its value (keys are unique).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The unique message identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The name/type tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type-erased payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The full metadata map.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// A single metadata value, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// The message category.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// The command name, for command messages only. Non-command messages
    /// have no command name, which is what keeps them away from
    /// command-name pattern checks.
    pub fn command_name(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Command => Some(&self.name),
            _ => None,
        }
    }

    /// The owning aggregate identifier, for domain events only.
    pub fn aggregate_id(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::DomainEvent { aggregate_id, .. } => Some(aggregate_id),
            _ => None,
        }
    }

    /// The sequence number within the owning aggregate, for domain events
    /// only.
    pub fn sequence(&self) -> Option<u64> {
        match &self.kind {
            MessageKind::DomainEvent { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }
}
