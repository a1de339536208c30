//! Handler descriptor contract and immutable registration records.
//!
//! Handlers are not discovered reflectively; the runtime registers them at
//! startup through [`HandlerBuilder`], producing immutable
//! [`RegisteredHandler`] records. Declarative configuration rides along as
//! [`HandlerAttribute`]s keyed by [`AttributeKind`], which the enhancer
//! pipeline reads to decide how to decorate each descriptor.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;
use crate::message::{Message, MessageKind};
use crate::saga::SagaEventHandler;

/// Configuration-kind tag keying declarative handler metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// The handler intercepts commands, gated by a name pattern.
    CommandInterceptor,
    /// The handler is a saga event handler with association routing.
    SagaEventHandler,
    /// Events reaching the handler may start a new saga instance.
    StartSaga,
}

/// A piece of declarative metadata attached to a handler at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAttribute {
    /// Gate command handling behind a full-string name pattern.
    CommandInterceptor {
        /// Regular expression the whole command name must match.
        command_name_pattern: String,
    },
    /// Route events to saga instances by association value.
    SagaEventHandler {
        /// Payload/metadata property holding the association value.
        association_property: String,
        /// Explicit association key name; empty means "use the property
        /// name".
        key_name: String,
        /// Name of the registered resolver strategy to use.
        resolver: String,
    },
    /// Mark the handler as a saga starting point.
    StartSaga {
        /// Create a new instance even when one already matches.
        force_new: bool,
    },
}

impl HandlerAttribute {
    /// The configuration kind this attribute is keyed under.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::CommandInterceptor { .. } => AttributeKind::CommandInterceptor,
            Self::SagaEventHandler { .. } => AttributeKind::SagaEventHandler,
            Self::StartSaga { .. } => AttributeKind::StartSaga,
        }
    }
}

/// Which message category a base descriptor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledKind {
    /// Commands only.
    Command,
    /// Events, including domain events.
    Event,
}

impl HandledKind {
    fn accepts(self, kind: &MessageKind) -> bool {
        match self {
            Self::Command => matches!(kind, MessageKind::Command),
            Self::Event => matches!(kind, MessageKind::Event | MessageKind::DomainEvent { .. }),
        }
    }
}

/// The target function a descriptor dispatches to.
pub type HandlerFn = Arc<dyn Fn(&Message) -> Result<Value, HandlerError> + Send + Sync>;

/// A handler descriptor: a dispatch target plus its capability set.
///
/// Decorating descriptors wrap a base descriptor and narrow or annotate its
/// capabilities. Every query a decorator does not itself answer must be
/// delegated to the wrapped descriptor, so decoration stays open: wrapping
/// never silently replaces behavior.
pub trait MessageHandler: Send + Sync {
    /// The handler's registered name.
    fn name(&self) -> &str;

    /// Whether this descriptor can handle the given message.
    fn can_handle(&self, message: &Message) -> bool;

    /// Declarative metadata lookup keyed by configuration kind.
    fn attribute(&self, kind: AttributeKind) -> Option<&HandlerAttribute>;

    /// The top-level payload property names the handler declares. Used at
    /// wrap time to validate association properties without a live message.
    fn payload_properties(&self) -> &BTreeSet<String>;

    /// Invoke the dispatch target.
    fn invoke(&self, message: &Message) -> Result<Value, HandlerError>;

    /// Explicit dispatch priority; higher wins, ties break on registration
    /// order.
    fn priority(&self) -> i32 {
        0
    }

    /// View of the saga decoration, when present. Base descriptors return
    /// `None`; decorators delegate to the wrapped descriptor.
    fn saga_handler(&self) -> Option<&SagaEventHandler> {
        None
    }
}

impl std::fmt::Debug for dyn MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn MessageHandler")
            .field("name", &self.name())
            .finish()
    }
}

/// Immutable base handler descriptor produced by [`HandlerBuilder`].
pub struct RegisteredHandler {
    name: String,
    handles: HandledKind,
    message_names: BTreeSet<String>,
    payload_properties: BTreeSet<String>,
    attributes: Vec<HandlerAttribute>,
    priority: i32,
    target: HandlerFn,
}

impl MessageHandler for RegisteredHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, message: &Message) -> bool {
        self.handles.accepts(message.kind())
            && (self.message_names.is_empty() || self.message_names.contains(message.name()))
    }

    fn attribute(&self, kind: AttributeKind) -> Option<&HandlerAttribute> {
        self.attributes.iter().find(|attr| attr.kind() == kind)
    }

    fn payload_properties(&self) -> &BTreeSet<String> {
        &self.payload_properties
    }

    fn invoke(&self, message: &Message) -> Result<Value, HandlerError> {
        (self.target)(message)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// Builder assembling a [`RegisteredHandler`] at startup.
///
/// ```
/// use cqrs_dispatch::{HandlerBuilder, MessageHandler, Message};
/// use serde_json::json;
///
/// let handler = HandlerBuilder::command("create-order")
///     .message_name("CreateOrder")
///     .payload_property("orderId")
///     .handler(|message| Ok(json!({"accepted": message.name()})))
///     .build();
///
/// assert!(handler.can_handle(&Message::command("CreateOrder", json!({}))));
/// ```
pub struct HandlerBuilder {
    name: String,
    handles: HandledKind,
    message_names: BTreeSet<String>,
    payload_properties: BTreeSet<String>,
    attributes: Vec<HandlerAttribute>,
    priority: i32,
    target: HandlerFn,
}

impl HandlerBuilder {
    fn new(name: impl Into<String>, handles: HandledKind) -> Self {
        Self {
            name: name.into(),
            handles,
            message_names: BTreeSet::new(),
            payload_properties: BTreeSet::new(),
            attributes: Vec::new(),
            priority: 0,
            // The default target acknowledges without producing output.
            target: Arc::new(|_| Ok(Value::Null)),
        }
    }

    /// Start a descriptor for a command handler named `name`.
    pub fn command(name: impl Into<String>) -> Self {
        Self::new(name, HandledKind::Command)
    }

    /// Start a descriptor for an event handler named `name`. Accepts both
    /// plain and domain events.
    pub fn event(name: impl Into<String>) -> Self {
        Self::new(name, HandledKind::Event)
    }

    /// Accept only messages with this name. May be called repeatedly to
    /// accept several names; never calling it accepts any name.
    pub fn message_name(mut self, name: impl Into<String>) -> Self {
        self.message_names.insert(name.into());
        self
    }

    /// Declare a top-level payload property the handled payload carries.
    pub fn payload_property(mut self, property: impl Into<String>) -> Self {
        self.payload_properties.insert(property.into());
        self
    }

    /// Attach a declarative attribute. One attribute per kind; attaching a
    /// second of the same kind replaces the first.
    pub fn attribute(mut self, attribute: HandlerAttribute) -> Self {
        self.attributes.retain(|existing| existing.kind() != attribute.kind());
        self.attributes.push(attribute);
        self
    }

    /// Set the explicit dispatch priority (default 0).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dispatch target.
    pub fn handler(
        mut self,
        target: impl Fn(&Message) -> Result<Value, HandlerError> + Send + Sync + 'static,
    ) -> Self {
        self.target = Arc::new(target);
        self
    }

    /// Finish the immutable descriptor record.
    pub fn build(self) -> RegisteredHandler {
        RegisteredHandler {
            name: self.name,
            handles: self.handles,
            message_names: self.message_names,
            payload_properties: self.payload_properties,
            attributes: self.attributes,
            priority: self.priority,
            target: self.target,
        }
    }
}
