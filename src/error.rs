//! Crate-level error types for configuration, dispatch, and snapshot triggering.

/// Error raised while wrapping a handler descriptor at registration time.
///
/// Configuration errors are fatal at setup: they identify a declarative
/// mistake in a handler's registration (a malformed pattern, an unknown
/// resolver strategy, an association property the payload cannot supply)
/// and must abort startup rather than surface per-message.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The command-name pattern attached to a command interceptor failed
    /// to compile as a regular expression.
    #[error("invalid command name pattern `{pattern}`: {source}")]
    InvalidCommandNamePattern {
        /// The pattern string as declared at registration.
        pattern: String,
        /// The underlying regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// A saga event handler names an association resolver strategy that no
    /// factory has been registered for.
    #[error("association resolver `{strategy}` is not registered")]
    UnknownAssociationResolver {
        /// The strategy name as declared at registration.
        strategy: String,
    },

    /// The association property cannot be resolved from the payload shape
    /// the handler declares.
    #[error(
        "association property `{property}` cannot be resolved from the payload declared by handler `{handler}`"
    )]
    UnresolvableAssociationProperty {
        /// The declared association property name.
        property: String,
        /// The name of the offending handler.
        handler: String,
    },
}

/// Error returned when a handler function rejects or fails a message.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler rejected the message on domain grounds.
    #[error("handler rejected message: {0}")]
    Rejected(String),

    /// The message payload did not have the shape the handler expects.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Error returned when resolving or invoking a dispatch target fails.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No registered handler accepted the message.
    #[error("no handler found for message `{name}`")]
    NoHandlerFound {
        /// The name of the undispatchable message.
        name: String,
    },

    /// The selected handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Precondition violation raised by a snapshot trigger.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// `event_handled` was called outside a unit of work. The event is
    /// still counted, but there is no boundary to attach a listener to;
    /// an event-sourced handler is expected to always execute within a
    /// unit of work.
    #[error("no unit of work is active: event-sourced handlers must execute within a unit of work")]
    NoActiveUnitOfWork,

    /// The trigger crossed its threshold while detached from a
    /// snapshotter. Happens only when a deserialized trigger is used
    /// without passing it through `reconfigure` first.
    #[error("snapshot trigger is not attached to a snapshotter; reconfigure it after restoring")]
    NotAttached,
}
