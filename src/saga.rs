//! Saga lifecycle policy and saga event-handler decoration.
//!
//! The decoration computes, once at wrap time, everything saga dispatch
//! needs per event: the creation policy, the association key, and a
//! resolver for the association value. Routing events to repository
//! instances and creating/ending sagas is the dispatch collaborator's job;
//! this decoration performs no I/O.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::association::{AssociationResolver, AssociationValue, ResolverRegistry};
use crate::enhancer::HandlerEnhancer;
use crate::error::{ConfigurationError, HandlerError};
use crate::handler::{AttributeKind, HandlerAttribute, MessageHandler};
use crate::message::Message;

/// Whether dispatching an event may create a new saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaCreationPolicy {
    /// Never create; only dispatch to existing instances matching the
    /// association.
    None,
    /// Create one instance if no existing instance matches.
    IfNoneFound,
    /// Always create a new instance regardless of existing matches.
    Always,
}

/// Wraps descriptors carrying a [`HandlerAttribute::SagaEventHandler`]
/// attribute with computed dispatch metadata. Descriptors without the
/// attribute pass through unchanged.
///
/// Resolver strategies come from the enhancer's [`ResolverRegistry`] and
/// are validated against the declared association property immediately;
/// any mistake is fatal here, at wrap time, not at dispatch time.
pub struct SagaHandlerEnhancer {
    resolvers: ResolverRegistry,
}

impl Default for SagaHandlerEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaHandlerEnhancer {
    /// An enhancer with the built-in resolver strategies.
    pub fn new() -> Self {
        Self {
            resolvers: ResolverRegistry::new(),
        }
    }

    /// An enhancer with a caller-supplied resolver registry (custom
    /// strategies included).
    pub fn with_resolvers(resolvers: ResolverRegistry) -> Self {
        Self { resolvers }
    }
}

impl HandlerEnhancer for SagaHandlerEnhancer {
    fn wrap(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn MessageHandler>, ConfigurationError> {
        let (association_property, key_name, resolver_name) =
            match handler.attribute(AttributeKind::SagaEventHandler) {
                Some(HandlerAttribute::SagaEventHandler {
                    association_property,
                    key_name,
                    resolver,
                }) => (
                    association_property.clone(),
                    key_name.clone(),
                    resolver.clone(),
                ),
                _ => return Ok(handler),
            };

        let creation_policy = match handler.attribute(AttributeKind::StartSaga) {
            Some(HandlerAttribute::StartSaga { force_new: true }) => SagaCreationPolicy::Always,
            Some(HandlerAttribute::StartSaga { force_new: false }) => {
                SagaCreationPolicy::IfNoneFound
            }
            _ => SagaCreationPolicy::None,
        };

        // An empty explicit key name falls back to the property name; the
        // key is fixed here for the lifetime of the decorated descriptor.
        let association_key = if key_name.is_empty() {
            association_property.clone()
        } else {
            key_name
        };

        let resolver = self.resolvers.strategy(&resolver_name)?;
        resolver.validate(&association_property, handler.as_ref())?;

        tracing::debug!(
            handler = handler.name(),
            association_key = %association_key,
            policy = ?creation_policy,
            "saga event handler decorated"
        );
        Ok(Arc::new(SagaEventHandler {
            inner: handler,
            association_property,
            association_key,
            creation_policy,
            resolver,
        }))
    }
}

/// A saga event-handler descriptor with computed dispatch metadata.
///
/// Reachable through [`MessageHandler::saga_handler`] on any decorated
/// descriptor chain.
pub struct SagaEventHandler {
    inner: Arc<dyn MessageHandler>,
    association_property: String,
    association_key: String,
    creation_policy: SagaCreationPolicy,
    resolver: Arc<dyn AssociationResolver>,
}

impl SagaEventHandler {
    /// The association key events are routed under.
    pub fn association_key(&self) -> &str {
        &self.association_key
    }

    /// The creation policy attached to this handler.
    pub fn creation_policy(&self) -> SagaCreationPolicy {
        self.creation_policy
    }

    /// Resolve the association value routing `message` to saga instances.
    ///
    /// Returns `None` when the resolver finds no value (including JSON
    /// null), which dispatch must treat differently from an empty resolved
    /// value. Non-string scalars are rendered with their JSON notation.
    pub fn resolve_association_value(&self, message: &Message) -> Option<AssociationValue> {
        let value = self.resolver.resolve(&self.association_property, message)?;
        let rendered = match value {
            Value::Null => return None,
            Value::String(text) => text,
            other => other.to_string(),
        };
        Some(AssociationValue::new(self.association_key.clone(), rendered))
    }
}

impl MessageHandler for SagaEventHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn can_handle(&self, message: &Message) -> bool {
        self.inner.can_handle(message)
    }

    fn attribute(&self, kind: AttributeKind) -> Option<&HandlerAttribute> {
        self.inner.attribute(kind)
    }

    fn payload_properties(&self) -> &BTreeSet<String> {
        self.inner.payload_properties()
    }

    fn invoke(&self, message: &Message) -> Result<Value, HandlerError> {
        self.inner.invoke(message)
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn saga_handler(&self) -> Option<&SagaEventHandler> {
        Some(self)
    }
}
