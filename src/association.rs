//! Association values and the resolver strategies that compute them.
//!
//! An association value is the (key, value) pair that routes an event to
//! the saga instance(s) sharing that value. Resolver strategies are
//! validated once at wrap time and cached per strategy name; instances are
//! stateless after construction and shared freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::handler::MessageHandler;
use crate::message::Message;

/// The (name, value) pair used to route an event to saga instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationValue {
    /// The association key name.
    pub key: String,
    /// The associated value, rendered as a string.
    pub value: String,
}

impl AssociationValue {
    /// Build an association value from a key and a rendered value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Strategy computing an association value from a message.
///
/// `validate` runs once, at wrap time, and must detect an unresolvable
/// property without a live message; per-message work happens in `resolve`.
pub trait AssociationResolver: Send + Sync {
    /// Check, against the handler's declared payload shape, that
    /// `property_name` will be resolvable at dispatch time.
    fn validate(
        &self,
        property_name: &str,
        handler: &dyn MessageHandler,
    ) -> Result<(), ConfigurationError>;

    /// Resolve the association value from a live message. `None` means no
    /// value could be resolved, which is distinct from resolving an empty
    /// value.
    fn resolve(&self, property_name: &str, message: &Message) -> Option<Value>;
}

impl std::fmt::Debug for dyn AssociationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AssociationResolver")
    }
}

/// Resolves the association value from a named top-level payload property.
#[derive(Debug, Default)]
pub struct PayloadAssociationResolver;

impl AssociationResolver for PayloadAssociationResolver {
    fn validate(
        &self,
        property_name: &str,
        handler: &dyn MessageHandler,
    ) -> Result<(), ConfigurationError> {
        if handler.payload_properties().contains(property_name) {
            Ok(())
        } else {
            Err(ConfigurationError::UnresolvableAssociationProperty {
                property: property_name.to_string(),
                handler: handler.name().to_string(),
            })
        }
    }

    fn resolve(&self, property_name: &str, message: &Message) -> Option<Value> {
        message.payload().get(property_name).cloned()
    }
}

/// Expects the association value to be supplied out-of-band in message
/// metadata rather than read from the payload.
#[derive(Debug, Default)]
pub struct MetadataAssociationResolver;

impl AssociationResolver for MetadataAssociationResolver {
    fn validate(
        &self,
        _property_name: &str,
        _handler: &dyn MessageHandler,
    ) -> Result<(), ConfigurationError> {
        // Metadata carries no startup-time shape to validate against.
        Ok(())
    }

    fn resolve(&self, property_name: &str, message: &Message) -> Option<Value> {
        message.metadata_value(property_name).cloned()
    }
}

type ResolverFactory = Box<dyn Fn() -> Arc<dyn AssociationResolver> + Send + Sync>;

/// Registry of resolver strategies with a per-strategy instance cache.
///
/// The built-in strategies are registered under
/// [`PAYLOAD_RESOLVER`] and [`METADATA_RESOLVER`]. Custom strategies are
/// added with [`register`](ResolverRegistry::register); wrapping a handler
/// that names an unregistered strategy is a fatal configuration error.
pub struct ResolverRegistry {
    factories: HashMap<String, ResolverFactory>,
    instances: Mutex<HashMap<String, Arc<dyn AssociationResolver>>>,
}

/// Name of the built-in payload-property resolver strategy.
pub const PAYLOAD_RESOLVER: &str = "payload";

/// Name of the built-in metadata resolver strategy.
pub const METADATA_RESOLVER: &str = "metadata";

impl Default for ResolverRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
        };
        registry.register(PAYLOAD_RESOLVER, || Arc::new(PayloadAssociationResolver));
        registry.register(METADATA_RESOLVER, || Arc::new(MetadataAssociationResolver));
        registry
    }
}

impl ResolverRegistry {
    /// A registry with the built-in strategies registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a strategy factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn AssociationResolver> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Fetch the cached instance for `name`, instantiating it on first
    /// use. Unknown names are a configuration error identifying the
    /// strategy.
    pub fn strategy(&self, name: &str) -> Result<Arc<dyn AssociationResolver>, ConfigurationError> {
        let mut instances = self.instances.lock().expect("resolver cache lock poisoned");
        if let Some(instance) = instances.get(name) {
            return Ok(Arc::clone(instance));
        }
        let factory =
            self.factories
                .get(name)
                .ok_or_else(|| ConfigurationError::UnknownAssociationResolver {
                    strategy: name.to_string(),
                })?;
        let instance = factory();
        instances.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerBuilder;
    use serde_json::json;

    #[test]
    fn payload_resolver_reads_top_level_property() {
        let message = Message::domain_event("OrderCreated", "o-1", 0, json!({"orderId": "o-1"}));
        let resolved = PayloadAssociationResolver.resolve("orderId", &message);
        assert_eq!(resolved, Some(json!("o-1")));
    }

    #[test]
    fn payload_resolver_misses_absent_property() {
        let message = Message::domain_event("OrderCreated", "o-1", 0, json!({"total": 10}));
        assert_eq!(PayloadAssociationResolver.resolve("orderId", &message), None);
    }

    #[test]
    fn payload_resolver_misses_non_object_payload() {
        let message = Message::domain_event("OrderCreated", "o-1", 0, json!("scalar"));
        assert_eq!(PayloadAssociationResolver.resolve("orderId", &message), None);
    }

    #[test]
    fn payload_resolver_validates_declared_shape() {
        let declared = HandlerBuilder::event("h").payload_property("orderId").build();
        let undeclared = HandlerBuilder::event("h").build();

        assert!(PayloadAssociationResolver.validate("orderId", &declared).is_ok());
        let err = PayloadAssociationResolver
            .validate("orderId", &undeclared)
            .expect_err("undeclared property should fail validation");
        assert!(matches!(
            err,
            ConfigurationError::UnresolvableAssociationProperty { .. }
        ));
    }

    #[test]
    fn metadata_resolver_reads_metadata() {
        let message =
            Message::event("E", json!({})).with_metadata("orderId", json!("o-9"));
        assert_eq!(
            MetadataAssociationResolver.resolve("orderId", &message),
            Some(json!("o-9"))
        );
        assert_eq!(MetadataAssociationResolver.resolve("absent", &message), None);
    }

    #[test]
    fn metadata_resolver_validates_unconditionally() {
        let handler = HandlerBuilder::event("h").build();
        assert!(MetadataAssociationResolver.validate("anything", &handler).is_ok());
    }

    #[test]
    fn registry_caches_one_instance_per_strategy() {
        let registry = ResolverRegistry::new();
        let first = registry.strategy(PAYLOAD_RESOLVER).expect("known strategy");
        let second = registry.strategy(PAYLOAD_RESOLVER).expect("known strategy");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn registry_rejects_unknown_strategy() {
        let registry = ResolverRegistry::new();
        let err = registry
            .strategy("bespoke")
            .expect_err("unknown strategy should be a configuration error");
        assert!(matches!(
            err,
            ConfigurationError::UnknownAssociationResolver { strategy } if strategy == "bespoke"
        ));
    }

    #[test]
    fn registry_accepts_custom_strategies() {
        struct FixedResolver;
        impl AssociationResolver for FixedResolver {
            fn validate(
                &self,
                _property_name: &str,
                _handler: &dyn MessageHandler,
            ) -> Result<(), ConfigurationError> {
                Ok(())
            }
            fn resolve(&self, _property_name: &str, _message: &Message) -> Option<Value> {
                Some(json!("fixed"))
            }
        }

        let mut registry = ResolverRegistry::new();
        registry.register("fixed", || Arc::new(FixedResolver));

        let resolver = registry.strategy("fixed").expect("registered strategy");
        let message = Message::event("E", json!({}));
        assert_eq!(resolver.resolve("any", &message), Some(json!("fixed")));
    }
}
