//! Command-interceptor decoration: pattern-gated command handling.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::enhancer::HandlerEnhancer;
use crate::error::{ConfigurationError, HandlerError};
use crate::handler::{AttributeKind, HandlerAttribute, MessageHandler};
use crate::message::Message;
use crate::saga::SagaEventHandler;

/// Wraps descriptors carrying a [`HandlerAttribute::CommandInterceptor`]
/// attribute with a compiled full-string name gate. Descriptors without
/// the attribute pass through unchanged; this layer is a pure,
/// side-effect-free filter.
pub struct CommandInterceptorEnhancer;

impl HandlerEnhancer for CommandInterceptorEnhancer {
    fn wrap(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn MessageHandler>, ConfigurationError> {
        let pattern = match handler.attribute(AttributeKind::CommandInterceptor) {
            Some(HandlerAttribute::CommandInterceptor {
                command_name_pattern,
            }) => command_name_pattern.clone(),
            _ => return Ok(handler),
        };
        let compiled = compile_full_match(&pattern)?;
        tracing::debug!(
            handler = handler.name(),
            pattern = %pattern,
            "command name gate attached"
        );
        Ok(Arc::new(CommandInterceptorHandler {
            pattern: compiled,
            inner: handler,
        }))
    }
}

/// Compile `pattern` so that matching requires the full command name, not
/// a substring hit.
fn compile_full_match(pattern: &str) -> Result<Regex, ConfigurationError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
        ConfigurationError::InvalidCommandNamePattern {
            pattern: pattern.to_string(),
            source,
        }
    })
}

struct CommandInterceptorHandler {
    pattern: Regex,
    inner: Arc<dyn MessageHandler>,
}

impl MessageHandler for CommandInterceptorHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn can_handle(&self, message: &Message) -> bool {
        // The wrapped descriptor's own type check runs first, so messages
        // without a command name never reach the pattern.
        self.inner.can_handle(message)
            && message
                .command_name()
                .is_some_and(|name| self.pattern.is_match(name))
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
        self.inner.saga_handler()
    }
}
