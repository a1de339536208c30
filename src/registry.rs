//! Handler registry: enhancement at registration time, deterministic
//! dispatch-target resolution.

use std::sync::Arc;

use serde_json::Value;

use crate::enhancer::EnhancerPipeline;
use crate::error::{ConfigurationError, DispatchError};
use crate::handler::MessageHandler;
use crate::message::Message;

/// Registry of enhanced handler descriptors.
///
/// Handlers pass through the enhancer pipeline as they are registered, so
/// configuration mistakes abort startup. Resolution is deterministic:
/// among the descriptors accepting a message, the highest explicit
/// priority wins and ties break on registration order (first registered
/// first).
pub struct HandlerRegistry {
    pipeline: EnhancerPipeline,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// A registry with the default enhancer pipeline.
    pub fn new() -> Self {
        Self::with_pipeline(EnhancerPipeline::default())
    }

    /// A registry with a caller-supplied enhancer pipeline.
    pub fn with_pipeline(pipeline: EnhancerPipeline) -> Self {
        Self {
            pipeline,
            handlers: Vec::new(),
        }
    }

    /// Enhance and register a handler descriptor.
    pub fn register(
        &mut self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ConfigurationError> {
        let enhanced = self.pipeline.enhance(handler)?;
        tracing::debug!(handler = enhanced.name(), "handler registered");
        self.handlers.push(enhanced);
        Ok(())
    }

    /// Every descriptor accepting `message`, best first.
    ///
    /// Saga events fan out to all matching handlers; commands normally
    /// take only the first entry (see [`resolve`](Self::resolve)).
    pub fn resolve_all(&self, message: &Message) -> Vec<Arc<dyn MessageHandler>> {
        let mut matching: Vec<&Arc<dyn MessageHandler>> = self
            .handlers
            .iter()
            .filter(|handler| handler.can_handle(message))
            .collect();
        // Stable sort keeps registration order within equal priorities.
        matching.sort_by_key(|handler| std::cmp::Reverse(handler.priority()));
        matching.into_iter().map(Arc::clone).collect()
    }

    /// The single dispatch target for `message`, if any descriptor
    /// accepts it.
    pub fn resolve(&self, message: &Message) -> Option<Arc<dyn MessageHandler>> {
        self.resolve_all(message).into_iter().next()
    }

    /// Resolve and invoke the dispatch target for `message`.
    pub fn dispatch(&self, message: &Message) -> Result<Value, DispatchError> {
        let handler = self
            .resolve(message)
            .ok_or_else(|| DispatchError::NoHandlerFound {
                name: message.name().to_string(),
            })?;
        tracing::debug!(
            handler = handler.name(),
            message = message.name(),
            message_id = message.id(),
            "dispatching message"
        );
        Ok(handler.invoke(message)?)
    }
}
