//! Handler-enhancer contract and the pipeline applying enhancers in order.

use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::handler::MessageHandler;
use crate::interceptor::CommandInterceptorEnhancer;
use crate::saga::SagaHandlerEnhancer;

/// Wraps a base handler descriptor with a guard predicate and/or extra
/// dispatch metadata.
///
/// An enhancer inspects the descriptor's declarative attributes; when its
/// configuration kind is absent it returns the descriptor unchanged
/// (identity pass-through). Configuration mistakes surface here, at wrap
/// time, never at dispatch time.
pub trait HandlerEnhancer: Send + Sync {
    /// Wrap `handler`, or return it unchanged.
    fn wrap(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn MessageHandler>, ConfigurationError>;
}

/// Applies a sequence of enhancers to each registered handler.
///
/// The default pipeline carries the command-interceptor and saga
/// enhancers, in that order.
pub struct EnhancerPipeline {
    enhancers: Vec<Box<dyn HandlerEnhancer>>,
}

impl Default for EnhancerPipeline {
    fn default() -> Self {
        Self::empty()
            .with(CommandInterceptorEnhancer)
            .with(SagaHandlerEnhancer::new())
    }
}

impl EnhancerPipeline {
    /// A pipeline with no enhancers; handlers pass through untouched.
    pub fn empty() -> Self {
        Self {
            enhancers: Vec::new(),
        }
    }

    /// Append an enhancer to the pipeline.
    pub fn with(mut self, enhancer: impl HandlerEnhancer + 'static) -> Self {
        self.enhancers.push(Box::new(enhancer));
        self
    }

    /// Run `handler` through every enhancer in order.
    pub fn enhance(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn MessageHandler>, ConfigurationError> {
        self.enhancers
            .iter()
            .try_fold(handler, |wrapped, enhancer| enhancer.wrap(wrapped))
    }
}
