//! Dispatch and consistency core for message-driven (CQRS/event-sourced)
//! runtimes: handler selection and decoration, saga association routing,
//! and unit-of-work-bound snapshot triggering.

mod association;
pub use association::{
    AssociationResolver, AssociationValue, METADATA_RESOLVER, MetadataAssociationResolver,
    PAYLOAD_RESOLVER, PayloadAssociationResolver, ResolverRegistry,
};
mod enhancer;
pub use enhancer::{EnhancerPipeline, HandlerEnhancer};
mod error;
pub use error::{ConfigurationError, DispatchError, HandlerError, TriggerError};
mod handler;
pub use handler::{
    AttributeKind, HandledKind, HandlerAttribute, HandlerBuilder, HandlerFn, MessageHandler,
    RegisteredHandler,
};
mod interceptor;
pub use interceptor::CommandInterceptorEnhancer;
mod message;
pub use message::{Message, MessageKind, Metadata};
mod registry;
pub use registry::HandlerRegistry;
mod saga;
pub use saga::{SagaCreationPolicy, SagaEventHandler, SagaHandlerEnhancer};
mod snapshot;
pub use snapshot::{
    EventCountSnapshotTrigger, EventCountSnapshotTriggerDefinition, NoSnapshotTrigger,
    NoSnapshotTriggerDefinition, SnapshotTrigger, SnapshotTriggerDefinition, Snapshotter,
};
mod unit_of_work;
pub use unit_of_work::{CurrentUnitOfWork, Phase, UnitOfWork};
