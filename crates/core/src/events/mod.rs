//! Outbound audit events and their publisher.

pub mod event;
pub mod publisher;

pub use event::{AuditEvent, AuditPayload, EventMetadata, EVENT_VERSION, SOURCE_SERVICE};
pub use publisher::{
    EventPublisher, InMemoryEventPublisher, NoopEventPublisher, RedisStreamPublisher,
};
