//! Audit event publication.
//!
//! Publication is fire-and-forget: the emitting operation never fails or
//! blocks because the broker is slow or down. The Redis Streams publisher
//! enqueues onto a bounded channel drained by a background task; a full
//! queue drops the event with a warning.

use super::event::AuditEvent;
use crate::config::TopicsConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sink for audit events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hand off an event for publication. Never returns an error; failures
    /// are logged by the implementation.
    async fn publish(&self, event: AuditEvent);
}

/// Publisher that discards everything. Used where auditing is disabled.
#[derive(Debug, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: AuditEvent) {}
}

/// Publisher that records events in memory. Test double.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("publisher lock poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: AuditEvent) {
        self.events.lock().expect("publisher lock poisoned").push(event);
    }
}

const QUEUE_CAPACITY: usize = 1024;

/// Redis Streams publisher.
///
/// Events are XADDed as a single `payload` field holding the JSON-serialized
/// event, onto the per-kind stream when configured and the shared audit
/// stream otherwise.
pub struct RedisStreamPublisher {
    sender: mpsc::Sender<AuditEvent>,
}

impl RedisStreamPublisher {
    /// Start the drain task and return the publisher handle.
    pub fn spawn(redis: ConnectionManager, topics: TopicsConfig) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            let mut conn = redis;
            while let Some(event) = receiver.recv().await {
                let stream = stream_for(&topics, event.kind());
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, kind = event.kind(), "Failed to serialize audit event");
                        continue;
                    }
                };

                let result: Result<String, redis::RedisError> = redis::cmd("XADD")
                    .arg(stream)
                    .arg("*")
                    .arg("payload")
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await;

                match result {
                    Ok(id) => debug!(kind = event.kind(), stream, entry = %id, "Published audit event"),
                    Err(e) => warn!(error = %e, kind = event.kind(), stream, "Failed to publish audit event"),
                }
            }
        });

        (Self { sender }, handle)
    }
}

fn stream_for<'a>(topics: &'a TopicsConfig, kind: &str) -> &'a str {
    let specific = match kind {
        "AUTHORIZATION_CHECKED" => topics.authorization_checked.as_deref(),
        "ROLE_CREATED" | "ROLE_UPDATED" | "ROLE_DELETED" | "ROLE_ASSIGNED" | "ROLE_REVOKED" => {
            topics.role_events.as_deref()
        }
        "PERMISSION_GRANTED" | "PERMISSION_REVOKED" => topics.permission_events.as_deref(),
        "POLICY_CREATED" | "POLICY_EVALUATED" => topics.policy_events.as_deref(),
        "CROSS_TENANT_ACCESS_GRANTED" | "CROSS_TENANT_ACCESS_REVOKED" => {
            topics.cross_tenant_events.as_deref()
        }
        _ => None,
    };
    specific.unwrap_or(&topics.audit_stream)
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(kind = event.kind(), "Audit queue full, dropping event");
                }
                mpsc::error::TrySendError::Closed(event) => {
                    warn!(kind = event.kind(), "Audit publisher stopped, dropping event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::AuditPayload;
    use uuid::Uuid;

    fn topics() -> TopicsConfig {
        TopicsConfig {
            audit_stream: "authz-audit".to_string(),
            authorization_checked: Some("authz-decisions".to_string()),
            role_events: None,
            permission_events: None,
            policy_events: None,
            cross_tenant_events: None,
        }
    }

    #[test]
    fn stream_selection_prefers_specific_topic() {
        let topics = topics();
        assert_eq!(stream_for(&topics, "AUTHORIZATION_CHECKED"), "authz-decisions");
        assert_eq!(stream_for(&topics, "ROLE_CREATED"), "authz-audit");
        assert_eq!(stream_for(&topics, "POLICY_EVALUATED"), "authz-audit");
    }

    #[tokio::test]
    async fn in_memory_publisher_records_events() {
        let publisher = InMemoryEventPublisher::new();
        publisher
            .publish(AuditEvent::new(AuditPayload::RoleAssigned {
                user_id: Uuid::new_v4(),
                role_id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                assigned_by: "admin".to_string(),
            }))
            .await;

        assert_eq!(publisher.kinds(), vec!["ROLE_ASSIGNED"]);
    }
}
