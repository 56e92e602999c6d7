//! Redis Streams consumer for tenant lifecycle events.
//!
//! Consumer groups give at-least-once delivery with manual acknowledgement.
//! Entries carry an `event_type` discriminator and a protobuf `payload`.
//! Successful or permanently failed entries are XACKed; retryable failures
//! stay in the pending list and are reclaimed with exponential backoff
//! until `max_attempts`, after which they move to the dead-letter stream.

use super::proto::{TenantCreated, TenantDeactivated};
use super::service::{ConsumeOutcome, TenantSyncService};
use authz_core::config::BrokerConfig;
use authz_core::Result;
use prost::Message;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const EVENT_TYPE_FIELD: &str = "event_type";
pub const PAYLOAD_FIELD: &str = "payload";
pub const TENANT_CREATED_TYPE: &str = "TENANT_CREATED";
pub const TENANT_DEACTIVATED_TYPE: &str = "TENANT_DEACTIVATED";

const READ_BLOCK_MS: usize = 5_000;
const MAX_BACKOFF_SECS: u64 = 16;

pub struct TenantSyncConsumer {
    redis: ConnectionManager,
    config: BrokerConfig,
    service: Arc<TenantSyncService>,
}

impl TenantSyncConsumer {
    pub fn new(
        redis: ConnectionManager,
        config: BrokerConfig,
        service: Arc<TenantSyncService>,
    ) -> Self {
        Self {
            redis,
            config,
            service,
        }
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let result: std::result::Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.tenant_stream)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.tenant_stream,
                    group = %self.config.consumer_group,
                    "Consumer group created"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Start the configured number of workers.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|index| {
                let consumer = self.clone();
                tokio::spawn(async move { consumer.worker_loop(index).await })
            })
            .collect()
    }

    async fn worker_loop(&self, index: usize) {
        let consumer_name = format!("{}-{}", self.config.consumer_name, index);
        info!(consumer = %consumer_name, "Tenant-sync worker started");

        loop {
            if let Err(e) = self.retry_pending(&consumer_name).await {
                error!(error = %e, "Failed to scan pending entries");
            }
            match self.read_new(&consumer_name).await {
                Ok(entries) => {
                    for entry in entries {
                        self.handle_entry(&entry).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Stream read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn read_new(&self, consumer_name: &str) -> Result<Vec<StreamId>> {
        let mut conn = self.redis.clone();
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer_name)
            .count(self.config.max_batch)
            .block(READ_BLOCK_MS);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.tenant_stream], &[">"], &options)
            .await?;

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .collect())
    }

    /// Reclaim entries whose backoff has elapsed; dead-letter the ones that
    /// exhausted their attempts.
    async fn retry_pending(&self, consumer_name: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(
                &self.config.tenant_stream,
                &self.config.consumer_group,
                "-",
                "+",
                self.config.max_batch,
            )
            .await?;

        for entry in pending.ids {
            let attempts = entry.times_delivered as u32;
            let idle_ms = entry.last_delivered_ms as u64;

            if attempts >= self.config.max_attempts {
                self.dead_letter(&entry.id).await?;
                continue;
            }

            // Exponential backoff: 1s, 2s, 4s, 8s, 16s.
            let backoff = self
                .config
                .base_backoff_secs
                .saturating_mul(1 << attempts.saturating_sub(1).min(10))
                .min(MAX_BACKOFF_SECS);
            if idle_ms < backoff * 1_000 {
                continue;
            }

            let claimed: StreamClaimReply = conn
                .xclaim(
                    &self.config.tenant_stream,
                    &self.config.consumer_group,
                    consumer_name,
                    backoff * 1_000,
                    &[&entry.id],
                )
                .await?;
            for entry in claimed.ids {
                debug!(id = %entry.id, attempts, "Redelivering pending entry");
                self.handle_entry(&entry).await;
            }
        }

        Ok(())
    }

    /// Copy an exhausted entry onto the dead-letter stream, then ack it.
    async fn dead_letter(&self, id: &str) -> Result<()> {
        let mut conn = self.redis.clone();

        let range: Vec<StreamId> = {
            let reply: redis::streams::StreamRangeReply = conn
                .xrange(&self.config.tenant_stream, id, id)
                .await?;
            reply.ids
        };

        if let Some(entry) = range.into_iter().next() {
            let mut fields: Vec<(String, Vec<u8>)> = entry
                .map
                .iter()
                .filter_map(|(key, value)| field_bytes(value).map(|v| (key.clone(), v)))
                .collect();
            fields.push(("origin_id".to_string(), id.as_bytes().to_vec()));

            let _: String = conn
                .xadd(
                    &self.config.dead_letter_stream,
                    "*",
                    &fields
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_slice()))
                        .collect::<Vec<_>>(),
                )
                .await?;
        }

        let _: u64 = conn
            .xack(
                &self.config.tenant_stream,
                &self.config.consumer_group,
                &[id],
            )
            .await?;
        warn!(id, "Entry moved to dead-letter stream");
        Ok(())
    }

    async fn handle_entry(&self, entry: &StreamId) {
        let outcome = self.process(entry).await;
        match outcome {
            ConsumeOutcome::Processed | ConsumeOutcome::Dropped => {
                if let Err(e) = self.ack(&entry.id).await {
                    error!(error = %e, id = %entry.id, "Failed to acknowledge entry");
                }
            }
            ConsumeOutcome::Retry => {
                debug!(id = %entry.id, "Leaving entry unacknowledged for redelivery");
            }
        }
    }

    async fn process(&self, entry: &StreamId) -> ConsumeOutcome {
        let Some(event_type) = entry
            .map
            .get(EVENT_TYPE_FIELD)
            .and_then(field_bytes)
            .and_then(|b| String::from_utf8(b).ok())
        else {
            warn!(id = %entry.id, "Entry without event_type, dropping");
            return ConsumeOutcome::Dropped;
        };
        let Some(payload) = entry.map.get(PAYLOAD_FIELD).and_then(field_bytes) else {
            warn!(id = %entry.id, event_type, "Entry without payload, dropping");
            return ConsumeOutcome::Dropped;
        };

        match event_type.as_str() {
            TENANT_CREATED_TYPE => match TenantCreated::decode(payload.as_slice()) {
                Ok(event) => self.service.on_tenant_created(&event).await,
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Malformed TenantCreated payload, dropping");
                    ConsumeOutcome::Dropped
                }
            },
            TENANT_DEACTIVATED_TYPE => match TenantDeactivated::decode(payload.as_slice()) {
                Ok(event) => self.service.on_tenant_deactivated(&event).await,
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Malformed TenantDeactivated payload, dropping");
                    ConsumeOutcome::Dropped
                }
            },
            other => {
                debug!(id = %entry.id, event_type = other, "Ignoring unknown event type");
                ConsumeOutcome::Dropped
            }
        }
    }

    async fn ack(&self, id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u64 = conn
            .xack(
                &self.config.tenant_stream,
                &self.config.consumer_group,
                &[id],
            )
            .await?;
        Ok(())
    }
}

fn field_bytes(value: &redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(data) => Some(data.clone()),
        redis::Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config_base: u64 = 1;
        let schedule: Vec<u64> = (1..=5u32)
            .map(|attempts| {
                config_base
                    .saturating_mul(1 << attempts.saturating_sub(1).min(10))
                    .min(MAX_BACKOFF_SECS)
            })
            .collect();
        assert_eq!(schedule, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn field_bytes_reads_bulk_and_simple_strings() {
        assert_eq!(
            field_bytes(&redis::Value::BulkString(b"abc".to_vec())),
            Some(b"abc".to_vec())
        );
        assert_eq!(
            field_bytes(&redis::Value::SimpleString("abc".to_string())),
            Some(b"abc".to_vec())
        );
        assert_eq!(field_bytes(&redis::Value::Int(3)), None);
    }
}
