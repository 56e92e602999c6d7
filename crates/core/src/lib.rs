pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;

pub use cache::{DecisionCache, DecisionKey, InMemoryDecisionCache, RedisDecisionCache};
pub use config::{BrokerConfig, Config, DatabaseConfig, EngineConfig, SweepConfig, TopicsConfig};
pub use database::DatabasePool;
pub use error::{Error, ErrorKind, Result};
pub use events::{AuditEvent, AuditPayload, EventMetadata, EventPublisher};

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
