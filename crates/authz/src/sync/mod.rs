//! Tenant lifecycle synchronization.

pub mod consumer;
pub mod defaults;
pub mod proto;
pub mod service;

pub use consumer::TenantSyncConsumer;
pub use defaults::{provision_default_roles, ActionFilter, DefaultRoleSpec, DEFAULT_ROLES};
pub use service::{ConsumeOutcome, TenantSyncService};
