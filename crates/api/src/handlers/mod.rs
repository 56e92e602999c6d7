//! HTTP handlers: thin adapters over the domain services.

pub mod authz;
pub mod cross_tenant;
pub mod permissions;
pub mod policies;
pub mod resources;
pub mod roles;
pub mod user_roles;
