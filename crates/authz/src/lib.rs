//! Authorization domain: entities, repositories, policy evaluation, the
//! decision engine, administrative services, tenant synchronization and
//! scheduled maintenance.

pub mod condition;
pub mod dto;
pub mod engine;
pub mod evaluator;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod sync;

pub use condition::{ConditionMap, ConditionValue};
pub use dto::{AuthzRequest, AuthzResponse};
pub use engine::AuthorizationEngine;
pub use evaluator::{EvaluationContext, PolicyBindings, PolicyEvaluator};
pub use memory::InMemoryStore;
pub use model::{
    CrossTenantAccess, Permission, Policy, PolicyEffect, PolicyType, Resource, RiskLevel, Role,
    RolePermission, RoleWithPermissions, UserRole, SUPER_ADMIN_ROLE, SYSTEM_ACTOR,
};
pub use scheduler::{MaintenanceSweeper, SweepReport};
pub use services::{
    CrossTenantService, PermissionService, PolicyService, ResourceService, RoleService,
    UserRoleService,
};
pub use sync::{TenantSyncConsumer, TenantSyncService};

// Re-export commonly used types from dependencies
pub use authz_core::{Error, ErrorKind, Result};
pub use uuid::Uuid;
