//! Repository contracts.
//!
//! Services and the decision engine depend on these traits, never on a
//! concrete store. The production implementation is Postgres
//! ([`crate::postgres`]); tests run against the in-memory store
//! ([`crate::memory`]).

use crate::model::{
    CrossTenantAccess, Permission, Policy, Resource, Role, RolePermission, RoleWithPermissions,
    UserRole,
};
use authz_core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Roles and their permission assignments.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn create(&self, role: &Role) -> Result<Role>;

    async fn get(&self, id: Uuid) -> Result<Option<Role>>;

    /// Lookup by the `(name, tenant_id)` unique pair.
    async fn find_by_name(&self, name: &str, tenant_id: Option<Uuid>) -> Result<Option<Role>>;

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Role>>;

    /// Optimistic update: fails with a conflict when `role.version` is stale.
    /// The stored row's version is bumped on success.
    async fn update(&self, role: &Role) -> Result<Role>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Direct children, i.e. roles whose `parent_role_id` is `id`.
    async fn children(&self, id: Uuid) -> Result<Vec<Role>>;

    /// Deactivate every active role of a tenant. Returns how many changed.
    async fn deactivate_tenant_roles(&self, tenant_id: Uuid) -> Result<u64>;

    /// Permission assignments joined with their permissions.
    async fn role_permissions(&self, role_id: Uuid)
        -> Result<Vec<(RolePermission, Permission)>>;

    async fn add_role_permission(&self, assignment: &RolePermission) -> Result<RolePermission>;

    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()>;

    async fn count_role_permissions(&self, role_id: Uuid) -> Result<usize>;

    async fn set_role_permission_expiry(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Drop assignments whose expiry has passed. Returns how many were removed.
    async fn delete_expired_role_permissions(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// The global permission catalog.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn create(&self, permission: &Permission) -> Result<Permission>;

    async fn get(&self, id: Uuid) -> Result<Option<Permission>>;

    /// Lookup by the globally unique `(resource_type, action)` pair.
    async fn find_by_name(&self, resource_type: &str, action: &str)
        -> Result<Option<Permission>>;

    async fn list(&self, filter: &crate::dto::PermissionFilter) -> Result<Vec<Permission>>;

    async fn list_by_resource_types(&self, resource_types: &[String]) -> Result<Vec<Permission>>;

    async fn distinct_resource_types(&self) -> Result<Vec<String>>;

    async fn distinct_actions(&self) -> Result<Vec<String>>;
}

/// User-to-role assignments.
#[async_trait]
pub trait UserRoleRepository: Send + Sync {
    async fn assign(&self, assignment: &UserRole) -> Result<UserRole>;

    /// The unique `(user, role, tenant)` assignment, active or not.
    async fn find(&self, user_id: Uuid, role_id: Uuid, tenant_id: Uuid)
        -> Result<Option<UserRole>>;

    /// Active, unexpired assignments for a user in a tenant, with each role
    /// and its permission assignments eagerly joined. Inactive roles are
    /// filtered out.
    async fn roles_for_user(&self, user_id: Uuid, tenant_id: Uuid)
        -> Result<Vec<RoleWithPermissions>>;

    async fn list_for_user(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<UserRole>>;

    async fn list_for_role(&self, role_id: Uuid) -> Result<Vec<UserRole>>;

    /// Count of currently valid assignments for a role (enforces `max_users`).
    async fn count_active_for_role(&self, role_id: Uuid) -> Result<i64>;

    /// Deactivate one assignment.
    async fn revoke(&self, user_id: Uuid, role_id: Uuid, tenant_id: Uuid) -> Result<()>;

    /// Deactivate assignments whose expiry has passed. Returns how many changed.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Policies, their permission references and resource attachments.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn create(&self, policy: &Policy) -> Result<Policy>;

    async fn get(&self, id: Uuid) -> Result<Option<Policy>>;

    async fn find_by_name(&self, name: &str, tenant_id: Uuid) -> Result<Option<Policy>>;

    /// Optimistic update, same contract as [`RoleRepository::update`].
    async fn update(&self, policy: &Policy) -> Result<Policy>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Tenant policies in effect at `now`, ordered by priority descending.
    async fn active_for_tenant(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Policy>>;

    async fn attach_permission(&self, policy_id: Uuid, permission_id: Uuid) -> Result<()>;

    async fn permissions(&self, policy_id: Uuid) -> Result<Vec<Permission>>;

    /// Resources the policy is attached to.
    async fn resources(&self, policy_id: Uuid) -> Result<Vec<Resource>>;

    /// Deactivate policies whose `end_date` has passed. Returns how many changed.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Protected resources and their policy attachments.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create(&self, resource: &Resource) -> Result<Resource>;

    async fn get(&self, id: Uuid) -> Result<Option<Resource>>;

    /// Lookup by the globally unique external identifier.
    async fn find_by_identifier(&self, resource_identifier: &str) -> Result<Option<Resource>>;

    /// Optimistic update, same contract as [`RoleRepository::update`].
    async fn update(&self, resource: &Resource) -> Result<Resource>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn children(&self, id: Uuid) -> Result<Vec<Resource>>;

    async fn attach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()>;

    async fn detach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()>;

    /// Policies attached to a resource, ordered by priority descending.
    async fn policies(&self, resource_id: Uuid) -> Result<Vec<Policy>>;
}

/// Cross-tenant access grants.
#[async_trait]
pub trait CrossTenantRepository: Send + Sync {
    async fn create(&self, grant: &CrossTenantAccess) -> Result<CrossTenantAccess>;

    async fn get(&self, id: Uuid) -> Result<Option<CrossTenantAccess>>;

    /// The active grant for `(source, target, resource_type)`, if any.
    async fn find_active(
        &self,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        resource_type: &str,
    ) -> Result<Option<CrossTenantAccess>>;

    async fn list_for_source(&self, source_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>>;

    async fn list_for_target(&self, target_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>>;

    /// Deactivate a grant, stamping who revoked it and when.
    async fn revoke(&self, id: Uuid, revoked_by: &str) -> Result<CrossTenantAccess>;

    /// Deactivate grants whose expiry has passed. Returns how many changed.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
