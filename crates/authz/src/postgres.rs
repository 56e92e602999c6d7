//! PostgreSQL repositories.
//!
//! One store type implements every repository trait over a shared pool.
//! Optimistic updates compare-and-swap on `version`; a zero-row update with
//! an existing id is a concurrent-modification conflict.

use crate::dto::PermissionFilter;
use crate::model::{
    CrossTenantAccess, Permission, Policy, Resource, Role, RolePermission, RoleWithPermissions,
    UserRole,
};
use crate::repository::{
    CrossTenantRepository, PermissionRepository, PolicyRepository, ResourceRepository,
    RoleRepository, UserRoleRepository,
};
use authz_core::{DatabasePool, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgAuthzStore {
    db: DatabasePool,
}

impl PgAuthzStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    async fn grant_permissions(&self, grant_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT action FROM cross_tenant_permissions WHERE access_id = $1 ORDER BY action",
        )
        .bind(grant_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(rows.into_iter().map(|(action,)| action).collect())
    }

    async fn hydrate_grant(&self, mut grant: CrossTenantAccess) -> Result<CrossTenantAccess> {
        grant.permissions = self.grant_permissions(grant.id).await?;
        Ok(grant)
    }
}

#[async_trait]
impl RoleRepository for PgAuthzStore {
    async fn create(&self, role: &Role) -> Result<Role> {
        let created = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (id, tenant_id, name, description, priority, max_users,
                                is_system, is_active, parent_role_id, created_by, updated_by,
                                version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING *",
        )
        .bind(role.id)
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.priority)
        .bind(role.max_users)
        .bind(role.is_system)
        .bind(role.is_active)
        .bind(role.parent_role_id)
        .bind(&role.created_by)
        .bind(&role.updated_by)
        .bind(role.version)
        .bind(role.created_at)
        .bind(role.updated_at)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.get())
            .await?;
        Ok(role)
    }

    async fn find_by_name(&self, name: &str, tenant_id: Option<Uuid>) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE name = $1 AND tenant_id IS NOT DISTINCT FROM $2",
        )
        .bind(name)
        .bind(tenant_id)
        .fetch_optional(self.db.get())
        .await?;
        Ok(role)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 ORDER BY priority DESC",
        )
        .bind(tenant_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(roles)
    }

    async fn update(&self, role: &Role) -> Result<Role> {
        let updated = sqlx::query_as::<_, Role>(
            "UPDATE roles
             SET name = $3, description = $4, priority = $5, max_users = $6,
                 is_active = $7, parent_role_id = $8, updated_by = $9,
                 version = version + 1, updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING *",
        )
        .bind(role.id)
        .bind(role.version)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.priority)
        .bind(role.max_users)
        .bind(role.is_active)
        .bind(role.parent_role_id)
        .bind(&role.updated_by)
        .fetch_optional(self.db.get())
        .await?;

        match updated {
            Some(role) => Ok(role),
            None => match RoleRepository::get(self, role.id).await? {
                Some(current) => Err(Error::business_rule(format!(
                    "Role {} was modified concurrently (expected version {}, found {})",
                    role.id, role.version, current.version
                ))),
                None => Err(Error::not_found(format!("Role not found: {}", role.id))),
            },
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Role not found: {id}")));
        }
        Ok(())
    }

    async fn children(&self, id: Uuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE parent_role_id = $1")
            .bind(id)
            .fetch_all(self.db.get())
            .await?;
        Ok(roles)
    }

    async fn deactivate_tenant_roles(&self, tenant_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE roles SET is_active = FALSE, updated_at = NOW()
             WHERE tenant_id = $1 AND is_active = TRUE",
        )
        .bind(tenant_id)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected())
    }

    async fn role_permissions(
        &self,
        role_id: Uuid,
    ) -> Result<Vec<(RolePermission, Permission)>> {
        let assignments = sqlx::query_as::<_, RolePermission>(
            "SELECT * FROM role_permissions WHERE role_id = $1",
        )
        .bind(role_id)
        .fetch_all(self.db.get())
        .await?;

        let mut out = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let permission =
                sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE id = $1")
                    .bind(assignment.permission_id)
                    .fetch_optional(self.db.get())
                    .await?;
            if let Some(permission) = permission {
                out.push((assignment, permission));
            }
        }
        Ok(out)
    }

    async fn add_role_permission(&self, assignment: &RolePermission) -> Result<RolePermission> {
        let created = sqlx::query_as::<_, RolePermission>(
            "INSERT INTO role_permissions (id, role_id, permission_id, constraints,
                                           expires_at, granted_by, granted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(assignment.id)
        .bind(assignment.role_id)
        .bind(assignment.permission_id)
        .bind(Json(&assignment.constraints))
        .bind(assignment.expires_at)
        .bind(&assignment.granted_by)
        .bind(assignment.granted_at)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(self.db.get())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Permission not assigned to role"));
        }
        Ok(())
    }

    async fn count_role_permissions(&self, role_id: Uuid) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM role_permissions WHERE role_id = $1")
                .bind(role_id)
                .fetch_one(self.db.get())
                .await?;
        Ok(count as usize)
    }

    async fn set_role_permission_expiry(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE role_permissions SET expires_at = $3
             WHERE role_id = $1 AND permission_id = $2",
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(expires_at)
        .execute(self.db.get())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Permission not assigned to role"));
        }
        Ok(())
    }

    async fn delete_expired_role_permissions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM role_permissions WHERE expires_at <= $1")
            .bind(now)
            .execute(self.db.get())
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PermissionRepository for PgAuthzStore {
    async fn create(&self, permission: &Permission) -> Result<Permission> {
        let created = sqlx::query_as::<_, Permission>(
            "INSERT INTO permissions (id, resource_type, action, description, risk_level,
                                      requires_mfa, requires_approval, is_system, is_active,
                                      created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(permission.id)
        .bind(&permission.resource_type)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(permission.risk_level)
        .bind(permission.requires_mfa)
        .bind(permission.requires_approval)
        .bind(permission.is_system)
        .bind(permission.is_active)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.get())
            .await?;
        Ok(permission)
    }

    async fn find_by_name(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE resource_type = $1 AND action = $2",
        )
        .bind(resource_type)
        .bind(action)
        .fetch_optional(self.db.get())
        .await?;
        Ok(permission)
    }

    async fn list(&self, filter: &PermissionFilter) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions
             WHERE ($1::VARCHAR IS NULL OR resource_type = $1)
               AND ($2::VARCHAR IS NULL OR action = $2)
               AND ($3::risk_level IS NULL OR risk_level = $3)
               AND ($4::BOOLEAN IS NULL OR is_active = $4)
             ORDER BY resource_type, action",
        )
        .bind(&filter.resource_type)
        .bind(&filter.action)
        .bind(filter.risk_level)
        .bind(filter.is_active)
        .fetch_all(self.db.get())
        .await?;
        Ok(permissions)
    }

    async fn list_by_resource_types(&self, resource_types: &[String]) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE resource_type = ANY($1)",
        )
        .bind(resource_types)
        .fetch_all(self.db.get())
        .await?;
        Ok(permissions)
    }

    async fn distinct_resource_types(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT resource_type FROM permissions ORDER BY resource_type",
        )
        .fetch_all(self.db.get())
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn distinct_actions(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT action FROM permissions ORDER BY action")
                .fetch_all(self.db.get())
                .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}

#[async_trait]
impl UserRoleRepository for PgAuthzStore {
    async fn assign(&self, assignment: &UserRole) -> Result<UserRole> {
        // Reactivate a revoked row for the same triple instead of violating
        // the uniqueness constraint; an active row is a real duplicate.
        let existing = self
            .find(assignment.user_id, assignment.role_id, assignment.tenant_id)
            .await?;
        if let Some(existing) = existing {
            if existing.is_active {
                return Err(Error::duplicate("Role already assigned to user"));
            }
            let restored = sqlx::query_as::<_, UserRole>(
                "UPDATE user_roles
                 SET is_active = TRUE, assigned_by = $2, assigned_at = $3, expires_at = $4
                 WHERE id = $1
                 RETURNING *",
            )
            .bind(existing.id)
            .bind(&assignment.assigned_by)
            .bind(assignment.assigned_at)
            .bind(assignment.expires_at)
            .fetch_one(self.db.get())
            .await?;
            return Ok(restored);
        }

        let created = sqlx::query_as::<_, UserRole>(
            "INSERT INTO user_roles (id, user_id, role_id, tenant_id, assigned_by,
                                     assigned_at, expires_at, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(assignment.id)
        .bind(assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.tenant_id)
        .bind(&assignment.assigned_by)
        .bind(assignment.assigned_at)
        .bind(assignment.expires_at)
        .bind(assignment.is_active)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn find(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<UserRole>> {
        let assignment = sqlx::query_as::<_, UserRole>(
            "SELECT * FROM user_roles WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .fetch_optional(self.db.get())
        .await?;
        Ok(assignment)
    }

    async fn roles_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<RoleWithPermissions>> {
        let assignments = sqlx::query_as::<_, UserRole>(
            "SELECT ur.* FROM user_roles ur
             JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = $1 AND ur.tenant_id = $2
               AND ur.is_active = TRUE
               AND (ur.expires_at IS NULL OR ur.expires_at > NOW())
               AND r.is_active = TRUE
             ORDER BY r.priority DESC",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(self.db.get())
        .await?;

        let mut out = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
                .bind(assignment.role_id)
                .fetch_optional(self.db.get())
                .await?;
            let Some(role) = role else { continue };
            let permissions = RoleRepository::role_permissions(self, role.id).await?;
            out.push(RoleWithPermissions { role, permissions });
        }
        Ok(out)
    }

    async fn list_for_user(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<UserRole>> {
        let assignments = sqlx::query_as::<_, UserRole>(
            "SELECT * FROM user_roles WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(assignments)
    }

    async fn list_for_role(&self, role_id: Uuid) -> Result<Vec<UserRole>> {
        let assignments =
            sqlx::query_as::<_, UserRole>("SELECT * FROM user_roles WHERE role_id = $1")
                .bind(role_id)
                .fetch_all(self.db.get())
                .await?;
        Ok(assignments)
    }

    async fn count_active_for_role(&self, role_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_roles
             WHERE role_id = $1 AND is_active = TRUE
               AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(role_id)
        .fetch_one(self.db.get())
        .await?;
        Ok(count)
    }

    async fn revoke(&self, user_id: Uuid, role_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_roles SET is_active = FALSE
             WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3 AND is_active = TRUE",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .execute(self.db.get())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Role assignment not found"));
        }
        Ok(())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE user_roles SET is_active = FALSE
             WHERE is_active = TRUE AND expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PolicyRepository for PgAuthzStore {
    async fn create(&self, policy: &Policy) -> Result<Policy> {
        let created = sqlx::query_as::<_, Policy>(
            "INSERT INTO policies (id, name, tenant_id, description, policy_type, effect,
                                   priority, conditions, start_date, end_date, is_active,
                                   created_by, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING *",
        )
        .bind(policy.id)
        .bind(&policy.name)
        .bind(policy.tenant_id)
        .bind(&policy.description)
        .bind(policy.policy_type)
        .bind(policy.effect)
        .bind(policy.priority)
        .bind(Json(&policy.conditions))
        .bind(policy.start_date)
        .bind(policy.end_date)
        .bind(policy.is_active)
        .bind(&policy.created_by)
        .bind(policy.version)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Policy>> {
        let policy = sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.get())
            .await?;
        Ok(policy)
    }

    async fn find_by_name(&self, name: &str, tenant_id: Uuid) -> Result<Option<Policy>> {
        let policy = sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies WHERE name = $1 AND tenant_id = $2",
        )
        .bind(name)
        .bind(tenant_id)
        .fetch_optional(self.db.get())
        .await?;
        Ok(policy)
    }

    async fn update(&self, policy: &Policy) -> Result<Policy> {
        let updated = sqlx::query_as::<_, Policy>(
            "UPDATE policies
             SET name = $3, description = $4, effect = $5, priority = $6, conditions = $7,
                 start_date = $8, end_date = $9, is_active = $10,
                 version = version + 1, updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING *",
        )
        .bind(policy.id)
        .bind(policy.version)
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(policy.effect)
        .bind(policy.priority)
        .bind(Json(&policy.conditions))
        .bind(policy.start_date)
        .bind(policy.end_date)
        .bind(policy.is_active)
        .fetch_optional(self.db.get())
        .await?;

        match updated {
            Some(policy) => Ok(policy),
            None => match PolicyRepository::get(self, policy.id).await? {
                Some(current) => Err(Error::business_rule(format!(
                    "Policy {} was modified concurrently (expected version {}, found {})",
                    policy.id, policy.version, current.version
                ))),
                None => Err(Error::not_found(format!("Policy not found: {}", policy.id))),
            },
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Policy not found: {id}")));
        }
        Ok(())
    }

    async fn active_for_tenant(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Policy>> {
        let policies = sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies
             WHERE tenant_id = $1 AND is_active = TRUE
               AND (start_date IS NULL OR start_date <= $2)
               AND (end_date IS NULL OR end_date > $2)
             ORDER BY priority DESC",
        )
        .bind(tenant_id)
        .bind(now)
        .fetch_all(self.db.get())
        .await?;
        Ok(policies)
    }

    async fn attach_permission(&self, policy_id: Uuid, permission_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO policy_permissions (policy_id, permission_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(policy_id)
        .bind(permission_id)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    async fn permissions(&self, policy_id: Uuid) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT p.* FROM permissions p
             JOIN policy_permissions pp ON pp.permission_id = p.id
             WHERE pp.policy_id = $1",
        )
        .bind(policy_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(permissions)
    }

    async fn resources(&self, policy_id: Uuid) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            "SELECT r.* FROM resources r
             JOIN resource_policies rp ON rp.resource_id = r.id
             WHERE rp.policy_id = $1",
        )
        .bind(policy_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(resources)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE policies SET is_active = FALSE, updated_at = $1
             WHERE is_active = TRUE AND end_date IS NOT NULL AND end_date < $1",
        )
        .bind(now)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ResourceRepository for PgAuthzStore {
    async fn create(&self, resource: &Resource) -> Result<Resource> {
        let created = sqlx::query_as::<_, Resource>(
            "INSERT INTO resources (id, resource_identifier, resource_type, tenant_id,
                                    parent_resource_id, attributes, owner_id, is_public,
                                    is_active, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING *",
        )
        .bind(resource.id)
        .bind(&resource.resource_identifier)
        .bind(&resource.resource_type)
        .bind(resource.tenant_id)
        .bind(resource.parent_resource_id)
        .bind(Json(&resource.attributes))
        .bind(resource.owner_id)
        .bind(resource.is_public)
        .bind(resource.is_active)
        .bind(resource.version)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .fetch_one(self.db.get())
        .await?;
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.get())
            .await?;
        Ok(resource)
    }

    async fn find_by_identifier(&self, resource_identifier: &str) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>(
            "SELECT * FROM resources WHERE resource_identifier = $1",
        )
        .bind(resource_identifier)
        .fetch_optional(self.db.get())
        .await?;
        Ok(resource)
    }

    async fn update(&self, resource: &Resource) -> Result<Resource> {
        let updated = sqlx::query_as::<_, Resource>(
            "UPDATE resources
             SET parent_resource_id = $3, attributes = $4, owner_id = $5, is_public = $6,
                 is_active = $7, version = version + 1, updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING *",
        )
        .bind(resource.id)
        .bind(resource.version)
        .bind(resource.parent_resource_id)
        .bind(Json(&resource.attributes))
        .bind(resource.owner_id)
        .bind(resource.is_public)
        .bind(resource.is_active)
        .fetch_optional(self.db.get())
        .await?;

        match updated {
            Some(resource) => Ok(resource),
            None => match ResourceRepository::get(self, resource.id).await? {
                Some(current) => Err(Error::business_rule(format!(
                    "Resource {} was modified concurrently (expected version {}, found {})",
                    resource.id, resource.version, current.version
                ))),
                None => Err(Error::not_found(format!(
                    "Resource not found: {}",
                    resource.id
                ))),
            },
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Resource not found: {id}")));
        }
        Ok(())
    }

    async fn children(&self, id: Uuid) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            "SELECT * FROM resources WHERE parent_resource_id = $1",
        )
        .bind(id)
        .fetch_all(self.db.get())
        .await?;
        Ok(resources)
    }

    async fn attach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO resource_policies (resource_id, policy_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(resource_id)
        .bind(policy_id)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    async fn detach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM resource_policies WHERE resource_id = $1 AND policy_id = $2",
        )
        .bind(resource_id)
        .bind(policy_id)
        .execute(self.db.get())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Policy not attached to resource"));
        }
        Ok(())
    }

    async fn policies(&self, resource_id: Uuid) -> Result<Vec<Policy>> {
        let policies = sqlx::query_as::<_, Policy>(
            "SELECT p.* FROM policies p
             JOIN resource_policies rp ON rp.policy_id = p.id
             WHERE rp.resource_id = $1
             ORDER BY p.priority DESC",
        )
        .bind(resource_id)
        .fetch_all(self.db.get())
        .await?;
        Ok(policies)
    }
}

#[async_trait]
impl CrossTenantRepository for PgAuthzStore {
    async fn create(&self, grant: &CrossTenantAccess) -> Result<CrossTenantAccess> {
        let mut tx = self.db.get().begin().await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM cross_tenant_access
             WHERE source_tenant_id = $1 AND target_tenant_id = $2
               AND resource_type = $3 AND is_active = TRUE",
        )
        .bind(grant.source_tenant_id)
        .bind(grant.target_tenant_id)
        .bind(&grant.resource_type)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(Error::duplicate(
                "An active grant already exists for this tenant pair and resource type",
            ));
        }

        let created = sqlx::query_as::<_, CrossTenantAccess>(
            "INSERT INTO cross_tenant_access (id, source_tenant_id, target_tenant_id,
                                              resource_type, resource_id, conditions,
                                              granted_by, granted_at, revoked_by, revoked_at,
                                              expires_at, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING *",
        )
        .bind(grant.id)
        .bind(grant.source_tenant_id)
        .bind(grant.target_tenant_id)
        .bind(&grant.resource_type)
        .bind(&grant.resource_id)
        .bind(Json(&grant.conditions))
        .bind(&grant.granted_by)
        .bind(grant.granted_at)
        .bind(&grant.revoked_by)
        .bind(grant.revoked_at)
        .bind(grant.expires_at)
        .bind(grant.is_active)
        .fetch_one(&mut *tx)
        .await?;

        for action in &grant.permissions {
            sqlx::query(
                "INSERT INTO cross_tenant_permissions (access_id, action)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(grant.id)
            .bind(action)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut created = created;
        created.permissions = grant.permissions.clone();
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CrossTenantAccess>> {
        let grant = sqlx::query_as::<_, CrossTenantAccess>(
            "SELECT * FROM cross_tenant_access WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;
        match grant {
            Some(grant) => Ok(Some(self.hydrate_grant(grant).await?)),
            None => Ok(None),
        }
    }

    async fn find_active(
        &self,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        resource_type: &str,
    ) -> Result<Option<CrossTenantAccess>> {
        let grant = sqlx::query_as::<_, CrossTenantAccess>(
            "SELECT * FROM cross_tenant_access
             WHERE source_tenant_id = $1 AND target_tenant_id = $2
               AND resource_type = $3 AND is_active = TRUE",
        )
        .bind(source_tenant_id)
        .bind(target_tenant_id)
        .bind(resource_type)
        .fetch_optional(self.db.get())
        .await?;
        match grant {
            Some(grant) => Ok(Some(self.hydrate_grant(grant).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_source(&self, source_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>> {
        let grants = sqlx::query_as::<_, CrossTenantAccess>(
            "SELECT * FROM cross_tenant_access WHERE source_tenant_id = $1",
        )
        .bind(source_tenant_id)
        .fetch_all(self.db.get())
        .await?;
        let mut out = Vec::with_capacity(grants.len());
        for grant in grants {
            out.push(self.hydrate_grant(grant).await?);
        }
        Ok(out)
    }

    async fn list_for_target(&self, target_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>> {
        let grants = sqlx::query_as::<_, CrossTenantAccess>(
            "SELECT * FROM cross_tenant_access WHERE target_tenant_id = $1",
        )
        .bind(target_tenant_id)
        .fetch_all(self.db.get())
        .await?;
        let mut out = Vec::with_capacity(grants.len());
        for grant in grants {
            out.push(self.hydrate_grant(grant).await?);
        }
        Ok(out)
    }

    async fn revoke(&self, id: Uuid, revoked_by: &str) -> Result<CrossTenantAccess> {
        let revoked = sqlx::query_as::<_, CrossTenantAccess>(
            "UPDATE cross_tenant_access
             SET is_active = FALSE, revoked_by = $2, revoked_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(revoked_by)
        .fetch_optional(self.db.get())
        .await?
        .ok_or_else(|| Error::not_found(format!("Cross-tenant grant not found: {id}")))?;
        self.hydrate_grant(revoked).await
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE cross_tenant_access SET is_active = FALSE
             WHERE is_active = TRUE AND expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected())
    }
}
