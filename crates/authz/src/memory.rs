//! In-memory store implementing every repository trait.
//!
//! Backs unit and scenario tests, honoring the same uniqueness and
//! optimistic-locking contracts as the Postgres implementation.

use crate::dto::PermissionFilter;
use crate::model::{
    CrossTenantAccess, Permission, Policy, Resource, Role, RolePermission, RoleWithPermissions,
    UserRole,
};
use crate::repository::{
    CrossTenantRepository, PermissionRepository, PolicyRepository, ResourceRepository,
    RoleRepository, UserRoleRepository,
};
use authz_core::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: HashMap<(Uuid, Uuid), RolePermission>,
    user_roles: HashMap<Uuid, UserRole>,
    policies: HashMap<Uuid, Policy>,
    policy_permissions: HashSet<(Uuid, Uuid)>,
    resources: HashMap<Uuid, Resource>,
    resource_policies: HashSet<(Uuid, Uuid)>,
    grants: HashMap<Uuid, CrossTenantAccess>,
}

/// Shared in-memory store. Cloneable handles are obtained with `Arc`.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().expect("store lock poisoned")
    }

    /// Test helper: number of roles owned by a tenant.
    pub fn role_count_for_tenant(&self, tenant_id: Uuid) -> usize {
        self.read()
            .roles
            .values()
            .filter(|r| r.tenant_id == Some(tenant_id))
            .count()
    }
}

#[async_trait]
impl RoleRepository for InMemoryStore {
    async fn create(&self, role: &Role) -> Result<Role> {
        let mut state = self.write();
        if state
            .roles
            .values()
            .any(|r| r.name == role.name && r.tenant_id == role.tenant_id)
        {
            return Err(Error::duplicate(format!(
                "Role '{}' already exists for tenant",
                role.name
            )));
        }
        state.roles.insert(role.id, role.clone());
        Ok(role.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self.read().roles.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str, tenant_id: Option<Uuid>) -> Result<Option<Role>> {
        Ok(self
            .read()
            .roles
            .values()
            .find(|r| r.name == name && r.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .read()
            .roles
            .values()
            .filter(|r| r.tenant_id == Some(tenant_id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(roles)
    }

    async fn update(&self, role: &Role) -> Result<Role> {
        let mut state = self.write();
        let stored = state
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| Error::not_found(format!("Role not found: {}", role.id)))?;
        if stored.version != role.version {
            return Err(Error::business_rule(format!(
                "Role {} was modified concurrently (expected version {}, found {})",
                role.id, role.version, stored.version
            )));
        }
        let mut updated = role.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.write();
        state
            .roles
            .remove(&id)
            .ok_or_else(|| Error::not_found(format!("Role not found: {id}")))?;
        state.role_permissions.retain(|(role_id, _), _| *role_id != id);
        Ok(())
    }

    async fn children(&self, id: Uuid) -> Result<Vec<Role>> {
        Ok(self
            .read()
            .roles
            .values()
            .filter(|r| r.parent_role_id == Some(id))
            .cloned()
            .collect())
    }

    async fn deactivate_tenant_roles(&self, tenant_id: Uuid) -> Result<u64> {
        let mut state = self.write();
        let mut changed = 0;
        for role in state.roles.values_mut() {
            if role.tenant_id == Some(tenant_id) && role.is_active {
                role.is_active = false;
                role.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn role_permissions(
        &self,
        role_id: Uuid,
    ) -> Result<Vec<(RolePermission, Permission)>> {
        let state = self.read();
        let mut out = Vec::new();
        for ((rid, pid), assignment) in &state.role_permissions {
            if *rid == role_id {
                if let Some(permission) = state.permissions.get(pid) {
                    out.push((assignment.clone(), permission.clone()));
                }
            }
        }
        Ok(out)
    }

    async fn add_role_permission(&self, assignment: &RolePermission) -> Result<RolePermission> {
        let mut state = self.write();
        let key = (assignment.role_id, assignment.permission_id);
        if state.role_permissions.contains_key(&key) {
            return Err(Error::duplicate("Permission already assigned to role"));
        }
        state.role_permissions.insert(key, assignment.clone());
        Ok(assignment.clone())
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        let mut state = self.write();
        state
            .role_permissions
            .remove(&(role_id, permission_id))
            .ok_or_else(|| Error::not_found("Permission not assigned to role"))?;
        Ok(())
    }

    async fn count_role_permissions(&self, role_id: Uuid) -> Result<usize> {
        Ok(self
            .read()
            .role_permissions
            .keys()
            .filter(|(rid, _)| *rid == role_id)
            .count())
    }

    async fn set_role_permission_expiry(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write();
        let assignment = state
            .role_permissions
            .get_mut(&(role_id, permission_id))
            .ok_or_else(|| Error::not_found("Permission not assigned to role"))?;
        assignment.expires_at = Some(expires_at);
        Ok(())
    }

    async fn delete_expired_role_permissions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.write();
        let before = state.role_permissions.len();
        state
            .role_permissions
            .retain(|_, a| a.expires_at.map(|at| at > now).unwrap_or(true));
        Ok((before - state.role_permissions.len()) as u64)
    }
}

#[async_trait]
impl PermissionRepository for InMemoryStore {
    async fn create(&self, permission: &Permission) -> Result<Permission> {
        let mut state = self.write();
        if state
            .permissions
            .values()
            .any(|p| p.resource_type == permission.resource_type && p.action == permission.action)
        {
            return Err(Error::duplicate(format!(
                "Permission '{}' already exists",
                permission.name()
            )));
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Permission>> {
        Ok(self.read().permissions.get(&id).cloned())
    }

    async fn find_by_name(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        Ok(self
            .read()
            .permissions
            .values()
            .find(|p| p.resource_type == resource_type && p.action == action)
            .cloned())
    }

    async fn list(&self, filter: &PermissionFilter) -> Result<Vec<Permission>> {
        let mut out: Vec<Permission> = self
            .read()
            .permissions
            .values()
            .filter(|p| {
                filter
                    .resource_type
                    .as_ref()
                    .map(|t| &p.resource_type == t)
                    .unwrap_or(true)
                    && filter.action.as_ref().map(|a| &p.action == a).unwrap_or(true)
                    && filter
                        .risk_level
                        .map(|r| p.risk_level == r)
                        .unwrap_or(true)
                    && filter.is_active.map(|a| p.is_active == a).unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name().cmp(&b.name()));
        Ok(out)
    }

    async fn list_by_resource_types(&self, resource_types: &[String]) -> Result<Vec<Permission>> {
        Ok(self
            .read()
            .permissions
            .values()
            .filter(|p| resource_types.contains(&p.resource_type))
            .cloned()
            .collect())
    }

    async fn distinct_resource_types(&self) -> Result<Vec<String>> {
        let set: BTreeSet<String> = self
            .read()
            .permissions
            .values()
            .map(|p| p.resource_type.clone())
            .collect();
        Ok(set.into_iter().collect())
    }

    async fn distinct_actions(&self) -> Result<Vec<String>> {
        let set: BTreeSet<String> = self
            .read()
            .permissions
            .values()
            .map(|p| p.action.clone())
            .collect();
        Ok(set.into_iter().collect())
    }
}

#[async_trait]
impl UserRoleRepository for InMemoryStore {
    async fn assign(&self, assignment: &UserRole) -> Result<UserRole> {
        let mut state = self.write();
        let existing = state.user_roles.values_mut().find(|a| {
            a.user_id == assignment.user_id
                && a.role_id == assignment.role_id
                && a.tenant_id == assignment.tenant_id
        });

        match existing {
            Some(existing) if existing.is_active => {
                Err(Error::duplicate("Role already assigned to user"))
            }
            Some(existing) => {
                // Reactivate the revoked row rather than violating the
                // (user, role, tenant) uniqueness.
                existing.is_active = true;
                existing.assigned_by = assignment.assigned_by.clone();
                existing.assigned_at = assignment.assigned_at;
                existing.expires_at = assignment.expires_at;
                Ok(existing.clone())
            }
            None => {
                state.user_roles.insert(assignment.id, assignment.clone());
                Ok(assignment.clone())
            }
        }
    }

    async fn find(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<UserRole>> {
        Ok(self
            .read()
            .user_roles
            .values()
            .find(|a| a.user_id == user_id && a.role_id == role_id && a.tenant_id == tenant_id)
            .cloned())
    }

    async fn roles_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<RoleWithPermissions>> {
        let state = self.read();
        let mut out = Vec::new();
        for assignment in state.user_roles.values() {
            if assignment.user_id != user_id
                || assignment.tenant_id != tenant_id
                || !assignment.is_valid()
            {
                continue;
            }
            let Some(role) = state.roles.get(&assignment.role_id) else {
                continue;
            };
            if !role.is_active {
                continue;
            }
            let permissions = state
                .role_permissions
                .iter()
                .filter(|((rid, _), _)| *rid == role.id)
                .filter_map(|((_, pid), rp)| {
                    state.permissions.get(pid).map(|p| (rp.clone(), p.clone()))
                })
                .collect();
            out.push(RoleWithPermissions {
                role: role.clone(),
                permissions,
            });
        }
        out.sort_by(|a, b| b.role.priority.cmp(&a.role.priority));
        Ok(out)
    }

    async fn list_for_user(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<UserRole>> {
        Ok(self
            .read()
            .user_roles
            .values()
            .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_for_role(&self, role_id: Uuid) -> Result<Vec<UserRole>> {
        Ok(self
            .read()
            .user_roles
            .values()
            .filter(|a| a.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn count_active_for_role(&self, role_id: Uuid) -> Result<i64> {
        Ok(self
            .read()
            .user_roles
            .values()
            .filter(|a| a.role_id == role_id && a.is_valid())
            .count() as i64)
    }

    async fn revoke(&self, user_id: Uuid, role_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let mut state = self.write();
        let assignment = state
            .user_roles
            .values_mut()
            .find(|a| {
                a.user_id == user_id
                    && a.role_id == role_id
                    && a.tenant_id == tenant_id
                    && a.is_active
            })
            .ok_or_else(|| Error::not_found("Role assignment not found"))?;
        assignment.is_active = false;
        Ok(())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.write();
        let mut changed = 0;
        for assignment in state.user_roles.values_mut() {
            if assignment.is_active && assignment.expires_at.map(|at| at <= now).unwrap_or(false)
            {
                assignment.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl PolicyRepository for InMemoryStore {
    async fn create(&self, policy: &Policy) -> Result<Policy> {
        let mut state = self.write();
        if state
            .policies
            .values()
            .any(|p| p.name == policy.name && p.tenant_id == policy.tenant_id)
        {
            return Err(Error::duplicate(format!(
                "Policy '{}' already exists for tenant",
                policy.name
            )));
        }
        state.policies.insert(policy.id, policy.clone());
        Ok(policy.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Policy>> {
        Ok(self.read().policies.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str, tenant_id: Uuid) -> Result<Option<Policy>> {
        Ok(self
            .read()
            .policies
            .values()
            .find(|p| p.name == name && p.tenant_id == tenant_id)
            .cloned())
    }

    async fn update(&self, policy: &Policy) -> Result<Policy> {
        let mut state = self.write();
        let stored = state
            .policies
            .get_mut(&policy.id)
            .ok_or_else(|| Error::not_found(format!("Policy not found: {}", policy.id)))?;
        if stored.version != policy.version {
            return Err(Error::business_rule(format!(
                "Policy {} was modified concurrently (expected version {}, found {})",
                policy.id, policy.version, stored.version
            )));
        }
        let mut updated = policy.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.write();
        state
            .policies
            .remove(&id)
            .ok_or_else(|| Error::not_found(format!("Policy not found: {id}")))?;
        state.policy_permissions.retain(|(pid, _)| *pid != id);
        state.resource_policies.retain(|(_, pid)| *pid != id);
        Ok(())
    }

    async fn active_for_tenant(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Policy>> {
        let mut out: Vec<Policy> = self
            .read()
            .policies
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.is_in_effect(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(out)
    }

    async fn attach_permission(&self, policy_id: Uuid, permission_id: Uuid) -> Result<()> {
        self.write().policy_permissions.insert((policy_id, permission_id));
        Ok(())
    }

    async fn permissions(&self, policy_id: Uuid) -> Result<Vec<Permission>> {
        let state = self.read();
        Ok(state
            .policy_permissions
            .iter()
            .filter(|(pid, _)| *pid == policy_id)
            .filter_map(|(_, perm_id)| state.permissions.get(perm_id).cloned())
            .collect())
    }

    async fn resources(&self, policy_id: Uuid) -> Result<Vec<Resource>> {
        let state = self.read();
        Ok(state
            .resource_policies
            .iter()
            .filter(|(_, pid)| *pid == policy_id)
            .filter_map(|(rid, _)| state.resources.get(rid).cloned())
            .collect())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.write();
        let mut changed = 0;
        for policy in state.policies.values_mut() {
            if policy.is_active && policy.end_date.map(|e| e < now).unwrap_or(false) {
                policy.is_active = false;
                policy.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl ResourceRepository for InMemoryStore {
    async fn create(&self, resource: &Resource) -> Result<Resource> {
        let mut state = self.write();
        if state
            .resources
            .values()
            .any(|r| r.resource_identifier == resource.resource_identifier)
        {
            return Err(Error::duplicate(format!(
                "Resource '{}' already exists",
                resource.resource_identifier
            )));
        }
        state.resources.insert(resource.id, resource.clone());
        Ok(resource.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Resource>> {
        Ok(self.read().resources.get(&id).cloned())
    }

    async fn find_by_identifier(&self, resource_identifier: &str) -> Result<Option<Resource>> {
        Ok(self
            .read()
            .resources
            .values()
            .find(|r| r.resource_identifier == resource_identifier)
            .cloned())
    }

    async fn update(&self, resource: &Resource) -> Result<Resource> {
        let mut state = self.write();
        let stored = state
            .resources
            .get_mut(&resource.id)
            .ok_or_else(|| Error::not_found(format!("Resource not found: {}", resource.id)))?;
        if stored.version != resource.version {
            return Err(Error::business_rule(format!(
                "Resource {} was modified concurrently (expected version {}, found {})",
                resource.id, resource.version, stored.version
            )));
        }
        let mut updated = resource.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.write();
        state
            .resources
            .remove(&id)
            .ok_or_else(|| Error::not_found(format!("Resource not found: {id}")))?;
        state.resource_policies.retain(|(rid, _)| *rid != id);
        Ok(())
    }

    async fn children(&self, id: Uuid) -> Result<Vec<Resource>> {
        Ok(self
            .read()
            .resources
            .values()
            .filter(|r| r.parent_resource_id == Some(id))
            .cloned()
            .collect())
    }

    async fn attach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        self.write().resource_policies.insert((resource_id, policy_id));
        Ok(())
    }

    async fn detach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        let mut state = self.write();
        if !state.resource_policies.remove(&(resource_id, policy_id)) {
            return Err(Error::not_found("Policy not attached to resource"));
        }
        Ok(())
    }

    async fn policies(&self, resource_id: Uuid) -> Result<Vec<Policy>> {
        let state = self.read();
        let mut out: Vec<Policy> = state
            .resource_policies
            .iter()
            .filter(|(rid, _)| *rid == resource_id)
            .filter_map(|(_, pid)| state.policies.get(pid).cloned())
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(out)
    }
}

#[async_trait]
impl CrossTenantRepository for InMemoryStore {
    async fn create(&self, grant: &CrossTenantAccess) -> Result<CrossTenantAccess> {
        let mut state = self.write();
        if state.grants.values().any(|g| {
            g.is_active
                && g.source_tenant_id == grant.source_tenant_id
                && g.target_tenant_id == grant.target_tenant_id
                && g.resource_type == grant.resource_type
        }) {
            return Err(Error::duplicate(
                "An active grant already exists for this tenant pair and resource type",
            ));
        }
        state.grants.insert(grant.id, grant.clone());
        Ok(grant.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CrossTenantAccess>> {
        Ok(self.read().grants.get(&id).cloned())
    }

    async fn find_active(
        &self,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        resource_type: &str,
    ) -> Result<Option<CrossTenantAccess>> {
        Ok(self
            .read()
            .grants
            .values()
            .find(|g| {
                g.is_active
                    && g.source_tenant_id == source_tenant_id
                    && g.target_tenant_id == target_tenant_id
                    && g.resource_type == resource_type
            })
            .cloned())
    }

    async fn list_for_source(&self, source_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>> {
        Ok(self
            .read()
            .grants
            .values()
            .filter(|g| g.source_tenant_id == source_tenant_id)
            .cloned()
            .collect())
    }

    async fn list_for_target(&self, target_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>> {
        Ok(self
            .read()
            .grants
            .values()
            .filter(|g| g.target_tenant_id == target_tenant_id)
            .cloned()
            .collect())
    }

    async fn revoke(&self, id: Uuid, revoked_by: &str) -> Result<CrossTenantAccess> {
        let mut state = self.write();
        let grant = state
            .grants
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("Cross-tenant grant not found: {id}")))?;
        grant.is_active = false;
        grant.revoked_by = Some(revoked_by.to_string());
        grant.revoked_at = Some(Utc::now());
        Ok(grant.clone())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.write();
        let mut changed = 0;
        for grant in state.grants.values_mut() {
            if grant.is_active && grant.expires_at.map(|at| at <= now).unwrap_or(false) {
                grant.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
