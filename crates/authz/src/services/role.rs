//! Role administration.
//!
//! All mutations validate invariants before touching the store, invalidate
//! the decision cache before returning, and emit audit events
//! fire-and-forget.

use crate::dto::{CreateRoleRequest, RoleHierarchyResponse, UpdateRoleRequest};
use crate::model::{Permission, Role, RolePermission};
use crate::repository::{PermissionRepository, RoleRepository, UserRoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::config::EngineConfig;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    user_roles: Arc<dyn UserRoleRepository>,
    cache: Arc<dyn DecisionCache>,
    publisher: Arc<dyn EventPublisher>,
    config: EngineConfig,
}

impl RoleService {
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        user_roles: Arc<dyn UserRoleRepository>,
        cache: Arc<dyn DecisionCache>,
        publisher: Arc<dyn EventPublisher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            roles,
            permissions,
            user_roles,
            cache,
            publisher,
            config,
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateRoleRequest, created_by: &str) -> Result<Role> {
        // 1. Input validation.
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        // 2. Uniqueness of (name, tenant).
        if self
            .roles
            .find_by_name(&request.name, request.tenant_id)
            .await?
            .is_some()
        {
            return Err(Error::duplicate(format!(
                "Role '{}' already exists for tenant",
                request.name
            )));
        }

        // 3. Parent linkage: same tenant, bounded depth.
        if let Some(parent_id) = request.parent_role_id {
            let parent = self
                .roles
                .get(parent_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("Parent role not found: {parent_id}")))?;
            if parent.tenant_id != request.tenant_id {
                return Err(Error::business_rule(
                    "Parent role must belong to the same tenant",
                ));
            }
            // Depth of the new role = parent's ancestor count + 2.
            let ancestors = self.ancestors(&parent).await?;
            if (ancestors.len() as u32 + 2) > self.config.max_hierarchy_depth {
                return Err(Error::business_rule(format!(
                    "Role hierarchy exceeds maximum depth of {}",
                    self.config.max_hierarchy_depth
                )));
            }
        }

        // 4. Permission cap before any write.
        if request.permission_ids.len() > self.config.max_permissions_per_role {
            return Err(Error::business_rule(format!(
                "A role cannot hold more than {} permissions",
                self.config.max_permissions_per_role
            )));
        }

        let mut role = Role::new(&request.name, request.tenant_id, created_by);
        role.description = request.description.clone();
        role.priority = request.priority;
        role.max_users = request.max_users;
        role.parent_role_id = request.parent_role_id;
        let role = self.roles.create(&role).await?;

        // 5. Initial permission set.
        if !request.permission_ids.is_empty() {
            self.assign_permissions(role.id, &request.permission_ids, created_by)
                .await?;
        }

        self.invalidate(&role).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleCreated {
                role_id: role.id,
                tenant_id: role.tenant_id,
                name: role.name.clone(),
                created_by: created_by.to_string(),
            }))
            .await;

        info!(role = %role.name, "Role created");
        Ok(role)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateRoleRequest,
        updated_by: &str,
    ) -> Result<Role> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let existing = self
            .roles
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {id}")))?;

        if existing.is_system && !request.allow_system_override {
            return Err(Error::business_rule("System roles cannot be modified"));
        }

        // Renaming must not collide within the tenant.
        if let Some(new_name) = &request.name {
            if new_name != &existing.name
                && self
                    .roles
                    .find_by_name(new_name, existing.tenant_id)
                    .await?
                    .is_some()
            {
                return Err(Error::duplicate(format!(
                    "Role '{new_name}' already exists for tenant"
                )));
            }
        }

        // max_users cannot drop below the current active assignment count.
        if let Some(new_max) = request.max_users {
            let active = self.user_roles.count_active_for_role(id).await?;
            if i64::from(new_max) < active {
                return Err(Error::business_rule(format!(
                    "max_users ({new_max}) cannot be below the current active assignments ({active})"
                )));
            }
        }

        // Re-parenting must not create a cycle or exceed the depth bound.
        if let Some(new_parent) = request.parent_role_id {
            if Some(new_parent) != existing.parent_role_id {
                self.check_reparent(&existing, new_parent).await?;
            }
        }

        let mut updated = existing.clone();
        let mut changes = serde_json::Map::new();

        if let Some(name) = request.name {
            if name != existing.name {
                changes.insert(
                    "name".to_string(),
                    serde_json::json!({"from": existing.name, "to": name}),
                );
                updated.name = name;
            }
        }
        if let Some(description) = request.description {
            changes.insert(
                "description".to_string(),
                serde_json::json!({"from": existing.description, "to": description}),
            );
            updated.description = Some(description);
        }
        if let Some(priority) = request.priority {
            if priority != existing.priority {
                changes.insert(
                    "priority".to_string(),
                    serde_json::json!({"from": existing.priority, "to": priority}),
                );
                updated.priority = priority;
            }
        }
        if let Some(max_users) = request.max_users {
            changes.insert(
                "max_users".to_string(),
                serde_json::json!({"from": existing.max_users, "to": max_users}),
            );
            updated.max_users = Some(max_users);
        }
        if let Some(is_active) = request.is_active {
            if is_active != existing.is_active {
                changes.insert(
                    "is_active".to_string(),
                    serde_json::json!({"from": existing.is_active, "to": is_active}),
                );
                updated.is_active = is_active;
            }
        }
        if let Some(parent_id) = request.parent_role_id {
            if Some(parent_id) != existing.parent_role_id {
                changes.insert(
                    "parent_role_id".to_string(),
                    serde_json::json!({"from": existing.parent_role_id, "to": parent_id}),
                );
                updated.parent_role_id = Some(parent_id);
            }
        }

        updated.updated_by = Some(updated_by.to_string());
        updated.version = request.version;
        let updated = self.roles.update(&updated).await?;

        self.invalidate(&updated).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleUpdated {
                role_id: updated.id,
                tenant_id: updated.tenant_id,
                name: updated.name.clone(),
                updated_by: updated_by.to_string(),
                changes: serde_json::Value::Object(changes),
            }))
            .await;

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, deleted_by: &str) -> Result<()> {
        let role = self
            .roles
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {id}")))?;

        if role.is_system {
            return Err(Error::business_rule("System roles cannot be deleted"));
        }

        let active = self.user_roles.count_active_for_role(id).await?;
        if active > 0 {
            return Err(Error::business_rule(format!(
                "Role has {active} active user assignments and cannot be deleted"
            )));
        }

        let children = self.roles.children(id).await?;
        if !children.is_empty() {
            return Err(Error::business_rule(format!(
                "Role has {} child roles and cannot be deleted",
                children.len()
            )));
        }

        self.roles.delete(id).await?;

        self.invalidate(&role).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleDeleted {
                role_id: role.id,
                tenant_id: role.tenant_id,
                name: role.name.clone(),
                deleted_by: deleted_by.to_string(),
            }))
            .await;

        info!(role = %role.name, "Role deleted");
        Ok(())
    }

    /// Deep-copy a role: permissions are copied, the parent link is shared,
    /// and the clone is never a system role.
    #[instrument(skip(self))]
    pub async fn clone_role(
        &self,
        source_id: Uuid,
        new_name: &str,
        tenant_id: Option<Uuid>,
        cloned_by: &str,
    ) -> Result<Role> {
        let source = self
            .roles
            .get(source_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {source_id}")))?;

        if self.roles.find_by_name(new_name, tenant_id).await?.is_some() {
            return Err(Error::duplicate(format!(
                "Role '{new_name}' already exists for tenant"
            )));
        }

        let mut clone = Role::new(new_name, tenant_id, cloned_by);
        clone.description = source.description.clone();
        clone.priority = source.priority;
        clone.max_users = source.max_users;
        clone.parent_role_id = source.parent_role_id;
        let clone = self.roles.create(&clone).await?;

        for (assignment, _) in self.roles.role_permissions(source_id).await? {
            let mut copied = RolePermission::new(clone.id, assignment.permission_id, cloned_by);
            copied.constraints = assignment.constraints.clone();
            copied.expires_at = assignment.expires_at;
            self.roles.add_role_permission(&copied).await?;
        }

        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleCreated {
                role_id: clone.id,
                tenant_id: clone.tenant_id,
                name: clone.name.clone(),
                created_by: cloned_by.to_string(),
            }))
            .await;

        Ok(clone)
    }

    /// Assign permissions to a role. Already-present pairs are skipped, so
    /// repeating an assignment is a no-op.
    #[instrument(skip(self, permission_ids))]
    pub async fn assign_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
        granted_by: &str,
    ) -> Result<Vec<RolePermission>> {
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;

        let existing: HashSet<Uuid> = self
            .roles
            .role_permissions(role_id)
            .await?
            .into_iter()
            .map(|(assignment, _)| assignment.permission_id)
            .collect();

        let new_ids: Vec<Uuid> = permission_ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if existing.len() + new_ids.len() > self.config.max_permissions_per_role {
            return Err(Error::business_rule(format!(
                "A role cannot hold more than {} permissions",
                self.config.max_permissions_per_role
            )));
        }

        let mut assigned = Vec::with_capacity(new_ids.len());
        for permission_id in new_ids {
            let permission = self
                .permissions
                .get(permission_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("Permission not found: {permission_id}"))
                })?;

            let assignment = RolePermission::new(role_id, permission_id, granted_by);
            // A concurrent writer may have inserted the pair; absorb it.
            match self.roles.add_role_permission(&assignment).await {
                Ok(created) => {
                    self.publisher
                        .publish(AuditEvent::new(AuditPayload::PermissionGranted {
                            role_id,
                            permission_id,
                            permission_name: permission.name(),
                            granted_by: granted_by.to_string(),
                        }))
                        .await;
                    assigned.push(created);
                }
                Err(e) if e.kind() == authz_core::ErrorKind::Duplicate => {}
                Err(e) => return Err(e),
            }
        }

        self.invalidate(&role).await;
        Ok(assigned)
    }

    #[instrument(skip(self))]
    pub async fn remove_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        revoked_by: &str,
    ) -> Result<()> {
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;
        let permission = self
            .permissions
            .get(permission_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Permission not found: {permission_id}")))?;

        self.roles
            .remove_role_permission(role_id, permission_id)
            .await?;

        self.invalidate(&role).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::PermissionRevoked {
                role_id,
                permission_id,
                permission_name: permission.name(),
                revoked_by: revoked_by.to_string(),
            }))
            .await;
        Ok(())
    }

    pub async fn set_permission_expiration(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        if expires_at <= Utc::now() {
            return Err(Error::validation("Expiration must be in the future"));
        }
        self.roles
            .set_role_permission_expiry(role_id, permission_id, expires_at)
            .await?;

        if let Some(role) = self.roles.get(role_id).await? {
            self.invalidate(&role).await;
        }
        Ok(())
    }

    /// The role's own valid permissions plus everything inherited from its
    /// ancestor chain. Expired assignments and inactive permissions are
    /// filtered out; the walk is cycle- and depth-guarded.
    pub async fn permissions_including_inherited(&self, role_id: Uuid) -> Result<Vec<Permission>> {
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut seen_permissions: HashSet<Uuid> = HashSet::new();
        let mut out = Vec::new();

        let mut current = Some(role);
        let mut depth = 0u32;
        while let Some(role) = current {
            if !visited.insert(role.id) || depth > self.config.max_hierarchy_depth {
                break;
            }
            depth += 1;

            for (assignment, permission) in self.roles.role_permissions(role.id).await? {
                if !assignment.is_expired()
                    && permission.is_active
                    && seen_permissions.insert(permission.id)
                {
                    out.push(permission);
                }
            }

            current = match role.parent_role_id {
                Some(parent_id) => self.roles.get(parent_id).await?,
                None => None,
            };
        }

        Ok(out)
    }

    /// The role, its ancestor chain, direct children, and effective
    /// permission union.
    pub async fn hierarchy(&self, role_id: Uuid) -> Result<RoleHierarchyResponse> {
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;

        let ancestors = self.ancestors(&role).await?;
        let children = self.roles.children(role_id).await?;
        let mut effective: Vec<String> = self
            .permissions_including_inherited(role_id)
            .await?
            .iter()
            .map(Permission::name)
            .collect();
        effective.sort();

        Ok(RoleHierarchyResponse {
            role,
            ancestors,
            children,
            effective_permissions: effective,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Role>> {
        self.roles.get(id).await
    }

    pub async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        self.roles.list_by_tenant(tenant_id).await
    }

    /// Parent chain ordered nearest-first, cycle- and depth-guarded.
    async fn ancestors(&self, role: &Role) -> Result<Vec<Role>> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        visited.insert(role.id);
        let mut out = Vec::new();
        let mut current = role.parent_role_id;

        while let Some(parent_id) = current {
            if !visited.insert(parent_id) || out.len() as u32 >= self.config.max_hierarchy_depth {
                break;
            }
            match self.roles.get(parent_id).await? {
                Some(parent) => {
                    current = parent.parent_role_id;
                    out.push(parent);
                }
                None => break,
            }
        }

        Ok(out)
    }

    async fn check_reparent(&self, role: &Role, new_parent_id: Uuid) -> Result<()> {
        if new_parent_id == role.id {
            return Err(Error::business_rule("A role cannot be its own parent"));
        }

        let parent = self
            .roles
            .get(new_parent_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Parent role not found: {new_parent_id}")))?;
        if parent.tenant_id != role.tenant_id {
            return Err(Error::business_rule(
                "Parent role must belong to the same tenant",
            ));
        }

        // Walking up from the new parent must never reach this role.
        let ancestors = self.ancestors(&parent).await?;
        if ancestors.iter().any(|a| a.id == role.id) {
            return Err(Error::business_rule(
                "Reparenting would create a cycle in the role hierarchy",
            ));
        }
        if (ancestors.len() as u32 + 2) > self.config.max_hierarchy_depth {
            return Err(Error::business_rule(format!(
                "Role hierarchy exceeds maximum depth of {}",
                self.config.max_hierarchy_depth
            )));
        }

        Ok(())
    }

    async fn invalidate(&self, role: &Role) {
        match role.tenant_id {
            Some(tenant_id) => self.cache.invalidate_tenant(tenant_id).await,
            // Global roles can affect any tenant.
            None => self.cache.clear().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::UserRole;
    use authz_core::cache::InMemoryDecisionCache;
    use authz_core::events::InMemoryEventPublisher;

    struct Fixture {
        store: Arc<InMemoryStore>,
        publisher: Arc<InMemoryEventPublisher>,
        service: RoleService,
        tenant_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let service = RoleService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDecisionCache::new()),
            publisher.clone(),
            EngineConfig::default(),
        );
        Fixture {
            store,
            publisher,
            service,
            tenant_id: Uuid::new_v4(),
        }
    }

    fn create_request(name: &str, tenant_id: Uuid) -> CreateRoleRequest {
        CreateRoleRequest {
            name: name.to_string(),
            description: None,
            tenant_id: Some(tenant_id),
            priority: 500,
            max_users: None,
            parent_role_id: None,
            permission_ids: vec![],
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let f = fixture();
        f.service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap();
        let err = f
            .service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn create_enforces_hierarchy_depth() {
        let f = fixture();
        let mut parent_id = None;
        // Build a chain at the depth limit.
        for i in 0..10 {
            let mut request = create_request(&format!("LEVEL_{i}"), f.tenant_id);
            request.parent_role_id = parent_id;
            let role = f.service.create(request, "admin").await.unwrap();
            parent_id = Some(role.id);
        }

        let mut over = create_request("TOO_DEEP", f.tenant_id);
        over.parent_role_id = parent_id;
        let err = f.service.create(over, "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn system_role_mutation_requires_override() {
        let f = fixture();
        let mut role = Role::new("TENANT_ADMIN", Some(f.tenant_id), "SYSTEM");
        role.is_system = true;
        RoleRepository::create(f.store.as_ref(), &role).await.unwrap();

        let request = UpdateRoleRequest {
            description: Some("changed".to_string()),
            version: 0,
            ..Default::default()
        };
        let err = f.service.update(role.id, request, "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);

        let request = UpdateRoleRequest {
            description: Some("changed".to_string()),
            allow_system_override: true,
            version: 0,
            ..Default::default()
        };
        f.service.update(role.id, request, "admin").await.unwrap();
    }

    #[tokio::test]
    async fn delete_refuses_assigned_or_parent_roles() {
        let f = fixture();
        let role = f
            .service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap();

        // Active assignment blocks deletion.
        f.store
            .assign(&UserRole::new(Uuid::new_v4(), role.id, f.tenant_id, "admin"))
            .await
            .unwrap();
        let err = f.service.delete(role.id, "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);

        // A child role blocks deletion too.
        let parent = f
            .service
            .create(create_request("PARENT", f.tenant_id), "admin")
            .await
            .unwrap();
        let mut child = create_request("CHILD", f.tenant_id);
        child.parent_role_id = Some(parent.id);
        f.service.create(child, "admin").await.unwrap();
        let err = f.service.delete(parent.id, "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn assign_permissions_is_idempotent() {
        let f = fixture();
        let role = f
            .service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap();
        let permission = Permission::new("REPORT", "READ");
        PermissionRepository::create(f.store.as_ref(), &permission)
            .await
            .unwrap();

        let first = f
            .service
            .assign_permissions(role.id, &[permission.id], "admin")
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = f
            .service
            .assign_permissions(role.id, &[permission.id], "admin")
            .await
            .unwrap();
        assert!(second.is_empty());

        assert_eq!(f.store.count_role_permissions(role.id).await.unwrap(), 1);
        // One grant event, not two.
        let grant_events = f
            .publisher
            .kinds()
            .iter()
            .filter(|k| **k == "PERMISSION_GRANTED")
            .count();
        assert_eq!(grant_events, 1);
    }

    #[tokio::test]
    async fn permission_expiration_must_be_future() {
        let f = fixture();
        let role = f
            .service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap();
        let permission = Permission::new("REPORT", "READ");
        PermissionRepository::create(f.store.as_ref(), &permission)
            .await
            .unwrap();
        f.service
            .assign_permissions(role.id, &[permission.id], "admin")
            .await
            .unwrap();

        let err = f
            .service
            .set_permission_expiration(
                role.id,
                permission.id,
                Utc::now() - chrono::Duration::hours(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn inherited_permissions_walk_the_chain() {
        let f = fixture();
        let parent = f
            .service
            .create(create_request("ANALYST", f.tenant_id), "admin")
            .await
            .unwrap();
        let export = Permission::new("REPORT", "EXPORT");
        PermissionRepository::create(f.store.as_ref(), &export)
            .await
            .unwrap();
        f.service
            .assign_permissions(parent.id, &[export.id], "admin")
            .await
            .unwrap();

        let mut child_request = create_request("VIEWER", f.tenant_id);
        child_request.parent_role_id = Some(parent.id);
        let child = f.service.create(child_request, "admin").await.unwrap();
        let read = Permission::new("REPORT", "READ");
        PermissionRepository::create(f.store.as_ref(), &read)
            .await
            .unwrap();
        f.service
            .assign_permissions(child.id, &[read.id], "admin")
            .await
            .unwrap();

        let all = f
            .service
            .permissions_including_inherited(child.id)
            .await
            .unwrap();
        let names: Vec<String> = all.iter().map(Permission::name).collect();
        assert!(names.contains(&"REPORT:READ".to_string()));
        assert!(names.contains(&"REPORT:EXPORT".to_string()));

        let hierarchy = f.service.hierarchy(child.id).await.unwrap();
        assert_eq!(hierarchy.ancestors.len(), 1);
        assert_eq!(
            hierarchy.effective_permissions,
            vec!["REPORT:EXPORT".to_string(), "REPORT:READ".to_string()]
        );
    }

    #[tokio::test]
    async fn clone_copies_permissions_and_clears_system_flag() {
        let f = fixture();
        let mut source = Role::new("TEMPLATE", Some(f.tenant_id), "SYSTEM");
        source.is_system = true;
        source.priority = 800;
        RoleRepository::create(f.store.as_ref(), &source)
            .await
            .unwrap();
        let permission = Permission::new("DATASET", "READ");
        PermissionRepository::create(f.store.as_ref(), &permission)
            .await
            .unwrap();
        f.store
            .add_role_permission(&RolePermission::new(source.id, permission.id, "SYSTEM"))
            .await
            .unwrap();

        let clone = f
            .service
            .clone_role(source.id, "COPY", Some(f.tenant_id), "admin")
            .await
            .unwrap();
        assert!(!clone.is_system);
        assert_eq!(clone.priority, 800);
        assert_eq!(f.store.count_role_permissions(clone.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reparent_cycle_is_rejected() {
        let f = fixture();
        let a = f
            .service
            .create(create_request("A", f.tenant_id), "admin")
            .await
            .unwrap();
        let mut b_request = create_request("B", f.tenant_id);
        b_request.parent_role_id = Some(a.id);
        let b = f.service.create(b_request, "admin").await.unwrap();

        // A -> parent B would close the loop A -> B -> A.
        let request = UpdateRoleRequest {
            parent_role_id: Some(b.id),
            version: 0,
            ..Default::default()
        };
        let err = f.service.update(a.id, request, "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);
    }
}
