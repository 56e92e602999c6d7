//! Permission catalog administration.

use crate::dto::{CreatePermissionRequest, PermissionFilter};
use crate::model::{Permission, RolePermission};
use crate::repository::{PermissionRepository, RoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// TTL for the distinct resource-type/action enumerations.
const ENUMERATION_TTL_SECS: i64 = 300;

#[derive(Default)]
struct EnumerationCache {
    resource_types: Option<(Vec<String>, DateTime<Utc>)>,
    actions: Option<(Vec<String>, DateTime<Utc>)>,
}

pub struct PermissionService {
    permissions: Arc<dyn PermissionRepository>,
    roles: Arc<dyn RoleRepository>,
    cache: Arc<dyn DecisionCache>,
    publisher: Arc<dyn EventPublisher>,
    enumerations: RwLock<EnumerationCache>,
}

impl PermissionService {
    pub fn new(
        permissions: Arc<dyn PermissionRepository>,
        roles: Arc<dyn RoleRepository>,
        cache: Arc<dyn DecisionCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            permissions,
            roles,
            cache,
            publisher,
            enumerations: RwLock::new(EnumerationCache::default()),
        }
    }

    #[instrument(skip(self, request), fields(name = %format!("{}:{}", request.resource_type, request.action)))]
    pub async fn create(&self, request: CreatePermissionRequest) -> Result<Permission> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        if self
            .permissions
            .find_by_name(&request.resource_type, &request.action)
            .await?
            .is_some()
        {
            return Err(Error::duplicate(format!(
                "Permission '{}:{}' already exists",
                request.resource_type, request.action
            )));
        }

        let mut permission = Permission::new(&request.resource_type, &request.action);
        permission.description = request.description;
        permission.risk_level = request.risk_level;
        permission.requires_mfa = request.requires_mfa;
        permission.requires_approval = request.requires_approval;
        let permission = self.permissions.create(&permission).await?;

        // New names invalidate the enumeration snapshots.
        *self.enumerations.write().expect("enumeration lock poisoned") =
            EnumerationCache::default();

        Ok(permission)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Permission>> {
        self.permissions.get(id).await
    }

    pub async fn list(&self, filter: &PermissionFilter) -> Result<Vec<Permission>> {
        self.permissions.list(filter).await
    }

    pub async fn distinct_resource_types(&self) -> Result<Vec<String>> {
        {
            let cache = self.enumerations.read().expect("enumeration lock poisoned");
            if let Some((values, at)) = &cache.resource_types {
                if *at + Duration::seconds(ENUMERATION_TTL_SECS) > Utc::now() {
                    return Ok(values.clone());
                }
            }
        }
        let values = self.permissions.distinct_resource_types().await?;
        self.enumerations
            .write()
            .expect("enumeration lock poisoned")
            .resource_types = Some((values.clone(), Utc::now()));
        Ok(values)
    }

    pub async fn distinct_actions(&self) -> Result<Vec<String>> {
        {
            let cache = self.enumerations.read().expect("enumeration lock poisoned");
            if let Some((values, at)) = &cache.actions {
                if *at + Duration::seconds(ENUMERATION_TTL_SECS) > Utc::now() {
                    return Ok(values.clone());
                }
            }
        }
        let values = self.permissions.distinct_actions().await?;
        self.enumerations
            .write()
            .expect("enumeration lock poisoned")
            .actions = Some((values.clone(), Utc::now()));
        Ok(values)
    }

    /// Assign a single permission to a role. Same cache-eviction and event
    /// semantics as the role-side bulk assignment.
    #[instrument(skip(self))]
    pub async fn assign_to_role(
        &self,
        permission_id: Uuid,
        role_id: Uuid,
        granted_by: &str,
    ) -> Result<()> {
        let permission = self
            .permissions
            .get(permission_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Permission not found: {permission_id}")))?;
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;

        let assignment = RolePermission::new(role_id, permission_id, granted_by);
        match self.roles.add_role_permission(&assignment).await {
            Ok(_) => {
                self.publisher
                    .publish(AuditEvent::new(AuditPayload::PermissionGranted {
                        role_id,
                        permission_id,
                        permission_name: permission.name(),
                        granted_by: granted_by.to_string(),
                    }))
                    .await;
            }
            // Re-assigning an existing pair is a no-op.
            Err(e) if e.kind() == authz_core::ErrorKind::Duplicate => return Ok(()),
            Err(e) => return Err(e),
        }

        match role.tenant_id {
            Some(tenant_id) => self.cache.invalidate_tenant(tenant_id).await,
            None => self.cache.clear().await,
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_from_role(
        &self,
        permission_id: Uuid,
        role_id: Uuid,
        revoked_by: &str,
    ) -> Result<()> {
        let permission = self
            .permissions
            .get(permission_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Permission not found: {permission_id}")))?;
        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {role_id}")))?;

        self.roles
            .remove_role_permission(role_id, permission_id)
            .await?;

        self.publisher
            .publish(AuditEvent::new(AuditPayload::PermissionRevoked {
                role_id,
                permission_id,
                permission_name: permission.name(),
                revoked_by: revoked_by.to_string(),
            }))
            .await;

        match role.tenant_id {
            Some(tenant_id) => self.cache.invalidate_tenant(tenant_id).await,
            None => self.cache.clear().await,
        }
        Ok(())
    }
}
