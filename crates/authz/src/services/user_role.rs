//! User-role assignment administration.
//!
//! Assign and revoke are the two mutations with the most direct effect on
//! live decisions, so both invalidate the user's decision-cache slice
//! before returning.

use crate::dto::AssignRoleRequest;
use crate::model::UserRole;
use crate::repository::{RoleRepository, UserRoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::{Error, Result};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct UserRoleService {
    user_roles: Arc<dyn UserRoleRepository>,
    roles: Arc<dyn RoleRepository>,
    cache: Arc<dyn DecisionCache>,
    publisher: Arc<dyn EventPublisher>,
}

impl UserRoleService {
    pub fn new(
        user_roles: Arc<dyn UserRoleRepository>,
        roles: Arc<dyn RoleRepository>,
        cache: Arc<dyn DecisionCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            user_roles,
            roles,
            cache,
            publisher,
        }
    }

    #[instrument(skip(self, request), fields(user = %request.user_id, role = %request.role_id))]
    pub async fn assign(&self, request: AssignRoleRequest, assigned_by: &str) -> Result<UserRole> {
        // 1. The role must exist, be active, and belong to the tenant (or be
        //    a global role).
        let role = self
            .roles
            .get(request.role_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Role not found: {}", request.role_id)))?;
        if !role.is_active {
            return Err(Error::business_rule("Cannot assign an inactive role"));
        }
        if let Some(role_tenant) = role.tenant_id {
            if role_tenant != request.tenant_id {
                return Err(Error::tenant_isolation(
                    "Role belongs to a different tenant",
                ));
            }
        }

        // 2. Duplicate active assignment check.
        if let Some(existing) = self
            .user_roles
            .find(request.user_id, request.role_id, request.tenant_id)
            .await?
        {
            if existing.is_valid() {
                return Err(Error::duplicate("Role already assigned to user"));
            }
        }

        // 3. Capacity check.
        if let Some(max_users) = role.max_users {
            let active = self.user_roles.count_active_for_role(role.id).await?;
            if active >= i64::from(max_users) {
                return Err(Error::business_rule(format!(
                    "Role '{}' is at its maximum of {} users",
                    role.name, max_users
                )));
            }
        }

        let mut assignment = UserRole::new(
            request.user_id,
            request.role_id,
            request.tenant_id,
            assigned_by,
        );
        assignment.expires_at = request.expires_at;
        let assignment = self.user_roles.assign(&assignment).await?;

        self.cache
            .invalidate_user(request.user_id, request.tenant_id)
            .await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleAssigned {
                user_id: request.user_id,
                role_id: request.role_id,
                tenant_id: request.tenant_id,
                assigned_by: assigned_by.to_string(),
            }))
            .await;

        info!(role = %role.name, "Role assigned");
        Ok(assignment)
    }

    #[instrument(skip(self))]
    pub async fn revoke(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        revoked_by: &str,
    ) -> Result<()> {
        self.user_roles.revoke(user_id, role_id, tenant_id).await?;

        self.cache.invalidate_user(user_id, tenant_id).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::RoleRevoked {
                user_id,
                role_id,
                tenant_id,
                revoked_by: revoked_by.to_string(),
            }))
            .await;
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<UserRole>> {
        self.user_roles.list_for_user(user_id, tenant_id).await
    }

    pub async fn list_for_role(&self, role_id: Uuid) -> Result<Vec<UserRole>> {
        self.user_roles.list_for_role(role_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::Role;
    use authz_core::cache::InMemoryDecisionCache;
    use authz_core::events::InMemoryEventPublisher;

    struct Fixture {
        store: Arc<InMemoryStore>,
        publisher: Arc<InMemoryEventPublisher>,
        service: UserRoleService,
        tenant_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let service = UserRoleService::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDecisionCache::new()),
            publisher.clone(),
        );
        Fixture {
            store,
            publisher,
            service,
            tenant_id: Uuid::new_v4(),
        }
    }

    async fn make_role(f: &Fixture, name: &str, max_users: Option<i32>) -> Role {
        let mut role = Role::new(name, Some(f.tenant_id), "admin");
        role.max_users = max_users;
        RoleRepository::create(f.store.as_ref(), &role).await.unwrap();
        role
    }

    fn request(f: &Fixture, user_id: Uuid, role_id: Uuid) -> AssignRoleRequest {
        AssignRoleRequest {
            user_id,
            role_id,
            tenant_id: f.tenant_id,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_assignment_is_rejected() {
        let f = fixture();
        let role = make_role(&f, "ANALYST", None).await;
        let user = Uuid::new_v4();

        f.service.assign(request(&f, user, role.id), "admin").await.unwrap();
        let err = f
            .service
            .assign(request(&f, user, role.id), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn max_users_is_enforced() {
        let f = fixture();
        let role = make_role(&f, "LIMITED", Some(1)).await;

        f.service
            .assign(request(&f, Uuid::new_v4(), role.id), "admin")
            .await
            .unwrap();
        let err = f
            .service
            .assign(request(&f, Uuid::new_v4(), role.id), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn cross_tenant_role_is_rejected() {
        let f = fixture();
        let foreign_role = Role::new("OTHER", Some(Uuid::new_v4()), "admin");
        RoleRepository::create(f.store.as_ref(), &foreign_role)
            .await
            .unwrap();

        let err = f
            .service
            .assign(request(&f, Uuid::new_v4(), foreign_role.id), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::TenantIsolation);
    }

    #[tokio::test]
    async fn revoke_then_assign_restores() {
        let f = fixture();
        let role = make_role(&f, "ANALYST", None).await;
        let user = Uuid::new_v4();

        f.service.assign(request(&f, user, role.id), "admin").await.unwrap();
        f.service
            .revoke(user, role.id, f.tenant_id, "admin")
            .await
            .unwrap();
        let restored = f
            .service
            .assign(request(&f, user, role.id), "admin")
            .await
            .unwrap();
        assert!(restored.is_active);

        assert_eq!(
            f.publisher.kinds(),
            vec!["ROLE_ASSIGNED", "ROLE_REVOKED", "ROLE_ASSIGNED"]
        );
    }
}
