//! Tenant lifecycle event handling.
//!
//! The handler is transport-agnostic: the stream consumer decodes protobuf
//! payloads and calls in here. Outcomes are classified for the broker:
//! non-retryable failures are acknowledged and dropped, retryable ones are
//! left for redelivery.

use super::defaults::provision_default_roles;
use super::proto::{TenantCreated, TenantDeactivated};
use crate::model::UserRole;
use crate::repository::{PermissionRepository, RoleRepository, UserRoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::{Error, ErrorKind, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How the consumer should settle the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Work done (or already done); acknowledge.
    Processed,
    /// Input can never succeed; acknowledge and drop.
    Dropped,
    /// Transient failure; leave unacknowledged for redelivery.
    Retry,
}

pub struct TenantSyncService {
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    user_roles: Arc<dyn UserRoleRepository>,
    cache: Arc<dyn DecisionCache>,
}

impl TenantSyncService {
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        user_roles: Arc<dyn UserRoleRepository>,
        cache: Arc<dyn DecisionCache>,
    ) -> Self {
        Self {
            roles,
            permissions,
            user_roles,
            cache,
        }
    }

    /// Provision the default role set and, when a user is named, assign
    /// TENANT_ADMIN to them. Idempotent under redelivery.
    #[instrument(skip(self, event))]
    pub async fn on_tenant_created(&self, event: &TenantCreated) -> ConsumeOutcome {
        let correlation = event
            .metadata
            .as_ref()
            .map(|m| m.correlation_id.as_str())
            .unwrap_or("");

        // 1. Identifier validation; malformed input can never succeed.
        let Some(tenant) = event.tenant.as_ref() else {
            warn!(correlation, "TenantCreated without tenant payload, dropping");
            return ConsumeOutcome::Dropped;
        };
        let Ok(tenant_id) = Uuid::parse_str(&tenant.tenant_id) else {
            warn!(correlation, tenant_id = %tenant.tenant_id, "TenantCreated with invalid tenant id, dropping");
            return ConsumeOutcome::Dropped;
        };
        let user_id = match event.metadata.as_ref().map(|m| m.user_id.as_str()) {
            Some("") | None => None,
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(correlation, user_id = raw, "TenantCreated with invalid user id, dropping");
                    return ConsumeOutcome::Dropped;
                }
            },
        };

        // 2. Materialize default roles.
        let created =
            match provision_default_roles(&self.roles, &self.permissions, tenant_id).await {
                Ok(created) => created,
                Err(e) => return self.classify(e, "provisioning default roles"),
            };

        // 3. Admin assignment for the creating user.
        if let Some(user_id) = user_id {
            match self.assign_tenant_admin(tenant_id, user_id).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // TENANT_ADMIN must exist right after provisioning; if it
                    // does not, no redelivery will fix it.
                    warn!(correlation, %tenant_id, "TENANT_ADMIN role missing after provisioning, dropping");
                    return ConsumeOutcome::Dropped;
                }
                Err(e) => return self.classify(e, "assigning TENANT_ADMIN"),
            }
        }

        self.cache.invalidate_tenant(tenant_id).await;
        info!(%tenant_id, roles_created = created, tenant_code = %tenant.tenant_code, "Tenant provisioned");
        ConsumeOutcome::Processed
    }

    /// Deactivate every role of a removed tenant.
    #[instrument(skip(self, event))]
    pub async fn on_tenant_deactivated(&self, event: &TenantDeactivated) -> ConsumeOutcome {
        let Ok(tenant_id) = Uuid::parse_str(&event.tenant_id) else {
            warn!(tenant_id = %event.tenant_id, "TenantDeactivated with invalid tenant id, dropping");
            return ConsumeOutcome::Dropped;
        };

        match self.roles.deactivate_tenant_roles(tenant_id).await {
            Ok(count) => {
                self.cache.invalidate_tenant(tenant_id).await;
                info!(%tenant_id, roles_deactivated = count, "Tenant deactivated");
                ConsumeOutcome::Processed
            }
            Err(e) => self.classify(e, "deactivating tenant roles"),
        }
    }

    async fn assign_tenant_admin(&self, tenant_id: Uuid, user_id: Uuid) -> Result<()> {
        let admin_role = self
            .roles
            .find_by_name("TENANT_ADMIN", Some(tenant_id))
            .await?
            .ok_or_else(|| Error::not_found("TENANT_ADMIN role missing"))?;

        let assignment = UserRole::new(user_id, admin_role.id, tenant_id, "SYSTEM");
        match self.user_roles.assign(&assignment).await {
            Ok(_) => Ok(()),
            // Redelivery after a partially applied first attempt.
            Err(e) if e.kind() == ErrorKind::Duplicate => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn classify(&self, error: Error, context: &str) -> ConsumeOutcome {
        if error.is_retryable() {
            warn!(error = %error, context, "Transient failure, leaving for redelivery");
            ConsumeOutcome::Retry
        } else {
            warn!(error = %error, context, "Permanent failure, dropping message");
            ConsumeOutcome::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::proto::{EventEnvelopeMeta, TenantRef};
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::Permission;
    use crate::sync::defaults::DEFAULT_ROLES;
    use authz_core::cache::InMemoryDecisionCache;

    fn service() -> (Arc<InMemoryStore>, TenantSyncService) {
        let store = Arc::new(InMemoryStore::new());
        let service = TenantSyncService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDecisionCache::new()),
        );
        (store, service)
    }

    async fn seed_catalog(store: &InMemoryStore) {
        for (resource_type, action) in [
            ("TENANT", "CREATE"),
            ("TENANT", "DELETE_TENANT"),
            ("USER", "CREATE"),
            ("DATASET", "READ"),
            ("DASHBOARD", "READ"),
            ("REPORT", "READ"),
        ] {
            PermissionRepository::create(store, &Permission::new(resource_type, action))
                .await
                .unwrap();
        }
    }

    fn created_event(tenant_id: Uuid, user_id: Option<Uuid>) -> TenantCreated {
        TenantCreated {
            metadata: Some(EventEnvelopeMeta {
                correlation_id: Uuid::new_v4().to_string(),
                user_id: user_id.map(|u| u.to_string()).unwrap_or_default(),
            }),
            tenant: Some(TenantRef {
                tenant_id: tenant_id.to_string(),
                tenant_code: "acme".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn provisioning_is_idempotent_across_deliveries() {
        let (store, service) = service();
        seed_catalog(&store).await;
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = created_event(tenant_id, Some(user_id));

        assert_eq!(service.on_tenant_created(&event).await, ConsumeOutcome::Processed);
        let after_first = store.role_count_for_tenant(tenant_id);
        assert_eq!(after_first, DEFAULT_ROLES.len());

        // Second delivery of the same event changes nothing.
        assert_eq!(service.on_tenant_created(&event).await, ConsumeOutcome::Processed);
        assert_eq!(store.role_count_for_tenant(tenant_id), after_first);

        // Exactly one active TENANT_ADMIN assignment for the user.
        let assignments = store.list_for_user(user_id, tenant_id).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].is_active);
    }

    #[tokio::test]
    async fn default_roles_are_system_owned() {
        let (store, service) = service();
        seed_catalog(&store).await;
        let tenant_id = Uuid::new_v4();
        service
            .on_tenant_created(&created_event(tenant_id, None))
            .await;

        let roles = RoleRepository::list_by_tenant(store.as_ref(), tenant_id)
            .await
            .unwrap();
        assert!(!roles.is_empty());
        for role in roles {
            assert!(role.is_system);
            assert!(role.is_active);
            assert_eq!(role.created_by, "SYSTEM");
        }
    }

    #[tokio::test]
    async fn tenant_admin_gets_scope_without_delete_tenant() {
        let (store, service) = service();
        seed_catalog(&store).await;
        let tenant_id = Uuid::new_v4();
        service
            .on_tenant_created(&created_event(tenant_id, None))
            .await;

        let admin = RoleRepository::find_by_name(store.as_ref(), "TENANT_ADMIN", Some(tenant_id))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<String> = store
            .role_permissions(admin.id)
            .await
            .unwrap()
            .iter()
            .map(|(_, p)| p.name())
            .collect();
        assert!(names.contains(&"TENANT:CREATE".to_string()));
        assert!(names.contains(&"USER:CREATE".to_string()));
        assert!(!names.contains(&"TENANT:DELETE_TENANT".to_string()));
    }

    #[tokio::test]
    async fn malformed_identifiers_are_dropped() {
        let (_, service) = service();

        let mut event = created_event(Uuid::new_v4(), None);
        event.tenant.as_mut().unwrap().tenant_id = "not-a-uuid".to_string();
        assert_eq!(service.on_tenant_created(&event).await, ConsumeOutcome::Dropped);

        let mut event = created_event(Uuid::new_v4(), None);
        event.metadata.as_mut().unwrap().user_id = "garbage".to_string();
        assert_eq!(service.on_tenant_created(&event).await, ConsumeOutcome::Dropped);

        let event = TenantDeactivated {
            metadata: None,
            tenant_id: "nope".to_string(),
        };
        assert_eq!(
            service.on_tenant_deactivated(&event).await,
            ConsumeOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn deactivation_turns_off_every_role() {
        let (store, service) = service();
        seed_catalog(&store).await;
        let tenant_id = Uuid::new_v4();
        service
            .on_tenant_created(&created_event(tenant_id, None))
            .await;

        let event = TenantDeactivated {
            metadata: None,
            tenant_id: tenant_id.to_string(),
        };
        assert_eq!(
            service.on_tenant_deactivated(&event).await,
            ConsumeOutcome::Processed
        );

        let roles = RoleRepository::list_by_tenant(store.as_ref(), tenant_id)
            .await
            .unwrap();
        assert!(roles.iter().all(|r| !r.is_active));
    }
}
