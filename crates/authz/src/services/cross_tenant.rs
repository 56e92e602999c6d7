//! Cross-tenant access grants.

use crate::dto::GrantCrossTenantRequest;
use crate::model::CrossTenantAccess;
use crate::repository::CrossTenantRepository;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub struct CrossTenantService {
    grants: Arc<dyn CrossTenantRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl CrossTenantService {
    pub fn new(grants: Arc<dyn CrossTenantRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { grants, publisher }
    }

    #[instrument(skip(self, request), fields(source = %request.source_tenant_id, target = %request.target_tenant_id))]
    pub async fn grant(
        &self,
        request: GrantCrossTenantRequest,
        granted_by: &str,
    ) -> Result<CrossTenantAccess> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        if request.source_tenant_id == request.target_tenant_id {
            return Err(Error::validation(
                "Source and target tenants must differ",
            ));
        }

        if self
            .grants
            .find_active(
                request.source_tenant_id,
                request.target_tenant_id,
                &request.resource_type,
            )
            .await?
            .is_some()
        {
            return Err(Error::duplicate(
                "An active grant already exists for this tenant pair and resource type",
            ));
        }

        let grant = CrossTenantAccess {
            id: Uuid::new_v4(),
            source_tenant_id: request.source_tenant_id,
            target_tenant_id: request.target_tenant_id,
            resource_type: request.resource_type.clone(),
            resource_id: request.resource_id.clone(),
            permissions: request.permissions.clone(),
            conditions: request.conditions.clone(),
            granted_by: granted_by.to_string(),
            granted_at: Utc::now(),
            revoked_by: None,
            revoked_at: None,
            expires_at: request.expires_at,
            is_active: true,
        };
        let grant = self.grants.create(&grant).await?;

        self.publisher
            .publish(AuditEvent::new(AuditPayload::CrossTenantAccessGranted {
                access_id: grant.id,
                source_tenant_id: grant.source_tenant_id,
                target_tenant_id: grant.target_tenant_id,
                resource_type: grant.resource_type.clone(),
                granted_by: granted_by.to_string(),
            }))
            .await;

        info!(resource_type = %grant.resource_type, "Cross-tenant access granted");
        Ok(grant)
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, id: Uuid, revoked_by: &str) -> Result<CrossTenantAccess> {
        let grant = self.grants.revoke(id, revoked_by).await?;

        self.publisher
            .publish(AuditEvent::new(AuditPayload::CrossTenantAccessRevoked {
                access_id: grant.id,
                source_tenant_id: grant.source_tenant_id,
                target_tenant_id: grant.target_tenant_id,
                revoked_by: revoked_by.to_string(),
            }))
            .await;
        Ok(grant)
    }

    /// True iff an active, unexpired grant covers the action.
    pub async fn check(
        &self,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        resource_type: &str,
        action: &str,
    ) -> Result<bool> {
        let grant = self
            .grants
            .find_active(source_tenant_id, target_tenant_id, resource_type)
            .await?;
        Ok(grant.map(|g| g.allows(action)).unwrap_or(false))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<CrossTenantAccess>> {
        self.grants.get(id).await
    }

    pub async fn list_granted_by(&self, source_tenant_id: Uuid) -> Result<Vec<CrossTenantAccess>> {
        self.grants.list_for_source(source_tenant_id).await
    }

    pub async fn list_received_by(
        &self,
        target_tenant_id: Uuid,
    ) -> Result<Vec<CrossTenantAccess>> {
        self.grants.list_for_target(target_tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionMap;
    use crate::memory::InMemoryStore;
    use authz_core::events::InMemoryEventPublisher;

    fn service() -> (Arc<InMemoryStore>, CrossTenantService) {
        let store = Arc::new(InMemoryStore::new());
        let service =
            CrossTenantService::new(store.clone(), Arc::new(InMemoryEventPublisher::new()));
        (store, service)
    }

    fn request(source: Uuid, target: Uuid) -> GrantCrossTenantRequest {
        GrantCrossTenantRequest {
            source_tenant_id: source,
            target_tenant_id: target,
            resource_type: "DATASET".to_string(),
            resource_id: None,
            permissions: vec!["READ".to_string(), "EXPORT".to_string()],
            conditions: ConditionMap::new(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn grant_rejects_self_and_duplicates() {
        let (_, service) = service();
        let tenant = Uuid::new_v4();

        let err = service.grant(request(tenant, tenant), "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Validation);

        let other = Uuid::new_v4();
        service.grant(request(tenant, other), "admin").await.unwrap();
        let err = service.grant(request(tenant, other), "admin").await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn check_honors_action_list_and_revocation() {
        let (_, service) = service();
        let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
        let grant = service.grant(request(source, target), "admin").await.unwrap();

        assert!(service.check(source, target, "DATASET", "READ").await.unwrap());
        assert!(!service.check(source, target, "DATASET", "DELETE").await.unwrap());
        assert!(!service.check(source, target, "REPORT", "READ").await.unwrap());

        let revoked = service.revoke(grant.id, "admin").await.unwrap();
        assert!(!revoked.is_active);
        assert!(revoked.revoked_by.is_some());
        assert!(!service.check(source, target, "DATASET", "READ").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_then_grant_again_recovers() {
        let (_, service) = service();
        let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
        let first = service.grant(request(source, target), "admin").await.unwrap();
        service.revoke(first.id, "admin").await.unwrap();

        // A fresh grant for the same triple succeeds once the old one is
        // inactive.
        service.grant(request(source, target), "admin").await.unwrap();
        assert!(service.check(source, target, "DATASET", "READ").await.unwrap());
    }
}
