//! End-to-end decision scenarios over the in-memory store.

use authz_core::cache::InMemoryDecisionCache;
use authz_core::DecisionCache;
use authz_core::config::EngineConfig;
use authz_core::events::InMemoryEventPublisher;
use authz_domain::condition::ConditionMap;
use authz_domain::dto::{AssignRoleRequest, AuthzRequest};
use authz_domain::engine::AuthorizationEngine;
use authz_domain::memory::InMemoryStore;
use authz_domain::model::{
    Permission, Policy, PolicyEffect, PolicyType, Resource, Role, RolePermission, UserRole,
};
use authz_domain::repository::{
    PermissionRepository, PolicyRepository, ResourceRepository, RoleRepository, UserRoleRepository,
};
use authz_domain::services::UserRoleService;
use authz_domain::sync::proto::{EventEnvelopeMeta, TenantCreated, TenantRef};
use authz_domain::sync::{ConsumeOutcome, TenantSyncService, DEFAULT_ROLES};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    store: Arc<InMemoryStore>,
    cache: Arc<InMemoryDecisionCache>,
    engine: AuthorizationEngine,
    tenant_id: Uuid,
    user_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(InMemoryDecisionCache::new());
    let engine = AuthorizationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
        Arc::new(InMemoryEventPublisher::new()),
        EngineConfig::default(),
    );
    Harness {
        store,
        cache,
        engine,
        tenant_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
    }
}

impl Harness {
    async fn role_with_permissions(&self, name: &str, pairs: &[(&str, &str)]) -> Role {
        let role = Role::new(name, Some(self.tenant_id), "admin");
        RoleRepository::create(self.store.as_ref(), &role)
            .await
            .unwrap();
        for (resource_type, action) in pairs {
            let permission = self.permission(resource_type, action).await;
            self.store
                .add_role_permission(&RolePermission::new(role.id, permission.id, "admin"))
                .await
                .unwrap();
        }
        self.store
            .assign(&UserRole::new(self.user_id, role.id, self.tenant_id, "admin"))
            .await
            .unwrap();
        role
    }

    async fn permission(&self, resource_type: &str, action: &str) -> Permission {
        match PermissionRepository::find_by_name(self.store.as_ref(), resource_type, action)
            .await
            .unwrap()
        {
            Some(existing) => existing,
            None => {
                let permission = Permission::new(resource_type, action);
                PermissionRepository::create(self.store.as_ref(), &permission)
                    .await
                    .unwrap();
                permission
            }
        }
    }

    fn request(&self, resource: &str, action: &str) -> AuthzRequest {
        AuthzRequest::new(self.user_id, self.tenant_id, resource, action)
    }
}

#[tokio::test]
async fn scenario_direct_match() {
    let h = harness();
    h.role_with_permissions("DATA_ANALYST", &[("REPORT", "READ"), ("REPORT", "VIEW")])
        .await;

    let response = h.engine.authorize(&h.request("REPORT", "READ")).await;
    assert!(response.allowed);
    assert_eq!(response.reason, "Direct permission granted");
    assert_eq!(
        response.granted_permissions,
        vec!["REPORT:READ".to_string(), "REPORT:VIEW".to_string()]
    );
}

#[tokio::test]
async fn scenario_owner_overrides_resource_deny_policy() {
    let h = harness();
    // The user needs some role to get past the first layer, but no DATASET
    // permission.
    h.role_with_permissions("BYSTANDER", &[("DASHBOARD", "VIEW")]).await;

    let mut resource = Resource::new("ds-42", "DATASET", h.tenant_id);
    resource.owner_id = Some(h.user_id);
    ResourceRepository::create(h.store.as_ref(), &resource)
        .await
        .unwrap();

    // A deny policy attached to the resource forbidding READ.
    let read = h.permission("DATASET", "READ").await;
    let mut deny = Policy::new("no-read", h.tenant_id, PolicyType::ResourceBased, "admin");
    deny.effect = PolicyEffect::Deny;
    deny.priority = 100;
    PolicyRepository::create(h.store.as_ref(), &deny)
        .await
        .unwrap();
    h.store.attach_permission(deny.id, read.id).await.unwrap();
    h.store.attach_policy(resource.id, deny.id).await.unwrap();

    let request = h.request("DATASET", "READ").with_resource_id("ds-42");
    let response = h.engine.authorize(&request).await;
    assert!(response.allowed);
    assert_eq!(response.reason, "Resource owner access granted");
    assert_eq!(response.granted_permissions, vec!["OWNER".to_string()]);

    // A different user without ownership falls through to the default deny.
    let stranger = Uuid::new_v4();
    let role = Role::new("OTHER", Some(h.tenant_id), "admin");
    RoleRepository::create(h.store.as_ref(), &role)
        .await
        .unwrap();
    h.store
        .assign(&UserRole::new(stranger, role.id, h.tenant_id, "admin"))
        .await
        .unwrap();
    let mut request = AuthzRequest::new(stranger, h.tenant_id, "DATASET", "READ");
    request.resource_id = Some("ds-42".to_string());
    let response = h.engine.authorize(&request).await;
    assert!(!response.allowed);
}

#[tokio::test]
async fn scenario_public_read_but_not_delete() {
    let h = harness();
    h.role_with_permissions("BYSTANDER", &[("DASHBOARD", "VIEW")]).await;

    let mut resource = Resource::new("open-data", "DATASET", h.tenant_id);
    resource.is_public = true;
    ResourceRepository::create(h.store.as_ref(), &resource)
        .await
        .unwrap();

    let request = h.request("DATASET", "READ").with_resource_id("open-data");
    let response = h.engine.authorize(&request).await;
    assert!(response.allowed);
    assert_eq!(response.reason, "Public resource access granted");
    assert_eq!(
        response.granted_permissions,
        vec!["PUBLIC_ACCESS".to_string()]
    );

    let request = h.request("DATASET", "DELETE").with_resource_id("open-data");
    let response = h.engine.authorize(&request).await;
    assert!(!response.allowed);
    assert_eq!(response.reason, "No permission for DATASET:DELETE");
}

/// An out-of-hours deny window beats the direct permission; inside the
/// window the direct match allows.
#[tokio::test]
async fn scenario_time_based_tenant_deny() {
    let h = harness();
    h.role_with_permissions("EDITOR", &[("DATASET", "UPDATE")]).await;

    // A window guaranteed not to contain the present moment: one hour long,
    // starting three hours from now.
    let now = Utc::now();
    let start = (now + ChronoDuration::hours(3)).hour();
    let end = (now + ChronoDuration::hours(4)).hour();
    let excluding_window = format!("{start:02}:00-{end:02}:00");

    let mut deny = Policy::new("business-hours", h.tenant_id, PolicyType::TimeBased, "admin");
    deny.effect = PolicyEffect::Deny;
    deny.priority = 50;
    deny.conditions = ConditionMap::new()
        .with("allowedHours", excluding_window)
        .with("timezone", "UTC");
    PolicyRepository::create(h.store.as_ref(), &deny)
        .await
        .unwrap();

    let response = h.engine.authorize(&h.request("DATASET", "UPDATE")).await;
    assert!(!response.allowed);
    assert_eq!(response.reason, "Access denied by policy");

    // Widen the window to cover the whole day: the deny no longer applies
    // and the direct match wins.
    let stored = PolicyRepository::get(h.store.as_ref(), deny.id)
        .await
        .unwrap()
        .unwrap();
    let mut updated = stored.clone();
    updated.conditions = ConditionMap::new()
        .with("allowedHours", "00:00-23:59")
        .with("timezone", "UTC");
    PolicyRepository::update(h.store.as_ref(), &updated)
        .await
        .unwrap();
    h.cache.clear().await;

    let response = h.engine.authorize(&h.request("DATASET", "UPDATE")).await;
    assert!(response.allowed);
    assert_eq!(response.reason, "Direct permission granted");
}

#[tokio::test]
async fn scenario_hierarchy_inheritance() {
    let h = harness();

    // ANALYST holds REPORT:EXPORT; VIEWER is its child with only REPORT:READ.
    let analyst = Role::new("ANALYST", Some(h.tenant_id), "admin");
    RoleRepository::create(h.store.as_ref(), &analyst)
        .await
        .unwrap();
    let export = h.permission("REPORT", "EXPORT").await;
    h.store
        .add_role_permission(&RolePermission::new(analyst.id, export.id, "admin"))
        .await
        .unwrap();

    let mut viewer = Role::new("VIEWER", Some(h.tenant_id), "admin");
    viewer.parent_role_id = Some(analyst.id);
    RoleRepository::create(h.store.as_ref(), &viewer)
        .await
        .unwrap();
    let read = h.permission("REPORT", "READ").await;
    h.store
        .add_role_permission(&RolePermission::new(viewer.id, read.id, "admin"))
        .await
        .unwrap();

    h.store
        .assign(&UserRole::new(h.user_id, viewer.id, h.tenant_id, "admin"))
        .await
        .unwrap();

    let response = h.engine.authorize(&h.request("REPORT", "EXPORT")).await;
    assert!(response.allowed);
    assert_eq!(response.reason, "Inherited permission granted");
    assert_eq!(
        response.granted_permissions,
        vec!["REPORT:EXPORT".to_string()]
    );
}

#[tokio::test]
async fn scenario_tenant_sync_idempotency() {
    let store = Arc::new(InMemoryStore::new());
    let sync = TenantSyncService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(InMemoryDecisionCache::new()),
    );

    for (resource_type, action) in [("TENANT", "CREATE"), ("DATASET", "READ"), ("REPORT", "READ")]
    {
        PermissionRepository::create(store.as_ref(), &Permission::new(resource_type, action))
            .await
            .unwrap();
    }

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let event = TenantCreated {
        metadata: Some(EventEnvelopeMeta {
            correlation_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
        }),
        tenant: Some(TenantRef {
            tenant_id: tenant_id.to_string(),
            tenant_code: "acme".to_string(),
        }),
    };

    // Two deliveries of the same event.
    assert_eq!(sync.on_tenant_created(&event).await, ConsumeOutcome::Processed);
    assert_eq!(sync.on_tenant_created(&event).await, ConsumeOutcome::Processed);

    assert_eq!(store.role_count_for_tenant(tenant_id), DEFAULT_ROLES.len());
    let assignments = store.list_for_user(user_id, tenant_id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert!(assignments[0].is_active);
}

/// Revoking the user's last role flips decisions to a roleless denial once
/// the cache entry for the pair is gone.
#[tokio::test]
async fn revocation_of_last_role_denies_after_invalidation() {
    let h = harness();
    let role = h
        .role_with_permissions("VIEWER", &[("DASHBOARD", "VIEW")])
        .await;

    assert!(h.engine.authorize(&h.request("DASHBOARD", "VIEW")).await.allowed);

    // Revoke through the service, which invalidates the user's cache slice.
    let service = UserRoleService::new(
        h.store.clone(),
        h.store.clone(),
        h.cache.clone(),
        Arc::new(InMemoryEventPublisher::new()),
    );
    service
        .revoke(h.user_id, role.id, h.tenant_id, "admin")
        .await
        .unwrap();

    let response = h.engine.authorize(&h.request("DASHBOARD", "VIEW")).await;
    assert!(!response.allowed);
    assert_eq!(response.reason, "User has no active roles");

    // Re-assignment restores access in one step.
    service
        .assign(
            AssignRoleRequest {
                user_id: h.user_id,
                role_id: role.id,
                tenant_id: h.tenant_id,
                expires_at: None,
            },
            "admin",
        )
        .await
        .unwrap();
    assert!(h.engine.authorize(&h.request("DASHBOARD", "VIEW")).await.allowed);
}

#[tokio::test]
async fn expired_role_assignment_is_ignored() {
    let h = harness();
    let role = Role::new("TEMP", Some(h.tenant_id), "admin");
    RoleRepository::create(h.store.as_ref(), &role)
        .await
        .unwrap();
    let permission = h.permission("REPORT", "READ").await;
    h.store
        .add_role_permission(&RolePermission::new(role.id, permission.id, "admin"))
        .await
        .unwrap();

    let mut assignment = UserRole::new(h.user_id, role.id, h.tenant_id, "admin");
    assignment.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
    h.store.assign(&assignment).await.unwrap();

    let response = h.engine.authorize(&h.request("REPORT", "READ")).await;
    assert!(!response.allowed);
    assert_eq!(response.reason, "User has no active roles");
}
