//! Resource administration.

use crate::dto::{CreateResourceRequest, UpdateResourceRequest};
use crate::model::{Policy, Resource};
use crate::repository::{PolicyRepository, ResourceRepository};
use authz_core::cache::DecisionCache;
use authz_core::{Error, Result};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

pub struct ResourceService {
    resources: Arc<dyn ResourceRepository>,
    policies: Arc<dyn PolicyRepository>,
    cache: Arc<dyn DecisionCache>,
}

impl ResourceService {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        policies: Arc<dyn PolicyRepository>,
        cache: Arc<dyn DecisionCache>,
    ) -> Self {
        Self {
            resources,
            policies,
            cache,
        }
    }

    #[instrument(skip(self, request), fields(identifier = %request.resource_identifier))]
    pub async fn create(&self, request: CreateResourceRequest) -> Result<Resource> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        if self
            .resources
            .find_by_identifier(&request.resource_identifier)
            .await?
            .is_some()
        {
            return Err(Error::duplicate(format!(
                "Resource '{}' already exists",
                request.resource_identifier
            )));
        }

        if let Some(parent_id) = request.parent_resource_id {
            let parent = self
                .resources
                .get(parent_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("Parent resource not found: {parent_id}")))?;
            if parent.tenant_id != request.tenant_id {
                return Err(Error::tenant_isolation(
                    "Parent resource belongs to a different tenant",
                ));
            }
        }

        let mut resource = Resource::new(
            &request.resource_identifier,
            &request.resource_type,
            request.tenant_id,
        );
        resource.parent_resource_id = request.parent_resource_id;
        resource.attributes = request.attributes.clone();
        resource.owner_id = request.owner_id;
        resource.is_public = request.is_public;
        let resource = self.resources.create(&resource).await?;

        self.cache.invalidate_tenant(resource.tenant_id).await;
        Ok(resource)
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, id: Uuid, request: UpdateResourceRequest) -> Result<Resource> {
        let existing = self
            .resources
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Resource not found: {id}")))?;

        if let Some(parent_id) = request.parent_resource_id {
            if parent_id == id {
                return Err(Error::business_rule("A resource cannot be its own parent"));
            }
            let parent = self
                .resources
                .get(parent_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("Parent resource not found: {parent_id}")))?;
            if parent.tenant_id != existing.tenant_id {
                return Err(Error::tenant_isolation(
                    "Parent resource belongs to a different tenant",
                ));
            }
        }

        let mut updated = existing.clone();
        if let Some(attributes) = request.attributes {
            updated.attributes = attributes;
        }
        if request.owner_id.is_some() {
            updated.owner_id = request.owner_id;
        }
        if let Some(is_public) = request.is_public {
            updated.is_public = is_public;
        }
        if let Some(is_active) = request.is_active {
            updated.is_active = is_active;
        }
        if request.parent_resource_id.is_some() {
            updated.parent_resource_id = request.parent_resource_id;
        }
        updated.version = request.version;

        let updated = self.resources.update(&updated).await?;
        self.cache.invalidate_tenant(updated.tenant_id).await;
        Ok(updated)
    }

    /// Deletion is forbidden while child resources reference this one.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let resource = self
            .resources
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Resource not found: {id}")))?;

        let children = self.resources.children(id).await?;
        if !children.is_empty() {
            return Err(Error::business_rule(format!(
                "Resource has {} child resources and cannot be deleted",
                children.len()
            )));
        }

        self.resources.delete(id).await?;
        self.cache.invalidate_tenant(resource.tenant_id).await;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Resource>> {
        self.resources.get(id).await
    }

    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Resource>> {
        self.resources.find_by_identifier(identifier).await
    }

    #[instrument(skip(self))]
    pub async fn attach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        let resource = self
            .resources
            .get(resource_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Resource not found: {resource_id}")))?;
        let policy = self
            .policies
            .get(policy_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Policy not found: {policy_id}")))?;

        if policy.tenant_id != resource.tenant_id {
            return Err(Error::tenant_isolation(
                "Policy belongs to a different tenant than the resource",
            ));
        }

        self.resources.attach_policy(resource_id, policy_id).await?;
        self.cache.invalidate_tenant(resource.tenant_id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn detach_policy(&self, resource_id: Uuid, policy_id: Uuid) -> Result<()> {
        let resource = self
            .resources
            .get(resource_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Resource not found: {resource_id}")))?;
        self.resources.detach_policy(resource_id, policy_id).await?;
        self.cache.invalidate_tenant(resource.tenant_id).await;
        Ok(())
    }

    pub async fn policies(&self, resource_id: Uuid) -> Result<Vec<Policy>> {
        self.resources.policies(resource_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionMap;
    use crate::memory::InMemoryStore;
    use crate::model::{PolicyEffect, PolicyType};
    use authz_core::cache::InMemoryDecisionCache;

    fn service() -> (Arc<InMemoryStore>, ResourceService) {
        let store = Arc::new(InMemoryStore::new());
        let service = ResourceService::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDecisionCache::new()),
        );
        (store, service)
    }

    fn create_request(identifier: &str, tenant_id: Uuid) -> CreateResourceRequest {
        CreateResourceRequest {
            resource_identifier: identifier.to_string(),
            resource_type: "DATASET".to_string(),
            tenant_id,
            parent_resource_id: None,
            attributes: ConditionMap::new(),
            owner_id: None,
            is_public: false,
        }
    }

    #[tokio::test]
    async fn identifier_is_globally_unique() {
        let (_, service) = service();
        service
            .create(create_request("ds-42", Uuid::new_v4()))
            .await
            .unwrap();
        // Even under a different tenant.
        let err = service
            .create(create_request("ds-42", Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn delete_refuses_while_children_exist() {
        let (_, service) = service();
        let tenant = Uuid::new_v4();
        let parent = service.create(create_request("root", tenant)).await.unwrap();
        let mut child = create_request("leaf", tenant);
        child.parent_resource_id = Some(parent.id);
        service.create(child).await.unwrap();

        let err = service.delete(parent.id).await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn cross_tenant_policy_attachment_is_rejected() {
        let (store, service) = service();
        let tenant = Uuid::new_v4();
        let resource = service.create(create_request("ds-1", tenant)).await.unwrap();

        let mut foreign = crate::model::Policy::new(
            "other",
            Uuid::new_v4(),
            PolicyType::Conditional,
            "admin",
        );
        foreign.effect = PolicyEffect::Deny;
        PolicyRepository::create(store.as_ref(), &foreign)
            .await
            .unwrap();

        let err = service
            .attach_policy(resource.id, foreign.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::TenantIsolation);
    }

    #[tokio::test]
    async fn parent_must_share_tenant() {
        let (_, service) = service();
        let parent = service
            .create(create_request("p-1", Uuid::new_v4()))
            .await
            .unwrap();

        let mut child = create_request("c-1", Uuid::new_v4());
        child.parent_resource_id = Some(parent.id);
        let err = service.create(child).await.unwrap_err();
        assert_eq!(err.kind(), authz_core::ErrorKind::TenantIsolation);
    }
}
