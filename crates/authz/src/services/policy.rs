//! Policy administration and test evaluation.

use crate::dto::{AuthzRequest, CreatePolicyRequest, PolicyEvaluationResponse, UpdatePolicyRequest};
use crate::engine::flatten_permissions;
use crate::evaluator::{EvaluationContext, PolicyBindings, PolicyEvaluator};
use crate::model::Policy;
use crate::repository::{PolicyRepository, ResourceRepository, UserRoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub struct PolicyService {
    policies: Arc<dyn PolicyRepository>,
    resources: Arc<dyn ResourceRepository>,
    user_roles: Arc<dyn UserRoleRepository>,
    cache: Arc<dyn DecisionCache>,
    publisher: Arc<dyn EventPublisher>,
    evaluator: PolicyEvaluator,
}

impl PolicyService {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        resources: Arc<dyn ResourceRepository>,
        user_roles: Arc<dyn UserRoleRepository>,
        cache: Arc<dyn DecisionCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            policies,
            resources,
            user_roles,
            cache,
            publisher,
            evaluator: PolicyEvaluator::new(),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreatePolicyRequest, created_by: &str) -> Result<Policy> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        if self
            .policies
            .find_by_name(&request.name, request.tenant_id)
            .await?
            .is_some()
        {
            return Err(Error::duplicate(format!(
                "Policy '{}' already exists for tenant",
                request.name
            )));
        }

        if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
            if end <= start {
                return Err(Error::validation("end_date must be after start_date"));
            }
        }

        let mut policy = Policy::new(
            &request.name,
            request.tenant_id,
            request.policy_type,
            created_by,
        );
        policy.description = request.description.clone();
        policy.effect = request.effect;
        policy.priority = request.priority;
        policy.conditions = request.conditions.clone();
        policy.start_date = request.start_date;
        policy.end_date = request.end_date;
        let policy = self.policies.create(&policy).await?;

        for permission_id in &request.permission_ids {
            self.policies
                .attach_permission(policy.id, *permission_id)
                .await?;
        }
        for resource_id in &request.resource_ids {
            self.resources.attach_policy(*resource_id, policy.id).await?;
        }

        self.cache.invalidate_tenant(policy.tenant_id).await;
        self.publisher
            .publish(AuditEvent::new(AuditPayload::PolicyCreated {
                policy_id: policy.id,
                tenant_id: policy.tenant_id,
                name: policy.name.clone(),
                created_by: created_by.to_string(),
            }))
            .await;

        info!(policy = %policy.name, "Policy created");
        Ok(policy)
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, id: Uuid, request: UpdatePolicyRequest) -> Result<Policy> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let existing = self
            .policies
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Policy not found: {id}")))?;

        if let Some(new_name) = &request.name {
            if new_name != &existing.name
                && self
                    .policies
                    .find_by_name(new_name, existing.tenant_id)
                    .await?
                    .is_some()
            {
                return Err(Error::duplicate(format!(
                    "Policy '{new_name}' already exists for tenant"
                )));
            }
        }

        let mut updated = existing.clone();
        if let Some(name) = request.name {
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = Some(description);
        }
        if let Some(effect) = request.effect {
            updated.effect = effect;
        }
        if let Some(priority) = request.priority {
            updated.priority = priority;
        }
        if let Some(conditions) = request.conditions {
            updated.conditions = conditions;
        }
        if request.start_date.is_some() {
            updated.start_date = request.start_date;
        }
        if request.end_date.is_some() {
            updated.end_date = request.end_date;
        }
        if let Some(is_active) = request.is_active {
            updated.is_active = is_active;
        }
        updated.version = request.version;

        let updated = self.policies.update(&updated).await?;
        self.cache.invalidate_tenant(updated.tenant_id).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let policy = self
            .policies
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Policy not found: {id}")))?;
        self.policies.delete(id).await?;
        self.cache.invalidate_tenant(policy.tenant_id).await;
        Ok(())
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Policy> {
        let policy = self
            .policies
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Policy not found: {id}")))?;
        let mut updated = policy.clone();
        updated.is_active = is_active;
        let updated = self.policies.update(&updated).await?;
        self.cache.invalidate_tenant(updated.tenant_id).await;
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Policy>> {
        self.policies.get(id).await
    }

    /// Dry-run one policy against a request without touching the decision
    /// path. Used by operators to debug policies.
    #[instrument(skip(self, request))]
    pub async fn test_evaluate(
        &self,
        policy_id: Uuid,
        request: &AuthzRequest,
    ) -> Result<PolicyEvaluationResponse> {
        let policy = self
            .policies
            .get(policy_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Policy not found: {policy_id}")))?;

        let bundles = self
            .user_roles
            .roles_for_user(request.user_id, request.tenant_id)
            .await?;
        let permissions = flatten_permissions(&bundles);
        let ctx = EvaluationContext::new(request, &permissions, Utc::now());

        let bindings = PolicyBindings {
            permissions: self.policies.permissions(policy.id).await?,
            resources: self.policies.resources(policy.id).await?,
        };

        let (effect, evaluated, reason) = match self.evaluator.try_evaluate(&policy, &bindings, &ctx)
        {
            Ok(Some(effect)) => (
                Some(effect),
                true,
                format!("Policy evaluated to {effect}"),
            ),
            Ok(None) => (None, true, "Policy not applicable".to_string()),
            Err(e) => (None, false, format!("Evaluation failed: {e}")),
        };

        self.publisher
            .publish(AuditEvent::new(AuditPayload::PolicyEvaluated {
                policy_id: policy.id,
                policy_name: policy.name.clone(),
                effect: effect.map(|e| e.to_string()),
                evaluated,
            }))
            .await;

        Ok(PolicyEvaluationResponse {
            policy_id: policy.id,
            policy_name: policy.name,
            effect,
            evaluated,
            reason,
            evaluated_at: Utc::now(),
        })
    }
}
