//! The authorization decision engine.
//!
//! A decision runs a strict sequence of layers; the first decisive layer
//! wins. The path is fail-closed: any internal error becomes a denied
//! response, never a propagated error. After every decision an
//! `AuthorizationChecked` event is emitted fire-and-forget.

use crate::dto::{AuthzRequest, AuthzResponse};
use crate::evaluator::{EvaluationContext, PolicyBindings, PolicyEvaluator};
use crate::model::{Permission, Policy, PolicyEffect, PolicyType, RoleWithPermissions};
use crate::repository::{
    PolicyRepository, ResourceRepository, RoleRepository, UserRoleRepository,
};
use authz_core::cache::{DecisionCache, DecisionKey};
use authz_core::config::EngineConfig;
use authz_core::events::{AuditEvent, AuditPayload, EventPublisher};
use authz_core::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Wildcard action implying every action on its resource type.
const MANAGE_ACTION: &str = "MANAGE";

/// Wildcard resource type matching every resource type.
const ANY_RESOURCE: &str = "*";

/// Actions a public resource grants to everyone.
const PUBLIC_READ_ACTIONS: [&str; 3] = ["READ", "VIEW", "LIST"];

pub struct AuthorizationEngine {
    user_roles: Arc<dyn UserRoleRepository>,
    roles: Arc<dyn RoleRepository>,
    resources: Arc<dyn ResourceRepository>,
    policies: Arc<dyn PolicyRepository>,
    cache: Arc<dyn DecisionCache>,
    publisher: Arc<dyn EventPublisher>,
    evaluator: PolicyEvaluator,
    config: EngineConfig,
}

impl AuthorizationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_roles: Arc<dyn UserRoleRepository>,
        roles: Arc<dyn RoleRepository>,
        resources: Arc<dyn ResourceRepository>,
        policies: Arc<dyn PolicyRepository>,
        cache: Arc<dyn DecisionCache>,
        publisher: Arc<dyn EventPublisher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            user_roles,
            roles,
            resources,
            policies,
            cache,
            publisher,
            evaluator: PolicyEvaluator::new(),
            config,
        }
    }

    /// Answer one authorization request. Never fails: errors become denials.
    #[instrument(skip(self, request), fields(user = %request.user_id, resource = %request.resource, action = %request.action))]
    pub async fn authorize(&self, request: &AuthzRequest) -> AuthzResponse {
        // Only context-free requests are cacheable under the coarse key;
        // resource- or attribute-specific decisions would poison it.
        let cacheable = request.resource_id.is_none() && request.attributes.is_empty();
        let key = DecisionKey::new(
            request.user_id,
            request.tenant_id,
            request.resource.clone(),
            request.action.clone(),
        );

        if cacheable {
            if let Some(cached) = self.cache.get(&key).await {
                if let Ok(response) = serde_json::from_str::<AuthzResponse>(&cached) {
                    debug!("Decision served from cache");
                    self.emit_checked(request, &response).await;
                    return response;
                }
            }
        }

        let response = match self.decide(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Authorization check failed");
                AuthzResponse::denied(format!("Authorization check failed: {e}"))
            }
        };

        if cacheable {
            if let Ok(serialized) = serde_json::to_string(&response) {
                self.cache
                    .put(
                        &key,
                        serialized,
                        Duration::from_secs(self.config.decision_cache_ttl_secs),
                    )
                    .await;
            }
        }

        self.emit_checked(request, &response).await;
        response
    }

    /// [`Self::authorize`] bounded by the caller's deadline.
    pub async fn authorize_with_timeout(
        &self,
        request: &AuthzRequest,
        deadline: Duration,
    ) -> AuthzResponse {
        match tokio::time::timeout(deadline, self.authorize(request)).await {
            Ok(response) => response,
            Err(_) => AuthzResponse::denied("Authorization check failed: deadline exceeded"),
        }
    }

    /// Boolean convenience wrapper.
    pub async fn has_permission(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
    ) -> bool {
        self.authorize(&AuthzRequest::new(user_id, tenant_id, resource, action))
            .await
            .allowed
    }

    /// Evaluate a batch sequentially. Requests are isolated from each other;
    /// no ordering or atomicity is promised across elements.
    pub async fn authorize_batch(
        &self,
        requests: Vec<AuthzRequest>,
    ) -> Vec<(AuthzRequest, AuthzResponse)> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let response = self.authorize(&request).await;
            out.push((request, response));
        }
        out
    }

    /// The ordered decision pipeline.
    async fn decide(&self, request: &AuthzRequest) -> Result<AuthzResponse> {
        let now = Utc::now();

        // Layer 1: active roles.
        let role_bundles = self
            .user_roles
            .roles_for_user(request.user_id, request.tenant_id)
            .await?;
        if role_bundles.is_empty() {
            return Ok(AuthzResponse::denied("User has no active roles"));
        }

        // Layer 2: flatten the valid permission set.
        let permission_set = flatten_permissions(&role_bundles);
        let permission_names: Vec<String> =
            permission_set.iter().map(Permission::name).collect();
        let ctx = EvaluationContext::new(request, &permission_set, now);

        // Layer 3: super admin shortcut.
        if role_bundles.iter().any(|b| b.role.is_super_admin()) {
            return Ok(AuthzResponse::allowed(
                "Super admin access granted",
                vec!["SUPER_ADMIN".to_string()],
            ));
        }

        // Tenant-wide deny policies preempt the permission shortcuts so a
        // standing prohibition (e.g. an out-of-hours window) cannot be
        // bypassed by holding the permission. Resource-scoped policies stay
        // behind the ownership and public shortcuts below.
        let tenant_policies = self
            .policies
            .active_for_tenant(request.tenant_id, now)
            .await?;
        let deny_candidates: Vec<&Policy> = tenant_policies
            .iter()
            .filter(|p| p.effect == PolicyEffect::Deny && p.policy_type != PolicyType::ResourceBased)
            .collect();
        if !deny_candidates.is_empty() {
            let bindings = self.load_bindings(&deny_candidates).await?;
            let pairs: Vec<(&Policy, &PolicyBindings)> = deny_candidates
                .iter()
                .copied()
                .zip(bindings.iter())
                .collect();
            if self.evaluator.combine(pairs, &ctx) == Some(PolicyEffect::Deny) {
                return Ok(AuthzResponse::denied("Access denied by policy"));
            }
        }

        // Layer 4: direct match.
        if permission_set
            .iter()
            .any(|p| p.resource_type == request.resource && p.action == request.action)
        {
            return Ok(AuthzResponse::allowed(
                "Direct permission granted",
                permission_names.clone(),
            ));
        }

        // Layer 5: wildcard matches.
        if permission_set
            .iter()
            .any(|p| p.resource_type == request.resource && p.action == MANAGE_ACTION)
            || permission_set
                .iter()
                .any(|p| p.resource_type == ANY_RESOURCE && p.action == request.action)
        {
            return Ok(AuthzResponse::allowed(
                "Wildcard permission granted",
                permission_names.clone(),
            ));
        }

        // Layer 6: resource-scoped evaluation.
        if let Some(resource_id) = &request.resource_id {
            if let Some(resource) = self.resources.find_by_identifier(resource_id).await? {
                if resource.is_active {
                    if resource.owner_id == Some(request.user_id) {
                        return Ok(AuthzResponse::allowed(
                            "Resource owner access granted",
                            vec!["OWNER".to_string()],
                        ));
                    }

                    if resource.is_public
                        && PUBLIC_READ_ACTIONS.contains(&request.action.as_str())
                    {
                        return Ok(AuthzResponse::allowed(
                            "Public resource access granted",
                            vec!["PUBLIC_ACCESS".to_string()],
                        ));
                    }

                    let attached = self.resources.policies(resource.id).await?;
                    let attached_refs: Vec<&Policy> =
                        attached.iter().filter(|p| p.is_in_effect(now)).collect();
                    if !attached_refs.is_empty() {
                        let mut bindings = self.load_bindings(&attached_refs).await?;
                        for binding in &mut bindings {
                            binding.resources = vec![resource.clone()];
                        }
                        let pairs: Vec<(&Policy, &PolicyBindings)> = attached_refs
                            .iter()
                            .copied()
                            .zip(bindings.iter())
                            .collect();
                        match self.evaluator.combine(pairs, &ctx) {
                            Some(PolicyEffect::Deny) => {
                                return Ok(AuthzResponse::denied("Access denied by policy"))
                            }
                            Some(PolicyEffect::Allow) => {
                                return Ok(AuthzResponse::allowed(
                                    "Access granted by policy",
                                    permission_names.clone(),
                                ))
                            }
                            None => {}
                        }
                    }
                }
            }
        }

        // Layer 7: tenant-level policies.
        if !tenant_policies.is_empty() {
            let refs: Vec<&Policy> = tenant_policies.iter().collect();
            let bindings = self.load_bindings(&refs).await?;
            let pairs: Vec<(&Policy, &PolicyBindings)> =
                refs.iter().copied().zip(bindings.iter()).collect();
            match self.evaluator.combine(pairs, &ctx) {
                Some(PolicyEffect::Deny) => {
                    return Ok(AuthzResponse::denied("Access denied by policy"))
                }
                Some(PolicyEffect::Allow) => {
                    return Ok(AuthzResponse::allowed(
                        "Access granted by policy",
                        permission_names.clone(),
                    ))
                }
                None => {}
            }
        }

        // Layer 8: inherited permissions from role ancestors.
        if let Some(permission) = self.find_inherited(request, &role_bundles).await? {
            return Ok(AuthzResponse::allowed(
                "Inherited permission granted",
                vec![permission.name()],
            ));
        }

        // Layer 9: default deny.
        Ok(AuthzResponse::denied(format!(
            "No permission for {}:{}",
            request.resource, request.action
        )))
    }

    /// Load permission and resource references for each policy, in order.
    async fn load_bindings(&self, policies: &[&Policy]) -> Result<Vec<PolicyBindings>> {
        let mut out = Vec::with_capacity(policies.len());
        for policy in policies {
            let permissions = self.policies.permissions(policy.id).await?;
            let resources = if policy.policy_type == PolicyType::ResourceBased {
                self.policies.resources(policy.id).await?
            } else {
                Vec::new()
            };
            out.push(PolicyBindings {
                permissions,
                resources,
            });
        }
        Ok(out)
    }

    /// Walk each role's parent chain looking for a direct match. Cycles are
    /// guarded by a visited set and the configured depth bound.
    async fn find_inherited(
        &self,
        request: &AuthzRequest,
        bundles: &[RoleWithPermissions],
    ) -> Result<Option<Permission>> {
        for bundle in bundles {
            let mut visited: HashSet<Uuid> = HashSet::new();
            visited.insert(bundle.role.id);
            let mut current = bundle.role.parent_role_id;
            let mut depth = 0u32;

            while let Some(parent_id) = current {
                if depth >= self.config.max_hierarchy_depth || !visited.insert(parent_id) {
                    break;
                }
                depth += 1;

                let Some(parent) = self.roles.get(parent_id).await? else {
                    break;
                };
                if !parent.is_active {
                    break;
                }

                let assignments = self.roles.role_permissions(parent.id).await?;
                for (assignment, permission) in assignments {
                    if !assignment.is_expired()
                        && permission.is_active
                        && permission.resource_type == request.resource
                        && permission.action == request.action
                    {
                        return Ok(Some(permission));
                    }
                }

                current = parent.parent_role_id;
            }
        }
        Ok(None)
    }

    async fn emit_checked(&self, request: &AuthzRequest, response: &AuthzResponse) {
        self.publisher
            .publish(AuditEvent::new(AuditPayload::AuthorizationChecked {
                user_id: request.user_id,
                tenant_id: request.tenant_id,
                resource: request.resource.clone(),
                action: request.action.clone(),
                resource_id: request.resource_id.clone(),
                allowed: response.allowed,
                reason: response.reason.clone(),
            }))
            .await;
    }
}

/// Flatten the valid permissions across all role bundles: assignment
/// unexpired, role active (already filtered by the load), permission active.
pub(crate) fn flatten_permissions(bundles: &[RoleWithPermissions]) -> Vec<Permission> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut out = Vec::new();
    for bundle in bundles {
        for permission in bundle.valid_permissions() {
            if seen.insert(permission.id) {
                out.push(permission.clone());
            }
        }
    }
    out
}
