use crate::condition::ConditionMap;
use crate::model::{PolicyEffect, PolicyType, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// One authorization question: may `user_id` perform `action` on `resource`
/// within `tenant_id`?
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuthzRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    /// Resource type being acted on, e.g. `REPORT`.
    pub resource: String,
    pub action: String,
    /// Identifier of a concrete resource instance, enabling the
    /// resource-scoped evaluation layer.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Target tenant for cross-tenant requests.
    #[serde(default)]
    pub target_tenant_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AuthzRequest {
    pub fn new(user_id: Uuid, tenant_id: Uuid, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            user_id,
            tenant_id,
            resource: resource.into(),
            action: action.into(),
            resource_id: None,
            target_tenant_id: None,
            attributes: HashMap::new(),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// The decision, its justification, and the permissions backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthzResponse {
    pub allowed: bool,
    pub reason: String,
    /// `TYPE:ACTION` names, sorted.
    pub granted_permissions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuthzResponse {
    pub fn allowed(reason: impl Into<String>, mut granted_permissions: Vec<String>) -> Self {
        granted_permissions.sort();
        Self {
            allowed: true,
            reason: reason.into(),
            granted_permissions,
            timestamp: Utc::now(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            granted_permissions: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub tenant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 10000))]
    pub priority: i32,
    #[validate(range(min = 1))]
    pub max_users: Option<i32>,
    pub parent_role_id: Option<Uuid>,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(range(min = 1, max = 10000))]
    pub priority: Option<i32>,
    pub max_users: Option<i32>,
    pub is_active: Option<bool>,
    pub parent_role_id: Option<Uuid>,
    /// Permit mutation of a system role. Reserved for operational tooling.
    #[serde(default)]
    pub allow_system_override: bool,
    /// Optimistic lock: must match the stored version.
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 100))]
    pub resource_type: String,
    #[validate(length(min = 1, max = 50))]
    pub action: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_mfa: bool,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionFilter {
    pub resource_type: Option<String>,
    pub action: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePolicyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub tenant_id: Uuid,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub policy_type: PolicyType,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: ConditionMap,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
    #[serde(default)]
    pub resource_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePolicyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub effect: Option<PolicyEffect>,
    pub priority: Option<i32>,
    pub conditions: Option<ConditionMap>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateResourceRequest {
    #[validate(length(min = 1, max = 255))]
    pub resource_identifier: String,
    #[validate(length(min = 1, max = 100))]
    pub resource_type: String,
    pub tenant_id: Uuid,
    pub parent_resource_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: ConditionMap,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateResourceRequest {
    pub attributes: Option<ConditionMap>,
    pub owner_id: Option<Uuid>,
    pub is_public: Option<bool>,
    pub is_active: Option<bool>,
    pub parent_resource_id: Option<Uuid>,
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignRoleRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantCrossTenantRequest {
    pub source_tenant_id: Uuid,
    pub target_tenant_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub resource_type: String,
    pub resource_id: Option<String>,
    #[validate(length(min = 1))]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub conditions: ConditionMap,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of the test-only policy evaluation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluationResponse {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub effect: Option<PolicyEffect>,
    pub evaluated: bool,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}

/// A role with its ancestry, children and effective permission union.
#[derive(Debug, Clone, Serialize)]
pub struct RoleHierarchyResponse {
    pub role: crate::model::Role,
    /// Parent chain ordered nearest-first.
    pub ancestors: Vec<crate::model::Role>,
    pub children: Vec<crate::model::Role>,
    /// `TYPE:ACTION` names of the inherited permission union, sorted.
    pub effective_permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn allowed_response_sorts_permissions() {
        let response = AuthzResponse::allowed(
            "Direct permission granted",
            vec!["REPORT:VIEW".to_string(), "REPORT:READ".to_string()],
        );
        assert!(response.allowed);
        assert_eq!(
            response.granted_permissions,
            vec!["REPORT:READ".to_string(), "REPORT:VIEW".to_string()]
        );
    }

    #[test]
    fn denied_response_has_no_permissions() {
        let response = AuthzResponse::denied("No permission for REPORT:READ");
        assert!(!response.allowed);
        assert!(response.granted_permissions.is_empty());
    }

    #[test]
    fn create_role_request_validates_bounds() {
        let request = CreateRoleRequest {
            name: String::new(),
            description: None,
            tenant_id: None,
            priority: 0,
            max_users: None,
            parent_role_id: None,
            permission_ids: vec![],
        };
        assert!(request.validate().is_err());

        let request = CreateRoleRequest {
            name: "ANALYST".to_string(),
            description: None,
            tenant_id: None,
            priority: 600,
            max_users: None,
            parent_role_id: None,
            permission_ids: vec![],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn cross_tenant_grant_requires_permissions() {
        let request = GrantCrossTenantRequest {
            source_tenant_id: Uuid::new_v4(),
            target_tenant_id: Uuid::new_v4(),
            resource_type: "DATASET".to_string(),
            resource_id: None,
            permissions: vec![],
            conditions: ConditionMap::new(),
            expires_at: None,
        };
        assert!(request.validate().is_err());
    }
}
