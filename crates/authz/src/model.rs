//! Domain entities for the authorization service.
//!
//! Identifiers are UUIDs, timestamps are UTC. Mutable entities carry a
//! `version` counter used as an optimistic lock: updates compare-and-swap on
//! it and surface a conflict when a concurrent writer got there first.

use crate::condition::ConditionMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Role name granting unrestricted access across all tenants.
pub const SUPER_ADMIN_ROLE: &str = "SUPER_ADMIN";

/// Actor recorded on entities materialized by the tenant-sync consumer.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Risk classification of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "risk_level", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Policy evaluation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "policy_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    ResourceBased,
    IdentityBased,
    AttributeBased,
    TimeBased,
    Conditional,
}

/// Outcome a matching policy contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "policy_effect", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEffect::Allow => write!(f, "ALLOW"),
            PolicyEffect::Deny => write!(f, "DENY"),
        }
    }
}

/// A `(resource_type, action)` capability. Globally unique on that pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub resource_type: String,
    pub action: String,
    pub description: Option<String>,
    pub risk_level: RiskLevel,
    pub requires_mfa: bool,
    pub requires_approval: bool,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(resource_type: impl Into<String>, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_type: resource_type.into(),
            action: action.into(),
            description: None,
            risk_level: RiskLevel::Low,
            requires_mfa: false,
            requires_approval: false,
            is_system: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical `TYPE:ACTION` name.
    pub fn name(&self) -> String {
        format!("{}:{}", self.resource_type, self.action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.action)
    }
}

/// A named bundle of permissions, owned by a tenant (`tenant_id = None` for
/// global system roles). `parent_role_id` forms an acyclic chain walked for
/// permission inheritance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    /// Higher priority wins when roles disagree; range 1..=10000.
    pub priority: i32,
    pub max_users: Option<i32>,
    pub is_system: bool,
    pub is_active: bool,
    pub parent_role_id: Option<Uuid>,
    pub created_by: String,
    pub updated_by: Option<String>,
    /// Optimistic lock counter.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, tenant_id: Option<Uuid>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            description: None,
            priority: 1,
            max_users: None,
            is_system: false,
            is_active: true,
            parent_role_id: None,
            created_by: created_by.into(),
            updated_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.name == SUPER_ADMIN_ROLE && self.is_active
    }
}

/// Assignment of a permission to a role.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RolePermission {
    pub id: Uuid,
    pub role_id: Uuid,
    pub permission_id: Uuid,
    #[sqlx(json)]
    pub constraints: ConditionMap,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: Uuid, permission_id: Uuid, granted_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role_id,
            permission_id,
            constraints: ConditionMap::new(),
            expires_at: None,
            granted_by: granted_by.into(),
            granted_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

/// Assignment of a role to a user within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UserRole {
    pub fn new(
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        assigned_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            tenant_id,
            assigned_by: assigned_by.into(),
            assigned_at: Utc::now(),
            expires_at: None,
            is_active: true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }

    pub fn is_valid(&self) -> bool {
        self.is_active && !self.is_expired()
    }
}

/// A protected resource instance. Policies attach via a many-to-many link.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub id: Uuid,
    /// Externally meaningful identifier, globally unique.
    pub resource_identifier: String,
    pub resource_type: String,
    pub tenant_id: Uuid,
    pub parent_resource_id: Option<Uuid>,
    #[sqlx(json)]
    pub attributes: ConditionMap,
    pub owner_id: Option<Uuid>,
    pub is_public: bool,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        resource_identifier: impl Into<String>,
        resource_type: impl Into<String>,
        tenant_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_identifier: resource_identifier.into(),
            resource_type: resource_type.into(),
            tenant_id,
            parent_resource_id: None,
            attributes: ConditionMap::new(),
            owner_id: None,
            is_public: false,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A named, tenant-scoped rule evaluating to an effect or not-applicable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub tenant_id: Uuid,
    pub description: Option<String>,
    pub policy_type: PolicyType,
    pub effect: PolicyEffect,
    /// Higher priority evaluates first.
    pub priority: i32,
    #[sqlx(json)]
    pub conditions: ConditionMap,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        tenant_id: Uuid,
        policy_type: PolicyType,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tenant_id,
            description: None,
            policy_type,
            effect: PolicyEffect::Deny,
            priority: 0,
            conditions: ConditionMap::new(),
            start_date: None,
            end_date: None,
            is_active: true,
            created_by: created_by.into(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Activation gate: active flag plus date window. A policy whose
    /// `end_date` equals the probe instant is already inactive; one whose
    /// `start_date` equals it is active.
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date.map(|s| s <= now).unwrap_or(true)
            && self.end_date.map(|e| e > now).unwrap_or(true)
    }
}

/// An explicit grant letting a source tenant act on a target tenant's
/// resources of one type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CrossTenantAccess {
    pub id: Uuid,
    pub source_tenant_id: Uuid,
    pub target_tenant_id: Uuid,
    pub resource_type: String,
    pub resource_id: Option<String>,
    /// Action strings covered by the grant. Persisted in a side table.
    #[sqlx(skip)]
    pub permissions: Vec<String>,
    #[sqlx(json)]
    pub conditions: ConditionMap,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub revoked_by: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl CrossTenantAccess {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }

    pub fn is_valid(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    pub fn allows(&self, action: &str) -> bool {
        self.is_valid() && self.permissions.iter().any(|p| p == action)
    }
}

/// A role joined with its permission assignments, as loaded for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleWithPermissions {
    pub role: Role,
    pub permissions: Vec<(RolePermission, Permission)>,
}

impl RoleWithPermissions {
    /// Permissions valid right now: assignment unexpired, permission active.
    pub fn valid_permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions
            .iter()
            .filter(|(assignment, permission)| !assignment.is_expired() && permission.is_active)
            .map(|(_, permission)| permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn permission_name_is_type_colon_action() {
        let permission = Permission::new("REPORT", "READ");
        assert_eq!(permission.name(), "REPORT:READ");
        assert_eq!(permission.to_string(), "REPORT:READ");
    }

    #[test]
    fn user_role_expiry() {
        let mut assignment = UserRole::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "admin",
        );
        assert!(assignment.is_valid());

        assignment.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(!assignment.is_valid());

        assignment.expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(assignment.is_valid());

        assignment.is_active = false;
        assert!(!assignment.is_valid());
    }

    #[test]
    fn policy_window_boundaries() {
        let now = Utc::now();
        let mut policy = Policy::new("p", Uuid::new_v4(), PolicyType::AttributeBased, "admin");

        policy.start_date = Some(now);
        assert!(policy.is_in_effect(now));

        policy.end_date = Some(now);
        assert!(!policy.is_in_effect(now));

        policy.end_date = Some(now + Duration::seconds(1));
        assert!(policy.is_in_effect(now));

        policy.is_active = false;
        assert!(!policy.is_in_effect(now));
    }

    #[test]
    fn cross_tenant_grant_checks_action_list() {
        let mut grant = CrossTenantAccess {
            id: Uuid::new_v4(),
            source_tenant_id: Uuid::new_v4(),
            target_tenant_id: Uuid::new_v4(),
            resource_type: "DATASET".to_string(),
            resource_id: None,
            permissions: vec!["READ".to_string(), "EXPORT".to_string()],
            conditions: ConditionMap::new(),
            granted_by: "admin".to_string(),
            granted_at: Utc::now(),
            revoked_by: None,
            revoked_at: None,
            expires_at: None,
            is_active: true,
        };

        assert!(grant.allows("READ"));
        assert!(!grant.allows("DELETE"));

        grant.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(!grant.allows("READ"));
    }

    #[test]
    fn role_with_permissions_filters_expired_assignments() {
        let role = Role::new("ANALYST", Some(Uuid::new_v4()), "admin");
        let permission = Permission::new("REPORT", "READ");
        let mut assignment = RolePermission::new(role.id, permission.id, "admin");
        assignment.expires_at = Some(Utc::now() - Duration::minutes(5));

        let mut inactive = Permission::new("REPORT", "EXPORT");
        inactive.is_active = false;
        let live_assignment = RolePermission::new(role.id, inactive.id, "admin");

        let bundle = RoleWithPermissions {
            role,
            permissions: vec![(assignment, permission), (live_assignment, inactive)],
        };

        assert_eq!(bundle.valid_permissions().count(), 0);
    }
}
