//! Outbound audit event shapes.
//!
//! Every event carries the same metadata envelope and one flavor-specific
//! payload. There is exactly one constructor per event kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SOURCE_SERVICE: &str = "authorization-service";
pub const EVENT_VERSION: &str = "1.0";

/// Envelope shared by every audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub source_service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    fn new(correlation_id: Option<Uuid>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source_service: SOURCE_SERVICE.to_string(),
            version: EVENT_VERSION.to_string(),
            timestamp: Utc::now(),
            correlation_id,
        }
    }
}

/// Flavor-specific payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPayload {
    AuthorizationChecked {
        user_id: Uuid,
        tenant_id: Uuid,
        resource: String,
        action: String,
        resource_id: Option<String>,
        allowed: bool,
        reason: String,
    },
    RoleCreated {
        role_id: Uuid,
        tenant_id: Option<Uuid>,
        name: String,
        created_by: String,
    },
    RoleUpdated {
        role_id: Uuid,
        tenant_id: Option<Uuid>,
        name: String,
        updated_by: String,
        changes: serde_json::Value,
    },
    RoleDeleted {
        role_id: Uuid,
        tenant_id: Option<Uuid>,
        name: String,
        deleted_by: String,
    },
    RoleAssigned {
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        assigned_by: String,
    },
    RoleRevoked {
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        revoked_by: String,
    },
    PermissionGranted {
        role_id: Uuid,
        permission_id: Uuid,
        permission_name: String,
        granted_by: String,
    },
    PermissionRevoked {
        role_id: Uuid,
        permission_id: Uuid,
        permission_name: String,
        revoked_by: String,
    },
    PolicyCreated {
        policy_id: Uuid,
        tenant_id: Uuid,
        name: String,
        created_by: String,
    },
    PolicyEvaluated {
        policy_id: Uuid,
        policy_name: String,
        effect: Option<String>,
        evaluated: bool,
    },
    CrossTenantAccessGranted {
        access_id: Uuid,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        resource_type: String,
        granted_by: String,
    },
    CrossTenantAccessRevoked {
        access_id: Uuid,
        source_tenant_id: Uuid,
        target_tenant_id: Uuid,
        revoked_by: String,
    },
}

impl AuditPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditPayload::AuthorizationChecked { .. } => "AUTHORIZATION_CHECKED",
            AuditPayload::RoleCreated { .. } => "ROLE_CREATED",
            AuditPayload::RoleUpdated { .. } => "ROLE_UPDATED",
            AuditPayload::RoleDeleted { .. } => "ROLE_DELETED",
            AuditPayload::RoleAssigned { .. } => "ROLE_ASSIGNED",
            AuditPayload::RoleRevoked { .. } => "ROLE_REVOKED",
            AuditPayload::PermissionGranted { .. } => "PERMISSION_GRANTED",
            AuditPayload::PermissionRevoked { .. } => "PERMISSION_REVOKED",
            AuditPayload::PolicyCreated { .. } => "POLICY_CREATED",
            AuditPayload::PolicyEvaluated { .. } => "POLICY_EVALUATED",
            AuditPayload::CrossTenantAccessGranted { .. } => "CROSS_TENANT_ACCESS_GRANTED",
            AuditPayload::CrossTenantAccessRevoked { .. } => "CROSS_TENANT_ACCESS_REVOKED",
        }
    }
}

/// A complete audit event: envelope plus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub metadata: EventMetadata,
    #[serde(flatten)]
    pub payload: AuditPayload,
}

impl AuditEvent {
    pub fn new(payload: AuditPayload) -> Self {
        Self {
            metadata: EventMetadata::new(None),
            payload,
        }
    }

    pub fn with_correlation(payload: AuditPayload, correlation_id: Uuid) -> Self {
        Self {
            metadata: EventMetadata::new(Some(correlation_id)),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
