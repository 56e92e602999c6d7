//! Authenticated principal extraction.
//!
//! Authentication happens upstream; the gateway injects the validated
//! identity as `X-User-Id` / `X-Tenant-Id` headers. Handlers guard
//! themselves with [`require_permission`], which routes the check through
//! the decision engine itself.

use crate::state::AppState;
use authz_core::{Error, Result};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_IP_HEADER: &str = "x-user-ip";

/// The caller on whose behalf an administrative request runs.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let user_id = header_uuid(parts, USER_ID_HEADER)?;
        let tenant_id = header_uuid(parts, TENANT_ID_HEADER)?;
        Ok(Principal { user_id, tenant_id })
    }
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::validation(format!("Missing {name} header")))?;
    Uuid::parse_str(raw).map_err(|_| Error::validation(format!("Invalid {name} header")))
}

/// Coarse RBAC over the administrative surface: the caller must hold
/// `resource:action` (for example `ROLE:MANAGE`) in their own tenant.
pub async fn require_permission(
    state: &AppState,
    principal: &Principal,
    resource: &str,
    action: &str,
) -> Result<()> {
    let allowed = state
        .engine
        .has_permission(principal.user_id, principal.tenant_id, resource, action)
        .await;
    if allowed {
        Ok(())
    } else {
        Err(Error::tenant_isolation(format!(
            "Caller lacks {resource}:{action}"
        )))
    }
}
