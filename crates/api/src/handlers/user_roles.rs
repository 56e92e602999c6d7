//! User-role assignment endpoints; mutation requires `ROLE:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::Result;
use authz_domain::dto::AssignRoleRequest;
use authz_domain::model::UserRole;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, Router};
use axum::Json;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(assign))
        .route("/users/:user_id/tenants/:tenant_id", get(list_for_user))
        .route("/roles/:role_id", get(list_for_role))
        .route(
            "/users/:user_id/roles/:role_id/tenants/:tenant_id",
            delete(revoke),
        )
}

async fn assign(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<AssignRoleRequest>,
) -> Result<Json<UserRole>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    let assignment = state
        .user_roles
        .assign(request, &principal.user_id.to_string())
        .await?;
    Ok(Json(assignment))
}

async fn list_for_user(
    State(state): State<AppState>,
    Path((user_id, tenant_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<UserRole>>> {
    Ok(Json(state.user_roles.list_for_user(user_id, tenant_id).await?))
}

async fn list_for_role(
    State(state): State<AppState>,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<UserRole>>> {
    Ok(Json(state.user_roles.list_for_role(role_id).await?))
}

async fn revoke(
    State(state): State<AppState>,
    principal: Principal,
    Path((user_id, role_id, tenant_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    state
        .user_roles
        .revoke(user_id, role_id, tenant_id, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"revoked": role_id})))
}
