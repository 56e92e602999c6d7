//! Cross-tenant access endpoints; mutation requires `CROSS_TENANT:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::Result;
use authz_domain::dto::GrantCrossTenantRequest;
use authz_domain::model::CrossTenantAccess;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, Router};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(grant))
        .route("/check", get(check))
        .route("/:id/revoke", post(revoke))
        .route("/granted-by/:tenant_id", get(granted_by))
        .route("/received-by/:tenant_id", get(received_by))
}

async fn grant(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<GrantCrossTenantRequest>,
) -> Result<Json<CrossTenantAccess>> {
    require_permission(&state, &principal, "CROSS_TENANT", "MANAGE").await?;
    let grant = state
        .cross_tenant
        .grant(request, &principal.user_id.to_string())
        .await?;
    Ok(Json(grant))
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    source_tenant_id: Uuid,
    target_tenant_id: Uuid,
    resource_type: String,
    action: String,
}

async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<serde_json::Value>> {
    let allowed = state
        .cross_tenant
        .check(
            query.source_tenant_id,
            query.target_tenant_id,
            &query.resource_type,
            &query.action,
        )
        .await?;
    Ok(Json(serde_json::json!({"allowed": allowed})))
}

async fn revoke(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<CrossTenantAccess>> {
    require_permission(&state, &principal, "CROSS_TENANT", "MANAGE").await?;
    let grant = state
        .cross_tenant
        .revoke(id, &principal.user_id.to_string())
        .await?;
    Ok(Json(grant))
}

async fn granted_by(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<CrossTenantAccess>>> {
    Ok(Json(state.cross_tenant.list_granted_by(tenant_id).await?))
}

async fn received_by(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<CrossTenantAccess>>> {
    Ok(Json(state.cross_tenant.list_received_by(tenant_id).await?))
}
