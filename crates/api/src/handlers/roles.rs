//! Role administration endpoints. Thin dispatchers over the role service;
//! mutation requires `ROLE:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::{Error, Result};
use authz_domain::dto::{CreateRoleRequest, RoleHierarchyResponse, UpdateRoleRequest};
use authz_domain::model::{Permission, Role};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put, Router};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/:id", get(get_one))
        .route("/:id", put(update))
        .route("/:id", delete(remove))
        .route("/:id/clone", post(clone_role))
        .route("/:id/permissions", get(permissions))
        .route("/:id/permissions", post(assign_permissions))
        .route("/:id/permissions/:permission_id", delete(remove_permission))
        .route("/:id/permissions/:permission_id/expiry", put(set_expiry))
        .route("/:id/hierarchy", get(hierarchy))
}

async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateRoleRequest>,
) -> Result<Json<Role>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    let role = state
        .roles
        .create(request, &principal.user_id.to_string())
        .await?;
    Ok(Json(role))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Role>> {
    let role = state
        .roles
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Role not found: {id}")))?;
    Ok(Json(role))
}

async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<Role>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    let role = state
        .roles
        .update(id, request, &principal.user_id.to_string())
        .await?;
    Ok(Json(role))
}

async fn remove(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    state
        .roles
        .delete(id, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

#[derive(Debug, Deserialize)]
struct CloneRequest {
    new_name: String,
    tenant_id: Option<Uuid>,
}

async fn clone_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<CloneRequest>,
) -> Result<Json<Role>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    let role = state
        .roles
        .clone_role(
            id,
            &request.new_name,
            request.tenant_id,
            &principal.user_id.to_string(),
        )
        .await?;
    Ok(Json(role))
}

async fn permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>> {
    Ok(Json(state.roles.permissions_including_inherited(id).await?))
}

#[derive(Debug, Deserialize)]
struct AssignPermissionsRequest {
    permission_ids: Vec<Uuid>,
}

async fn assign_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignPermissionsRequest>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    let assigned = state
        .roles
        .assign_permissions(id, &request.permission_ids, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"assigned": assigned.len()})))
}

async fn remove_permission(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    state
        .roles
        .remove_permission(id, permission_id, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"removed": permission_id})))
}

#[derive(Debug, Deserialize)]
struct ExpiryRequest {
    expires_at: DateTime<Utc>,
}

async fn set_expiry(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ExpiryRequest>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "ROLE", "MANAGE").await?;
    state
        .roles
        .set_permission_expiration(id, permission_id, request.expires_at)
        .await?;
    Ok(Json(serde_json::json!({"expires_at": request.expires_at})))
}

async fn hierarchy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoleHierarchyResponse>> {
    Ok(Json(state.roles.hierarchy(id).await?))
}
