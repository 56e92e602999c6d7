//! Permission catalog endpoints; mutation requires `PERMISSION:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::{Error, Result};
use authz_domain::dto::{CreatePermissionRequest, PermissionFilter};
use authz_domain::model::Permission;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, Router};
use axum::Json;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/", post(create))
        .route("/:id", get(get_one))
        .route("/resource-types", get(resource_types))
        .route("/actions", get(actions))
        .route("/:id/roles/:role_id", post(assign_to_role))
        .route("/:id/roles/:role_id", delete(remove_from_role))
}

async fn list(
    State(state): State<AppState>,
    Query(filter): Query<PermissionFilter>,
) -> Result<Json<Vec<Permission>>> {
    Ok(Json(state.permissions.list(&filter).await?))
}

async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreatePermissionRequest>,
) -> Result<Json<Permission>> {
    require_permission(&state, &principal, "PERMISSION", "MANAGE").await?;
    Ok(Json(state.permissions.create(request).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Permission>> {
    let permission = state
        .permissions
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Permission not found: {id}")))?;
    Ok(Json(permission))
}

async fn resource_types(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.permissions.distinct_resource_types().await?))
}

async fn actions(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.permissions.distinct_actions().await?))
}

async fn assign_to_role(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "PERMISSION", "MANAGE").await?;
    state
        .permissions
        .assign_to_role(id, role_id, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"assigned": id})))
}

async fn remove_from_role(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "PERMISSION", "MANAGE").await?;
    state
        .permissions
        .remove_from_role(id, role_id, &principal.user_id.to_string())
        .await?;
    Ok(Json(serde_json::json!({"removed": id})))
}
