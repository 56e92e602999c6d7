//! Resource endpoints; mutation requires `RESOURCE:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::{Error, Result};
use authz_domain::dto::{CreateResourceRequest, UpdateResourceRequest};
use authz_domain::model::{Policy, Resource};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put, Router};
use axum::Json;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/:id", get(get_one))
        .route("/:id", put(update))
        .route("/:id", delete(remove))
        .route("/:id/policies", get(policies))
        .route("/:id/policies/:policy_id", post(attach_policy))
        .route("/:id/policies/:policy_id", delete(detach_policy))
}

async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateResourceRequest>,
) -> Result<Json<Resource>> {
    require_permission(&state, &principal, "RESOURCE", "MANAGE").await?;
    Ok(Json(state.resources.create(request).await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Resource>> {
    let resource = state
        .resources
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Resource not found: {id}")))?;
    Ok(Json(resource))
}

async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateResourceRequest>,
) -> Result<Json<Resource>> {
    require_permission(&state, &principal, "RESOURCE", "MANAGE").await?;
    Ok(Json(state.resources.update(id, request).await?))
}

async fn remove(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "RESOURCE", "MANAGE").await?;
    state.resources.delete(id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn policies(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Policy>>> {
    Ok(Json(state.resources.policies(id).await?))
}

async fn attach_policy(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "RESOURCE", "MANAGE").await?;
    state.resources.attach_policy(id, policy_id).await?;
    Ok(Json(serde_json::json!({"attached": policy_id})))
}

async fn detach_policy(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "RESOURCE", "MANAGE").await?;
    state.resources.detach_policy(id, policy_id).await?;
    Ok(Json(serde_json::json!({"detached": policy_id})))
}
