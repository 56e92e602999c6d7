//! Policy endpoints; mutation requires `POLICY:MANAGE`.

use crate::principal::{require_permission, Principal};
use crate::state::AppState;
use authz_core::{Error, Result};
use authz_domain::dto::{
    AuthzRequest, CreatePolicyRequest, PolicyEvaluationResponse, UpdatePolicyRequest,
};
use authz_domain::model::Policy;
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
        .route("/:id/activate", post(activate))
        .route("/:id/deactivate", post(deactivate))
        .route("/:id/evaluate", post(evaluate))
}

async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<Json<Policy>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    let policy = state
        .policies
        .create(request, &principal.user_id.to_string())
        .await?;
    Ok(Json(policy))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Policy>> {
    let policy = state
        .policies
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Policy not found: {id}")))?;
    Ok(Json(policy))
}

async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePolicyRequest>,
) -> Result<Json<Policy>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    Ok(Json(state.policies.update(id, request).await?))
}

async fn remove(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    state.policies.delete(id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn activate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Policy>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    Ok(Json(state.policies.set_active(id, true).await?))
}

async fn deactivate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Policy>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    Ok(Json(state.policies.set_active(id, false).await?))
}

/// Dry-run a policy against a hypothetical request.
async fn evaluate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<AuthzRequest>,
) -> Result<Json<PolicyEvaluationResponse>> {
    require_permission(&state, &principal, "POLICY", "MANAGE").await?;
    Ok(Json(state.policies.test_evaluate(id, &request).await?))
}
