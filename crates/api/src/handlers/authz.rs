//! Decision endpoints.

use crate::principal::USER_IP_HEADER;
use crate::state::AppState;
use authz_domain::dto::{AuthzRequest, AuthzResponse};
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::routing::{post, Router};
use axum::Json;
use std::time::Duration;

/// Upper bound on a single decision, covering store and cache round-trips.
const DECISION_DEADLINE: Duration = Duration::from_secs(10);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/check", post(check))
        .route("/check/batch", post(check_batch))
}

fn enrich(request: &mut AuthzRequest, headers: &HeaderMap) {
    if request.ip_address.is_none() {
        request.ip_address = headers
            .get(USER_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    if request.user_agent.is_none() {
        request.user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
}

async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<AuthzRequest>,
) -> Json<AuthzResponse> {
    enrich(&mut request, &headers);
    Json(
        state
            .engine
            .authorize_with_timeout(&request, DECISION_DEADLINE)
            .await,
    )
}

async fn check_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut requests): Json<Vec<AuthzRequest>>,
) -> Json<Vec<AuthzResponse>> {
    for request in &mut requests {
        enrich(request, &headers);
    }
    let results = state.engine.authorize_batch(requests).await;
    Json(results.into_iter().map(|(_, response)| response).collect())
}
