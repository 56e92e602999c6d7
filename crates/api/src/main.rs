//! Authorization service HTTP server.
//!
//! Wires the Postgres store, the Redis decision cache, the audit-event
//! publisher, the tenant-sync consumer and the expiry sweeper, then serves
//! the decision and administration APIs.

use authz_core::cache::RedisDecisionCache;
use authz_core::events::RedisStreamPublisher;
use authz_core::{Config, DatabasePool};
use authz_domain::postgres::PgAuthzStore;
use authz_domain::scheduler::MaintenanceSweeper;
use authz_domain::services::{
    CrossTenantService, PermissionService, PolicyService, ResourceService, RoleService,
    UserRoleService,
};
use authz_domain::sync::{TenantSyncConsumer, TenantSyncService};
use authz_domain::AuthorizationEngine;
use axum::routing::get;
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod handlers;
mod principal;
mod state;

use crate::handlers::{authz, cross_tenant, permissions, policies, resources, roles, user_roles};
use crate::state::AppState;

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.app.log_level);
    info!("Starting authorization service");

    let db = DatabasePool::new(&config.database).await?;
    info!("Database pool initialized");

    let cache_redis = ConnectionManager::new(redis::Client::open(config.redis.url.as_str())?).await?;
    let broker_redis =
        ConnectionManager::new(redis::Client::open(config.broker.url.as_str())?).await?;
    info!("Redis connections established");

    let store = Arc::new(PgAuthzStore::new(db.clone()));
    let cache = Arc::new(RedisDecisionCache::new(cache_redis.clone()));
    let (publisher, _publisher_task) =
        RedisStreamPublisher::spawn(cache_redis, config.topics.clone());
    let publisher = Arc::new(publisher);

    let engine = Arc::new(AuthorizationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
        publisher.clone(),
        config.engine.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        engine: engine.clone(),
        roles: Arc::new(RoleService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            cache.clone(),
            publisher.clone(),
            config.engine.clone(),
        )),
        permissions: Arc::new(PermissionService::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            publisher.clone(),
        )),
        policies: Arc::new(PolicyService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            cache.clone(),
            publisher.clone(),
        )),
        resources: Arc::new(ResourceService::new(
            store.clone(),
            store.clone(),
            cache.clone(),
        )),
        user_roles: Arc::new(UserRoleService::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            publisher.clone(),
        )),
        cross_tenant: Arc::new(CrossTenantService::new(store.clone(), publisher.clone())),
    };

    // Tenant lifecycle consumer.
    let sync_service = Arc::new(TenantSyncService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
    ));
    let consumer = Arc::new(TenantSyncConsumer::new(
        broker_redis,
        config.broker.clone(),
        sync_service,
    ));
    consumer.ensure_group().await?;
    let _consumer_tasks = consumer.spawn();
    info!(workers = config.broker.workers, "Tenant-sync consumer started");

    // Expiry sweeper.
    let sweeper = Arc::new(MaintenanceSweeper::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
        config.sweep.clone(),
    ));
    let _sweeper_task = sweeper.spawn();
    info!(interval_secs = config.sweep.interval_secs, "Expiry sweeper started");

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api/v1/authz", authz::routes())
        .nest("/api/v1/roles", roles::routes())
        .nest("/api/v1/permissions", permissions::routes())
        .nest("/api/v1/policies", policies::routes())
        .nest("/api/v1/resources", resources::routes())
        .nest("/api/v1/user-roles", user_roles::routes())
        .nest("/api/v1/cross-tenant", cross_tenant::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "authorization-service",
    }))
}
