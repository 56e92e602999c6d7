use authz_core::Config;
use authz_domain::services::{
    CrossTenantService, PermissionService, PolicyService, ResourceService, RoleService,
    UserRoleService,
};
use authz_domain::AuthorizationEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<AuthorizationEngine>,
    pub roles: Arc<RoleService>,
    pub permissions: Arc<PermissionService>,
    pub policies: Arc<PolicyService>,
    pub resources: Arc<ResourceService>,
    pub user_roles: Arc<UserRoleService>,
    pub cross_tenant: Arc<CrossTenantService>,
}
