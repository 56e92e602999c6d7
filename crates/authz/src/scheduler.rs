//! Scheduled maintenance.
//!
//! A periodic sweep deactivates policies past their end date and drops
//! expired role-permission and user-role assignments, then invalidates the
//! decision cache broadly (expiry can affect any tenant).

use crate::repository::{CrossTenantRepository, PolicyRepository, RoleRepository, UserRoleRepository};
use authz_core::cache::DecisionCache;
use authz_core::config::SweepConfig;
use authz_core::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub policies_deactivated: u64,
    pub role_permissions_expired: u64,
    pub user_roles_expired: u64,
    pub cross_tenant_grants_expired: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.policies_deactivated
            + self.role_permissions_expired
            + self.user_roles_expired
            + self.cross_tenant_grants_expired
    }
}

pub struct MaintenanceSweeper {
    roles: Arc<dyn RoleRepository>,
    user_roles: Arc<dyn UserRoleRepository>,
    policies: Arc<dyn PolicyRepository>,
    grants: Arc<dyn CrossTenantRepository>,
    cache: Arc<dyn DecisionCache>,
    config: SweepConfig,
}

impl MaintenanceSweeper {
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        user_roles: Arc<dyn UserRoleRepository>,
        policies: Arc<dyn PolicyRepository>,
        grants: Arc<dyn CrossTenantRepository>,
        cache: Arc<dyn DecisionCache>,
        config: SweepConfig,
    ) -> Self {
        Self {
            roles,
            user_roles,
            policies,
            grants,
            cache,
            config,
        }
    }

    /// One sweep pass.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();

        let report = SweepReport {
            policies_deactivated: self.policies.deactivate_expired(now).await?,
            role_permissions_expired: self.roles.delete_expired_role_permissions(now).await?,
            user_roles_expired: self.user_roles.deactivate_expired(now).await?,
            cross_tenant_grants_expired: self.grants.deactivate_expired(now).await?,
        };

        if report.total() > 0 {
            self.cache.clear().await;
        }

        info!(
            policies = report.policies_deactivated,
            role_permissions = report.role_permissions_expired,
            user_roles = report.user_roles_expired,
            cross_tenant = report.cross_tenant_grants_expired,
            "Expiry sweep finished"
        );
        Ok(report)
    }

    /// Run the sweep on its configured interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would race startup; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    error!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }
}
