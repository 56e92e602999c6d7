//! The default role set materialized for every new tenant.
//!
//! Each entry names a role, its priority, the permission resource types it
//! covers, and a filter narrowing which actions within that scope are
//! assigned. Materialization is idempotent: duplicate-key failures mean a
//! previous delivery already did the work and are absorbed.

use crate::model::{Permission, Role, RolePermission, SYSTEM_ACTOR};
use crate::repository::{PermissionRepository, RoleRepository};
use authz_core::{ErrorKind, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Which actions of the scoped resource types a default role receives.
#[derive(Debug, Clone, Copy)]
pub enum ActionFilter {
    /// Every action in scope.
    All,
    /// Only the listed actions.
    Only(&'static [&'static str]),
    /// Everything except the listed actions and prefixed families.
    Exclude {
        names: &'static [&'static str],
        prefixes: &'static [&'static str],
    },
}

impl ActionFilter {
    pub fn accepts(&self, action: &str) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Only(names) => names.contains(&action),
            ActionFilter::Exclude { names, prefixes } => {
                !names.contains(&action) && !prefixes.iter().any(|p| action.starts_with(p))
            }
        }
    }
}

/// One row of the default role table.
#[derive(Debug, Clone, Copy)]
pub struct DefaultRoleSpec {
    pub name: &'static str,
    pub priority: i32,
    pub resource_types: &'static [&'static str],
    pub filter: ActionFilter,
}

/// The 13 default roles provisioned for every tenant.
pub const DEFAULT_ROLES: &[DefaultRoleSpec] = &[
    DefaultRoleSpec {
        name: "TENANT_ADMIN",
        priority: 1000,
        resource_types: &[
            "TENANT",
            "USER",
            "ROLE",
            "PERMISSION",
            "WORKSPACE",
            "AUDIT",
            "SYSTEM_CONFIG",
            "BILLING",
        ],
        filter: ActionFilter::Exclude {
            names: &["DELETE_TENANT"],
            prefixes: &[],
        },
    },
    DefaultRoleSpec {
        name: "DATA_STEWARD",
        priority: 900,
        resource_types: &[
            "DATASET",
            "DATA_CATALOG",
            "DATA_QUALITY",
            "DATA_LINEAGE",
            "METADATA",
            "DATA_INGESTION",
            "DATA_TRANSFORMATION",
        ],
        filter: ActionFilter::Exclude {
            names: &["DELETE_TENANT"],
            prefixes: &[],
        },
    },
    DefaultRoleSpec {
        name: "PRIVACY_OFFICER",
        priority: 850,
        resource_types: &[
            "PRIVACY_SETTINGS",
            "AUDIT",
            "COMPLIANCE",
            "PII_MANAGEMENT",
            "ENCRYPTION",
            "DIFFERENTIAL_PRIVACY",
            "DISCLOSURE_RISK",
        ],
        filter: ActionFilter::Exclude {
            names: &["DELETE_TENANT"],
            prefixes: &[],
        },
    },
    DefaultRoleSpec {
        name: "DATA_CONTRIBUTOR",
        priority: 800,
        resource_types: &["DATA_INGESTION", "DATASET", "METADATA"],
        filter: ActionFilter::Only(&["CREATE", "UPDATE", "READ", "UPLOAD"]),
    },
    DefaultRoleSpec {
        name: "STATISTICIAN",
        priority: 700,
        resource_types: &[
            "STATISTICAL_ENGINE",
            "ML_PIPELINE",
            "ANALYSIS_TEMPLATE",
            "REPORT",
            "DATASET",
            "CUSTOM_METHODOLOGY",
        ],
        filter: ActionFilter::Exclude {
            names: &["DELETE_TENANT"],
            prefixes: &["ADMIN_"],
        },
    },
    DefaultRoleSpec {
        name: "DATA_SCIENTIST",
        priority: 650,
        resource_types: &[
            "ML_PIPELINE",
            "STATISTICAL_ENGINE",
            "ANALYSIS_TEMPLATE",
            "DATASET",
            "MODEL_DEPLOYMENT",
        ],
        filter: ActionFilter::Only(&["CREATE", "UPDATE", "READ", "EXECUTE", "DEPLOY"]),
    },
    DefaultRoleSpec {
        name: "ANALYST",
        priority: 600,
        resource_types: &[
            "ANALYSIS_TEMPLATE",
            "REPORT",
            "DATASET",
            "BASIC_STATISTICS",
        ],
        filter: ActionFilter::Only(&["READ", "EXECUTE", "CREATE_REPORT"]),
    },
    DefaultRoleSpec {
        name: "WORKSPACE_ADMIN",
        priority: 550,
        resource_types: &[
            "WORKSPACE",
            "COLLABORATION",
            "DATA_SHARING_AGREEMENT",
            "WORKFLOW_APPROVAL",
        ],
        filter: ActionFilter::Exclude {
            names: &[],
            prefixes: &["SYSTEM_"],
        },
    },
    DefaultRoleSpec {
        name: "EXTERNAL_COLLABORATOR",
        priority: 500,
        resource_types: &[
            "SHARED_WORKSPACE",
            "COLLABORATIVE_ANALYSIS",
            "SHARED_DATASET",
        ],
        filter: ActionFilter::Only(&["READ", "COLLABORATE", "COMMENT"]),
    },
    DefaultRoleSpec {
        name: "DASHBOARD_CREATOR",
        priority: 450,
        resource_types: &["DASHBOARD", "VISUALIZATION", "CHART_LIBRARY", "EXPORT"],
        filter: ActionFilter::Only(&["CREATE", "UPDATE", "READ", "PUBLISH", "EXPORT"]),
    },
    DefaultRoleSpec {
        name: "DATA_CONSUMER",
        priority: 300,
        resource_types: &["DATASET", "REPORT", "PUBLISHED_ANALYSIS"],
        filter: ActionFilter::Only(&["READ", "VIEW"]),
    },
    DefaultRoleSpec {
        name: "REVIEWER",
        priority: 250,
        resource_types: &["REPORT", "ANALYSIS_REVIEW", "PUBLICATION_APPROVAL"],
        filter: ActionFilter::Only(&["READ", "REVIEW", "APPROVE", "REJECT"]),
    },
    DefaultRoleSpec {
        name: "VIEWER",
        priority: 100,
        resource_types: &["DASHBOARD", "VISUALIZATION", "PUBLIC_REPORT"],
        filter: ActionFilter::Only(&["READ", "VIEW"]),
    },
];

/// Materialize the default role set for a tenant. Safe to run repeatedly:
/// existing roles and permission assignments are left untouched.
pub async fn provision_default_roles(
    roles: &Arc<dyn RoleRepository>,
    permissions: &Arc<dyn PermissionRepository>,
    tenant_id: Uuid,
) -> Result<usize> {
    let mut created = 0;

    for spec in DEFAULT_ROLES {
        let role_id = match roles.find_by_name(spec.name, Some(tenant_id)).await? {
            Some(existing) => existing.id,
            None => {
                let mut role = Role::new(spec.name, Some(tenant_id), SYSTEM_ACTOR);
                role.priority = spec.priority;
                role.is_system = true;
                match roles.create(&role).await {
                    Ok(created_role) => {
                        created += 1;
                        created_role.id
                    }
                    // A concurrent delivery won the race; reuse its row.
                    Err(e) if e.kind() == ErrorKind::Duplicate => {
                        match roles.find_by_name(spec.name, Some(tenant_id)).await? {
                            Some(existing) => existing.id,
                            None => continue,
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let scope: Vec<String> = spec.resource_types.iter().map(|s| s.to_string()).collect();
        let in_scope = permissions.list_by_resource_types(&scope).await?;
        for permission in in_scope {
            if !permission.is_active || !spec.filter.accepts(&permission.action) {
                continue;
            }
            let assignment = RolePermission::new(role_id, permission.id, SYSTEM_ACTOR);
            match roles.add_role_permission(&assignment).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Duplicate => {}
                Err(e) => return Err(e),
            }
        }

        debug!(role = spec.name, %tenant_id, "Default role materialized");
    }

    Ok(created)
}

/// Scope filter used when wiring default-role permissions; exposed for the
/// provisioning path and its tests.
pub fn scoped_permissions<'p>(
    spec: &DefaultRoleSpec,
    catalog: &'p [Permission],
) -> Vec<&'p Permission> {
    catalog
        .iter()
        .filter(|p| {
            p.is_active
                && spec.resource_types.contains(&p.resource_type.as_str())
                && spec.filter.accepts(&p.action)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_fourteen_roles_with_expected_priorities() {
        assert_eq!(DEFAULT_ROLES.len(), 13);

        let find = |name: &str| {
            DEFAULT_ROLES
                .iter()
                .find(|s| s.name == name)
                .unwrap_or_else(|| panic!("missing default role {name}"))
        };
        assert_eq!(find("TENANT_ADMIN").priority, 1000);
        assert_eq!(find("DATA_STEWARD").priority, 900);
        assert_eq!(find("PRIVACY_OFFICER").priority, 850);
        assert_eq!(find("DATA_CONTRIBUTOR").priority, 800);
        assert_eq!(find("STATISTICIAN").priority, 700);
        assert_eq!(find("DATA_SCIENTIST").priority, 650);
        assert_eq!(find("ANALYST").priority, 600);
        assert_eq!(find("WORKSPACE_ADMIN").priority, 550);
        assert_eq!(find("EXTERNAL_COLLABORATOR").priority, 500);
        assert_eq!(find("DASHBOARD_CREATOR").priority, 450);
        assert_eq!(find("DATA_CONSUMER").priority, 300);
        assert_eq!(find("REVIEWER").priority, 250);
        assert_eq!(find("VIEWER").priority, 100);
    }

    #[test]
    fn tenant_admin_never_receives_delete_tenant() {
        let spec = DEFAULT_ROLES.iter().find(|s| s.name == "TENANT_ADMIN").unwrap();
        assert!(spec.filter.accepts("CREATE"));
        assert!(spec.filter.accepts("UPDATE"));
        assert!(!spec.filter.accepts("DELETE_TENANT"));
    }

    #[test]
    fn statistician_excludes_admin_family() {
        let spec = DEFAULT_ROLES.iter().find(|s| s.name == "STATISTICIAN").unwrap();
        assert!(spec.filter.accepts("EXECUTE"));
        assert!(!spec.filter.accepts("ADMIN_RESET"));
        assert!(!spec.filter.accepts("ADMIN_CONFIGURE"));
        assert!(!spec.filter.accepts("DELETE_TENANT"));
    }

    #[test]
    fn workspace_admin_excludes_system_family() {
        let spec = DEFAULT_ROLES
            .iter()
            .find(|s| s.name == "WORKSPACE_ADMIN")
            .unwrap();
        assert!(spec.filter.accepts("CREATE"));
        assert!(!spec.filter.accepts("SYSTEM_OVERRIDE"));
    }

    #[test]
    fn scoped_permissions_intersect_scope_and_filter() {
        let spec = DEFAULT_ROLES.iter().find(|s| s.name == "VIEWER").unwrap();
        let catalog = vec![
            Permission::new("DASHBOARD", "READ"),
            Permission::new("DASHBOARD", "DELETE"),
            Permission::new("DATASET", "READ"),
            Permission::new("PUBLIC_REPORT", "VIEW"),
        ];
        let selected = scoped_permissions(spec, &catalog);
        let names: Vec<String> = selected.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["DASHBOARD:READ".to_string(), "PUBLIC_REPORT:VIEW".to_string()]
        );
    }
}
