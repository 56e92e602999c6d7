//! Name binding for policy expressions.
//!
//! The evaluation context exposes a fixed vocabulary derived from the
//! request and the caller's pre-computed permission set. Nothing else is
//! reachable from an expression.

use super::expression::{ExprError, Scope, Value};
use crate::dto::AuthzRequest;
use crate::model::Permission;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::{BTreeMap, HashSet};

/// Bound names for one evaluation, shared by every policy flavor.
pub struct EvaluationContext<'a> {
    request: &'a AuthzRequest,
    permission_names: HashSet<String>,
    permissions: Vec<(String, String)>,
    now: DateTime<Utc>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(request: &'a AuthzRequest, permissions: &[Permission], now: DateTime<Utc>) -> Self {
        Self {
            request,
            permission_names: permissions.iter().map(|p| p.name()).collect(),
            permissions: permissions
                .iter()
                .map(|p| (p.resource_type.clone(), p.action.clone()))
                .collect(),
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn request(&self) -> &AuthzRequest {
        self.request
    }

    pub fn has_permission(&self, resource_type: &str, action: &str) -> bool {
        self.permissions
            .iter()
            .any(|(r, a)| r == resource_type && a == action)
    }

    pub fn has_any_permission(&self, names: &[String]) -> bool {
        names.iter().any(|n| self.permission_names.contains(n))
    }

    pub fn permission_names(&self) -> &HashSet<String> {
        &self.permission_names
    }

    fn attributes_value(&self) -> Value {
        let map: BTreeMap<String, Value> = self
            .request
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect();
        Value::Map(map)
    }

    fn permissions_value(&self) -> Value {
        Value::List(
            self.permissions
                .iter()
                .map(|(resource_type, action)| {
                    let mut map = BTreeMap::new();
                    map.insert("resourceType".to_string(), Value::Str(resource_type.clone()));
                    map.insert("action".to_string(), Value::Str(action.clone()));
                    map.insert(
                        "name".to_string(),
                        Value::Str(format!("{resource_type}:{action}")),
                    );
                    Value::Map(map)
                })
                .collect(),
        )
    }

    fn day_of_week(&self) -> &'static str {
        match self.now.weekday() {
            Weekday::Mon => "MONDAY",
            Weekday::Tue => "TUESDAY",
            Weekday::Wed => "WEDNESDAY",
            Weekday::Thu => "THURSDAY",
            Weekday::Fri => "FRIDAY",
            Weekday::Sat => "SATURDAY",
            Weekday::Sun => "SUNDAY",
        }
    }
}

impl Scope for EvaluationContext<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "userId" => Some(Value::Str(self.request.user_id.to_string())),
            "tenantId" => Some(Value::Str(self.request.tenant_id.to_string())),
            "resource" => Some(Value::Str(self.request.resource.clone())),
            "action" => Some(Value::Str(self.request.action.clone())),
            "resourceId" => Some(
                self.request
                    .resource_id
                    .as_ref()
                    .map(|id| Value::Str(id.clone()))
                    .unwrap_or(Value::Null),
            ),
            "attributes" => Some(self.attributes_value()),
            "ipAddress" => Some(
                self.request
                    .ip_address
                    .as_ref()
                    .map(|ip| Value::Str(ip.clone()))
                    .unwrap_or(Value::Null),
            ),
            "userAgent" => Some(
                self.request
                    .user_agent
                    .as_ref()
                    .map(|ua| Value::Str(ua.clone()))
                    .unwrap_or(Value::Null),
            ),
            "permissions" => Some(self.permissions_value()),
            "permissionNames" => Some(Value::List(
                self.permission_names
                    .iter()
                    .map(|n| Value::Str(n.clone()))
                    .collect(),
            )),
            "now" => Some(Value::Str(self.now.to_rfc3339())),
            "currentTime" => Some(Value::Str(self.now.format("%H:%M:%S").to_string())),
            "dayOfWeek" => Some(Value::Str(self.day_of_week().to_string())),
            "hour" => Some(Value::Number(f64::from(self.now.hour()))),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
        match name {
            "hasPermission" => match args {
                [Value::Str(resource), Value::Str(action)] => {
                    Ok(Value::Bool(self.has_permission(resource, action)))
                }
                _ => Err(ExprError::TypeMismatch(
                    "hasPermission(resource, action) takes two strings".to_string(),
                )),
            },
            "hasAnyPermission" => match args {
                [Value::List(items)] => {
                    let mut names = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Str(s) => names.push(s.clone()),
                            other => {
                                return Err(ExprError::TypeMismatch(format!(
                                    "hasAnyPermission expects strings, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    Ok(Value::Bool(self.has_any_permission(&names)))
                }
                _ => Err(ExprError::TypeMismatch(
                    "hasAnyPermission([names]) takes one list".to_string(),
                )),
            },
            other => Err(ExprError::UnknownFunction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::expression::evaluate_bool;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn request() -> AuthzRequest {
        AuthzRequest::new(Uuid::new_v4(), Uuid::new_v4(), "REPORT", "READ")
            .with_attribute("department", serde_json::json!("finance"))
            .with_attribute("groups", serde_json::json!(["auditors", "analysts"]))
    }

    fn permissions() -> Vec<Permission> {
        vec![
            Permission::new("REPORT", "READ"),
            Permission::new("DATASET", "UPDATE"),
        ]
    }

    #[test]
    fn binds_request_fields() {
        let request = request();
        let permissions = permissions();
        // Wednesday 14:30 UTC.
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 14, 30, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &permissions, now);

        assert!(evaluate_bool("resource == 'REPORT' && action == 'READ'", &ctx).unwrap());
        assert!(evaluate_bool("hour == 14 && dayOfWeek == 'WEDNESDAY'", &ctx).unwrap());
        assert!(evaluate_bool("attributes.department == 'finance'", &ctx).unwrap());
        assert!(evaluate_bool("attributes.groups contains 'auditors'", &ctx).unwrap());
        assert!(evaluate_bool("resourceId == null", &ctx).unwrap());
    }

    #[test]
    fn permission_helpers_consult_the_set() {
        let request = request();
        let permissions = permissions();
        let ctx = EvaluationContext::new(&request, &permissions, Utc::now());

        assert!(evaluate_bool("hasPermission('DATASET', 'UPDATE')", &ctx).unwrap());
        assert!(!evaluate_bool("hasPermission('DATASET', 'DELETE')", &ctx).unwrap());
        assert!(
            evaluate_bool("hasAnyPermission(['NOPE:X', 'REPORT:READ'])", &ctx).unwrap()
        );
        assert!(evaluate_bool("permissionNames contains 'REPORT:READ'", &ctx).unwrap());
    }
}
