//! Policy evaluation.
//!
//! One policy evaluates against one request and a pre-computed permission
//! set, yielding `Some(Allow)`, `Some(Deny)` or `None` (not applicable).
//! Evaluation never panics: a failure inside a single-policy evaluation is
//! fail-closed (`Deny`); a failure while composing a batch drops the broken
//! policy and continues.

pub mod context;
pub mod expression;

pub use context::EvaluationContext;
pub use expression::{evaluate_bool, ExprError, Expression, Scope, Value};

use crate::condition::ConditionValue;
use crate::model::{Permission, Policy, PolicyEffect, PolicyType, Resource};
use authz_core::{Error, Result};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Compiled `regex:` condition patterns, keyed by pattern source. Conditions
/// come from stored policies, so the set of distinct patterns is small and
/// stable; compiling on every decision would dominate the comparator.
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Upper bound on cached patterns; past it the cache is reset wholesale.
const REGEX_CACHE_CAP: usize = 256;

fn compiled_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock().expect("regex cache lock poisoned");
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern)
        .map_err(|e| Error::validation(format!("Invalid condition regex: {e}")))?;
    if cache.len() >= REGEX_CACHE_CAP {
        cache.clear();
    }
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Permissions and resources a policy references.
#[derive(Debug, Clone, Default)]
pub struct PolicyBindings {
    pub permissions: Vec<Permission>,
    pub resources: Vec<Resource>,
}

/// Stateless policy evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one policy. Internal failures are fail-closed.
    pub fn evaluate(
        &self,
        policy: &Policy,
        bindings: &PolicyBindings,
        ctx: &EvaluationContext<'_>,
    ) -> Option<PolicyEffect> {
        match self.try_evaluate(policy, bindings, ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(policy = %policy.name, error = %e, "Policy evaluation failed, denying");
                Some(PolicyEffect::Deny)
            }
        }
    }

    /// Combine a pre-sorted batch (priority descending): the first `Deny`
    /// wins immediately, otherwise any `Allow` wins, otherwise `None`.
    /// A policy that fails to evaluate is skipped.
    pub fn combine<'p>(
        &self,
        policies: impl IntoIterator<Item = (&'p Policy, &'p PolicyBindings)>,
        ctx: &EvaluationContext<'_>,
    ) -> Option<PolicyEffect> {
        let mut saw_allow = false;
        for (policy, bindings) in policies {
            match self.try_evaluate(policy, bindings, ctx) {
                Ok(Some(PolicyEffect::Deny)) => {
                    debug!(policy = %policy.name, "Policy denied");
                    return Some(PolicyEffect::Deny);
                }
                Ok(Some(PolicyEffect::Allow)) => saw_allow = true,
                Ok(None) => {}
                Err(e) => {
                    warn!(policy = %policy.name, error = %e, "Skipping policy that failed to evaluate");
                }
            }
        }
        saw_allow.then_some(PolicyEffect::Allow)
    }

    /// Full batch contract: like [`Self::combine`] but default-deny when no
    /// policy is applicable.
    pub fn evaluate_batch<'p>(
        &self,
        policies: impl IntoIterator<Item = (&'p Policy, &'p PolicyBindings)>,
        ctx: &EvaluationContext<'_>,
    ) -> PolicyEffect {
        self.combine(policies, ctx).unwrap_or(PolicyEffect::Deny)
    }

    /// Evaluate one policy, surfacing internal failures to the caller.
    pub fn try_evaluate(
        &self,
        policy: &Policy,
        bindings: &PolicyBindings,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        if !policy.is_in_effect(ctx.now()) {
            return Ok(None);
        }

        match policy.policy_type {
            PolicyType::ResourceBased => self.evaluate_resource_based(policy, bindings, ctx),
            PolicyType::IdentityBased => self.evaluate_identity_based(policy, bindings, ctx),
            PolicyType::AttributeBased => self.evaluate_attribute_based(policy, ctx),
            PolicyType::TimeBased => self.evaluate_time_based(policy, ctx),
            PolicyType::Conditional => self.evaluate_conditional(policy, ctx),
        }
    }

    /// Applicable when the policy references a resource matching the request
    /// and the user holds at least one permission the policy references.
    fn evaluate_resource_based(
        &self,
        policy: &Policy,
        bindings: &PolicyBindings,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        // A policy referencing no permissions is never applicable.
        if bindings.permissions.is_empty() {
            return Ok(None);
        }

        let request = ctx.request();
        let resource_matches = bindings.resources.iter().any(|resource| {
            request
                .resource_id
                .as_ref()
                .map(|id| &resource.resource_identifier == id)
                .unwrap_or(false)
                || resource.resource_type == request.resource
        });
        if !resource_matches {
            return Ok(None);
        }

        let permission_overlap = bindings
            .permissions
            .iter()
            .any(|p| p.is_active && ctx.has_permission(&p.resource_type, &p.action));
        if !permission_overlap {
            return Ok(None);
        }

        if !self.conditions_match(policy, ctx)? {
            return Ok(None);
        }

        Ok(Some(policy.effect))
    }

    /// Matches on `conditions.userId` and/or `conditions.groups`, gated on a
    /// referenced permission matching the requested `(resource, action)`.
    fn evaluate_identity_based(
        &self,
        policy: &Policy,
        bindings: &PolicyBindings,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        if bindings.permissions.is_empty() {
            return Ok(None);
        }

        let request = ctx.request();
        let permission_matches = bindings
            .permissions
            .iter()
            .any(|p| p.resource_type == request.resource && p.action == request.action);
        if !permission_matches {
            return Ok(None);
        }

        if let Some(user_condition) = policy.conditions.get_str("userId") {
            if user_condition != request.user_id.to_string() {
                return Ok(None);
            }
        }

        if let Some(groups) = policy.conditions.get_list("groups") {
            let request_groups: Vec<&str> = request
                .attributes
                .get("groups")
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|i| i.as_str()).collect())
                .unwrap_or_default();
            let intersects = groups
                .iter()
                .filter_map(ConditionValue::as_str)
                .any(|g| request_groups.contains(&g));
            if !intersects {
                return Ok(None);
            }
        }

        Ok(Some(policy.effect))
    }

    /// Every condition entry is a boolean expression; all must hold. A false
    /// or failing entry makes the policy not applicable.
    fn evaluate_attribute_based(
        &self,
        policy: &Policy,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        for (key, value) in policy.conditions.iter() {
            let Some(expr) = value.as_str() else {
                debug!(policy = %policy.name, key, "Attribute condition is not an expression");
                return Ok(None);
            };
            match evaluate_bool(expr, ctx) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(e) => {
                    debug!(policy = %policy.name, key, error = %e, "Attribute condition failed to evaluate");
                    return Ok(None);
                }
            }
        }
        Ok(Some(policy.effect))
    }

    /// The conditions describe the permitted time window. An ALLOW policy
    /// fires inside the window; a DENY policy fires outside it.
    fn evaluate_time_based(
        &self,
        policy: &Policy,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        let conditions = &policy.conditions;

        // Scope the policy to specific actions when requested.
        if let Some(actions) = conditions.get_list("allowedActions") {
            let action_matches = actions
                .iter()
                .filter_map(ConditionValue::as_str)
                .any(|a| a == ctx.request().action);
            if !action_matches {
                return Ok(None);
            }
        }

        let tz: Tz = match conditions.get_str("timezone") {
            Some(name) => name
                .parse()
                .map_err(|_| Error::validation(format!("Unknown timezone '{name}'")))?,
            None => chrono_tz::UTC,
        };
        let local = ctx.now().with_timezone(&tz);

        let mut within = true;

        if let Some(window) = conditions.get_str("allowedHours") {
            let (start, end) = parse_hour_window(window)?;
            let time = local.time();
            within &= time >= start && time <= end;
        }

        if let Some(days) = conditions.get_str("allowedDays") {
            let allowed = parse_days(days)?;
            within &= allowed.contains(&local.weekday());
        }

        if let Some(range) = conditions.get_str("dateRange") {
            let (from, to) = parse_date_range(range)?;
            let date = local.date_naive();
            within &= date >= from && date <= to;
        }

        Ok(match (policy.effect, within) {
            (PolicyEffect::Allow, true) => Some(PolicyEffect::Allow),
            (PolicyEffect::Allow, false) => None,
            (PolicyEffect::Deny, true) => None,
            (PolicyEffect::Deny, false) => Some(PolicyEffect::Deny),
        })
    }

    /// Single `expression` condition over the bound context.
    fn evaluate_conditional(
        &self,
        policy: &Policy,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<PolicyEffect>> {
        let Some(expr) = policy.conditions.get_str("expression") else {
            return Err(Error::validation(format!(
                "Conditional policy '{}' has no expression",
                policy.name
            )));
        };
        let holds = evaluate_bool(expr, ctx)
            .map_err(|e| Error::validation(format!("Expression error: {e}")))?;
        Ok(holds.then_some(policy.effect))
    }

    /// Simple comparator over the request attributes, used by the non-ABAC
    /// flavors: `regex:`, `gt:`, `lt:`, list containment, equality.
    fn conditions_match(&self, policy: &Policy, ctx: &EvaluationContext<'_>) -> Result<bool> {
        let request = ctx.request();
        for (key, condition) in policy.conditions.iter() {
            let actual = request.attributes.get(key);
            if !compare_condition(condition, actual)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn compare_condition(
    condition: &ConditionValue,
    actual: Option<&serde_json::Value>,
) -> Result<bool> {
    match condition {
        ConditionValue::String(s) if s.starts_with("regex:") => {
            let regex = compiled_regex(&s["regex:".len()..])?;
            Ok(actual
                .and_then(|v| v.as_str())
                .map(|v| regex.is_match(v))
                .unwrap_or(false))
        }
        ConditionValue::String(s) if s.starts_with("gt:") => {
            let threshold = parse_threshold(&s["gt:".len()..])?;
            Ok(numeric(actual).map(|v| v > threshold).unwrap_or(false))
        }
        ConditionValue::String(s) if s.starts_with("lt:") => {
            let threshold = parse_threshold(&s["lt:".len()..])?;
            Ok(numeric(actual).map(|v| v < threshold).unwrap_or(false))
        }
        ConditionValue::List(items) => Ok(actual
            .map(|v| items.iter().any(|item| item.matches_json(v)))
            .unwrap_or(false)),
        other => Ok(actual.map(|v| other.matches_json(v)).unwrap_or(false)),
    }
}

fn parse_threshold(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| Error::validation(format!("Invalid numeric condition '{raw}'")))
}

fn numeric(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_hour_window(window: &str) -> Result<(NaiveTime, NaiveTime)> {
    let (start, end) = window
        .split_once('-')
        .ok_or_else(|| Error::validation(format!("Invalid allowedHours '{window}'")))?;
    let parse = |raw: &str| {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| Error::validation(format!("Invalid time '{raw}' in allowedHours")))
    };
    Ok((parse(start)?, parse(end)?))
}

fn parse_days(days: &str) -> Result<Vec<Weekday>> {
    days.split(',')
        .map(|day| match day.trim().to_ascii_uppercase().as_str() {
            "MON" => Ok(Weekday::Mon),
            "TUE" => Ok(Weekday::Tue),
            "WED" => Ok(Weekday::Wed),
            "THU" => Ok(Weekday::Thu),
            "FRI" => Ok(Weekday::Fri),
            "SAT" => Ok(Weekday::Sat),
            "SUN" => Ok(Weekday::Sun),
            other => Err(Error::validation(format!(
                "Invalid day '{other}' in allowedDays"
            ))),
        })
        .collect()
}

fn parse_date_range(range: &str) -> Result<(NaiveDate, NaiveDate)> {
    let (from, to) = range
        .split_once(" to ")
        .ok_or_else(|| Error::validation(format!("Invalid dateRange '{range}'")))?;
    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| Error::validation(format!("Invalid date '{raw}' in dateRange")))
    };
    Ok((parse(from)?, parse(to)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionMap;
    use crate::dto::AuthzRequest;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn request() -> AuthzRequest {
        AuthzRequest::new(Uuid::new_v4(), Uuid::new_v4(), "DATASET", "UPDATE")
    }

    fn permissions() -> Vec<Permission> {
        vec![Permission::new("DATASET", "UPDATE")]
    }

    fn policy(policy_type: PolicyType, effect: PolicyEffect) -> Policy {
        let mut policy = Policy::new("test-policy", Uuid::new_v4(), policy_type, "admin");
        policy.effect = effect;
        policy
    }

    #[test]
    fn inactive_policy_is_not_applicable() {
        let request = request();
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Deny);
        p.is_active = false;

        let outcome = PolicyEvaluator::new().evaluate(&p, &PolicyBindings::default(), &ctx);
        assert_eq!(outcome, None);
    }

    #[test]
    fn expired_window_is_not_applicable() {
        let request = request();
        let perms = permissions();
        let now = Utc::now();
        let ctx = EvaluationContext::new(&request, &perms, now);
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Deny);
        p.end_date = Some(now);

        let outcome = PolicyEvaluator::new().evaluate(&p, &PolicyBindings::default(), &ctx);
        assert_eq!(outcome, None);
    }

    #[test]
    fn time_based_deny_fires_outside_allowed_hours() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Deny);
        p.conditions = ConditionMap::new()
            .with("allowedHours", "09:00-17:00")
            .with("timezone", "UTC");

        let evaluator = PolicyEvaluator::new();
        let bindings = PolicyBindings::default();

        // 02:00 UTC: outside the permitted window, the deny fires.
        let at_2 = Utc.with_ymd_and_hms(2025, 6, 4, 2, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, at_2);
        assert_eq!(evaluator.evaluate(&p, &bindings, &ctx), Some(PolicyEffect::Deny));

        // 10:00 UTC: inside the window, nothing to deny.
        let at_10 = Utc.with_ymd_and_hms(2025, 6, 4, 10, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, at_10);
        assert_eq!(evaluator.evaluate(&p, &bindings, &ctx), None);
    }

    #[test]
    fn time_based_allow_fires_inside_window() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new()
            .with("allowedDays", "MON,TUE,WED,THU,FRI")
            .with("timezone", "UTC");

        let evaluator = PolicyEvaluator::new();
        let bindings = PolicyBindings::default();

        // Wednesday.
        let weekday = Utc.with_ymd_and_hms(2025, 6, 4, 10, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, weekday);
        assert_eq!(evaluator.evaluate(&p, &bindings, &ctx), Some(PolicyEffect::Allow));

        // Saturday.
        let weekend = Utc.with_ymd_and_hms(2025, 6, 7, 10, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, weekend);
        assert_eq!(evaluator.evaluate(&p, &bindings, &ctx), None);
    }

    #[test]
    fn time_based_respects_timezone() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new()
            .with("allowedHours", "09:00-17:00")
            .with("timezone", "America/New_York");

        // 14:00 UTC is 09:00 or 10:00 in New York depending on DST; in June
        // it is 10:00, inside the window.
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 14, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, now);
        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &PolicyBindings::default(), &ctx),
            Some(PolicyEffect::Allow)
        );

        // 02:00 UTC is 22:00 the previous evening in New York.
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 2, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, now);
        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &PolicyBindings::default(), &ctx),
            None
        );
    }

    #[test]
    fn time_based_scoped_to_actions() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Deny);
        p.conditions = ConditionMap::new()
            .with("allowedHours", "09:00-17:00")
            .with(
                "allowedActions",
                ConditionValue::List(vec![ConditionValue::from("DELETE")]),
            );

        // Request action UPDATE is not in scope, so no deny even at 02:00.
        let at_2 = Utc.with_ymd_and_hms(2025, 6, 4, 2, 0, 0).unwrap();
        let ctx = EvaluationContext::new(&request, &perms, at_2);
        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &PolicyBindings::default(), &ctx),
            None
        );
    }

    #[test]
    fn invalid_timezone_fails_closed() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::TimeBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new()
            .with("allowedHours", "09:00-17:00")
            .with("timezone", "Mars/Olympus");

        let ctx = EvaluationContext::new(&request, &perms, Utc::now());
        let evaluator = PolicyEvaluator::new();
        assert!(evaluator.try_evaluate(&p, &PolicyBindings::default(), &ctx).is_err());
        assert_eq!(
            evaluator.evaluate(&p, &PolicyBindings::default(), &ctx),
            Some(PolicyEffect::Deny)
        );
    }

    #[test]
    fn attribute_based_requires_all_entries() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::AttributeBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new()
            .with("holds_permission", "hasPermission('DATASET', 'UPDATE')")
            .with("is_update", "action == 'UPDATE'");

        let ctx = EvaluationContext::new(&request, &perms, Utc::now());
        let evaluator = PolicyEvaluator::new();
        assert_eq!(
            evaluator.evaluate(&p, &PolicyBindings::default(), &ctx),
            Some(PolicyEffect::Allow)
        );

        // One false entry makes it not applicable.
        p.conditions = ConditionMap::new()
            .with("is_update", "action == 'UPDATE'")
            .with("is_report", "resource == 'REPORT'");
        assert_eq!(evaluator.evaluate(&p, &PolicyBindings::default(), &ctx), None);

        // One erroring entry makes it not applicable, not a deny.
        p.conditions = ConditionMap::new().with("broken", "nosuchname == 1");
        assert_eq!(evaluator.evaluate(&p, &PolicyBindings::default(), &ctx), None);
    }

    #[test]
    fn conditional_expression_drives_effect() {
        let request = request();
        let perms = permissions();
        let mut p = policy(PolicyType::Conditional, PolicyEffect::Deny);
        p.conditions =
            ConditionMap::new().with("expression", "!hasPermission('DATASET', 'ADMIN')");

        let ctx = EvaluationContext::new(&request, &perms, Utc::now());
        let evaluator = PolicyEvaluator::new();
        assert_eq!(
            evaluator.evaluate(&p, &PolicyBindings::default(), &ctx),
            Some(PolicyEffect::Deny)
        );

        // Expression false: not applicable.
        p.conditions = ConditionMap::new().with("expression", "resource == 'REPORT'");
        assert_eq!(evaluator.evaluate(&p, &PolicyBindings::default(), &ctx), None);

        // Broken expression in single evaluation: fail-closed.
        p.conditions = ConditionMap::new().with("expression", "((");
        assert_eq!(
            evaluator.evaluate(&p, &PolicyBindings::default(), &ctx),
            Some(PolicyEffect::Deny)
        );
    }

    #[test]
    fn resource_based_requires_referenced_permissions() {
        let mut request = request();
        request.resource_id = Some("ds-42".to_string());
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());
        let p = policy(PolicyType::ResourceBased, PolicyEffect::Allow);

        // Empty permission references: never applicable.
        let mut bindings = PolicyBindings::default();
        bindings.resources = vec![Resource::new("ds-42", "DATASET", Uuid::new_v4())];
        assert_eq!(PolicyEvaluator::new().evaluate(&p, &bindings, &ctx), None);

        // With an overlapping referenced permission it applies.
        bindings.permissions = vec![Permission::new("DATASET", "UPDATE")];
        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &bindings, &ctx),
            Some(PolicyEffect::Allow)
        );

        // User lacking the referenced permission: not applicable.
        bindings.permissions = vec![Permission::new("DATASET", "DELETE")];
        assert_eq!(PolicyEvaluator::new().evaluate(&p, &bindings, &ctx), None);
    }

    #[test]
    fn resource_based_comparator_conditions() {
        let mut request = request();
        request.resource_id = Some("ds-42".to_string());
        request
            .attributes
            .insert("department".to_string(), serde_json::json!("finance"));
        request
            .attributes
            .insert("clearance".to_string(), serde_json::json!(5));
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());

        let mut p = policy(PolicyType::ResourceBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new()
            .with("department", "regex:^fin.*")
            .with("clearance", "gt:3");

        let mut bindings = PolicyBindings::default();
        bindings.permissions = vec![Permission::new("DATASET", "UPDATE")];
        bindings.resources = vec![Resource::new("ds-42", "DATASET", Uuid::new_v4())];

        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &bindings, &ctx),
            Some(PolicyEffect::Allow)
        );

        // Failing numeric gate.
        p.conditions = ConditionMap::new().with("clearance", "gt:10");
        assert_eq!(PolicyEvaluator::new().evaluate(&p, &bindings, &ctx), None);
    }

    #[test]
    fn identity_based_matches_user_and_groups() {
        let mut request = request();
        request
            .attributes
            .insert("groups".to_string(), serde_json::json!(["auditors"]));
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());

        let mut p = policy(PolicyType::IdentityBased, PolicyEffect::Allow);
        p.conditions = ConditionMap::new().with("userId", request.user_id.to_string());

        let mut bindings = PolicyBindings::default();
        bindings.permissions = vec![Permission::new("DATASET", "UPDATE")];

        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &bindings, &ctx),
            Some(PolicyEffect::Allow)
        );

        // Wrong user: not applicable.
        p.conditions = ConditionMap::new().with("userId", Uuid::new_v4().to_string());
        assert_eq!(PolicyEvaluator::new().evaluate(&p, &bindings, &ctx), None);

        // Group intersection.
        p.conditions = ConditionMap::new().with(
            "groups",
            ConditionValue::List(vec![
                ConditionValue::from("auditors"),
                ConditionValue::from("admins"),
            ]),
        );
        assert_eq!(
            PolicyEvaluator::new().evaluate(&p, &bindings, &ctx),
            Some(PolicyEffect::Allow)
        );

        // Referenced permission must match the request pair.
        bindings.permissions = vec![Permission::new("REPORT", "READ")];
        assert_eq!(PolicyEvaluator::new().evaluate(&p, &bindings, &ctx), None);
    }

    #[test]
    fn batch_deny_wins_over_allow() {
        let request = request();
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());

        let mut allow = policy(PolicyType::Conditional, PolicyEffect::Allow);
        allow.priority = 10;
        allow.conditions = ConditionMap::new().with("expression", "true");

        let mut deny = policy(PolicyType::Conditional, PolicyEffect::Deny);
        deny.priority = 5;
        deny.conditions = ConditionMap::new().with("expression", "true");

        let bindings = PolicyBindings::default();
        let evaluator = PolicyEvaluator::new();

        let combined = evaluator.combine(
            vec![(&allow, &bindings), (&deny, &bindings)],
            &ctx,
        );
        assert_eq!(combined, Some(PolicyEffect::Deny));
    }

    #[test]
    fn batch_defaults_to_deny_when_nothing_applies() {
        let request = request();
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());

        let mut not_applicable = policy(PolicyType::Conditional, PolicyEffect::Allow);
        not_applicable.conditions = ConditionMap::new().with("expression", "false");

        let bindings = PolicyBindings::default();
        let evaluator = PolicyEvaluator::new();

        assert_eq!(
            evaluator.combine(vec![(&not_applicable, &bindings)], &ctx),
            None
        );
        assert_eq!(
            evaluator.evaluate_batch(vec![(&not_applicable, &bindings)], &ctx),
            PolicyEffect::Deny
        );
    }

    #[test]
    fn batch_skips_broken_policies() {
        let request = request();
        let perms = permissions();
        let ctx = EvaluationContext::new(&request, &perms, Utc::now());

        let mut broken = policy(PolicyType::Conditional, PolicyEffect::Deny);
        broken.conditions = ConditionMap::new().with("expression", "((");

        let mut allow = policy(PolicyType::Conditional, PolicyEffect::Allow);
        allow.conditions = ConditionMap::new().with("expression", "true");

        let bindings = PolicyBindings::default();
        let combined = PolicyEvaluator::new().combine(
            vec![(&broken, &bindings), (&allow, &bindings)],
            &ctx,
        );
        assert_eq!(combined, Some(PolicyEffect::Allow));
    }

    #[test]
    fn comparator_list_and_equality() {
        let condition = ConditionValue::List(vec![
            ConditionValue::from("finance"),
            ConditionValue::from("hr"),
        ]);
        assert!(compare_condition(&condition, Some(&serde_json::json!("hr"))).unwrap());
        assert!(!compare_condition(&condition, Some(&serde_json::json!("eng"))).unwrap());
        assert!(!compare_condition(&condition, None).unwrap());

        let equals = ConditionValue::from("finance");
        assert!(compare_condition(&equals, Some(&serde_json::json!("finance"))).unwrap());

        let lt = ConditionValue::from("lt:10");
        assert!(compare_condition(&lt, Some(&serde_json::json!(3))).unwrap());
        assert!(!compare_condition(&lt, Some(&serde_json::json!(30))).unwrap());

        // Broken regex surfaces as an error (fail-closed upstream).
        let bad = ConditionValue::from("regex:[");
        assert!(compare_condition(&bad, Some(&serde_json::json!("x"))).is_err());
    }

    #[test]
    fn regex_conditions_reuse_the_compiled_pattern() {
        let condition = ConditionValue::from("regex:^fin.*");
        // Repeated evaluations hit the pattern cache and stay consistent.
        for _ in 0..3 {
            assert!(compare_condition(&condition, Some(&serde_json::json!("finance"))).unwrap());
            assert!(!compare_condition(&condition, Some(&serde_json::json!("hr"))).unwrap());
        }
        assert!(REGEX_CACHE
            .lock()
            .unwrap()
            .contains_key("^fin.*"));
    }
}
