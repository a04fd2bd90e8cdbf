//! Security policy evaluation.
//!
//! Each condition maps every matcher to an outcome: the condition's effect
//! when the matcher's criterion holds, the inverted effect when it does not.
//! A condition is satisfied only when every outcome is `Permit`. So a
//! `Deny` condition blocks a request exactly when its criteria hold, and a
//! `Permit` condition blocks it exactly when they do not.
//!
//! The request is denied if any condition is unsatisfied. A policy without
//! conditions yields its default effect.

use crate::config::{Effect, Matcher, SecurityCondition, SecurityPolicy};
use crate::request::HttpRequest;
use std::collections::HashMap;
use tracing::debug;

/// Evaluate `policy` against `request`.
pub fn enforce(policy: &SecurityPolicy, request: &HttpRequest) -> Effect {
    if policy.conditions.is_empty() {
        debug!(
            "Security policy has no conditions; applying default effect {}",
            policy.default_effect
        );
        return policy.default_effect;
    }

    let unsatisfied = policy
        .conditions
        .iter()
        .enumerate()
        .find(|(_, condition)| !is_satisfied(condition, request));

    match unsatisfied {
        Some((index, condition)) => {
            debug!(
                "Security condition #{} (effect {}) not satisfied for {}",
                index, condition.effect, request
            );
            Effect::Deny
        }
        None => Effect::Permit,
    }
}

/// Pick the policy that governs a resource: the resource's own policy
/// overrides the root one.
pub fn select_policy<'a>(
    root: Option<&'a SecurityPolicy>,
    resource: Option<&'a SecurityPolicy>,
) -> Option<&'a SecurityPolicy> {
    resource.or(root)
}

/// Enforce whichever policy applies; no policy at all means permitted.
pub fn check(
    root: Option<&SecurityPolicy>,
    resource: Option<&SecurityPolicy>,
    request: &HttpRequest,
) -> Effect {
    match select_policy(root, resource) {
        Some(policy) => enforce(policy, request),
        None => Effect::Permit,
    }
}

fn is_satisfied(condition: &SecurityCondition, request: &HttpRequest) -> bool {
    let header_outcomes = outcomes(condition.effect, &condition.request_headers, |name| {
        request.header(name)
    });
    let query_outcomes = outcomes(condition.effect, &condition.query_params, |name| {
        request.query_param(name)
    });

    header_outcomes
        .chain(query_outcomes)
        .all(|outcome| outcome == Effect::Permit)
}

fn outcomes<'a, F>(
    effect: Effect,
    matchers: &'a HashMap<String, Matcher>,
    actual: F,
) -> impl Iterator<Item = Effect> + 'a
where
    F: Fn(&str) -> Option<&'a str> + 'a,
{
    matchers.iter().map(move |(name, matcher)| {
        // Absent values compare as the empty string
        let value = actual(name).unwrap_or("");
        if matcher.holds(value) {
            effect
        } else {
            effect.invert()
        }
    })
}
