//! Security policy configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Outcome of a security policy or a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Effect {
    #[serde(alias = "permit", alias = "PERMIT")]
    Permit,
    #[serde(alias = "deny", alias = "DENY")]
    Deny,
}

impl Effect {
    pub fn invert(self) -> Self {
        match self {
            Effect::Permit => Effect::Deny,
            Effect::Deny => Effect::Permit,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => f.write_str("Permit"),
            Effect::Deny => f.write_str("Deny"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum MatchOperator {
    #[default]
    EqualTo,
    NotEqualTo,
}

/// Expected value for a header or query parameter.
///
/// Accepts either a bare string (`Authorization: s3cr3t`, shorthand for
/// `EqualTo`) or the long form `{ value, operator }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Matcher {
    Simple(String),
    Full {
        value: String,
        #[serde(default)]
        operator: MatchOperator,
    },
}

impl Matcher {
    pub fn equal_to(value: impl Into<String>) -> Self {
        Matcher::Full {
            value: value.into(),
            operator: MatchOperator::EqualTo,
        }
    }

    pub fn not_equal_to(value: impl Into<String>) -> Self {
        Matcher::Full {
            value: value.into(),
            operator: MatchOperator::NotEqualTo,
        }
    }

    pub fn expected_value(&self) -> &str {
        match self {
            Matcher::Simple(value) => value,
            Matcher::Full { value, .. } => value,
        }
    }

    pub fn operator(&self) -> MatchOperator {
        match self {
            Matcher::Simple(_) => MatchOperator::EqualTo,
            Matcher::Full { operator, .. } => *operator,
        }
    }

    /// Whether the matcher's criterion holds for `actual`.
    pub fn holds(&self, actual: &str) -> bool {
        match self.operator() {
            MatchOperator::EqualTo => actual == self.expected_value(),
            MatchOperator::NotEqualTo => actual != self.expected_value(),
        }
    }
}

/// One rule within a security policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCondition {
    pub effect: Effect,
    #[serde(default, alias = "headers", skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, Matcher>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, Matcher>,
}

/// Access policy for a configuration group or a single resource.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    #[serde(rename = "default", alias = "defaultEffect")]
    pub default_effect: Effect,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SecurityCondition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_with_shorthand_matchers() {
        let yaml = r#"
default: Deny
conditions:
  - effect: Permit
    requestHeaders:
      Authorization: s3cr3t
  - effect: Deny
    queryParams:
      apiKey:
        value: bad
        operator: NotEqualTo
"#;
        let policy: SecurityPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.default_effect, Effect::Deny);
        assert_eq!(policy.conditions.len(), 2);

        let auth = &policy.conditions[0].request_headers["Authorization"];
        assert_eq!(auth.expected_value(), "s3cr3t");
        assert_eq!(auth.operator(), MatchOperator::EqualTo);

        let key = &policy.conditions[1].query_params["apiKey"];
        assert_eq!(key.operator(), MatchOperator::NotEqualTo);
    }

    #[test]
    fn test_lowercase_effect_alias() {
        let policy: SecurityPolicy = serde_yaml::from_str("default: permit").unwrap();
        assert_eq!(policy.default_effect, Effect::Permit);
        assert!(policy.conditions.is_empty());
    }

    #[test]
    fn test_matcher_holds() {
        assert!(Matcher::equal_to("a").holds("a"));
        assert!(!Matcher::equal_to("a").holds("b"));
        assert!(Matcher::not_equal_to("a").holds("b"));
        assert!(!Matcher::not_equal_to("a").holds("a"));
        assert!(Matcher::Simple("x".into()).holds("x"));
    }

    #[test]
    fn test_effect_invert() {
        assert_eq!(Effect::Permit.invert(), Effect::Deny);
        assert_eq!(Effect::Deny.invert(), Effect::Permit);
    }
}
