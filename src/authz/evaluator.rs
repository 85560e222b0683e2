//! Policy evaluation.
//!
//! [`PolicyEvaluator`] is the seam between the authorizer and the matching
//! engine. [`PatternEvaluator`] implements ladon-style matching: a pattern
//! is literal text with optional `<regex>` segments, e.g.
//! `resources:articles:<[0-9]+>`.

use log::warn;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;

use crate::types::{AccessPolicy, AccessRequest, Condition};

const START_DELIMITER: char = '<';
const END_DELIMITER: char = '>';

// ================================================================================================
// EVALUATION RESULT
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// A matching deny policy overrode any allows
    ForcefullyDenied,
    /// Nothing matched
    DeniedByDefault,
}

/// Outcome of evaluating a candidate set, with the policies that decided it.
#[derive(Clone, Debug)]
pub struct Evaluation<'a> {
    pub verdict: Verdict,
    /// Matching allow policies in candidate order, followed by the deny
    /// policy that ended evaluation, if any
    pub deciders: Vec<&'a AccessPolicy>,
}

impl Evaluation<'_> {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allowed
    }

    /// Human-readable explanation naming the deciding policies.
    pub fn conclusion(&self) -> String {
        match self.verdict {
            Verdict::Allowed => format!("policies {} allow access", join_ids(&self.deciders)),
            Verdict::ForcefullyDenied => match self.deciders.split_last() {
                Some((denied, allowed)) if !allowed.is_empty() => format!(
                    "policies {} allow access, but policy {} forcefully denied it",
                    join_ids(allowed),
                    denied.id
                ),
                Some((denied, _)) => format!("policy {} forcefully denied the access", denied.id),
                None => "no policy allowed access".to_string(),
            },
            Verdict::DeniedByDefault => "no policy allowed access".to_string(),
        }
    }
}

fn join_ids(policies: &[&AccessPolicy]) -> String {
    policies
        .iter()
        .map(|p| p.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ================================================================================================
// EVALUATOR TRAIT
// ================================================================================================

pub trait PolicyEvaluator: Send + Sync {
    /// Whether `policy` applies to `request` at all, ignoring its effect.
    fn matches(&self, policy: &AccessPolicy, request: &AccessRequest) -> bool;

    /// Partitions candidates by effect. The first matching deny ends
    /// evaluation; otherwise any matching allow grants access.
    fn evaluate<'a>(&self, candidates: &'a [AccessPolicy], request: &AccessRequest) -> Evaluation<'a> {
        let mut deciders = Vec::new();

        for policy in candidates {
            if !self.matches(policy, request) {
                continue;
            }
            deciders.push(policy);
            if !policy.allows() {
                return Evaluation {
                    verdict: Verdict::ForcefullyDenied,
                    deciders,
                };
            }
        }

        let verdict = if deciders.is_empty() {
            Verdict::DeniedByDefault
        } else {
            Verdict::Allowed
        };
        Evaluation { verdict, deciders }
    }
}

// ================================================================================================
// PATTERN EVALUATOR
// ================================================================================================

/// Ladon-style matcher with compiled-regex caches.
#[derive(Debug, Default)]
pub struct PatternEvaluator {
    /// Anchored regexes for `<...>` patterns; `None` marks an invalid pattern
    patterns: RwLock<HashMap<String, Option<Regex>>>,
    /// Unanchored regexes for `StringMatch` conditions
    conditions: RwLock<HashMap<String, Option<Regex>>>,
}

impl PatternEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any pattern in `haystack` matches `needle`.
    pub fn matches_any(&self, haystack: &[String], needle: &str) -> bool {
        haystack.iter().any(|pattern| self.matches_pattern(pattern, needle))
    }

    fn matches_pattern(&self, pattern: &str, needle: &str) -> bool {
        if !pattern.contains(START_DELIMITER) {
            return pattern.eq_ignore_ascii_case(needle);
        }
        cached_is_match(&self.patterns, pattern, needle, compile_pattern)
    }

    fn condition_holds(&self, key: &str, condition: &Condition, request: &AccessRequest) -> bool {
        let Some(value) = request.context.get(key) else {
            return false;
        };
        match condition {
            Condition::StringEqual { equals } => value.as_str() == Some(equals.as_str()),
            Condition::StringMatch { matches } => match value.as_str() {
                Some(s) => cached_is_match(&self.conditions, matches, s, |raw| {
                    Regex::new(raw).map_err(|e| e.to_string())
                }),
                None => false,
            },
            Condition::EqualsSubject => value.as_str() == Some(request.subject.as_str()),
            Condition::Boolean { value: expected } => value.as_bool() == Some(*expected),
        }
    }

    /// Number of compiled patterns held in the caches.
    pub fn cached_patterns(&self) -> usize {
        self.patterns.read().len() + self.conditions.read().len()
    }
}

impl PolicyEvaluator for PatternEvaluator {
    fn matches(&self, policy: &AccessPolicy, request: &AccessRequest) -> bool {
        self.matches_any(&policy.actions, &request.action)
            && self.matches_any(&policy.subjects, &request.subject)
            && self.matches_any(&policy.resources, &request.resource)
            && policy
                .conditions
                .iter()
                .all(|(key, condition)| self.condition_holds(key, condition, request))
    }
}

fn cached_is_match<F>(
    cache: &RwLock<HashMap<String, Option<Regex>>>,
    pattern: &str,
    needle: &str,
    compile: F,
) -> bool
where
    F: FnOnce(&str) -> Result<Regex, String>,
{
    if let Some(entry) = cache.read().get(pattern) {
        return entry.as_ref().is_some_and(|re| re.is_match(needle));
    }

    let compiled = match compile(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Invalid policy pattern {:?}: {}", pattern, e);
            None
        }
    };
    let matched = compiled.as_ref().is_some_and(|re| re.is_match(needle));
    cache.write().insert(pattern.to_string(), compiled);
    matched
}

/// Compiles a delimited pattern into one anchored regex. Literal text is
/// escaped; each `<...>` segment is inserted as a group.
pub fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');

    let mut literal = String::new();
    let mut segment = String::new();
    let mut depth = 0usize;

    for c in pattern.chars() {
        match c {
            START_DELIMITER => {
                if depth == 0 {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                } else {
                    segment.push(c);
                }
                depth += 1;
            }
            END_DELIMITER if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    expr.push_str("(?:");
                    expr.push_str(&segment);
                    expr.push(')');
                    segment.clear();
                } else {
                    segment.push(c);
                }
            }
            _ if depth > 0 => segment.push(c),
            _ => literal.push(c),
        }
    }

    if depth != 0 {
        return Err(format!("unbalanced {:?} in pattern", START_DELIMITER));
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');

    Regex::new(&expr).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Effect;
    use serde_json::json;

    fn request(subject: &str, resource: &str, action: &str) -> AccessRequest {
        AccessRequest::new(subject, resource, action)
    }

    #[test]
    fn test_compile_pattern_anchors_and_escapes() {
        let re = compile_pattern("resources:articles:<[0-9]+>").unwrap();
        assert!(re.is_match("resources:articles:42"));
        assert!(!re.is_match("resources:articles:abc"));
        assert!(!re.is_match("xresources:articles:42"));

        let dotted = compile_pattern("a.b:<.*>").unwrap();
        assert!(dotted.is_match("a.b:anything"));
        assert!(!dotted.is_match("aXb:anything"));
    }

    #[test]
    fn test_compile_pattern_alternation_stays_grouped() {
        let re = compile_pattern("users:<peter|ken>").unwrap();
        assert!(re.is_match("users:peter"));
        assert!(re.is_match("users:ken"));
        assert!(!re.is_match("ken"));
    }

    #[test]
    fn test_compile_pattern_rejects_unbalanced() {
        assert!(compile_pattern("doc<[0-9]+").is_err());
    }

    #[test]
    fn test_literal_match_is_case_insensitive() {
        let evaluator = PatternEvaluator::new();
        assert!(evaluator.matches_any(&["Read".to_string()], "read"));
        assert!(!evaluator.matches_any(&["read".to_string()], "write"));
        assert!(!evaluator.matches_any(&[], "read"));
    }

    #[test]
    fn test_invalid_pattern_never_matches_and_is_cached() {
        let evaluator = PatternEvaluator::new();
        let patterns = vec!["<(unclosed>".to_string()];
        assert!(!evaluator.matches_any(&patterns, "anything"));
        assert!(!evaluator.matches_any(&patterns, "anything"));
        assert_eq!(evaluator.cached_patterns(), 1);
    }

    #[test]
    fn test_deny_overrides_allow_in_any_order() {
        let evaluator = PatternEvaluator::new();
        let allow = AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc1"], &["read"]);
        let deny = AccessPolicy::new("P2", Effect::Deny, &["alice"], &["doc1"], &["read"]);
        let req = request("alice", "doc1", "read");

        let forward = [allow.clone(), deny.clone()];
        let evaluation = evaluator.evaluate(&forward, &req);
        assert_eq!(evaluation.verdict, Verdict::ForcefullyDenied);
        assert_eq!(
            evaluation.conclusion(),
            "policies P1 allow access, but policy P2 forcefully denied it"
        );

        let reverse = [deny, allow];
        let evaluation = evaluator.evaluate(&reverse, &req);
        assert_eq!(evaluation.verdict, Verdict::ForcefullyDenied);
        assert_eq!(evaluation.conclusion(), "policy P2 forcefully denied the access");
    }

    #[test]
    fn test_default_deny_and_allow_conclusions() {
        let evaluator = PatternEvaluator::new();
        let policies = [
            AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc<.*>"], &["read"]),
            AccessPolicy::new("P3", Effect::Allow, &["<.*>"], &["doc1"], &["<read|list>"]),
        ];

        let allowed = evaluator.evaluate(&policies, &request("alice", "doc1", "read"));
        assert!(allowed.is_allowed());
        assert_eq!(allowed.conclusion(), "policies P1, P3 allow access");

        let denied = evaluator.evaluate(&policies, &request("alice", "doc1", "delete"));
        assert_eq!(denied.verdict, Verdict::DeniedByDefault);
        assert_eq!(denied.conclusion(), "no policy allowed access");
    }

    #[test]
    fn test_conditions() {
        let evaluator = PatternEvaluator::new();
        let policy = AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc1"], &["read"])
            .with_condition("owner", Condition::EqualsSubject)
            .with_condition(
                "team",
                Condition::StringEqual {
                    equals: "core".into(),
                },
            )
            .with_condition(
                "ip",
                Condition::StringMatch {
                    matches: "^10\\.".into(),
                },
            )
            .with_condition("mfa", Condition::Boolean { value: true });

        let base = request("alice", "doc1", "read")
            .with_context("owner", json!("alice"))
            .with_context("team", json!("core"))
            .with_context("ip", json!("10.0.0.7"))
            .with_context("mfa", json!(true));
        assert!(evaluator.matches(&policy, &base));

        let wrong_owner = base.clone().with_context("owner", json!("bob"));
        assert!(!evaluator.matches(&policy, &wrong_owner));

        let wrong_ip = base.clone().with_context("ip", json!("192.168.0.1"));
        assert!(!evaluator.matches(&policy, &wrong_ip));

        let no_mfa = base.clone().with_context("mfa", json!(false));
        assert!(!evaluator.matches(&policy, &no_mfa));

        let mut missing = base;
        missing.context.remove("team");
        assert!(!evaluator.matches(&policy, &missing));
    }
}
