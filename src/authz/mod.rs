//! Authorization decisions over the cached policy set.
//!
//! Each call is a pure function of the current snapshot and the request;
//! nothing here performs network I/O. Every decision is handed to the
//! audit recorder without waiting on it.

pub mod evaluator;

pub use evaluator::{compile_pattern, Evaluation, PatternEvaluator, PolicyEvaluator, Verdict};

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::audit::{AuditRecord, AuditRecorder};
use crate::cache::PolicyGetter;
use crate::types::{AccessPolicy, AccessRequest, Decision, Effect, USERNAME_CONTEXT_KEY};

/// Evaluates access requests against policies from a [`PolicyGetter`].
pub struct Authorizer {
    policies: Arc<dyn PolicyGetter>,
    evaluator: Arc<dyn PolicyEvaluator>,
    audit: Option<AuditRecorder>,
}

impl Authorizer {
    pub fn new(policies: Arc<dyn PolicyGetter>) -> Self {
        Self {
            policies,
            evaluator: Arc::new(PatternEvaluator::new()),
            audit: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_audit(mut self, recorder: AuditRecorder) -> Self {
        self.audit = Some(recorder);
        self
    }

    /// Decides `request`.
    ///
    /// Candidates are the policies stored for the request's username
    /// (the `username` context entry, defaulting to the subject). A
    /// missing candidate set is not an error; it denies by default.
    pub fn authorize(&self, request: &AccessRequest) -> Decision {
        let mut request = request.clone();
        if !request.context.contains_key(USERNAME_CONTEXT_KEY) {
            request
                .context
                .insert(USERNAME_CONTEXT_KEY.to_string(), Value::String(request.subject.clone()));
        }
        debug!(
            "Authorize request: subject={}, resource={}, action={}",
            request.subject, request.resource, request.action
        );

        let candidates = match self.policies.get_policies(request.username()) {
            Ok(policies) => policies,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!("Failed to list policies for {}: {}", request.username(), e);
                let conclusion = format!("list policies failed: {}", e);
                self.record_audit(&request, Effect::Deny, &conclusion, &[], &[]);
                return Decision {
                    denied: true,
                    reason: Some(conclusion),
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let evaluation = self.evaluator.evaluate(&candidates, &request);
        let conclusion = evaluation.conclusion();
        let effect = if evaluation.is_allowed() {
            Effect::Allow
        } else {
            Effect::Deny
        };

        match effect {
            Effect::Allow => debug!("Subject access review granted: {}", conclusion),
            Effect::Deny => debug!("Subject access review rejected: {}", conclusion),
        }

        self.record_audit(&request, effect, &conclusion, &candidates, &evaluation.deciders);

        match effect {
            Effect::Allow => Decision::allow(),
            Effect::Deny => Decision::deny(conclusion),
        }
    }

    fn record_audit(
        &self,
        request: &AccessRequest,
        effect: Effect,
        conclusion: &str,
        candidates: &[AccessPolicy],
        deciders: &[&AccessPolicy],
    ) {
        if let Some(audit) = &self.audit {
            audit.record(AuditRecord::new(
                request,
                effect,
                conclusion.to_string(),
                candidates,
                deciders,
            ));
        }
    }
}
