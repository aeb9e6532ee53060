//! Request classification.
//!
//! The classifier turns the rule engine's action into a gateway decision.
//! It is the only place where access is enforced: a `challenge` action is
//! satisfied by a valid challenge-state cookie, `block` never is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use edgeguard_core::{
    ChallengeTokens, Evaluation, InboundRequest, RuleAction, RuleEngine, CHALLENGE_COOKIE,
    LABEL_VOLUMETRIC_SESSION,
};

use crate::volumetric::VolumetricTracker;

/// What the gateway does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayDecision {
    /// Route to an origin.
    Forward,
    /// Answer with the challenge interstitial.
    IssueChallenge,
    /// Answer with the deny page.
    Reject,
}

/// Outcome of classifying one request.
#[derive(Debug, Clone)]
pub struct Classification {
    /// The decision.
    pub decision: GatewayDecision,
    /// The rule evaluation behind it.
    pub evaluation: Evaluation,
    /// Whether the request carried a valid challenge-state cookie.
    pub verified: bool,
}

/// Request classifier.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    engine: Arc<RuleEngine>,
    tokens: ChallengeTokens,
    volumetric: Option<VolumetricTracker>,
}

impl RequestClassifier {
    /// Creates a classifier without volumetric tracking.
    pub fn new(engine: Arc<RuleEngine>, tokens: ChallengeTokens) -> Self {
        Self {
            engine,
            tokens,
            volumetric: None,
        }
    }

    /// Enables volumetric session tracking.
    pub fn with_volumetric(mut self, tracker: VolumetricTracker) -> Self {
        self.volumetric = Some(tracker);
        self
    }

    /// Returns the token signer.
    pub fn tokens(&self) -> &ChallengeTokens {
        &self.tokens
    }

    /// Classifies a request from `client` at time `now`.
    pub fn classify(
        &self,
        mut request: InboundRequest,
        client: &str,
        now: DateTime<Utc>,
    ) -> Classification {
        let token = request.cookie(CHALLENGE_COOKIE).map(str::to_string);
        let verified = token
            .as_deref()
            .is_some_and(|token| self.tokens.is_valid(token, now));

        if let Some(tracker) = &self.volumetric {
            let session = match token.as_deref() {
                Some(token) if verified => format!("token:{token}"),
                _ => format!("client:{client}"),
            };
            if tracker.record(&session) {
                request.labels.insert(LABEL_VOLUMETRIC_SESSION.to_string());
            }
        }

        let evaluation = self.engine.evaluate(&request);
        let decision = match evaluation.action {
            RuleAction::Allow => GatewayDecision::Forward,
            RuleAction::Block => GatewayDecision::Reject,
            RuleAction::Challenge if verified => GatewayDecision::Forward,
            RuleAction::Challenge => GatewayDecision::IssueChallenge,
        };

        debug!(
            method = %request.method,
            path = %request.path,
            action = evaluation.action.name(),
            rule = evaluation.source.rule_name().unwrap_or("-"),
            verified,
            decision = ?decision,
            "Classified request"
        );

        Classification {
            decision,
            evaluation,
            verified,
        }
    }
}
