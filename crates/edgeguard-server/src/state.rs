//! Shared gateway state.

use std::sync::Arc;

use chrono::Duration;
use edgeguard_core::{ChallengeTokens, ConfigGate, RuleEngine};
use edgeguard_proxy::{BackendClient, ObjectStore, OriginRouter, StaticDelivery};

use crate::classifier::RequestClassifier;
use crate::verifier::{SolutionVerifier, UncheckedSolutionVerifier};
use crate::volumetric::VolumetricTracker;
use crate::GatewayConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Request classifier.
    pub classifier: Arc<RequestClassifier>,
    /// Path-based origin selection.
    pub router: OriginRouter,
    /// Backend API client.
    pub backend: BackendClient,
    /// Object store delivery through the transformer.
    pub delivery: StaticDelivery,
    /// Challenge solution verifier.
    pub verifier: Arc<dyn SolutionVerifier>,
    /// Whether the challenge cookie carries `Secure`.
    pub secure_cookies: bool,
    /// Maximum request body forwarded to the backend.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Creates state with default routing and an unchecked verifier.
    pub fn new(
        classifier: RequestClassifier,
        backend: BackendClient,
        delivery: StaticDelivery,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            router: OriginRouter::default(),
            backend,
            delivery,
            verifier: Arc::new(UncheckedSolutionVerifier),
            secure_cookies: false,
            max_body_bytes: crate::DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Assembles state from a gateway configuration.
    pub fn from_config(
        config: &GatewayConfig,
        engine: RuleEngine,
        tokens: ChallengeTokens,
        backend: BackendClient,
        store: Arc<dyn ObjectStore>,
        gate: ConfigGate,
    ) -> Self {
        let tokens = tokens.with_immunity(Duration::seconds(config.immunity_secs));
        let mut classifier = RequestClassifier::new(Arc::new(engine), tokens);
        if let Some((window, max_requests)) = config.volumetric {
            classifier = classifier.with_volumetric(VolumetricTracker::new(window, max_requests));
        }
        let delivery = StaticDelivery::new(store, gate).with_policy(config.not_ready_policy);

        Self::new(classifier, backend, delivery)
            .with_router(OriginRouter::new(config.api_prefix.as_str()))
            .with_secure_cookies(config.secure_cookies)
            .with_max_body_bytes(config.max_body_bytes)
    }

    /// Sets the solution verifier.
    pub fn with_verifier(mut self, verifier: impl SolutionVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    /// Sets the origin router.
    pub fn with_router(mut self, router: OriginRouter) -> Self {
        self.router = router;
        self
    }

    /// Sets whether the challenge cookie is `Secure`.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Sets the forwarded body limit.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}
