//! Static content delivery.
//!
//! Resolves a path to an object, fetches it, and runs it through the
//! content transformer using whatever the readiness gate currently holds.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use edgeguard_core::{transform, ConfigGate, ObjectResponse, TransformError};

use crate::error::{ProxyError, Result};
use crate::object_store::ObjectStore;
use crate::router::object_key;

/// What to do with HTML requested before the script URL is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotReadyPolicy {
    /// Serve the page without the script and log a warning.
    #[default]
    ServeUnscripted,
    /// Answer 503.
    Strict,
}

impl NotReadyPolicy {
    /// Returns the policy's configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            NotReadyPolicy::ServeUnscripted => "serve-unscripted",
            NotReadyPolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for NotReadyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NotReadyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "serve-unscripted" => Ok(NotReadyPolicy::ServeUnscripted),
            "strict" => Ok(NotReadyPolicy::Strict),
            other => Err(format!(
                "unknown policy '{other}' (expected 'serve-unscripted' or 'strict')"
            )),
        }
    }
}

/// Serves object-store content through the transformer.
#[derive(Clone)]
pub struct StaticDelivery {
    store: Arc<dyn ObjectStore>,
    gate: ConfigGate,
    policy: NotReadyPolicy,
}

impl fmt::Debug for StaticDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticDelivery")
            .field("gate", &self.gate)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StaticDelivery {
    /// Creates a delivery pipeline with the default policy.
    pub fn new(store: Arc<dyn ObjectStore>, gate: ConfigGate) -> Self {
        Self {
            store,
            gate,
            policy: NotReadyPolicy::default(),
        }
    }

    /// Sets the not-ready policy.
    pub fn with_policy(mut self, policy: NotReadyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the readiness gate.
    pub fn gate(&self) -> &ConfigGate {
        &self.gate
    }

    /// Returns the not-ready policy.
    pub fn policy(&self) -> NotReadyPolicy {
        self.policy
    }

    /// Fetches and transforms the object for a request path.
    pub async fn serve(&self, path: &str) -> Result<ObjectResponse> {
        let key = object_key(path).ok_or_else(|| ProxyError::NotFound(path.to_string()))?;
        let object = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| ProxyError::NotFound(key.clone()))?;
        debug!(key = %key, content_type = %object.content_type, "Serving object");

        let response = object.into_response();
        match transform(response.clone(), self.gate.current()) {
            Ok(transformed) => Ok(transformed),
            Err(TransformError::ConfigNotReady) => match self.policy {
                NotReadyPolicy::ServeUnscripted => {
                    warn!(key = %key, "Challenge script not resolved yet, serving page without it");
                    Ok(response)
                }
                NotReadyPolicy::Strict => Err(ProxyError::ConfigNotReady),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MemoryObjectStore, StoredObject};
    use edgeguard_core::ResolvedConfig;

    const SCRIPT: &str = "https://verify.example.com/a/challenge.js";
    const INDEX: &str = "<html><head></head><body>tasks</body></html>";

    fn store() -> Arc<dyn ObjectStore> {
        let store = MemoryObjectStore::new()
            .with_object("index.html", INDEX)
            .with_object("app.js", "console.log(1)");
        store.insert(
            "styled.html",
            StoredObject {
                body: "<head></head>".into(),
                content_type: "text/html; charset=utf-8".to_string(),
                etag: Some("\"e1\"".to_string()),
            },
        );
        Arc::new(store)
    }

    fn ready_gate() -> ConfigGate {
        ConfigGate::ready(ResolvedConfig::new(SCRIPT))
    }

    #[tokio::test]
    async fn root_serves_scripted_index() {
        let delivery = StaticDelivery::new(store(), ready_gate());
        let response = delivery.serve("/").await.unwrap();
        let body = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(body.contains(&format!("<script src=\"{SCRIPT}\" type=\"text/javascript\" defer></script></head>")));
        assert_eq!(response.content_length, body.len());
    }

    #[tokio::test]
    async fn non_html_passes_through() {
        let delivery = StaticDelivery::new(store(), ConfigGate::new());
        let response = delivery.serve("/app.js").await.unwrap();
        assert_eq!(response.body, "console.log(1)".as_bytes());
        assert_eq!(response.content_type, "text/javascript");
    }

    #[tokio::test]
    async fn etag_dropped_after_injection() {
        let delivery = StaticDelivery::new(store(), ready_gate());
        let response = delivery.serve("/styled.html").await.unwrap();
        assert!(response.etag.is_none());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let delivery = StaticDelivery::new(store(), ready_gate());
        assert!(matches!(
            delivery.serve("/missing.html").await,
            Err(ProxyError::NotFound(_))
        ));
        assert!(matches!(
            delivery.serve("/../index.html").await,
            Err(ProxyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn not_ready_serve_unscripted() {
        let delivery = StaticDelivery::new(store(), ConfigGate::new());
        let response = delivery.serve("/").await.unwrap();
        assert_eq!(response.body, INDEX.as_bytes());
    }

    #[tokio::test]
    async fn not_ready_strict() {
        let delivery =
            StaticDelivery::new(store(), ConfigGate::new()).with_policy(NotReadyPolicy::Strict);
        assert!(matches!(
            delivery.serve("/").await,
            Err(ProxyError::ConfigNotReady)
        ));
    }

    #[tokio::test]
    async fn publication_is_observed() {
        let gate = ConfigGate::new();
        let delivery =
            StaticDelivery::new(store(), gate.clone()).with_policy(NotReadyPolicy::Strict);
        assert!(delivery.serve("/").await.is_err());

        gate.publish(ResolvedConfig::new(SCRIPT)).unwrap();
        assert!(delivery.serve("/").await.is_ok());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("strict".parse::<NotReadyPolicy>(), Ok(NotReadyPolicy::Strict));
        assert_eq!(
            "serve-unscripted".parse::<NotReadyPolicy>(),
            Ok(NotReadyPolicy::ServeUnscripted)
        );
        assert!("lenient".parse::<NotReadyPolicy>().is_err());
        assert_eq!(NotReadyPolicy::default().to_string(), "serve-unscripted");
    }
}
