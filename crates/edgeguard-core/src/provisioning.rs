//! Challenge script configuration.
//!
//! The script URL depends on the verification service instance, which is
//! only known once it has been provisioned. [`ConfigResolver`] looks the
//! integration endpoint up once and produces a [`ResolvedConfig`].
//! [`ConfigGate`] publishes that value to request handlers exactly once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// File name of the verification script under the integration URL.
pub const CHALLENGE_SCRIPT: &str = "challenge.js";

/// Errors raised while resolving or publishing the configuration.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The verification service exposes no integration endpoint.
    #[error("verification service '{handle}' has no integration endpoint: {reason}")]
    ConfigUnavailable {
        /// Handle that was looked up.
        handle: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// The gate already holds a configuration.
    #[error("configuration has already been published")]
    AlreadyPublished,

    /// Reading or writing a saved configuration failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A saved configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Identifies a verification service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationServiceHandle {
    /// Instance name.
    pub name: String,
    /// Instance ID.
    pub id: String,
}

impl VerificationServiceHandle {
    /// Creates a handle.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for VerificationServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

/// The resolved script configuration. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Absolute URL of the challenge script.
    pub script_base_url: String,
}

impl ResolvedConfig {
    /// Creates a config for a known script URL.
    pub fn new(script_base_url: impl Into<String>) -> Self {
        Self {
            script_base_url: script_base_url.into(),
        }
    }

    /// Builds the config from an integration URL.
    pub fn from_integration_url(integration_url: &str) -> Self {
        Self::new(format!("{integration_url}{CHALLENGE_SCRIPT}"))
    }

    /// Loads a config saved by [`ResolvedConfig::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Saves the config as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Source of verification service metadata.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Returns the integration URL of the instance, or `None` if it has none.
    async fn integration_url(&self, handle: &VerificationServiceHandle) -> Result<Option<String>>;
}

#[async_trait]
impl<T: VerificationService + ?Sized> VerificationService for Box<T> {
    async fn integration_url(&self, handle: &VerificationServiceHandle) -> Result<Option<String>> {
        (**self).integration_url(handle).await
    }
}

/// Verification service with a fixed integration URL.
#[derive(Debug, Clone, Default)]
pub struct StaticVerificationService {
    integration_url: Option<String>,
}

impl StaticVerificationService {
    /// Creates a service answering with `integration_url` for every handle.
    pub fn new(integration_url: impl Into<String>) -> Self {
        Self {
            integration_url: Some(integration_url.into()),
        }
    }

    /// Creates a service with no integration endpoint.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationService for StaticVerificationService {
    async fn integration_url(&self, _handle: &VerificationServiceHandle) -> Result<Option<String>> {
        Ok(self.integration_url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct InstanceDescription {
    #[serde(rename = "ApplicationIntegrationURL", default)]
    application_integration_url: Option<String>,
}

/// Verification service metadata API over HTTP.
///
/// Issues `GET {endpoint}/instances/{name}/{id}` and reads
/// `ApplicationIntegrationURL` from the JSON answer.
#[derive(Debug, Clone)]
pub struct HttpVerificationService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVerificationService {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a client for the metadata API at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProvisioningError::ConfigUnavailable {
                handle: endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn instance_url(&self, handle: &VerificationServiceHandle) -> String {
        format!("{}/instances/{}/{}", self.endpoint, handle.name, handle.id)
    }
}

#[async_trait]
impl VerificationService for HttpVerificationService {
    async fn integration_url(&self, handle: &VerificationServiceHandle) -> Result<Option<String>> {
        let unavailable = |reason: String| ProvisioningError::ConfigUnavailable {
            handle: handle.to_string(),
            reason,
        };

        let url = self.instance_url(handle);
        debug!(url = %url, "Looking up verification service");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("metadata API returned {}", response.status())));
        }

        let description: InstanceDescription = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(description.application_integration_url)
    }
}

/// Resolves the script configuration from a verification service.
pub struct ConfigResolver<S> {
    service: S,
}

impl<S: VerificationService> ConfigResolver<S> {
    /// Creates a resolver.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Resolves the configuration for a handle.
    ///
    /// Fails with [`ProvisioningError::ConfigUnavailable`] when the instance
    /// has no integration endpoint. Not retried.
    pub async fn resolve(&self, handle: &VerificationServiceHandle) -> Result<ResolvedConfig> {
        let integration_url = self
            .service
            .integration_url(handle)
            .await?
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ProvisioningError::ConfigUnavailable {
                handle: handle.to_string(),
                reason: "no ApplicationIntegrationURL".to_string(),
            })?;

        let config = ResolvedConfig::from_integration_url(&integration_url);
        info!(handle = %handle, script = %config.script_base_url, "Resolved challenge script");
        Ok(config)
    }
}

struct GateInner {
    config: OnceCell<ResolvedConfig>,
    ready: watch::Sender<bool>,
}

/// Write-once holder for the resolved configuration.
///
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct ConfigGate {
    inner: Arc<GateInner>,
}

impl Default for ConfigGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigGate")
            .field("config", &self.current())
            .finish()
    }
}

impl ConfigGate {
    /// Creates an empty gate.
    pub fn new() -> Self {
        Self::with_cell(OnceCell::new(), false)
    }

    /// Creates a gate that is already open.
    pub fn ready(config: ResolvedConfig) -> Self {
        Self::with_cell(OnceCell::with_value(config), true)
    }

    fn with_cell(config: OnceCell<ResolvedConfig>, ready: bool) -> Self {
        let (ready, _) = watch::channel(ready);
        Self {
            inner: Arc::new(GateInner { config, ready }),
        }
    }

    /// Publishes the configuration. Succeeds once.
    pub fn publish(&self, config: ResolvedConfig) -> Result<()> {
        self.inner
            .config
            .set(config)
            .map_err(|_| ProvisioningError::AlreadyPublished)?;
        self.inner.ready.send_replace(true);
        Ok(())
    }

    /// Returns the configuration if published. Never blocks.
    pub fn current(&self) -> Option<&ResolvedConfig> {
        self.inner.config.get()
    }

    /// Returns true once the configuration has been published.
    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Waits until the configuration is published.
    pub async fn wait_ready(&self) -> &ResolvedConfig {
        let mut ready = self.inner.ready.subscribe();
        loop {
            if let Some(config) = self.current() {
                return config;
            }
            // The sender lives as long as `self`, so this only returns on change.
            let _ = ready.changed().await;
        }
    }
}
