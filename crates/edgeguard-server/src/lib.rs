//! EdgeGuard Server - HTTP gateway front.
//!
//! Every request is classified before it reaches an origin.
//!
//! ## Endpoints
//!
//! - `GET /healthz` - Liveness and challenge-script readiness
//! - `POST /challenge/verify` - Exchange a solution token for the challenge cookie
//! - everything else - Classified, then routed to the backend API (`/api`,
//!   `/api/*`) or served from the object store with the challenge script injected
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use edgeguard_core::{ChallengeTokens, ConfigGate, RuleEngine};
//! use edgeguard_proxy::{BackendClient, FsObjectStore};
//! use edgeguard_server::{AppState, GatewayConfig, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatewayConfig::default();
//!     let state = AppState::from_config(
//!         &config,
//!         RuleEngine::with_defaults(),
//!         ChallengeTokens::random().unwrap(),
//!         BackendClient::new("http://127.0.0.1:3000").unwrap(),
//!         Arc::new(FsObjectStore::new("site")),
//!         ConfigGate::new(),
//!     );
//!     Server::with_state(config, state).unwrap().run().await.unwrap();
//! }
//! ```

pub mod classifier;
pub mod error;
mod handlers;
pub mod pages;
pub mod state;
pub mod verifier;
pub mod volumetric;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use edgeguard_proxy::{NotReadyPolicy, API_PREFIX};

pub use classifier::{Classification, GatewayDecision, RequestClassifier};
pub use error::{GatewayError, Result};
pub use handlers::HealthResponse;
pub use state::AppState;
pub use verifier::{HttpSolutionVerifier, SolutionVerifier, UncheckedSolutionVerifier};
pub use volumetric::VolumetricTracker;

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default gateway host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default limit for request bodies forwarded to the backend.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Path prefix routed to the backend.
    pub api_prefix: String,
    /// Challenge cookie lifetime in seconds.
    pub immunity_secs: i64,
    /// Mark the challenge cookie `Secure`.
    pub secure_cookies: bool,
    /// Forwarded body limit.
    pub max_body_bytes: usize,
    /// Volumetric tracking window and allowance, if enabled.
    pub volumetric: Option<(Duration, usize)>,
    /// Handling of HTML requested before the script URL is resolved.
    pub not_ready_policy: NotReadyPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_prefix: API_PREFIX.to_string(),
            immunity_secs: edgeguard_core::challenge_token::DEFAULT_IMMUNITY_SECS,
            secure_cookies: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            volumetric: Some((volumetric::DEFAULT_WINDOW, volumetric::DEFAULT_MAX_REQUESTS)),
            not_ready_policy: NotReadyPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the backend path prefix.
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    /// Sets the challenge cookie lifetime.
    pub fn with_immunity_secs(mut self, secs: i64) -> Self {
        self.immunity_secs = secs;
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

    /// Enables volumetric tracking.
    pub fn with_volumetric(mut self, window: Duration, max_requests: usize) -> Self {
        self.volumetric = Some((window, max_requests));
        self
    }

    /// Disables volumetric tracking.
    pub fn without_volumetric(mut self) -> Self {
        self.volumetric = None;
        self
    }

    /// Sets the not-ready policy.
    pub fn with_not_ready_policy(mut self, policy: NotReadyPolicy) -> Self {
        self.not_ready_policy = policy;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(pages::VERIFY_PATH, post(handlers::verify_challenge))
        .fallback(handlers::gateway)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The gateway server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server with the given configuration and state.
    pub fn with_state(
        config: GatewayConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Runs the server until Ctrl-C.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        info!("Starting EdgeGuard gateway on {}", self.addr);

        let domain = if self.addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Allow rebinding while old connections linger in TIME_WAIT
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until the process is killed.
        std::future::pending::<()>().await;
    }
}
