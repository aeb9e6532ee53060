//! Command-line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use edgeguard_core::VerificationServiceHandle;
use edgeguard_proxy::NotReadyPolicy;
use edgeguard_server::GatewayConfig;

/// Edge bot-mitigation gateway.
#[derive(Parser, Debug)]
#[command(name = "edgeguard", version, about)]
pub struct Args {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "EDGEGUARD_LOG_LEVEL")]
    pub log_level: String,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true, env = "EDGEGUARD_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the challenge script URL once and save it
    Provision(ProvisionArgs),
    /// Run the gateway
    Serve(ServeArgs),
    /// Print the stock rule table as JSON
    DefaultRules,
}

/// Where the verification service integration URL comes from.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct VerificationArgs {
    /// Verification service metadata API endpoint
    #[arg(long, env = "EDGEGUARD_METADATA_ENDPOINT", requires_all = ["acl_name", "acl_id"])]
    pub metadata_endpoint: Option<String>,

    /// Verification service instance name
    #[arg(long, env = "EDGEGUARD_ACL_NAME")]
    pub acl_name: Option<String>,

    /// Verification service instance ID
    #[arg(long, env = "EDGEGUARD_ACL_ID")]
    pub acl_id: Option<String>,

    /// Known integration URL, skipping the metadata lookup
    #[arg(long, env = "EDGEGUARD_INTEGRATION_URL", conflicts_with = "metadata_endpoint")]
    pub integration_url: Option<String>,
}

impl VerificationArgs {
    /// Returns the instance handle.
    pub fn handle(&self) -> VerificationServiceHandle {
        VerificationServiceHandle::new(
            self.acl_name.clone().unwrap_or_default(),
            self.acl_id.clone().unwrap_or_default(),
        )
    }

    /// Returns true if any lookup source is configured.
    pub fn is_configured(&self) -> bool {
        self.metadata_endpoint.is_some() || self.integration_url.is_some()
    }
}

/// Arguments for `provision`.
#[derive(ClapArgs, Debug)]
pub struct ProvisionArgs {
    #[command(flatten)]
    pub verification: VerificationArgs,

    /// File the resolved configuration is written to
    #[arg(long, short, default_value = "resolved-config.json")]
    pub output: PathBuf,
}

/// Arguments for `serve`.
#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = edgeguard_server::DEFAULT_HOST, env = "EDGEGUARD_HOST")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value_t = edgeguard_server::DEFAULT_PORT, env = "EDGEGUARD_PORT")]
    pub port: u16,

    /// Backend API base URL
    #[arg(long, env = "EDGEGUARD_BACKEND_URL")]
    pub backend_url: String,

    /// Directory served as the object store
    #[arg(long, default_value = "site", env = "EDGEGUARD_SITE_ROOT")]
    pub site_root: PathBuf,

    /// Path prefix routed to the backend
    #[arg(long, default_value = edgeguard_proxy::API_PREFIX, env = "EDGEGUARD_API_PREFIX")]
    pub api_prefix: String,

    /// Rule table JSON file (stock rules when omitted)
    #[arg(long, env = "EDGEGUARD_RULES")]
    pub rules: Option<PathBuf>,

    /// Configuration saved by `provision`
    #[arg(long, env = "EDGEGUARD_RESOLVED_CONFIG")]
    pub resolved_config: Option<PathBuf>,

    #[command(flatten)]
    pub verification: VerificationArgs,

    /// Endpoint that checks challenge solution tokens
    #[arg(long, env = "EDGEGUARD_VERIFIER_URL")]
    pub verifier_url: Option<String>,

    /// Secret for signing challenge cookies (random per process when omitted)
    #[arg(long, env = "EDGEGUARD_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Seconds a solved challenge stays valid
    #[arg(long, default_value_t = edgeguard_core::challenge_token::DEFAULT_IMMUNITY_SECS, env = "EDGEGUARD_IMMUNITY_SECS")]
    pub immunity_secs: i64,

    /// Mark the challenge cookie Secure
    #[arg(long, env = "EDGEGUARD_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// HTML handling before the script URL is resolved (serve-unscripted, strict)
    #[arg(long, default_value_t = NotReadyPolicy::default(), env = "EDGEGUARD_NOT_READY_POLICY")]
    pub not_ready_policy: NotReadyPolicy,

    /// Volumetric tracking window in seconds
    #[arg(long, default_value_t = 60, env = "EDGEGUARD_VOLUMETRIC_WINDOW_SECS")]
    pub volumetric_window_secs: u64,

    /// Requests per window before a session is flagged
    #[arg(long, default_value_t = edgeguard_server::volumetric::DEFAULT_MAX_REQUESTS, env = "EDGEGUARD_VOLUMETRIC_MAX_REQUESTS")]
    pub volumetric_max_requests: usize,

    /// Disable volumetric tracking
    #[arg(long)]
    pub no_volumetric: bool,

    /// Largest request body forwarded to the backend, in bytes
    #[arg(long, default_value_t = edgeguard_server::DEFAULT_MAX_BODY_BYTES, env = "EDGEGUARD_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,
}

impl ServeArgs {
    /// Builds the gateway configuration.
    pub fn gateway_config(&self) -> GatewayConfig {
        let config = GatewayConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_api_prefix(self.api_prefix.clone())
            .with_immunity_secs(self.immunity_secs)
            .with_secure_cookies(self.secure_cookies)
            .with_max_body_bytes(self.max_body_bytes)
            .with_not_ready_policy(self.not_ready_policy);

        if self.no_volumetric {
            config.without_volumetric()
        } else {
            config.with_volumetric(
                Duration::from_secs(self.volumetric_window_secs),
                self.volumetric_max_requests,
            )
        }
    }
}
