//! EdgeGuard - edge bot-mitigation gateway.
//!
//! This crate wires the gateway together for the `edgeguard` binary:
//!
//! - `provision`: resolve the challenge script URL once and save it
//! - `serve`: publish the script URL, then run the gateway
//! - `default-rules`: print the stock rule table

pub mod cli;
pub mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use edgeguard_core::{
    ChallengeTokens, ConfigGate, ConfigResolver, HttpVerificationService, ResolvedConfig,
    RuleEngine, RuleTable, StaticVerificationService, VerificationService,
};
use edgeguard_proxy::{BackendClient, FsObjectStore};
use edgeguard_server::{AppState, HttpSolutionVerifier, Server};

use crate::cli::{ProvisionArgs, ServeArgs, VerificationArgs};

/// Loads and validates the rule table.
///
/// Without a path the stock table is used, with bot control scoped to `api_prefix`.
pub fn load_rule_engine(path: Option<&Path>, api_prefix: &str) -> anyhow::Result<RuleEngine> {
    let table = match path {
        Some(path) => RuleTable::load(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?,
        None => RuleTable::default_web_acl_for(api_prefix),
    };
    let engine = RuleEngine::new(table)?;
    info!(rules = engine.rules().len(), "Rule table loaded");
    Ok(engine)
}

fn verification_service(args: &VerificationArgs) -> anyhow::Result<Box<dyn VerificationService>> {
    if let Some(url) = &args.integration_url {
        return Ok(Box::new(StaticVerificationService::new(url.clone())));
    }
    if let Some(endpoint) = &args.metadata_endpoint {
        return Ok(Box::new(HttpVerificationService::new(endpoint.clone())?));
    }
    anyhow::bail!("no verification service configured (use --integration-url or --metadata-endpoint)")
}

/// Resolves the script configuration from the verification service.
pub async fn resolve(args: &VerificationArgs) -> anyhow::Result<ResolvedConfig> {
    let resolver = ConfigResolver::new(verification_service(args)?);
    Ok(resolver.resolve(&args.handle()).await?)
}

/// `provision`: resolve once and save the result.
pub async fn run_provision(args: &ProvisionArgs) -> anyhow::Result<ResolvedConfig> {
    let config = resolve(&args.verification).await?;
    config
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(output = %args.output.display(), script = %config.script_base_url, "Provisioned");
    Ok(config)
}

/// Fills the gate from a saved config or a lookup.
///
/// Returns without publishing when neither source is configured.
pub async fn publish_script_config(
    gate: &ConfigGate,
    saved: Option<&Path>,
    verification: &VerificationArgs,
) -> anyhow::Result<()> {
    let config = if let Some(path) = saved {
        ResolvedConfig::load(path)
            .with_context(|| format!("failed to read resolved config {}", path.display()))?
    } else if verification.is_configured() {
        resolve(verification).await?
    } else {
        warn!("No challenge script source configured, pages are served without the script");
        return Ok(());
    };

    gate.publish(config)?;
    info!("Challenge script configuration published");
    Ok(())
}

/// `serve`: publish the script configuration, then run the gateway until shutdown.
///
/// Provisioning errors end the process before the listener is bound.
pub async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let engine = load_rule_engine(args.rules.as_deref(), &args.api_prefix)?;

    let gate = ConfigGate::new();
    publish_script_config(&gate, args.resolved_config.as_deref(), &args.verification)
        .await
        .context("challenge script provisioning failed")?;

    let tokens = match &args.token_secret {
        Some(secret) => ChallengeTokens::new(secret.as_bytes())?,
        None => {
            warn!("No token secret configured, challenge cookies will not survive a restart");
            ChallengeTokens::random()?
        }
    };

    let backend = BackendClient::new(args.backend_url.clone())?;
    let store = Arc::new(FsObjectStore::new(args.site_root.clone()));
    let config = args.gateway_config();

    let mut state = AppState::from_config(&config, engine, tokens, backend, store, gate);
    match &args.verifier_url {
        Some(url) => state = state.with_verifier(HttpSolutionVerifier::new(url.clone())?),
        None => warn!("No verifier URL configured, any non-empty solution token is accepted"),
    }

    let server = Server::with_state(config, state)?;
    info!(
        addr = %server.addr(),
        backend = %args.backend_url,
        site_root = %args.site_root.display(),
        "Gateway configured"
    );

    server.run().await?;
    Ok(())
}

/// `default-rules`: prints the stock rule table.
pub fn print_default_rules() -> anyhow::Result<()> {
    println!("{}", RuleTable::default_web_acl().to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use edgeguard_core::ProvisioningError;

    use crate::cli::{Args, Command};

    fn serve_args(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["edgeguard", "serve", "--backend-url", "http://127.0.0.1:9"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Serve(serve) => serve,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    fn static_source(url: &str) -> VerificationArgs {
        VerificationArgs {
            integration_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn stock_rules_without_path() {
        let engine = load_rule_engine(None, "/api").unwrap();
        assert_eq!(engine.rules().len(), 2);
    }

    #[test]
    fn stock_rules_follow_api_prefix() {
        let engine = load_rule_engine(None, "/v1").unwrap();
        let request = edgeguard_core::InboundRequest::new("POST", "/v1/tasks")
            .with_header("User-Agent", "python-requests/2.31 selenium");
        assert!(engine.evaluate(&request).should_challenge());
    }

    #[test]
    fn malformed_rule_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules":[
                {"name":"a","priority":1,"statement":{"and":[]},"action":{"type":"block"}}
            ]}"#,
        )
        .unwrap();

        let err = load_rule_engine(Some(&path), "/api").unwrap_err();
        assert!(err.to_string().contains("malformed rule 'a'"));
    }

    #[tokio::test]
    async fn provision_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = ProvisionArgs {
            verification: static_source("https://sdk.example/abc/"),
            output: dir.path().join("resolved.json"),
        };

        let config = run_provision(&args).await.unwrap();
        assert_eq!(config.script_base_url, "https://sdk.example/abc/challenge.js");
        assert_eq!(ResolvedConfig::load(&args.output).unwrap(), config);
    }

    #[tokio::test]
    async fn provision_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = ProvisionArgs {
            verification: VerificationArgs::default(),
            output: dir.path().join("resolved.json"),
        };
        assert!(run_provision(&args).await.is_err());
        assert!(!args.output.exists());
    }

    #[tokio::test]
    async fn publish_from_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolved.json");
        ResolvedConfig::new("https://sdk.example/abc/challenge.js")
            .save(&path)
            .unwrap();

        let gate = ConfigGate::new();
        publish_script_config(&gate, Some(&path), &VerificationArgs::default())
            .await
            .unwrap();
        assert_eq!(
            gate.current().unwrap().script_base_url,
            "https://sdk.example/abc/challenge.js"
        );
    }

    #[tokio::test]
    async fn publish_from_lookup() {
        let gate = ConfigGate::new();
        publish_script_config(&gate, None, &static_source("https://sdk.example/x/"))
            .await
            .unwrap();
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn publish_without_source_leaves_gate_closed() {
        let gate = ConfigGate::new();
        publish_script_config(&gate, None, &VerificationArgs::default())
            .await
            .unwrap();
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn unavailable_endpoint_is_fatal() {
        let gate = ConfigGate::new();
        let err = publish_script_config(&gate, None, &static_source(""))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisioningError>(),
            Some(ProvisioningError::ConfigUnavailable { .. })
        ));
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn serve_fails_before_binding_when_script_unavailable() {
        // Hold the port: a bind attempt would surface as a bind error instead
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let args = serve_args(&["--port", &port, "--integration-url", ""]);
        let err = run_serve(args).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisioningError>(),
            Some(ProvisioningError::ConfigUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn serve_fails_before_binding_on_unreadable_saved_config() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");

        let args = serve_args(&["--port", &port, "--resolved-config", missing.to_str().unwrap()]);
        let err = run_serve(args).await.unwrap_err();
        assert!(err.to_string().contains("provisioning failed"));
        assert!(err.downcast_ref::<edgeguard_server::ServerError>().is_none());
    }
}
