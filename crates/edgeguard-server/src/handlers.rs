//! Gateway route handlers.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LOCATION, SET_COOKIE, VARY,
};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use edgeguard_core::{Evaluation, InboundRequest, ObjectResponse, RuleSource, CHALLENGE_COOKIE};
use edgeguard_proxy::Origin;

use crate::classifier::GatewayDecision;
use crate::error::{GatewayError, Result};
use crate::pages::{block_page, challenge_page, safe_return_to};
use crate::state::AppState;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Cache policy for gateway-generated pages.
const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Response body for GET /healthz.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: String,
    /// Whether the challenge script URL has been published.
    pub ready: bool,
}

/// Form body for POST /challenge/verify.
#[derive(Debug, Deserialize)]
pub struct VerifyForm {
    /// Solution token from the verification service.
    #[serde(default)]
    pub token: String,
    /// Path to return to after verification.
    pub return_to: Option<String>,
}

/// GET /healthz - Liveness and config readiness.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        ready: state.delivery.gate().is_ready(),
    })
}

/// POST /challenge/verify - Exchange a solution token for the challenge cookie.
pub async fn verify_challenge(
    State(state): State<AppState>,
    Form(form): Form<VerifyForm>,
) -> Result<Response> {
    if !state.verifier.verify(&form.token).await {
        warn!("Challenge solution rejected");
        return Err(GatewayError::VerificationFailed);
    }

    let tokens = state.classifier.tokens();
    let token = tokens.issue(Utc::now());
    let mut cookie = format!(
        "{CHALLENGE_COOKIE}={token}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        tokens.immunity().num_seconds()
    );
    if state.secure_cookies {
        cookie.push_str("; Secure");
    }
    let location = safe_return_to(form.return_to.as_deref());
    info!(return_to = %location, "Challenge solved");

    Ok((
        StatusCode::SEE_OTHER,
        [(LOCATION, location), (SET_COOKIE, cookie)],
    )
        .into_response())
}

/// Fallback - Classify, then route to an origin.
pub async fn gateway(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match handle(state, request).await {
        Ok(response) => response,
        Err(e) => {
            let (status, _) = e.status();
            if status.is_server_error() {
                warn!(method = %method, path = %path, error = %e, "Request failed");
            }
            e.into_response()
        }
    }
}

async fn handle(state: AppState, request: Request) -> Result<Response> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let classification = state
        .classifier
        .classify(inbound_request(&request), &client, Utc::now());

    match classification.decision {
        GatewayDecision::Reject => Ok(block_response(&classification.evaluation)),
        GatewayDecision::IssueChallenge => Ok(challenge_response(&state, request.uri())),
        GatewayDecision::Forward => forward(&state, request).await,
    }
}

fn inbound_request(request: &Request) -> InboundRequest {
    let uri = request.uri();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let mut inbound = InboundRequest::new(request.method().as_str(), path_and_query);
    inbound.headers = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    inbound
}

fn block_response(evaluation: &Evaluation) -> Response {
    let reason = match &evaluation.source {
        RuleSource::None => "default".to_string(),
        RuleSource::Rule { rule_name, .. } => rule_name.clone(),
        RuleSource::GroupRule {
            rule_name,
            sub_rule,
            ..
        } => format!("{rule_name}/{sub_rule}"),
    };

    (
        StatusCode::FORBIDDEN,
        [(CONTENT_TYPE, HTML_CONTENT_TYPE), (CACHE_CONTROL, NO_STORE)],
        block_page(&reason),
    )
        .into_response()
}

fn challenge_response(state: &AppState, uri: &Uri) -> Response {
    let return_to = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let script = state
        .delivery
        .gate()
        .current()
        .map(|config| config.script_base_url.as_str());

    (
        StatusCode::ACCEPTED,
        [(CONTENT_TYPE, HTML_CONTENT_TYPE), (CACHE_CONTROL, NO_STORE)],
        challenge_page(script, &safe_return_to(Some(return_to))),
    )
        .into_response()
}

async fn forward(state: &AppState, request: Request) -> Result<Response> {
    match state.router.route(request.uri().path()) {
        Origin::Backend => {
            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, state.max_body_bytes)
                .await
                .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");

            let relayed = state
                .backend
                .forward(parts.method, path_and_query, parts.headers, body)
                .await?;

            let mut response = Response::new(Body::from(relayed.body));
            *response.status_mut() = relayed.status;
            *response.headers_mut() = relayed.headers;
            Ok(response)
        }
        Origin::ObjectStore => {
            if request.method() != Method::GET && request.method() != Method::HEAD {
                return Err(GatewayError::MethodNotAllowed);
            }
            let object = state.delivery.serve(request.uri().path()).await?;
            object_response(object)
        }
    }
}

fn object_response(object: ObjectResponse) -> Result<Response> {
    let status = StatusCode::from_u16(object.status)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, object.content_type.as_str())
        .header(CONTENT_LENGTH, object.content_length);
    if let Some(etag) = &object.etag {
        builder = builder.header(ETAG, etag.as_str());
    }
    if object.is_html() {
        builder = builder
            .header(CACHE_CONTROL, "no-cache")
            .header(VARY, "Cookie");
    }

    builder
        .body(Body::from(object.body))
        .map_err(|e| GatewayError::Internal(e.to_string()))
}
