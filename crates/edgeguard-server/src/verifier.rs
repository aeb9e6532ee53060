//! Challenge solution verification.
//!
//! The verification service hands the browser a solution token after the
//! challenge script runs. The gateway asks a [`SolutionVerifier`] whether
//! that token is genuine before issuing its own challenge-state cookie.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Checks solution tokens with the verification service.
#[async_trait]
pub trait SolutionVerifier: Send + Sync {
    /// Returns true if the solution token is valid.
    async fn verify(&self, token: &str) -> bool;
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
}

/// Verifies tokens by posting them to the verification service.
///
/// Sends `{"token": ...}` and expects `{"valid": true}` with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpSolutionVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpSolutionVerifier {
    /// Creates a verifier posting to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SolutionVerifier for HttpSolutionVerifier {
    async fn verify(&self, token: &str) -> bool {
        let response = match self
            .client
            .post(&self.url)
            .json(&VerifyRequest { token })
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "Verification service rejected token");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Verification service unreachable");
                return false;
            }
        };

        match response.json::<VerifyResponse>().await {
            Ok(body) => body.valid,
            Err(e) => {
                warn!(error = %e, "Invalid verification response");
                false
            }
        }
    }
}

/// Accepts any non-empty token. For local development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncheckedSolutionVerifier;

#[async_trait]
impl SolutionVerifier for UncheckedSolutionVerifier {
    async fn verify(&self, token: &str) -> bool {
        !token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn verification_service(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/verify")
    }

    #[tokio::test]
    async fn unchecked_rejects_empty() {
        assert!(UncheckedSolutionVerifier.verify("abc").await);
        assert!(!UncheckedSolutionVerifier.verify("  ").await);
    }

    #[tokio::test]
    async fn http_verifier_valid() {
        let url = verification_service(r#"{"valid":true}"#).await;
        assert!(HttpSolutionVerifier::new(url).unwrap().verify("t").await);
    }

    #[tokio::test]
    async fn http_verifier_invalid() {
        let url = verification_service(r#"{"valid":false}"#).await;
        assert!(!HttpSolutionVerifier::new(url).unwrap().verify("t").await);
    }

    #[tokio::test]
    async fn http_verifier_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let verifier = HttpSolutionVerifier::new(format!("http://{addr}/verify")).unwrap();
        assert!(!verifier.verify("t").await);
    }
}
