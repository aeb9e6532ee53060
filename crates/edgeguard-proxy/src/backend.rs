//! Backend API forwarding.
//!
//! API requests are relayed to the backend origin with hop-by-hop headers
//! removed. The backend's status, headers, and body come back unchanged
//! apart from hop-by-hop headers. Nothing is cached and nothing is retried.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, HOST};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Response relayed from the backend.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    /// Backend status, verbatim.
    pub status: StatusCode,
    /// Backend headers without hop-by-hop headers.
    pub headers: HeaderMap,
    /// Backend body.
    pub body: Bytes,
}

/// HTTP client for the backend origin.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::OriginUnreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forwards a request. `path_and_query` must start with `/`.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<BackendResponse> {
        let url = format!("{}{}", self.base_url, path_and_query);
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        debug!(method = %method, url = %url, "Forwarding to backend");
        let response = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Backend unreachable");
                ProxyError::OriginUnreachable(e.to_string())
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::OriginUnreachable(e.to_string()))?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Fake backend answering every request with 201 and echoing the request head.
    async fn echo_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let head = request.split("\r\n\r\n").next().unwrap_or("").to_string();
                let response = format!(
                    "HTTP/1.1 201 Created\r\ncontent-type: text/plain\r\nx-backend: yes\r\nkeep-alive: timeout=5\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    head.len(),
                    head
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[tokio::test]
    async fn forwards_method_path_and_status() {
        let backend = BackendClient::new(echo_backend().await).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("proxy-authorization", HeaderValue::from_static("secret"));

        let response = backend
            .forward(Method::POST, "/api/tasks?x=1", headers, Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.get("x-backend").unwrap(), "yes");
        assert!(response.headers.get("keep-alive").is_none());

        let head = String::from_utf8(response.body.to_vec()).unwrap().to_lowercase();
        assert!(head.starts_with("post /api/tasks?x=1 http/1.1"));
        assert!(head.contains("x-request-id: abc"));
        assert!(!head.contains("proxy-authorization"));
    }

    #[tokio::test]
    async fn unreachable_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = BackendClient::new(format!("http://{addr}")).unwrap();
        let err = backend
            .forward(Method::GET, "/api/tasks", HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::OriginUnreachable(_)));
    }
}
