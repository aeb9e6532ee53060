//! HTML script injection.
//!
//! [`transform`] rewrites HTML object responses so the page loads the
//! verification script. Anything that is not HTML passes through untouched.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::provisioning::ResolvedConfig;

/// Errors raised while transforming a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// HTML arrived before the script URL was resolved.
    #[error("challenge script configuration is not ready")]
    ConfigNotReady,
}

/// A response fetched from the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectResponse {
    /// Response body.
    pub body: Bytes,
    /// Declared media type (may carry parameters such as `charset`).
    pub content_type: String,
    /// HTTP status.
    pub status: u16,
    /// Body length in bytes.
    pub content_length: usize,
    /// Entity tag of the stored object, if any.
    pub etag: Option<String>,
}

impl ObjectResponse {
    /// Creates a 200 response; `content_length` follows the body.
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            content_length: body.len(),
            body,
            content_type: content_type.into(),
            status: 200,
            etag: None,
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Sets the entity tag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Returns true if the media type is `text/html`, ignoring parameters and case.
    pub fn is_html(&self) -> bool {
        let essence = self.content_type.split(';').next().unwrap_or("").trim();
        essence.eq_ignore_ascii_case("text/html")
    }
}

/// Builds the script element for a script URL.
pub fn script_tag(src: &str) -> String {
    format!(
        r#"<script src="{}" type="text/javascript" defer></script>"#,
        escape_attribute(src)
    )
}

/// Injects the challenge script into an HTML response.
///
/// Non-HTML responses are returned as is, whatever `config` holds. HTML
/// without a resolved config fails with [`TransformError::ConfigNotReady`].
pub fn transform(
    response: ObjectResponse,
    config: Option<&ResolvedConfig>,
) -> Result<ObjectResponse, TransformError> {
    if !response.is_html() {
        return Ok(response);
    }
    let config = config.ok_or(TransformError::ConfigNotReady)?;

    let tag = script_tag(&config.script_base_url);
    let body = &response.body;
    let at = find_ignore_case(body, b"</head>")
        .or_else(|| find_ignore_case(body, b"</body>"))
        .unwrap_or(0);

    let mut out = BytesMut::with_capacity(body.len() + tag.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(&body[at..]);
    let body = out.freeze();

    Ok(ObjectResponse {
        content_length: body.len(),
        body,
        etag: None,
        ..response
    })
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "https://verify.example.com/abc/challenge.js";

    fn config() -> ResolvedConfig {
        ResolvedConfig::new(SCRIPT)
    }

    fn expected_tag() -> String {
        format!(r#"<script src="{SCRIPT}" type="text/javascript" defer></script>"#)
    }

    #[test]
    fn non_html_is_untouched() {
        let original = ObjectResponse::new(&b"{\"ok\":true}"[..], "application/json").with_etag("\"v1\"");
        let out = transform(original.clone(), Some(&config())).unwrap();
        assert_eq!(out, original);
        assert_eq!(out.body.as_ptr(), original.body.as_ptr());
    }

    #[test]
    fn non_html_needs_no_config() {
        let original = ObjectResponse::new(&b"body{}"[..], "text/css");
        assert_eq!(transform(original.clone(), None).unwrap(), original);
    }

    #[test]
    fn inserts_before_head_close() {
        let html = "<html><head><title>t</title></head><body>hi</body></html>";
        let out = transform(ObjectResponse::new(html, "text/html"), Some(&config())).unwrap();
        let expected = format!(
            "<html><head><title>t</title>{}</head><body>hi</body></html>",
            expected_tag()
        );
        assert_eq!(out.body, expected.as_bytes());
        assert_eq!(out.content_length, expected.len());
        assert_eq!(out.content_length, out.body.len());
    }

    #[test]
    fn head_close_is_case_insensitive() {
        let html = "<HTML><HEAD></HEAD></HTML>";
        let out = transform(ObjectResponse::new(html, "TEXT/HTML; charset=utf-8"), Some(&config())).unwrap();
        assert_eq!(out.body, format!("<HTML><HEAD>{}</HEAD></HTML>", expected_tag()).as_bytes());
    }

    #[test]
    fn falls_back_to_body_close() {
        let html = "<p>x</p></body>";
        let out = transform(ObjectResponse::new(html, "text/html"), Some(&config())).unwrap();
        assert_eq!(out.body, format!("<p>x</p>{}</body>", expected_tag()).as_bytes());
    }

    #[test]
    fn prepends_without_anchors() {
        let out = transform(ObjectResponse::new("<p>x</p>", "text/html"), Some(&config())).unwrap();
        assert_eq!(out.body, format!("{}<p>x</p>", expected_tag()).as_bytes());
    }

    #[test]
    fn injects_once_at_first_head() {
        let html = "<head></head><template></head></template>";
        let out = transform(ObjectResponse::new(html, "text/html"), Some(&config())).unwrap();
        let body = String::from_utf8(out.body.to_vec()).unwrap();
        assert_eq!(body.matches("<script").count(), 1);
        assert!(body.starts_with(&format!("<head>{}</head>", expected_tag())));
    }

    #[test]
    fn etag_dropped_and_status_kept() {
        let original = ObjectResponse::new("<head></head>", "text/html")
            .with_etag("\"abc\"")
            .with_status(203);
        let out = transform(original, Some(&config())).unwrap();
        assert_eq!(out.etag, None);
        assert_eq!(out.status, 203);
    }

    #[test]
    fn html_without_config_is_not_ready() {
        let err = transform(ObjectResponse::new("<head></head>", "text/html"), None).unwrap_err();
        assert_eq!(err, TransformError::ConfigNotReady);
    }

    #[test]
    fn script_url_is_escaped() {
        assert_eq!(
            script_tag("https://x/a\"b&c<d>"),
            r#"<script src="https://x/a&quot;b&amp;c&lt;d&gt;" type="text/javascript" defer></script>"#
        );
    }

    #[test]
    fn is_html_ignores_parameters() {
        assert!(ObjectResponse::new("", "text/html; charset=UTF-8").is_html());
        assert!(!ObjectResponse::new("", "text/htmlx").is_html());
        assert!(!ObjectResponse::new("", "application/xhtml+xml").is_html());
    }
}
