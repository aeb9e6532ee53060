//! Request attributes visible to the rule engine.
//!
//! The gateway builds an [`InboundRequest`] from the HTTP request before
//! classification. It is a plain value: evaluation never mutates it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Label attached when a session exceeds the volumetric request threshold.
pub const LABEL_VOLUMETRIC_SESSION: &str = "volumetric:session";

/// The parts of an inbound request that rules can inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// HTTP method as sent by the client (e.g. `GET`).
    pub method: String,
    /// URI path, without the query string.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
    /// Signals attached by the gateway before evaluation.
    pub labels: BTreeSet<String>,
}

impl InboundRequest {
    /// Creates a request with the given method and path-and-query.
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            headers: Vec::new(),
            labels: BTreeSet::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Returns every value of the named header. Name lookup ignores ASCII case.
    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_string();
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).next()
    }

    /// Returns the value of a cookie from the `Cookie` header(s).
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header_values("cookie")
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Returns true if the label is attached.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_splits_query() {
        let req = InboundRequest::new("GET", "/api/tasks?done=true");
        assert_eq!(req.path, "/api/tasks");
        assert_eq!(req.query.as_deref(), Some("done=true"));

        let req = InboundRequest::new("GET", "/");
        assert_eq!(req.path, "/");
        assert!(req.query.is_none());
    }

    #[test]
    fn header_lookup_ignores_name_case() {
        let req = InboundRequest::new("GET", "/").with_header("Accept", "text/html");
        assert_eq!(req.header("accept"), Some("text/html"));
        assert_eq!(req.header("ACCEPT"), Some("text/html"));
        assert!(req.header("user-agent").is_none());
    }

    #[test]
    fn header_value_outlives_lookup_name() {
        let req = InboundRequest::new("GET", "/").with_header("Accept", "text/html");
        let value = {
            let name = String::from("accept");
            req.header(&name)
        };
        assert_eq!(value, Some("text/html"));
    }

    #[test]
    fn header_values_returns_all_occurrences() {
        let req = InboundRequest::new("GET", "/")
            .with_header("X-Trace", "a")
            .with_header("x-trace", "b");
        let values: Vec<_> = req.header_values("X-TRACE").collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn cookie_parsing() {
        let req = InboundRequest::new("GET", "/")
            .with_header("Cookie", "theme=dark; edgeguard-token=abc.def")
            .with_header("Cookie", "other=1");
        assert_eq!(req.cookie("edgeguard-token"), Some("abc.def"));
        assert_eq!(req.cookie("other"), Some("1"));
        assert!(req.cookie("missing").is_none());
    }

    #[test]
    fn labels() {
        let req = InboundRequest::new("GET", "/").with_label(LABEL_VOLUMETRIC_SESSION);
        assert!(req.has_label(LABEL_VOLUMETRIC_SESSION));
        assert!(!req.has_label("other"));
    }
}
