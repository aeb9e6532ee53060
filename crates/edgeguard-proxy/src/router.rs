//! Path-based origin selection.

use serde::{Deserialize, Serialize};

/// Path prefix served by the backend API.
pub const API_PREFIX: &str = "/api";

/// Object served for the site root and directory paths.
pub const INDEX_OBJECT: &str = "index.html";

/// Where a forwarded request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The backend API server. Responses pass through unchanged.
    Backend,
    /// The object store, through the content transformer.
    ObjectStore,
}

/// Maps request paths to origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRouter {
    api_prefix: String,
}

impl Default for OriginRouter {
    fn default() -> Self {
        Self::new(API_PREFIX)
    }
}

impl OriginRouter {
    /// Creates a router sending `prefix` and everything below it to the backend.
    pub fn new(api_prefix: impl Into<String>) -> Self {
        let prefix: String = api_prefix.into();
        Self {
            api_prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Selects the origin for a path.
    pub fn route(&self, path: &str) -> Origin {
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some("") => Origin::Backend,
            Some(rest) if rest.starts_with('/') => Origin::Backend,
            _ => Origin::ObjectStore,
        }
    }
}

/// Derives the object key for a path.
///
/// The leading `/` is dropped and directory paths resolve to their
/// `index.html`. Returns `None` for paths with `.` or `..` segments.
pub fn object_key(path: &str) -> Option<String> {
    let key = path.trim_start_matches('/');

    if key
        .split('/')
        .any(|segment| segment == ".." || segment == "." || segment.contains('\\'))
    {
        return None;
    }

    if key.is_empty() {
        Some(INDEX_OBJECT.to_string())
    } else if key.ends_with('/') {
        Some(format!("{key}{INDEX_OBJECT}"))
    } else {
        Some(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_paths_go_to_backend() {
        let router = OriginRouter::default();
        assert_eq!(router.route("/api"), Origin::Backend);
        assert_eq!(router.route("/api/"), Origin::Backend);
        assert_eq!(router.route("/api/tasks"), Origin::Backend);
        assert_eq!(router.route("/api/tasks/7/done"), Origin::Backend);
    }

    #[test]
    fn other_paths_go_to_object_store() {
        let router = OriginRouter::default();
        assert_eq!(router.route("/"), Origin::ObjectStore);
        assert_eq!(router.route("/index.html"), Origin::ObjectStore);
        assert_eq!(router.route("/apidocs"), Origin::ObjectStore);
        assert_eq!(router.route("/static/api/x"), Origin::ObjectStore);
    }

    #[test]
    fn custom_prefix() {
        let router = OriginRouter::new("/v2/");
        assert_eq!(router.route("/v2/items"), Origin::Backend);
        assert_eq!(router.route("/api/items"), Origin::ObjectStore);
    }

    #[test]
    fn root_maps_to_index() {
        assert_eq!(object_key("/").as_deref(), Some("index.html"));
        assert_eq!(object_key("").as_deref(), Some("index.html"));
    }

    #[test]
    fn directory_maps_to_its_index() {
        assert_eq!(object_key("/docs/").as_deref(), Some("docs/index.html"));
    }

    #[test]
    fn plain_keys() {
        assert_eq!(object_key("/assets/app.js").as_deref(), Some("assets/app.js"));
        assert_eq!(object_key("//favicon.ico").as_deref(), Some("favicon.ico"));
    }

    #[test]
    fn traversal_rejected() {
        assert_eq!(object_key("/../secret"), None);
        assert_eq!(object_key("/a/../../b"), None);
        assert_eq!(object_key("/a/./b"), None);
        assert_eq!(object_key("/a\\..\\b"), None);
    }
}
