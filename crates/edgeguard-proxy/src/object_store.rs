//! Object store collaborators.
//!
//! The gateway serves static site content by key. [`FsObjectStore`] reads a
//! directory tree; [`MemoryObjectStore`] keeps objects in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use edgeguard_core::ObjectResponse;

use crate::error::{ProxyError, Result};

/// An object as held by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents.
    pub body: Bytes,
    /// Media type.
    pub content_type: String,
    /// Entity tag.
    pub etag: Option<String>,
}

impl StoredObject {
    /// Creates an object without an entity tag.
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            etag: None,
        }
    }

    /// Converts into a 200 response.
    pub fn into_response(self) -> ObjectResponse {
        let response = ObjectResponse::new(self.body, self.content_type);
        match self.etag {
            Some(etag) => response.with_etag(etag),
            None => response,
        }
    }
}

/// Key-addressed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;
}

/// Guesses a media type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Serves objects from a directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.root.join(key);
        trace!(path = %path.display(), "Reading object");

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProxyError::Io(e)),
        };

        let body = tokio::fs::read(&path).await?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok(Some(StoredObject {
            etag: Some(format!("\"{:x}-{:x}\"", body.len(), modified)),
            body: Bytes::from(body),
            content_type: content_type_for(key).to_string(),
        }))
    }
}

/// In-memory object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object, inferring its media type from the key.
    pub fn with_object(self, key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let key = key.into();
        let object = StoredObject::new(body, content_type_for(&key));
        self.insert(key, object);
        self
    }

    /// Inserts or replaces an object.
    pub fn insert(&self, key: impl Into<String>, object: StoredObject) {
        self.objects.write().insert(key.into(), object);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("INDEX.HTM"), "text/html");
        assert_eq!(content_type_for("assets/app.js"), "text/javascript");
        assert_eq!(content_type_for("data.json"), "application/json");
        assert_eq!(content_type_for("LICENSE"), "application/octet-stream");
    }

    #[tokio::test]
    async fn fs_store_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "<html></html>").unwrap();

        let store = FsObjectStore::new(dir.path());
        let object = store.get("docs/index.html").await.unwrap().unwrap();
        assert_eq!(object.body, "<html></html>".as_bytes());
        assert_eq!(object.content_type, "text/html");
        assert!(object.etag.unwrap().starts_with("\"d-"));
    }

    #[tokio::test]
    async fn fs_store_missing_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        let store = FsObjectStore::new(dir.path());
        assert!(store.get("nope.html").await.unwrap().is_none());
        assert!(store.get("docs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store() {
        let store = MemoryObjectStore::new().with_object("index.html", "<p>hi</p>");
        let object = store.get("index.html").await.unwrap().unwrap();
        assert_eq!(object.content_type, "text/html");
        assert!(store.get("other").await.unwrap().is_none());

        let response = object.into_response();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, 9);
    }
}
