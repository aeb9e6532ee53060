//! EdgeGuard Proxy - Origin routing and content delivery.
//!
//! Requests that the classifier forwards are routed to one of two origins:
//!
//! ```text
//! Forwarded Request → OriginRouter → /api or /api/* ?
//!                                        │
//!                      ┌─────────────────┴─────────────────┐
//!                      │ Yes                               │ No
//!                      ▼                                   ▼
//!               BackendClient                      StaticDelivery
//!          (status/body verbatim)          object store → transformer
//! ```

mod backend;
mod delivery;
mod error;
mod object_store;
mod router;

pub use backend::{strip_hop_by_hop, BackendClient, BackendResponse};
pub use delivery::{NotReadyPolicy, StaticDelivery};
pub use error::{ProxyError, Result};
pub use object_store::{
    content_type_for, FsObjectStore, MemoryObjectStore, ObjectStore, StoredObject,
};
pub use router::{object_key, Origin, OriginRouter, API_PREFIX, INDEX_OBJECT};
