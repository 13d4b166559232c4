//! Client for the upstream REST API
//!
//! `ApiClient` validates credentials, issues GET requests through a
//! `Transport`, caches error-free bodies by `RequestFingerprint` and shares
//! in-flight requests between concurrent callers.

pub mod client;
pub mod credential;
pub mod fingerprint;
pub mod transport;

pub use client::{ApiClient, CacheEntry, KeyInfo};
pub use credential::Credential;
pub use fingerprint::{normalize_path, ApiRoot, Params, RequestFingerprint};
pub use transport::{HttpResponse, HttpTransport, ObservedTransport, RequestInfo, ResponseEvent, Transport};
