//! Racewatch sync engine
//!
//! Keeps derived racing statistics in step with a host page that keeps
//! re-rendering itself. The pieces, leaves first:
//!
//! - **Storage** (`store`): durable key/string storage for credentials,
//!   driver records and toggles
//! - **API client** (`api`): credential validation, TTL-cached requests
//!   shared between concurrent callers
//! - **Element waiter** (`waiter`): resolves once a selector matches, bounded
//!   by a wall-clock deadline
//! - **Reconcilers** (`reconciler`, `leaderboard`, `healthbar`): re-derive
//!   and re-apply injected UI whenever the watched subtree mutates
//! - **Domain model** (`model`): distances, speeds, drivers and races
//!
//! The live page is modelled by `dom::Document`, an observable in-memory DOM.
//!
//! # Example
//!
//! ```no_run
//! use racewatch::dom::Document;
//! use racewatch::waiter::ElementWaiter;
//! use racewatch::SyncConfig;
//!
//! # async fn demo() -> racewatch::Result<()> {
//! let config = SyncConfig::default();
//! let doc = Document::parse_html("<body><ul id=\"leaderboard\"></ul></body>");
//! let waiter = ElementWaiter::new(doc.clone(), &config.waiter);
//! let board = waiter.defer("#leaderboard").await?;
//! println!("{}", doc.outer_html(board));
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;

pub mod error;
pub use error::{Error, Result};

pub mod api;
pub mod dom;
pub mod healthbar;
pub mod leaderboard;
pub mod lifecycle;
pub mod model;
pub mod reconciler;
pub mod store;
pub mod waiter;

pub use api::{ApiClient, Credential, HttpTransport, ObservedTransport, Transport};
pub use dom::{Document, NodeId};
pub use lifecycle::PageLifecycle;
pub use store::{FileStore, KeyValueStore, MemoryStore, Namespaced};

/// Top-level configuration
///
/// Every field has a conservative default so a partial JSON file is enough:
///
/// ```
/// let cfg: racewatch::SyncConfig = serde_json::from_str(r#"{"api":{"comment":"me"}}"#).unwrap();
/// assert_eq!(cfg.api.comment, "me");
/// assert_eq!(cfg.api.cache_ttl_ms, 3_600_000);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub waiter: WaiterConfig,
    pub reconciler: ReconcilerConfig,
    /// Prefix namespacing every persisted key
    pub store_prefix: String,
    /// User agent sent with API requests
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            waiter: WaiterConfig::default(),
            reconciler: ReconcilerConfig::default(),
            store_prefix: "racewatch_".to_string(),
            user_agent: concat!("racewatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// API client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Versioned API base, e.g. `https://api.torn.com/v2/`
    pub base_url: String,
    /// Static client tag sent as the `comment` parameter
    pub comment: String,
    /// How long a cached response stays fresh
    pub cache_ttl_ms: u64,
    /// Bound on each network request
    pub request_timeout_ms: u64,
    /// Lowest access level `validate` accepts
    pub min_access_level: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.torn.com/v2/".to_string(),
            comment: "racewatch".to_string(),
            cache_ttl_ms: 60 * 60 * 1000,
            request_timeout_ms: 10_000,
            min_access_level: 1,
        }
    }
}

/// Element waiter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaiterConfig {
    /// Wall-clock bound on a deferral
    pub timeout_ms: u64,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self { timeout_ms: 20_000 }
    }
}

/// Leaderboard reconciliation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Speed sampling period
    pub sample_interval_ms: u64,
    pub show_glyphs: bool,
    pub show_speed: bool,
    pub show_skill: bool,
    pub show_profile_links: bool,
    /// How long a driver whose skill lookup failed is left alone
    pub skill_retry_ms: u64,
    /// Element wrapping the race status and the leaderboard
    pub container_selector: String,
    /// Race status text, relative to the container
    pub status_selector: String,
    /// One element per participant, relative to the container
    pub row_selector: String,
    /// Row attribute holding the participant id
    pub driver_id_attr: String,
    /// Class of the row child holding the participant name
    pub name_class: String,
    /// Class of the row child holding `NN.NN%` completion
    pub completion_class: String,
    /// Profile URL; the driver id is appended
    pub profile_url_base: String,
    /// Substring identifying race payload URLs among observed responses
    pub race_data_marker: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            show_glyphs: true,
            show_speed: true,
            show_skill: true,
            show_profile_links: true,
            skill_retry_ms: 300_000,
            container_selector: "#racingupdates".to_string(),
            status_selector: ".race-status".to_string(),
            row_selector: "#leaderboard > li[data-driver-id]".to_string(),
            driver_id_attr: "data-driver-id".to_string(),
            name_class: "name".to_string(),
            completion_class: "completion".to_string(),
            profile_url_base: "https://www.torn.com/profiles.php?XID=".to_string(),
            race_data_marker: "sid=raceData".to_string(),
        }
    }
}
