use super::fingerprint::{build_url, normalize_params, normalize_path, ApiRoot, RequestFingerprint};
use super::{Credential, Transport};
use crate::store::{KeyValueStore, Namespaced};
use crate::{ApiConfig, Error, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

const KEY_STORAGE: &str = "api_key";

type SharedResponse = Shared<BoxFuture<'static, Result<Arc<Value>>>>;

/// A cached, error-free response body
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<Value>,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// What the access probe learned about a credential
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    pub access_level: u64,
    pub access_type: Option<String>,
}

#[derive(Default)]
struct ClientState {
    key: Option<Credential>,
    validated: bool,
    cache: HashMap<RequestFingerprint, CacheEntry>,
    in_flight: HashMap<RequestFingerprint, SharedResponse>,
}

/// Rate-aware client for the versioned REST API.
///
/// Responses are cached per `RequestFingerprint` for `ApiConfig::cache_ttl_ms`.
/// Concurrent callers asking for the same fingerprint share one network
/// request.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Namespaced,
    config: ApiConfig,
    base: Url,
    state: Arc<Mutex<ClientState>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, store: Namespaced, config: ApiConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidArgument(format!("bad API base URL '{}': {}", config.base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { transport, store, config, base, state: Arc::default() })
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        // a panic while holding the lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.cache_ttl_ms)
    }

    /// Active credential, validated or not
    pub fn active_key(&self) -> Option<Credential> {
        self.state().key.clone()
    }

    /// Whether the active credential passed a probe during this process
    pub fn is_validated(&self) -> bool {
        let state = self.state();
        state.key.is_some() && state.validated
    }

    /// Adopt a credential supplied by the host without probing it
    pub fn use_key(&self, raw: &str) -> Result<()> {
        let key = Credential::parse(raw)?;
        let mut state = self.state();
        if state.key.as_ref() != Some(&key) {
            state.key = Some(key);
            state.validated = false;
        }
        Ok(())
    }

    /// GET `{root}/{path}` with `params`, served from cache when fresh.
    pub async fn request(&self, root: &str, path: &str, params: &[(&str, &str)]) -> Result<Arc<Value>> {
        let root = ApiRoot::parse(root)?;
        let path = normalize_path(path)?;
        let params = normalize_params(params)?;

        let shared = {
            let mut state = self.state();
            let key = state.key.clone();
            let fingerprint = RequestFingerprint::new(root, &path, &params, key.as_ref());

            if let Some(entry) = state.cache.get(&fingerprint) {
                if entry.is_fresh(self.ttl(), Instant::now()) {
                    log::debug!("api cache hit {} {}/{}", fingerprint, root, path);
                    return Ok(entry.value.clone());
                }
            }

            // check and reservation happen under one lock
            match state.in_flight.get(&fingerprint) {
                Some(pending) => {
                    log::debug!("api joining in-flight {} {}/{}", fingerprint, root, path);
                    pending.clone()
                }
                None => {
                    log::debug!("api cache miss {} {}/{}", fingerprint, root, path);
                    let url = build_url(&self.base, root, &path, &params, &self.config.comment, key.as_ref())?;
                    let fut = self.fetch_and_cache(url, fingerprint.clone()).boxed().shared();
                    state.in_flight.insert(fingerprint, fut.clone());
                    fut
                }
            }
        };

        shared.await
    }

    fn fetch_and_cache(&self, url: Url, fingerprint: RequestFingerprint) -> impl std::future::Future<Output = Result<Arc<Value>>> {
        let fetch = self.fetch(url);
        let state = self.state.clone();
        async move {
            let outcome = fetch.await.map(Arc::new);
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.in_flight.remove(&fingerprint);
            if let Ok(value) = &outcome {
                state.cache.insert(fingerprint, CacheEntry { value: value.clone(), stored_at: Instant::now() });
            }
            outcome
        }
    }

    /// One uncached GET with the configured timeout and body checks.
    fn fetch(&self, url: Url) -> impl std::future::Future<Output = Result<Value>> {
        let timeout_ms = self.config.request_timeout_ms;
        let fut = self.transport.get(&url);
        async move {
            let resp = tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .map_err(|_| Error::Timeout(timeout_ms))??;
            if !resp.is_success() {
                return Err(Error::Transport { status: resp.status });
            }
            let body: Value = serde_json::from_str(&resp.body)?;
            if let Some(err) = body.get("error") {
                return Err(api_error(err));
            }
            Ok(body)
        }
    }

    /// Probe `candidate` and adopt it only if the service grants enough access.
    ///
    /// The shape check runs first and fails without touching the network.
    /// Whatever happens, a failed validation leaves the previously active
    /// credential in place.
    pub async fn validate(&self, candidate: &str) -> Result<KeyInfo> {
        let key = Credential::parse(candidate)?;
        let url = build_url(&self.base, ApiRoot::Key, "info", &Default::default(), &self.config.comment, Some(&key))?;

        let info = match self.fetch(url).await.and_then(|body| parse_key_info(&body)) {
            Ok(info) => info,
            Err(e) => {
                log::info!("credential {:?} rejected: {}", key, e);
                return Err(e);
            }
        };
        if info.access_level < self.config.min_access_level {
            log::info!("credential {:?} has access level {} below {}", key, info.access_level, self.config.min_access_level);
            return Err(Error::InvalidCredential(format!(
                "access level {} is below the required {}",
                info.access_level, self.config.min_access_level
            )));
        }

        let mut state = self.state();
        state.key = Some(key);
        state.validated = true;
        log::info!("credential validated with access level {}", info.access_level);
        Ok(info)
    }

    /// Persist the active credential
    pub fn save_key(&self) -> Result<()> {
        let key = self.active_key().ok_or_else(|| Error::InvalidArgument("no active credential to save".into()))?;
        self.store.set(KEY_STORAGE, key.as_str())?;
        log::info!("credential saved");
        Ok(())
    }

    /// Forget the active credential in memory and in storage
    pub fn delete_key(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.key = None;
            state.validated = false;
        }
        self.store.delete(KEY_STORAGE)?;
        log::info!("credential deleted");
        Ok(())
    }

    /// Restore a persisted credential as the active, unvalidated key
    pub fn load_key(&self) -> Option<Credential> {
        let raw = self.store.get(KEY_STORAGE)?;
        match Credential::parse(&raw) {
            Ok(key) => {
                let mut state = self.state();
                state.key = Some(key.clone());
                state.validated = false;
                Some(key)
            }
            Err(e) => {
                log::warn!("ignoring persisted credential: {}", e);
                None
            }
        }
    }

    /// Number of cached entries, fresh or stale
    pub fn cache_len(&self) -> usize {
        self.state().cache.len()
    }

    /// Drop stale entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl();
        let now = Instant::now();
        let mut state = self.state();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.is_fresh(ttl, now));
        before - state.cache.len()
    }
}

fn api_error(err: &Value) -> Error {
    match err {
        Value::Object(obj) => Error::Api {
            code: obj.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: obj
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        },
        Value::String(msg) => Error::Api { code: -1, message: msg.clone() },
        other => Error::Api { code: -1, message: other.to_string() },
    }
}

fn parse_key_info(body: &Value) -> Result<KeyInfo> {
    let access = &body["info"]["access"];
    let access_level = access["level"]
        .as_u64()
        .or_else(|| body["info"]["access_level"].as_u64())
        .or_else(|| body["access_level"].as_u64())
        .ok_or_else(|| Error::InvalidResponse("key info has no access level".into()))?;
    let access_type = access["type"]
        .as_str()
        .or_else(|| body["access_type"].as_str())
        .map(str::to_string);
    Ok(KeyInfo { access_level, access_type })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::testing::ScriptedTransport;
    use crate::api::HttpResponse;
    use crate::store::MemoryStore;

    const KEY: &str = "AbCd1234EfGh5678";
    const OTHER: &str = "ZyXw9876VuTs5432";

    fn client_with(transport: Arc<ScriptedTransport>) -> ApiClient {
        let store = Namespaced::new(Arc::new(MemoryStore::new()), "rw_");
        ApiClient::new(transport, store, ApiConfig::default()).unwrap()
    }

    fn key_info(level: u64) -> Result<HttpResponse> {
        Ok(HttpResponse::ok(format!(
            "{{\"info\":{{\"access\":{{\"level\":{},\"type\":\"Limited Access\"}}}}}}",
            level
        )))
    }

    #[tokio::test]
    async fn reordered_params_hit_the_cache() {
        let t = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok("{\"races\":[]}"))]));
        let client = client_with(t.clone());
        client.use_key(KEY).unwrap();

        let a = client.request("user", "races", &[("limit", "5"), ("sort", "desc")]).await.unwrap();
        let b = client.request("user", "/races/", &[("sort", "desc"), ("limit", "5")]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(t.calls(), 1);
        assert_eq!(client.cache_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_refetched() {
        let t = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::ok("{\"v\":1}")),
            Ok(HttpResponse::ok("{\"v\":2}")),
        ]));
        let client = client_with(t.clone());

        let first = client.request("torn", "items", &[]).await.unwrap();
        tokio::time::advance(Duration::from_millis(ApiConfig::default().cache_ttl_ms - 1)).await;
        assert_eq!(client.request("torn", "items", &[]).await.unwrap(), first);
        assert_eq!(t.calls(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(client.purge_expired(), 1);
        let second = client.request("torn", "items", &[]).await.unwrap();
        assert_eq!(second["v"], 2);
        assert_eq!(t.calls(), 2);
    }

    #[tokio::test]
    async fn disallowed_root_fails_without_network() {
        let t = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok("{}"))]));
        let client = client_with(t.clone());
        assert!(matches!(client.request("admin", "x", &[]).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(client.request("user", "a?b", &[]).await, Err(Error::InvalidArgument(_))));
        assert_eq!(t.calls(), 0);
    }

    #[tokio::test]
    async fn api_error_bodies_are_not_cached() {
        let t = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::ok("{\"error\":{\"code\":5,\"error\":\"Too many requests\"}}")),
            Ok(HttpResponse::ok("{\"ok\":true}")),
        ]));
        let client = client_with(t.clone());
        let err = client.request("user", "basic", &[]).await.unwrap_err();
        assert_eq!(err, Error::Api { code: 5, message: "Too many requests".into() });
        assert_eq!(client.cache_len(), 0);
        assert!(client.request("user", "basic", &[]).await.is_ok());
        assert_eq!(t.calls(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let t = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse { status: 502, body: "bad gateway".into() })]));
        let client = client_with(t);
        assert_eq!(client.request("user", "basic", &[]).await.unwrap_err(), Error::Transport { status: 502 });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_responses_time_out() {
        let t = Arc::new(ScriptedTransport::delayed(vec![Ok(HttpResponse::ok("{}"))], Duration::from_secs(60)));
        let client = client_with(t);
        let err = client.request("user", "basic", &[]).await.unwrap_err();
        assert_eq!(err, Error::Timeout(ApiConfig::default().request_timeout_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_share_one_fetch() {
        let t = Arc::new(ScriptedTransport::delayed(vec![Ok(HttpResponse::ok("{\"n\":1}"))], Duration::from_millis(50)));
        let client = client_with(t.clone());
        let (a, b, c) = tokio::join!(
            client.request("racing", "tracks", &[]),
            client.request("racing", "tracks", &[]),
            client.request("racing", "/tracks", &[]),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_credential_skips_the_probe() {
        let t = Arc::new(ScriptedTransport::new(vec![key_info(4)]));
        let client = client_with(t.clone());
        for bad in ["", "tooShort", "AbCd1234EfGh567$"] {
            assert!(matches!(client.validate(bad).await, Err(Error::InvalidCredential(_))));
        }
        assert_eq!(t.calls(), 0);
    }

    #[tokio::test]
    async fn successful_validation_adopts_candidate() {
        let t = Arc::new(ScriptedTransport::new(vec![key_info(3)]));
        let client = client_with(t.clone());
        let info = client.validate(KEY).await.unwrap();
        assert_eq!(info.access_level, 3);
        assert_eq!(info.access_type.as_deref(), Some("Limited Access"));
        assert_eq!(client.active_key().unwrap().as_str(), KEY);
        assert!(client.is_validated());
        assert!(t.urls.lock().unwrap()[0].contains("/key/info?"));
    }

    #[tokio::test]
    async fn failed_validation_restores_previous_key() {
        let t = Arc::new(ScriptedTransport::new(vec![
            key_info(2),
            Ok(HttpResponse::ok("{\"error\":{\"code\":2,\"error\":\"Incorrect key\"}}")),
            key_info(0),
            Err(Error::Network("reset".into())),
        ]));
        let client = client_with(t);
        client.validate(KEY).await.unwrap();
        let before = client.active_key();

        assert!(matches!(client.validate(OTHER).await, Err(Error::Api { code: 2, .. })));
        assert_eq!(client.active_key(), before);
        assert!(matches!(client.validate(OTHER).await, Err(Error::InvalidCredential(_))));
        assert_eq!(client.active_key(), before);
        assert!(matches!(client.validate(OTHER).await, Err(Error::Network(_))));
        assert_eq!(client.active_key(), before);
        assert!(client.is_validated());
    }

    #[tokio::test]
    async fn failed_validation_without_prior_key_leaves_none() {
        let t = Arc::new(ScriptedTransport::new(vec![key_info(0)]));
        let client = client_with(t);
        assert!(client.validate(KEY).await.is_err());
        assert!(client.active_key().is_none());
    }

    #[test]
    fn save_load_and_delete_key() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let t = Arc::new(ScriptedTransport::new(vec![]));
        let client = ApiClient::new(t.clone(), Namespaced::new(store.clone(), "rw_"), ApiConfig::default()).unwrap();

        assert!(client.save_key().is_err());
        client.use_key(KEY).unwrap();
        client.save_key().unwrap();
        assert_eq!(store.get("rw_api_key").as_deref(), Some(KEY));

        let fresh = ApiClient::new(t, Namespaced::new(store.clone(), "rw_"), ApiConfig::default()).unwrap();
        assert_eq!(fresh.load_key().unwrap().as_str(), KEY);
        assert!(!fresh.is_validated());

        fresh.delete_key().unwrap();
        assert!(fresh.active_key().is_none());
        assert_eq!(store.get("rw_api_key"), None);
    }

    #[test]
    fn delete_key_clears_memory_even_when_storage_fails() {
        let t = Arc::new(ScriptedTransport::new(vec![]));
        let store = Namespaced::new(Arc::new(MemoryStore::disabled()), "rw_");
        let client = ApiClient::new(t, store, ApiConfig::default()).unwrap();
        client.use_key(KEY).unwrap();
        assert!(matches!(client.save_key(), Err(Error::Storage(_))));
        assert!(client.delete_key().is_err());
        assert!(client.active_key().is_none());
    }
}
