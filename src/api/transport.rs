//! Request-issuing abstraction
//!
//! All HTTP traffic flows through a `Transport`. Code that wants to see that
//! traffic (for example to pick race payloads out of the host page's own
//! requests) registers a listener on an `ObservedTransport` instead of
//! patching a shared request constructor.

use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        HttpResponse { status: 200, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Metadata about an outgoing request, offered to listeners before it is sent
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
}

/// A completed exchange, offered to listeners after the response arrives
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Issues GET requests. Futures are `'static` so callers can share them.
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> BoxFuture<'static, Result<HttpResponse>>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout_ms })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> BoxFuture<'static, Result<HttpResponse>> {
        let request = self.client.get(url.clone());
        let timeout_ms = self.timeout_ms;
        async move {
            let resp = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(timeout_ms)
                } else {
                    Error::Network(e.to_string())
                }
            })?;
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

type OnRequestHandler = Arc<dyn Fn(&RequestInfo) + Send + Sync>;
type OnResponseHandler = Arc<dyn Fn(&ResponseEvent) + Send + Sync>;

/// Wraps a transport and reports every request and response to listeners.
pub struct ObservedTransport<T> {
    inner: T,
    on_request: Arc<Mutex<Vec<OnRequestHandler>>>,
    on_response: Arc<Mutex<Vec<OnResponseHandler>>>,
}

impl<T: Transport> ObservedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, on_request: Arc::default(), on_response: Arc::default() }
    }

    /// Register a callback fired before each request is sent
    pub fn on_request<F>(&self, cb: F)
    where
        F: Fn(&RequestInfo) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.on_request.lock() {
            handlers.push(Arc::new(cb));
        }
    }

    /// Register a callback fired for each response, successful or not
    pub fn on_response<F>(&self, cb: F)
    where
        F: Fn(&ResponseEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.on_response.lock() {
            handlers.push(Arc::new(cb));
        }
    }

    pub fn clear_on_request(&self) {
        if let Ok(mut handlers) = self.on_request.lock() {
            handlers.clear();
        }
    }

    pub fn clear_on_response(&self) {
        if let Ok(mut handlers) = self.on_response.lock() {
            handlers.clear();
        }
    }
}

impl<T: Transport> Transport for ObservedTransport<T> {
    fn get(&self, url: &Url) -> BoxFuture<'static, Result<HttpResponse>> {
        let info = RequestInfo { url: url.to_string(), method: "GET".to_string() };
        let request_handlers = self.on_request.lock().map(|h| h.clone()).unwrap_or_default();
        for cb in &request_handlers {
            cb(&info);
        }

        let fut = self.inner.get(url);
        let on_response = self.on_response.clone();
        async move {
            let resp = fut.await?;
            // snapshot so a listener may register or clear listeners
            let handlers = on_response.lock().map(|h| h.clone()).unwrap_or_default();
            if !handlers.is_empty() {
                let event = ResponseEvent { url: info.url, status: resp.status, body: resp.body.clone() };
                for cb in &handlers {
                    cb(&event);
                }
            }
            Ok(resp)
        }
        .boxed()
    }
}
