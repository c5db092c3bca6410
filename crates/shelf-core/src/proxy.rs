use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use url::Url;

use crate::error::AppError;

/// A forward proxy the transport can route a request through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parses `scheme://[user:pass@]host:port`. A bare `host:port` is
    /// treated as `http`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{raw}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::ConfigError(format!("Proxy '{raw}' has no host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AppError::ConfigError(format!("Proxy '{raw}' has no port")))?;

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            username,
            password: url.password().map(str::to_string),
        })
    }

    /// URL without credentials.
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("address", &self.address())
            .field("authenticated", &self.username.is_some())
            .finish()
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Supplies the current proxy list. Consulted on every call, never cached.
pub trait ProxySource: Send + Sync + Clone {
    fn endpoints(&self) -> Vec<ProxyEndpoint>;
}

/// Parses a comma-separated proxy list, skipping blank and malformed entries.
pub fn parse_proxy_list(raw: &str) -> Vec<ProxyEndpoint> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match ProxyEndpoint::parse(entry) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed proxy entry");
                None
            }
        })
        .collect()
}

/// Reads `PROXY_LIST` from the process environment on every call.
#[derive(Debug, Clone, Default)]
pub struct EnvProxySource {
    var: Option<String>,
}

impl EnvProxySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(var: impl Into<String>) -> Self {
        Self {
            var: Some(var.into()),
        }
    }
}

impl ProxySource for EnvProxySource {
    fn endpoints(&self) -> Vec<ProxyEndpoint> {
        let var = self.var.as_deref().unwrap_or("PROXY_LIST");
        std::env::var(var)
            .map(|raw| parse_proxy_list(&raw))
            .unwrap_or_default()
    }
}

/// Fixed proxy list.
#[derive(Debug, Clone, Default)]
pub struct StaticProxySource {
    endpoints: Arc<Vec<ProxyEndpoint>>,
}

impl StaticProxySource {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
        }
    }
}

impl ProxySource for StaticProxySource {
    fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.endpoints.as_ref().clone()
    }
}

/// Shared round-robin position over the proxy list.
///
/// The lock is held only for the read or write of the index.
#[derive(Debug, Default)]
pub struct RotationCursor {
    position: Mutex<usize>,
}

impl RotationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index to start from for a list of `len` endpoints.
    pub fn next(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        *self.lock() % len
    }

    /// Moves the cursor to the endpoint after `index`.
    pub fn advance_past(&self, index: usize, len: usize) {
        if len == 0 {
            return;
        }
        *self.lock() = (index + 1) % len;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.position.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Rotation cursor mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

/// Default pause between a blocked endpoint and the next one.
pub const DEFAULT_BLOCKED_BACKOFF: Duration = Duration::from_millis(500);

/// Retry wrapper that walks the proxy list when the origin blocks an IP.
#[derive(Clone)]
pub struct ProxyRotator<P: ProxySource> {
    source: P,
    cursor: Arc<RotationCursor>,
    backoff: Duration,
}

impl<P: ProxySource> ProxyRotator<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            cursor: Arc::new(RotationCursor::new()),
            backoff: DEFAULT_BLOCKED_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn cursor(&self) -> &RotationCursor {
        &self.cursor
    }

    /// Runs `operation` through the proxy pool.
    ///
    /// With no proxies configured the operation runs once, directly. Otherwise
    /// each endpoint is tried at most once starting from the shared cursor;
    /// only "blocked" failures move on to the next endpoint. Any other error,
    /// or the last endpoint failing, is returned as-is.
    pub async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        T: Send,
        F: FnMut(Option<ProxyEndpoint>) -> Fut + Send,
        Fut: Future<Output = Result<T, AppError>> + Send,
    {
        let endpoints = self.source.endpoints();
        if endpoints.is_empty() {
            tracing::debug!("No proxies configured, calling directly");
            return operation(None).await;
        }

        let len = endpoints.len();
        let start = self.cursor.next(len);

        for attempt in 0..len {
            let index = (start + attempt) % len;
            let endpoint = endpoints[index].clone();
            tracing::debug!(attempt = attempt + 1, total = len, proxy = %endpoint, "Proxy attempt");

            match operation(Some(endpoint)).await {
                Ok(value) => {
                    self.cursor.advance_past(index, len);
                    return Ok(value);
                }
                Err(e) => {
                    let last = attempt + 1 == len;
                    if !e.is_blocked() || last {
                        if last {
                            tracing::warn!(error = %e, proxies = len, "All proxies failed");
                        }
                        return Err(e);
                    }
                    tracing::warn!(proxy_index = index, error = %e, "Proxy blocked, rotating");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(AppError::Generic("proxy rotation exhausted".into()))
    }
}
