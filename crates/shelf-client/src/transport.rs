use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, Proxy, Response, StatusCode};
use serde_json::Value;

use shelf_core::config::OriginConfig;
use shelf_core::error::AppError;
use shelf_core::proxy::ProxyEndpoint;
use shelf_core::traits::HttpTransport;

const ACCEPT_ANY: &str = "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_PL: &str = "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP transport using reqwest.
///
/// One client is built per egress: the direct client up front, and one per
/// proxy endpoint on first use. Clients are cached for the lifetime of the
/// transport and shared by all clones.
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    headers: HeaderMap,
    user_agent: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(origin: &OriginConfig) -> Result<Self, AppError> {
        let headers = default_headers(origin)?;
        let user_agent = origin.user_agent.clone();
        let timeout = origin.http_timeout;
        let direct = build_client(&headers, &user_agent, timeout, None)?;

        Ok(Self {
            direct,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            headers,
            user_agent,
            timeout,
        })
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, AppError> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = cache_key(endpoint);
        let mut cache = self.proxied.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Proxy client cache lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        });
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&self.headers, &self.user_agent, self.timeout, Some(endpoint))?;
        tracing::debug!(proxy = %endpoint, "Built client for proxy");
        cache.insert(key, client.clone());
        Ok(client)
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Response, AppError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(AppError::Blocked(format!("HTTP 403 for {url}")));
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get_text(&self, url: &str, proxy: Option<&ProxyEndpoint>) -> Result<String, AppError> {
        let client = self.client_for(proxy)?;
        let response = self.send(client.get(url), url).await?;

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    async fn get_bytes(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<u8>, AppError> {
        let client = self.client_for(proxy)?;
        let response = self.send(client.get(url), url).await?;

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, AppError> {
        let client = self.client_for(proxy)?;
        let response = self.send(client.post(url).json(body), url).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::HttpError(format!("Invalid JSON from {url}: {e}")))
    }
}

fn cache_key(endpoint: &ProxyEndpoint) -> String {
    match &endpoint.username {
        Some(user) => format!("{}#{user}", endpoint.address()),
        None => endpoint.address(),
    }
}

fn default_headers(origin: &OriginConfig) -> Result<HeaderMap, AppError> {
    let value = |raw: &str| {
        HeaderValue::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid header value '{raw}': {e}")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_ANY));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_PL));
    headers.insert(REFERER, value(&origin.homepage_url())?);
    headers.insert(ORIGIN, value(origin.base_url.trim_end_matches('/'))?);
    Ok(headers)
}

fn build_client(
    headers: &HeaderMap,
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers.clone())
        .timeout(timeout);

    builder = match proxy {
        Some(endpoint) => {
            let mut proxy = Proxy::all(endpoint.address())
                .map_err(|e| AppError::ConfigError(format!("Invalid proxy {endpoint}: {e}")))?;
            if let Some(user) = &endpoint.username {
                proxy = proxy.basic_auth(user, endpoint.password.as_deref().unwrap_or(""));
            }
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}
