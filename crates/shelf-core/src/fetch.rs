use serde_json::Value;

use crate::error::AppError;
use crate::proxy::{ProxyRotator, ProxySource};
use crate::traits::HttpTransport;

/// Transport whose every call goes through the proxy rotation policy.
#[derive(Clone)]
pub struct ProxiedFetcher<T: HttpTransport, P: ProxySource> {
    transport: T,
    rotator: ProxyRotator<P>,
}

impl<T: HttpTransport, P: ProxySource> ProxiedFetcher<T, P> {
    pub fn new(transport: T, rotator: ProxyRotator<P>) -> Self {
        Self { transport, rotator }
    }

    pub fn rotator(&self) -> &ProxyRotator<P> {
        &self.rotator
    }

    pub async fn get_text(&self, url: &str) -> Result<String, AppError> {
        let transport = &self.transport;
        self.rotator
            .with_retry(|proxy| async move { transport.get_text(url, proxy.as_ref()).await })
            .await
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let transport = &self.transport;
        self.rotator
            .with_retry(|proxy| async move { transport.get_bytes(url, proxy.as_ref()).await })
            .await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, AppError> {
        let transport = &self.transport;
        self.rotator
            .with_retry(|proxy| async move { transport.post_json(url, body, proxy.as_ref()).await })
            .await
    }
}
