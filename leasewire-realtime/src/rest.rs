//! Remote query API.

use std::time::Duration;

use async_trait::async_trait;
use leasewire_core::{CacheKey, FetchError};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::{ClientError, Credentials};

/// Keyed resource queries against the backend.
#[async_trait]
pub trait QueryApi: Send + Sync + 'static {
    async fn query(&self, key: &CacheKey) -> Result<Value, FetchError>;
}

/// Query `key` and decode the JSON body as `T`.
pub async fn fetch_typed<T: DeserializeOwned>(
    api: &dyn QueryApi,
    key: &CacheKey,
) -> Result<T, FetchError> {
    let body = api.query(key).await?;
    serde_json::from_value(body).map_err(|e| FetchError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// REST implementation: `GET {base_url}/api/v1/resources/{key}`.
#[derive(Clone)]
pub struct RestQueryClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl std::fmt::Debug for RestQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestQueryClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RestQueryClient {
    pub fn new(
        base_url: &str,
        credentials: &Credentials,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidEndpoint {
                endpoint: base_url.to_string(),
                reason: "expected an http:// or https:// URL".to_string(),
            });
        }
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: credentials.header_map()?,
        })
    }

    pub fn resource_url(&self, key: &CacheKey) -> String {
        format!("{}/api/v1/resources/{}", self.base_url, key)
    }

    async fn parse_response(&self, key: &CacheKey, response: reqwest::Response) -> Result<Value, FetchError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| FetchError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        Err(FetchError::Remote {
            key: key.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl QueryApi for RestQueryClient {
    async fn query(&self, key: &CacheKey) -> Result<Value, FetchError> {
        let url = self.resource_url(key);
        tracing::debug!(key = %key, url = %url, "Querying resource");
        let response = self
            .client
            .get(url)
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.parse_response(key, response).await
    }
}
