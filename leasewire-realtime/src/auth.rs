//! Client credentials and construction errors.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeader { header: &'static str, reason: String },
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// API key and/or bearer token sent with every request and handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            bearer_token: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            api_key: None,
            bearer_token: Some(token.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.bearer_token.is_none()
    }

    /// Header name/value pairs, independent of the HTTP client in use.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(api_key) = &self.api_key {
            pairs.push(("x-api-key", api_key.clone()));
        }
        if let Some(token) = &self.bearer_token {
            pairs.push(("authorization", format!("Bearer {}", token)));
        }
        pairs
    }

    pub fn header_map(&self) -> Result<reqwest::header::HeaderMap, ClientError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut headers = HeaderMap::new();
        for (name, value) in self.header_pairs() {
            let value = HeaderValue::from_str(&value).map_err(|e| ClientError::InvalidHeader {
                header: name,
                reason: e.to_string(),
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pairs() {
        let creds = Credentials {
            api_key: Some("k-1".to_string()),
            bearer_token: Some("t-1".to_string()),
        };
        let pairs = creds.header_pairs();
        assert_eq!(pairs[0], ("x-api-key", "k-1".to_string()));
        assert_eq!(pairs[1], ("authorization", "Bearer t-1".to_string()));
        assert_eq!(creds.header_map().unwrap().len(), 2);
        assert!(Credentials::default().is_empty());
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let creds = Credentials::api_key("bad\nkey");
        let err = creds.header_map().unwrap_err();
        assert!(matches!(err, ClientError::InvalidHeader { header: "x-api-key", .. }));
    }
}
