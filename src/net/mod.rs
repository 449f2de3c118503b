//! HTTP capability used by the REST name resolvers and the explorer discoverer.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::HttpError;

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GETs `url` and parses the body as JSON, optionally with a bearer token.
    async fn get_json(&self, url: &str, bearer: Option<&str>) -> Result<Value, HttpError>;

    /// POSTs `body` as JSON to `url` and parses the response as JSON.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// # Errors
    /// * If the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> eyre::Result<Self> {
        // Create a client with a timeout
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("walletsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, HttpError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }
}

fn request_error(e: &reqwest::Error) -> HttpError {
    if e.is_builder() {
        HttpError::Url(e.to_string())
    } else {
        HttpError::Request(e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(&self, url: &str, bearer: Option<&str>) -> Result<Value, HttpError> {
        log::debug!("net: GET {url}");
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| request_error(&e))?;
        Self::read_json(response).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        log::debug!("net: POST {url}");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let client = ReqwestHttpClient::new(Duration::from_secs(1)).unwrap();
        let result = client.get_json("not a url", None).await;
        assert!(matches!(result, Err(HttpError::Url(_))));
    }
}
