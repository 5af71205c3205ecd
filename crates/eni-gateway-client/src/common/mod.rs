//! Common utilities for the ENI gateway client
//!
//! Provides the JSON-over-HTTP plumbing shared by every gateway call.

use crate::error::EniGatewayError;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// HTTP client wrapper bound to a gateway base URL
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, EniGatewayError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        Self::decode(response, &url).await
    }

    /// Make a POST request and decode the JSON response
    pub async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EniGatewayError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        Self::decode(response, &url).await
    }

    /// Make a POST request whose response carries no body
    pub async fn post_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), EniGatewayError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        Self::check(response, &url).await
    }

    /// Make a PUT request whose response carries no body
    pub async fn put_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), EniGatewayError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);

        let response = self.client.put(&url).json(body).send().await?;
        Self::check(response, &url).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), EniGatewayError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.client.delete(&url).send().await?;
        Self::check(response, &url).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response, url: &str) -> Result<T, EniGatewayError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Self::status_error(status, url, &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            EniGatewayError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                body.chars().take(500).collect::<String>()
            ))
        })
    }

    async fn check(response: Response, url: &str) -> Result<(), EniGatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::status_error(status, url, &body))
    }

    fn status_error(status: StatusCode, url: &str, body: &str) -> EniGatewayError {
        match status {
            StatusCode::NOT_FOUND => EniGatewayError::NotFound(url.to_string()),
            StatusCode::BAD_REQUEST => EniGatewayError::InvalidRequest(format!("{} - {}", url, body)),
            _ => EniGatewayError::Api(format!("{} returned {} - {}", url, status, body)),
        }
    }
}
