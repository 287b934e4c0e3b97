//! Linode API client implementation.
//!
//! This module provides the HTTP client for the Linode REST API v4. Reads are
//! retried on transient failures; creates, updates and deletes are sent once,
//! since repeating a create could provision a second instance.

use reqwest::{Client, Method, Response, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::ProviderError;

use super::types::{CreateInstanceRequest, ErrorResponse, Instance, Page, UpdateInstanceRequest};

/// Linode API base URL.
pub const LINODE_API_URL: &str = "https://api.linode.com/v4";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for a read.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Header carrying a collection filter.
const FILTER_HEADER: &str = "X-Filter";

type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Linode API client.
#[derive(Debug, Clone)]
pub struct LinodeClient {
    /// HTTP client.
    client: Client,
    /// API base URL, without a trailing slash.
    base_url: String,
    /// API token.
    token: SecretString,
    /// Base delay between read retries.
    retry_delay: Duration,
}

/// Builds the shared HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> ProviderResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .user_agent(concat!("vmstack/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))
}

impl LinodeClient {
    /// Creates a client from an existing HTTP client and base URL.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str, token: SecretString) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Sets the base delay between read retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn instance_path(id: &str) -> String {
        format!("/linode/instances/{id}")
    }

    /// Sends one request and maps error statuses.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ProviderResult<Response> {
        self.send_filtered(method, path, body, None).await
    }

    async fn send_filtered<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        filter: Option<&str>,
    ) -> ProviderResult<Response> {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(self.token.expose_secret());
        if let Some(filter) = filter {
            request = request.header(FILTER_HEADER, filter);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationFailed {
                message: String::from("Invalid or unauthorized API token"),
            });
        }

        Ok(response)
    }

    /// Turns a non-success response into an API error.
    async fn api_error(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.message())
            .unwrap_or(body);
        ProviderError::api_error(status, message)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }

    /// Gets an instance; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails after retries.
    pub async fn get_instance(&self, id: &str) -> ProviderResult<Option<Instance>> {
        self.get(&Self::instance_path(id), None).await
    }

    /// Finds the instance with a label. Labels are unique per account.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails after retries.
    pub async fn find_instance_by_label(&self, label: &str) -> ProviderResult<Option<Instance>> {
        let filter = serde_json::json!({ "label": label }).to_string();
        let page: Option<Page<Instance>> = self.get("/linode/instances", Some(&filter)).await?;
        Ok(page.and_then(|p| p.data.into_iter().find(|i| i.label == label)))
    }

    /// GETs a resource with retries; `None` on 404.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<&str>,
    ) -> ProviderResult<Option<T>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for GET {path}");
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            let outcome = match self.send_filtered::<()>(Method::GET, path, None, filter).await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) => Self::parse(response).await.map(Some),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(found) => return Ok(found),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::network("Max retries exceeded")))
    }

    /// Creates an instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be created.
    pub async fn create_instance(&self, request: &CreateInstanceRequest) -> ProviderResult<Instance> {
        debug!("Creating instance {} in {}", request.label, request.region);
        let response = self
            .send(Method::POST, "/linode/instances", Some(request))
            .await?;
        Self::parse(response).await
    }

    /// Updates an instance's label and tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be updated.
    pub async fn update_instance(
        &self,
        id: &str,
        request: &UpdateInstanceRequest,
    ) -> ProviderResult<Instance> {
        debug!("Updating instance {id}");
        let response = self
            .send(Method::PUT, &Self::instance_path(id), Some(request))
            .await?;
        Self::parse(response).await
    }

    /// Deletes an instance. An instance that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be deleted.
    pub async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        debug!("Deleting instance {id}");
        let response = self
            .send::<()>(Method::DELETE, &Self::instance_path(id), None)
            .await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }
}
