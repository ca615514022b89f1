//! Shared HTTP plumbing: gating, retries and error mapping.

use super::error::TransportError;
use super::gate::RequestGate;
use super::retry::RetryPolicy;
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Builds a reqwest client with the request timeout applied.
pub fn build_client(timeout_secs: u64, cookie_store: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .cookie_store(cookie_store)
        .build()
        .context("Failed to build HTTP client")
}

/// Sends requests through a gate, retrying transient failures.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    retry: RetryPolicy,
    gate: Arc<RequestGate>,
}

impl HttpExecutor {
    pub fn new(client: Client, retry: RetryPolicy, gate: Arc<RequestGate>) -> Self {
        Self {
            client,
            retry,
            gate,
        }
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }

    /// Send a request, retrying timeouts, connection errors, 5xx and 429.
    ///
    /// Other statuses, including 4xx, are returned to the caller untouched.
    pub async fn execute<F>(&self, label: &str, build: F) -> Result<Response, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let client = &self.client;
        let gate = self.gate.as_ref();
        let build = &build;
        self.retry
            .run(label, move || async move {
                let request = build(client)
                    .build()
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                let url = request.url().to_string();
                let _permit = gate.acquire().await;
                let response = client
                    .execute(request)
                    .await
                    .map_err(|e| TransportError::from_reqwest(&url, e))?;
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(status_error(response).await);
                }
                Ok(response)
            })
            .await
    }

    /// Like [`execute`](Self::execute), but any non-2xx status is an error.
    pub async fn send<F>(&self, label: &str, build: F) -> Result<Response, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.execute(label, build).await?;
        ensure_success(response).await
    }

    pub async fn json<T, F>(&self, label: &str, build: F) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(label, build).await?;
        decode_json(response).await
    }
}

pub async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let url = response.url().to_string();
    response.json::<T>().await.map_err(|e| TransportError::Decode {
        url,
        message: e.to_string(),
    })
}

async fn status_error(response: Response) -> TransportError {
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status {
        url,
        status,
        body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}
