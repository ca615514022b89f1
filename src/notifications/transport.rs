//! Webhook delivery.

use super::models::OutboundMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers formatted notification messages.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Send every message, logging failures instead of returning them.
    async fn send_all(&self, messages: Vec<OutboundMessage>) {
        for message in messages {
            if let Err(e) = self.send(&message).await {
                warn!("Notify({}): send failed: {:#}", message.destination, e);
            }
        }
    }
}

/// POSTs JSON bodies to webhook URLs.
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut request = self.client.post(&message.url).json(&message.body);
        for (name, value) in &message.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", message.url))?;
        let status = response.status();
        response
            .error_for_status()
            .with_context(|| format!("webhook {} rejected notification", message.destination))?;
        debug!("Notify({}): delivered ({})", message.destination, status);
        Ok(())
    }
}
