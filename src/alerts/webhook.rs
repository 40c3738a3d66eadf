//! Webhook alert sink: one JSON POST per alert

use super::{AlertPayload, AlertSink};
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, url }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected payload")?;
        tracing::debug!(entity = %payload.entity, "Webhook delivered");
        Ok(())
    }
}
