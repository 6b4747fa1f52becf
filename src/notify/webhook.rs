//! Webhook notification channel.
//!
//! Posts each notification as JSON to a configured URL per recipient class.
//! The receiving side bridges to the actual email/SMS/push provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{NotificationPayload, RecipientClass};

use super::NotificationChannel;

/// Webhook endpoints, one per recipient class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub citizen_url: String,
    pub authority_url: String,
}

/// Reqwest-backed channel.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

/// Acknowledgement expected from the webhook receiver.
#[derive(Debug, Deserialize)]
struct WebhookAck {
    delivered: bool,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { config, client })
    }

    fn url_for(&self, recipient_class: RecipientClass) -> &str {
        match recipient_class {
            RecipientClass::Citizen => &self.config.citizen_url,
            RecipientClass::Authority => &self.config.authority_url,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        recipient_class: RecipientClass,
        recipient_ref: &str,
        payload: &NotificationPayload,
    ) -> Result<bool> {
        let response = self
            .client
            .post(self.url_for(recipient_class))
            .json(&json!({
                "recipient_class": recipient_class,
                "recipient_ref": recipient_ref,
                "title": payload.title,
                "body": payload.body,
            }))
            .send()
            .await
            .context("failed to post notification webhook")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }

        let ack: WebhookAck = response
            .json()
            .await
            .context("failed to parse webhook acknowledgement")?;
        Ok(ack.delivered)
    }
}
