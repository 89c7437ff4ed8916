use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{ChatSurface, Interaction, MessageHandle, Render};
use crate::bus::InteractionBus;
use crate::config::BotConfig;

/// Chat platform reached through an HTTP gateway process.
///
/// Outbound renders go to the gateway over REST; inbound interactions are
/// posted by the gateway to our API and routed through the [`InteractionBus`].
pub struct GatewaySurface {
    client: Client,
    base_url: String,
    bus: Arc<InteractionBus>,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    channel_id: &'a str,
    #[serde(flatten)]
    render: &'a Render,
}

impl GatewaySurface {
    pub fn new(config: &BotConfig, bus: Arc<InteractionBus>) -> Self {
        Self {
            client: Client::new(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            bus,
        }
    }
}

#[async_trait::async_trait]
impl ChatSurface for GatewaySurface {
    async fn send(&self, channel_id: &str, render: &Render) -> Result<MessageHandle> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&NewMessage { channel_id, render })
            .send()
            .await
            .context("Failed to call chat gateway")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat gateway error ({}): {}", status, body);
        }

        response
            .json::<MessageHandle>()
            .await
            .context("Failed to parse chat gateway response")
    }

    async fn edit(&self, handle: &MessageHandle, render: &Render) -> Result<()> {
        let url = format!(
            "{}/messages/{}/{}",
            self.base_url, handle.channel_id, handle.message_id
        );
        let response = self
            .client
            .patch(&url)
            .json(render)
            .send()
            .await
            .context("Failed to call chat gateway")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat gateway error ({}): {}", status, body);
        }
        Ok(())
    }

    fn subscribe(&self, handle: &MessageHandle) -> oneshot::Receiver<Interaction> {
        self.bus.subscribe(handle)
    }
}
