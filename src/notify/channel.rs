use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;

use crate::error::{DeployError, Result};
use crate::notify::Severity;
use crate::store::{ChannelConfig, ChannelKind};

/// One way of delivering a message: a single JSON POST that succeeds iff
/// the remote answers `200 OK`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, channel: &ChannelConfig, message: &str, severity: Severity)
        -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WhatsappText<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct WhatsappMessage<'a> {
    messaging_product: &'a str,
    preview_url: bool,
    recipient_type: &'a str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    text: WhatsappText<'a>,
}

/// WhatsApp Cloud API text messages. Ignores severity.
#[derive(Debug, Clone)]
pub struct WhatsappAdapter {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl WhatsappAdapter {
    pub fn new(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn deliver(
        &self,
        channel: &ChannelConfig,
        message: &str,
        _severity: Severity,
    ) -> Result<()> {
        let token = self.token.as_deref().ok_or_else(|| {
            DeployError::Configuration("WhatsApp token is not configured".to_string())
        })?;
        let number = channel.number.as_deref().ok_or_else(|| {
            DeployError::Configuration(format!("channel '{}' has no number", channel.name))
        })?;

        let payload = WhatsappMessage {
            messaging_product: "whatsapp",
            preview_url: false,
            recipient_type: "individual",
            to: number,
            kind: "text",
            text: WhatsappText { body: message },
        };

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&payload);

        send(request, ChannelKind::Whatsapp).await
    }
}

#[derive(Debug, Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
}

#[derive(Debug, Serialize)]
struct DiscordMessage<'a> {
    content: &'a str,
    embeds: Vec<DiscordEmbed<'a>>,
}

/// Discord incoming webhooks, rendered as an embed tinted by severity.
#[derive(Debug, Clone)]
pub struct DiscordAdapter {
    client: Client,
}

impl DiscordAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Discord answers `204` unless asked to wait for the created message.
    fn webhook_url(raw: &str) -> Result<Url> {
        let mut url = Url::parse(raw)
            .map_err(|e| DeployError::Configuration(format!("invalid webhook url: {}", e)))?;
        if !url.query_pairs().any(|(key, _)| key == "wait") {
            url.query_pairs_mut().append_pair("wait", "true");
        }
        Ok(url)
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn deliver(
        &self,
        channel: &ChannelConfig,
        message: &str,
        severity: Severity,
    ) -> Result<()> {
        let raw = channel.url.as_deref().ok_or_else(|| {
            DeployError::Configuration(format!("channel '{}' has no url", channel.name))
        })?;
        let url = Self::webhook_url(raw)?;

        let payload = DiscordMessage {
            content: "",
            embeds: vec![DiscordEmbed {
                title: "Update",
                description: message,
                color: severity.embed_color(),
            }],
        };

        send(self.client.post(url).json(&payload), ChannelKind::Discord).await
    }
}

async fn send(request: reqwest::RequestBuilder, kind: ChannelKind) -> Result<()> {
    let response = request.send().await?;
    let status = response.status();

    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(DeployError::Notification(format!(
            "{} responded {}: {}",
            kind,
            status,
            body.trim()
        )));
    }

    Ok(())
}
