//! Outcome notifications.
//!
//! [`Notifier::send_all`] looks up every channel a user configured, one
//! channel kind at a time, and delivers to all of them concurrently. A
//! failed delivery is logged and reported but never stops the others.

pub mod channel;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::config::NotifyConfig;
use crate::error::{DeployError, Result};
use crate::store::{ChannelConfig, ChannelKind, ChannelStore};

pub use channel::{ChannelAdapter, DiscordAdapter, WhatsappAdapter};

/// How an outcome should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    InProgress,
    Success,
    Failure,
}

impl Severity {
    pub fn color(&self) -> &'static str {
        match self {
            Severity::InProgress => "yellow",
            Severity::Success => "green",
            Severity::Failure => "red",
        }
    }

    /// RGB integer for chat embeds.
    pub fn embed_color(&self) -> u32 {
        match self {
            Severity::InProgress => 16776960,
            Severity::Success => 5763719,
            Severity::Failure => 15548997,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelFailure {
    pub kind: ChannelKind,
    pub channel: String,
    pub reason: String,
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failures: Vec<ChannelFailure>,
}

/// Anything that can report an outcome to a user.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send_all(&self, message: &str, user_id: i64, severity: Severity)
        -> Result<DeliveryReport>;
}

pub struct Notifier {
    channels: Arc<dyn ChannelStore>,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl Notifier {
    /// Build a notifier with the WhatsApp and Discord adapters.
    pub fn new(channels: Arc<dyn ChannelStore>, config: &NotifyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
            Arc::new(WhatsappAdapter::new(
                client.clone(),
                config.whatsapp_endpoint.clone(),
                config.whatsapp_token.clone(),
            )),
            Arc::new(DiscordAdapter::new(client)),
        ];

        Ok(Self::with_adapters(channels, adapters))
    }

    pub fn with_adapters(
        channels: Arc<dyn ChannelStore>,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
    ) -> Self {
        Self { channels, adapters }
    }
}

#[async_trait]
impl Notify for Notifier {
    async fn send_all(
        &self,
        message: &str,
        user_id: i64,
        severity: Severity,
    ) -> Result<DeliveryReport> {
        let mut targets: Vec<(Arc<dyn ChannelAdapter>, ChannelConfig)> = Vec::new();

        for adapter in &self.adapters {
            let kind = adapter.kind();
            let configs = self.channels.list_channels(user_id, kind).await?;
            if configs.is_empty() {
                tracing::debug!(user_id, kind = %kind, "No channels of this kind, skipping");
                continue;
            }
            targets.extend(configs.into_iter().map(|c| (adapter.clone(), c)));
        }

        if targets.is_empty() {
            tracing::warn!(user_id, "No notification channel configured");
            return Err(DeployError::Configuration(format!(
                "no notification channel configured for user {}",
                user_id
            )));
        }

        let mut deliveries = JoinSet::new();
        for (adapter, config) in targets {
            let message = message.to_string();
            deliveries.spawn(async move {
                let result = adapter.deliver(&config, &message, severity).await;
                (adapter.kind(), config.name, result)
            });
        }

        let mut report = DeliveryReport::default();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => report.delivered += 1,
                Ok((kind, channel, Err(e))) => {
                    tracing::warn!(user_id, kind = %kind, channel = %channel, error = %e, "Notification delivery failed");
                    report.failures.push(ChannelFailure {
                        kind,
                        channel,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(user_id, error = %e, "Notification task aborted");
                }
            }
        }

        tracing::info!(
            user_id,
            color = severity.color(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "Notifications sent"
        );

        Ok(report)
    }
}
