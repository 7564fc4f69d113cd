use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{DeployError, Result};
use crate::queue::JobStatus;
use crate::store::models::{ChannelConfig, ChannelKind, Host, Pipeline, StatusRecord};
use crate::store::{ChannelStore, HostStore, PipelineStore, StatusStore};

/// Initial contents for a [`MemoryStore`], read from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Default)]
struct Inner {
    statuses: HashMap<i64, StatusRecord>,
    next_status_id: i64,
    hosts: HashMap<i64, Host>,
    pipelines: HashMap<i64, Pipeline>,
    channels: Vec<ChannelConfig>,
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let inner = Inner {
            hosts: seed.hosts.into_iter().map(|h| (h.id, h)).collect(),
            pipelines: seed.pipelines.into_iter().map(|p| (p.id, p)).collect(),
            channels: seed.channels,
            ..Default::default()
        };

        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Read a JSON seed file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&raw)?;

        tracing::info!(
            path = %path.display(),
            hosts = seed.hosts.len(),
            pipelines = seed.pipelines.len(),
            channels = seed.channels.len(),
            "Loaded store seed"
        );

        Ok(Self::from_seed(seed))
    }

    pub async fn insert_host(&self, host: Host) {
        self.inner.write().await.hosts.insert(host.id, host);
    }

    pub async fn insert_pipeline(&self, pipeline: Pipeline) {
        self.inner.write().await.pipelines.insert(pipeline.id, pipeline);
    }

    pub async fn insert_channel(&self, channel: ChannelConfig) {
        self.inner.write().await.channels.push(channel);
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn create_status(
        &self,
        pusher: &str,
        branch: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<i64> {
        let mut inner = self.inner.write().await;
        inner.next_status_id += 1;
        let id = inner.next_status_id;
        let now = Utc::now();

        inner.statuses.insert(
            id,
            StatusRecord {
                id,
                pusher: pusher.to_string(),
                branch: branch.to_string(),
                status,
                message: message.to_string(),
                created_at: now,
                updated_at: now,
            },
        );

        Ok(id)
    }

    async fn update_status(&self, id: i64, status: JobStatus, message: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .statuses
            .get_mut(&id)
            .ok_or_else(|| DeployError::not_found("status", id))?;

        if !record.status.can_transition_to(status) {
            return Err(DeployError::InvalidTransition {
                id,
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }

        record.status = status;
        record.message = message.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get_status(&self, id: i64) -> Result<StatusRecord> {
        self.inner
            .read()
            .await
            .statuses
            .get(&id)
            .cloned()
            .ok_or_else(|| DeployError::not_found("status", id))
    }

    async fn list_statuses(&self, limit: usize, offset: usize) -> Result<Vec<StatusRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<&StatusRecord> = inner.statuses.values().collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(records
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn get_host(&self, id: i64) -> Result<Host> {
        self.inner
            .read()
            .await
            .hosts
            .get(&id)
            .cloned()
            .ok_or_else(|| DeployError::not_found("host", id))
    }

    async fn list_active_hosts(&self, pipeline_id: i64) -> Result<Vec<Host>> {
        let inner = self.inner.read().await;
        let mut hosts: Vec<Host> = inner
            .hosts
            .values()
            .filter(|h| h.active && h.pipeline_id == Some(pipeline_id))
            .cloned()
            .collect();
        hosts.sort_by_key(|h| h.id);
        Ok(hosts)
    }

    async fn update_host(&self, host: Host) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.hosts.get_mut(&host.id) {
            Some(existing) => {
                *existing = host;
                Ok(())
            }
            None => Err(DeployError::not_found("host", host.id)),
        }
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get_pipeline(&self, id: i64, owner_id: i64) -> Result<Pipeline> {
        self.inner
            .read()
            .await
            .pipelines
            .get(&id)
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| DeployError::not_found("pipeline", id))
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn list_channels(&self, user_id: i64, kind: ChannelKind) -> Result<Vec<ChannelConfig>> {
        Ok(self
            .inner
            .read()
            .await
            .channels
            .iter()
            .filter(|c| c.user_id == user_id && c.kind == kind)
            .cloned()
            .collect())
    }
}
