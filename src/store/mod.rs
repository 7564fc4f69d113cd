//! Persistence interfaces used by the deployment core.
//!
//! The core only needs a handful of keyed lookups and status updates, so
//! each concern is a small trait. [`MemoryStore`] implements all of them and
//! backs both the binary (seeded from JSON) and the tests.

pub mod memory;
pub mod models;

use async_trait::async_trait;

use crate::error::Result;
use crate::queue::JobStatus;

pub use memory::{MemoryStore, Seed};
pub use models::{ChannelConfig, ChannelKind, Host, Pipeline, StatusRecord};

/// Status records for deployment jobs.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn create_status(
        &self,
        pusher: &str,
        branch: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<i64>;

    /// Fails with `InvalidTransition` when the record is already terminal.
    async fn update_status(&self, id: i64, status: JobStatus, message: &str) -> Result<()>;

    async fn get_status(&self, id: i64) -> Result<StatusRecord>;

    /// Newest first.
    async fn list_statuses(&self, limit: usize, offset: usize) -> Result<Vec<StatusRecord>>;
}

#[async_trait]
pub trait HostStore: Send + Sync {
    async fn get_host(&self, id: i64) -> Result<Host>;

    async fn list_active_hosts(&self, pipeline_id: i64) -> Result<Vec<Host>>;

    async fn update_host(&self, host: Host) -> Result<()>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Only returns the pipeline when it belongs to `owner_id`.
    async fn get_pipeline(&self, id: i64, owner_id: i64) -> Result<Pipeline>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list_channels(&self, user_id: i64, kind: ChannelKind) -> Result<Vec<ChannelConfig>>;
}
