use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::JobStatus;

/// Persisted status of one deployment job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: i64,
    pub pusher: String,
    pub branch: String,
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A remote machine and the script that updates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub address: String,
    /// Encrypted login secret; empty means key-based login.
    #[serde(default)]
    pub secret: String,
    pub script: String,
    /// Named alternatives to `script`, keyed by environment.
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
    pub label: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Host {
    /// The command to run for `variant`, falling back to the default script
    /// when the variant is unknown or absent.
    pub fn command_for(&self, variant: Option<&str>) -> &str {
        variant
            .and_then(|name| self.variants.get(name))
            .map(String::as_str)
            .unwrap_or(&self.script)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
    Discord,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Whatsapp => write!(f, "whatsapp"),
            ChannelKind::Discord => write!(f, "discord"),
        }
    }
}

/// A user's notification target. WhatsApp channels use `number`,
/// webhook channels use `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: i64,
    pub kind: ChannelKind,
    pub name: String,
    pub user_id: i64,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}
