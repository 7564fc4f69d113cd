use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Command failed on {host}: {output}")]
    Command {
        host: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Timed out after {secs}s on {host}")]
    Timeout { host: String, secs: u64 },

    #[error("Failed to decrypt secret: {0}")]
    Decrypt(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Update queue is full")]
    QueueFull,

    #[error("Update queue is closed")]
    QueueClosed,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Invalid status transition for record {id}: {from} -> {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        DeployError::NotFound { kind, id }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
