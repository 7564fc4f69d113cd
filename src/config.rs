use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default WhatsApp Cloud API endpoint used when none is configured.
pub const DEFAULT_WHATSAPP_ENDPOINT: &str =
    "https://graph.facebook.com/v18.0/202325376305196/messages";

/// Configuration for remote script execution.
///
/// Every host is reached over `ssh` as the same remote user; per-host
/// values (address, secret, script) come from the host store.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Remote user to log in as
    pub ssh_user: String,
    /// Remote SSH port
    pub ssh_port: u16,
    /// Connection establishment timeout passed to ssh
    pub connect_timeout_secs: u64,
    /// Wall-clock deadline for one host (connect + run)
    pub host_timeout: Duration,
    /// Number of trailing output characters kept in the status record
    pub output_tail_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            ssh_port: 22,
            connect_timeout_secs: 10,
            host_timeout: Duration::from_secs(500),
            output_tail_chars: 300,
        }
    }
}

/// Outbound notification settings.
///
/// Channel targets (numbers, webhook URLs) are stored per user; this only
/// carries process-wide credentials.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Bearer token for the WhatsApp Cloud API.
    /// When missing, WhatsApp deliveries fail individually.
    pub whatsapp_token: Option<String>,

    /// Messages endpoint of the WhatsApp Cloud API.
    pub whatsapp_endpoint: String,

    /// Timeout for one outbound POST.
    pub request_timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            whatsapp_token: None,
            whatsapp_endpoint: DEFAULT_WHATSAPP_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Settings for the HTTP-facing triggers.
#[derive(Debug, Clone, Default)]
pub struct TriggerConfig {
    /// Shared key expected in the `secretkey` header of `/api` routes.
    /// When unset, the API routes reject every request.
    pub api_key: Option<String>,

    /// HMAC key for `X-Hub-Signature-256`. When unset, webhook payloads
    /// are accepted without signature verification.
    pub webhook_secret: Option<String>,

    /// Host record updated by branch pushes.
    pub webhook_host_id: Option<i64>,
}

impl TriggerConfig {
    /// Check whether webhook pushes can be turned into jobs.
    pub fn webhook_enabled(&self) -> bool {
        self.webhook_host_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub queue_capacity: usize,
    /// AES key used to decrypt host secrets
    pub aes_key: Option<String>,
    /// JSON file used to seed the in-memory store
    pub seed_path: Option<PathBuf>,
    /// Interval between `size()` polls while draining
    pub drain_poll_interval: Duration,
    pub executor: ExecutorConfig,
    pub notify: NotifyConfig,
    pub triggers: TriggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            queue_capacity: 100,
            aes_key: None,
            seed_path: None,
            drain_poll_interval: Duration::from_millis(500),
            executor: ExecutorConfig::default(),
            notify: NotifyConfig::default(),
            triggers: TriggerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.executor.host_timeout = timeout;
        self
    }
}
