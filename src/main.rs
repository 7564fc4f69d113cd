use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use autodeploy::config::{ServerConfig, TriggerConfig, DEFAULT_WHATSAPP_ENDPOINT};
use autodeploy::deploy::AesCfbCipher;
use autodeploy::node::Node;
use autodeploy::queue::DEFAULT_QUEUE_CAPACITY;
use autodeploy::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "autodeploy")]
#[command(version)]
#[command(about = "Queue-driven deployments over ssh with live status")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server, update queue and executor
    Serve(ServeArgs),

    /// Encrypt a host secret with the configured AES key
    Encrypt {
        /// The plaintext secret
        plaintext: String,

        /// AES key (16, 24 or 32 bytes)
        #[arg(long, env = "AES_KEY", hide_env_values = true)]
        aes_key: String,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: std::net::IpAddr,

    /// JSON file with hosts, pipelines and notification channels
    #[arg(long, env = "AUTODEPLOY_SEED")]
    seed: Option<PathBuf>,

    /// Maximum number of jobs waiting in the queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    // === Executor Options ===
    /// AES key used to decrypt host secrets
    #[arg(long, env = "AES_KEY", hide_env_values = true)]
    aes_key: Option<String>,

    /// Remote user for ssh logins
    #[arg(long, default_value = "root")]
    ssh_user: String,

    /// Seconds one host may take before it is abandoned
    #[arg(long, default_value = "500")]
    host_timeout_secs: u64,

    // === Trigger Options ===
    /// Key expected in the `secretkey` header of API routes
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Secret for verifying GitHub webhook signatures
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Host record updated by pushes to tracked branches
    #[arg(long, env = "WEBHOOK_HOST_ID")]
    webhook_host_id: Option<i64>,

    // === Notification Options ===
    /// WhatsApp Cloud API bearer token
    #[arg(long, env = "WHATSAPP_TOKEN", hide_env_values = true)]
    whatsapp_token: Option<String>,

    /// WhatsApp Cloud API messages endpoint
    #[arg(long, default_value = DEFAULT_WHATSAPP_ENDPOINT)]
    whatsapp_endpoint: String,
}

// =============================================================================
// Commands
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::new(SocketAddr::new(args.bind, args.port))
        .with_queue_capacity(args.queue_capacity)
        .with_host_timeout(Duration::from_secs(args.host_timeout_secs));
    config.seed_path = args.seed;
    config.aes_key = args.aes_key;
    config.executor.ssh_user = args.ssh_user;
    config.notify.whatsapp_token = args.whatsapp_token;
    config.notify.whatsapp_endpoint = args.whatsapp_endpoint;
    config.triggers = TriggerConfig {
        api_key: args.api_key,
        webhook_secret: args.webhook_secret,
        webhook_host_id: args.webhook_host_id,
    };

    if config.triggers.api_key.is_none() {
        tracing::warn!("No API key configured; /api run endpoints will reject all requests");
    }
    if !config.triggers.webhook_enabled() {
        tracing::warn!("No webhook host configured; pushes will not trigger updates");
    }

    tracing::info!(
        addr = %config.listen_addr,
        queue_capacity = config.queue_capacity,
        host_timeout_secs = config.executor.host_timeout.as_secs(),
        "Starting autodeploy"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config).await?;
    node.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn encrypt_secret(plaintext: &str, aes_key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cipher = AesCfbCipher::new(aes_key.as_bytes())?;
    println!("{}", cipher.encrypt(plaintext)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_server(serve_args).await?;
        }
        Commands::Encrypt { plaintext, aes_key } => {
            encrypt_secret(&plaintext, &aes_key)?;
        }
    }

    Ok(())
}
