use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::deploy::{AesCfbCipher, Deployer, MissingKeyCipher, SecretCipher, SshShell};
use crate::error::Result;
use crate::hub::{HubHandle, StatusHub, DEFAULT_OBSERVER_BUFFER};
use crate::notify::Notifier;
use crate::queue::{Job, UpdateQueue};
use crate::store::MemoryStore;

/// Main process that owns the queue, the executor and the HTTP surface.
pub struct Node {
    pub config: ServerConfig,
    pub store: Arc<MemoryStore>,
    pub queue: UpdateQueue,
    pub hub: HubHandle,
    hub_loop: StatusHub,
    queue_rx: mpsc::Receiver<Job>,
    deployer: Arc<Deployer>,
}

impl Node {
    /// Build every component from `config`.
    ///
    /// # Errors
    ///
    /// Fails when the seed file cannot be read, the AES key has an invalid
    /// length, or the HTTP client for notifications cannot be built.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let store = match &config.seed_path {
            Some(path) => Arc::new(MemoryStore::load(path).await?),
            None => Arc::new(MemoryStore::new()),
        };

        let cipher: Arc<dyn SecretCipher> = match &config.aes_key {
            Some(key) => Arc::new(AesCfbCipher::new(key.as_bytes())?),
            None => {
                tracing::warn!("No AES key configured; hosts with secrets will fail to update");
                Arc::new(MissingKeyCipher)
            }
        };

        let notifier = Arc::new(Notifier::new(store.clone(), &config.notify)?);
        let (hub_loop, hub) = StatusHub::new(DEFAULT_OBSERVER_BUFFER);
        let (queue, queue_rx) = UpdateQueue::new(config.queue_capacity);
        let shell = Arc::new(SshShell::new(&config.executor));

        let deployer = Arc::new(Deployer::new(
            store.clone(),
            cipher,
            shell,
            notifier,
            hub.clone(),
            &config.executor,
        ));

        Ok(Self {
            config,
            store,
            queue,
            hub,
            hub_loop,
            queue_rx,
            deployer,
        })
    }

    /// Run until `shutdown` fires, then wait for queued jobs to finish.
    ///
    /// 1. Spawns the status hub
    /// 2. Spawns the queue worker
    /// 3. Serves HTTP until shutdown (closing the hub ends SSE streams)
    /// 4. Drains the queue
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP listener cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let Node {
            config,
            store,
            queue,
            hub,
            hub_loop,
            queue_rx,
            deployer,
        } = self;

        tokio::spawn(hub_loop.run(shutdown.clone()));

        let worker_queue = queue.clone();
        let worker = tokio::spawn(async move {
            worker_queue.work(queue_rx, deployer).await;
        });

        let state = DashboardState {
            queue: queue.clone(),
            hub,
            statuses: store,
            triggers: Arc::new(config.triggers.clone()),
        };
        let served = run_dashboard(config.listen_addr, state, shutdown.clone()).await;

        // A bind failure never saw the signal; stop the hub as well.
        shutdown.cancel();

        tracing::info!(size = queue.size(), "Draining update queue");
        queue.drain(config.drain_poll_interval).await;
        worker.abort();
        tracing::info!("Update queue drained");

        served
    }
}
