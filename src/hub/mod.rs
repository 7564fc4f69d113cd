//! Live status broadcasting.
//!
//! One [`StatusHub`] runs per process on its own task. Everything else talks
//! to it through a cloneable [`HubHandle`]:
//!
//! - [`HubHandle::subscribe`] registers a new [`Observer`]
//! - [`HubHandle::broadcast`] forwards a status line to every observer
//!
//! Delivery to an observer never waits: each observer has a small buffer and
//! messages are dropped for that observer when it is full. Observers whose
//! receiving side has gone away are pruned on the next broadcast, and an
//! [`Observer`] deregisters itself when dropped.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-observer buffer used when none is given.
pub const DEFAULT_OBSERVER_BUFFER: usize = 32;

#[derive(Debug)]
enum HubCommand {
    Add {
        id: Uuid,
        tx: mpsc::Sender<String>,
    },
    Remove {
        id: Uuid,
    },
    Broadcast(String),
    Count(oneshot::Sender<usize>),
}

/// The dispatch loop owning the observer registry.
pub struct StatusHub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    observers: HashMap<Uuid, mpsc::Sender<String>>,
}

impl StatusHub {
    pub fn new(observer_buffer: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let hub = Self {
            rx,
            observers: HashMap::new(),
        };
        let handle = HubHandle {
            tx,
            observer_buffer: observer_buffer.max(1),
        };

        (hub, handle)
    }

    /// Run until `shutdown` fires or every handle and observer is gone.
    ///
    /// Stopping drops all observer senders, which ends their streams.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Starting status hub");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        tracing::info!(observers = self.observers.len(), "Status hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Add { id, tx } => {
                self.observers.insert(id, tx);
                tracing::debug!(observer = %id, total = self.observers.len(), "Observer added");
            }
            HubCommand::Remove { id } => {
                if self.observers.remove(&id).is_some() {
                    tracing::debug!(observer = %id, total = self.observers.len(), "Observer removed");
                }
            }
            HubCommand::Broadcast(message) => self.broadcast(message),
            HubCommand::Count(reply) => {
                let _ = reply.send(self.observers.len());
            }
        }
    }

    fn broadcast(&mut self, message: String) {
        tracing::debug!(observers = self.observers.len(), message = %message, "Broadcasting status");

        let mut gone = Vec::new();
        for (id, tx) in &self.observers {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(observer = %id, "Observer lagging, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in gone {
            self.observers.remove(&id);
            tracing::debug!(observer = %id, "Pruned disconnected observer");
        }
    }
}

/// Cheap, cloneable access to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    observer_buffer: usize,
}

impl HubHandle {
    /// Register a new observer.
    pub fn subscribe(&self) -> Observer {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.observer_buffer);

        if self.tx.send(HubCommand::Add { id, tx }).is_err() {
            tracing::warn!(observer = %id, "Status hub stopped, observer will receive nothing");
        }

        Observer {
            id,
            rx,
            hub: self.tx.clone(),
        }
    }

    /// Queue `message` for every registered observer. Never blocks.
    pub fn broadcast(&self, message: impl Into<String>) {
        if self.tx.send(HubCommand::Broadcast(message.into())).is_err() {
            tracing::debug!("Status hub stopped, broadcast discarded");
        }
    }

    /// Number of registered observers, or zero when the hub has stopped.
    pub async fn observer_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(HubCommand::Count(reply_tx)).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

/// A live subscriber. Yields every status line broadcast after it joined.
#[derive(Debug)]
pub struct Observer {
    id: Uuid,
    rx: mpsc::Receiver<String>,
    hub: mpsc::UnboundedSender<HubCommand>,
}

impl Observer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next message, or `None` once the hub has stopped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for Observer {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let _ = self.hub.send(HubCommand::Remove { id: self.id });
    }
}
