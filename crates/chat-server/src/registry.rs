//! Connection Registry
//!
//! Process-local map of live connections per thread. The first
//! registration for a thread starts a relay subscription task; the last
//! deregistration aborts it. All map mutation happens under one lock that
//! is never held across an await.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::models::{ThreadEvent, ThreadId};
use crate::relay::Relay;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Pending,
    Ready,
    Failed,
}

struct LiveConnection {
    user_id: String,
    tx: mpsc::Sender<ThreadEvent>,
}

struct ThreadEntry {
    /// Id of the connection that opened this entry; tells entries for the
    /// same thread apart across subscribe/unsubscribe cycles.
    generation: ConnectionId,
    connections: HashMap<ConnectionId, LiveConnection>,
    forwarder: JoinHandle<()>,
    subscription: watch::Receiver<Subscription>,
}

struct Inner {
    relay: Arc<dyn Relay>,
    threads: Mutex<HashMap<ThreadId, ThreadEntry>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Inner {
    fn deregister(&self, thread_id: ThreadId, id: ConnectionId) -> bool {
        let mut threads = self.threads.lock();
        let Some(entry) = threads.get_mut(&thread_id) else {
            return false;
        };
        let removed = entry.connections.remove(&id).is_some();
        if entry.connections.is_empty() {
            if let Some(entry) = threads.remove(&thread_id) {
                entry.forwarder.abort();
                debug!(thread_id = %thread_id, "Released relay subscription");
            }
        }
        removed
    }

    /// Drop a thread entry, but only the one this forwarder belongs to
    fn remove_generation(&self, thread_id: ThreadId, generation: ConnectionId) {
        let mut threads = self.threads.lock();
        if threads
            .get(&thread_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            threads.remove(&thread_id);
        }
    }

    /// Push an event to every local connection of the thread except the sender's.
    fn fan_out(&self, event: &ThreadEvent) -> usize {
        let mut threads = self.threads.lock();
        let Some(entry) = threads.get_mut(&event.thread_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, conn) in &entry.connections {
            if conn.user_id == event.message.sender {
                continue;
            }
            match conn.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        thread_id = %event.thread_id,
                        connection = id,
                        seq = event.message.seq,
                        "Connection backlog full, dropping live delivery"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            entry.connections.remove(&id);
            debug!(thread_id = %event.thread_id, connection = id, "Deregistered closed connection");
        }
        if entry.connections.is_empty() {
            if let Some(entry) = threads.remove(&event.thread_id) {
                entry.forwarder.abort();
            }
        }
        delivered
    }
}

async fn forward(
    inner: Weak<Inner>,
    relay: Arc<dyn Relay>,
    thread_id: ThreadId,
    generation: ConnectionId,
    state: watch::Sender<Subscription>,
) {
    let mut events = match relay.subscribe(thread_id).await {
        Ok(events) => {
            state.send_replace(Subscription::Ready);
            events
        }
        Err(e) => {
            warn!(thread_id = %thread_id, "Relay subscribe failed: {}", e);
            state.send_replace(Subscription::Failed);
            if let Some(inner) = inner.upgrade() {
                inner.remove_generation(thread_id, generation);
            }
            return;
        }
    };

    while let Some(event) = events.next().await {
        if event.thread_id != thread_id {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.fan_out(&event);
    }

    // Relay went away; close this thread's connections so clients reconnect.
    warn!(thread_id = %thread_id, "Relay stream ended");
    if let Some(inner) = inner.upgrade() {
        inner.remove_generation(thread_id, generation);
    }
}

/// Live connection handed to a connection handler.
///
/// Dropping it deregisters the connection.
pub struct Registration {
    pub id: ConnectionId,
    pub thread_id: ThreadId,
    pub user_id: String,
    pub events: mpsc::Receiver<ThreadEvent>,
    inner: Weak<Inner>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.deregister(self.thread_id, self.id);
        }
    }
}

/// Per-process registry of live chat connections
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    /// `buffer` is the outbound queue size of each connection.
    pub fn new(relay: Arc<dyn Relay>, buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                threads: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a connection and wait until this process is subscribed to
    /// the thread's relay channel, so nothing published afterwards is missed.
    pub async fn register(&self, thread_id: ThreadId, user_id: &str) -> Result<Registration> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        let mut subscription = {
            let mut threads = self.inner.threads.lock();
            let entry = threads.entry(thread_id).or_insert_with(|| {
                let (state_tx, state_rx) = watch::channel(Subscription::Pending);
                let forwarder = tokio::spawn(forward(
                    Arc::downgrade(&self.inner),
                    self.inner.relay.clone(),
                    thread_id,
                    id,
                    state_tx,
                ));
                ThreadEntry {
                    generation: id,
                    connections: HashMap::new(),
                    forwarder,
                    subscription: state_rx,
                }
            });
            entry.connections.insert(
                id,
                LiveConnection {
                    user_id: user_id.to_string(),
                    tx,
                },
            );
            entry.subscription.clone()
        };

        let registration = Registration {
            id,
            thread_id,
            user_id: user_id.to_string(),
            events: rx,
            inner: Arc::downgrade(&self.inner),
        };

        let state = subscription
            .wait_for(|s| *s != Subscription::Pending)
            .await
            .map(|s| *s)
            .unwrap_or(Subscription::Failed);

        if state != Subscription::Ready {
            // dropping the registration removes whatever is left of it
            return Err(ChatError::Internal(format!(
                "relay subscription for thread {thread_id} failed"
            )));
        }

        debug!(thread_id = %thread_id, connection = id, user = %user_id, "Registered connection");
        Ok(registration)
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .threads
            .lock()
            .values()
            .map(|entry| entry.connections.len())
            .sum()
    }

    /// Whether this process currently holds a relay subscription for the thread
    pub fn is_subscribed(&self, thread_id: ThreadId) -> bool {
        self.inner.threads.lock().contains_key(&thread_id)
    }

    /// Shutdown: drop every connection and subscription.
    pub fn close_all(&self) {
        let entries: Vec<ThreadEntry> = {
            let mut threads = self.inner.threads.lock();
            threads.drain().map(|(_, entry)| entry).collect()
        };
        let count: usize = entries.iter().map(|e| e.connections.len()).sum();
        for entry in entries {
            entry.forwarder.abort();
        }
        info!(connections = count, "Closed all live connections");
    }
}
