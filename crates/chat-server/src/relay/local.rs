//! In-process relay for single-instance deployments and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::warn;

use super::{EventStream, Relay};
use crate::error::Result;
use crate::models::{ThreadEvent, ThreadId};

/// Broadcast channel per thread
pub struct LocalRelay {
    channels: Mutex<HashMap<ThreadId, broadcast::Sender<ThreadEvent>>>,
    capacity: usize,
}

impl LocalRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of threads with at least one subscriber
    pub fn active_channels(&self) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl Relay for LocalRelay {
    async fn publish(&self, event: &ThreadEvent) -> Result<()> {
        let mut channels = self.channels.lock();
        if let Some(tx) = channels.get(&event.thread_id) {
            if tx.send(event.clone()).is_err() {
                // last subscriber went away
                channels.remove(&event.thread_id);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, thread_id: ThreadId) -> Result<EventStream> {
        let mut rx = {
            let mut channels = self.channels.lock();
            channels
                .entry(thread_id)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(thread_id = %thread_id, skipped, "Relay subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
