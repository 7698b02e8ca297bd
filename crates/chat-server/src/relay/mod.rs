//! Realtime Relay
//!
//! Cross-process fan-out of newly persisted messages, one channel per
//! thread. A process subscribes to a thread only while it holds live
//! connections for it (see `ConnectionRegistry`).

pub mod local;
pub mod redis_relay;

pub use self::local::LocalRelay;
pub use self::redis_relay::RedisRelay;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{ThreadEvent, ThreadId};

/// Stream of events published on one thread's channel. Dropping it unsubscribes.
pub type EventStream = BoxStream<'static, ThreadEvent>;

#[async_trait]
pub trait Relay: Send + Sync {
    /// Broadcast an already-persisted message to every subscribed process.
    async fn publish(&self, event: &ThreadEvent) -> Result<()>;

    /// Subscribe to a thread's channel.
    async fn subscribe(&self, thread_id: ThreadId) -> Result<EventStream>;
}
