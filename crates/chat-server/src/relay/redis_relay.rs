//! Redis PUBLISH/SUBSCRIBE relay for multi-process deployments

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{EventStream, Relay};
use crate::error::Result;
use crate::models::{ThreadEvent, ThreadId};

pub struct RedisRelay {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisRelay {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        info!("[Relay] Connected to Redis");
        Ok(Self { client, publisher })
    }

    pub fn channel_name(thread_id: ThreadId) -> String {
        format!("chat:thread:{thread_id}")
    }
}

fn decode(msg: redis::Msg) -> Option<ThreadEvent> {
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(channel = msg.get_channel_name(), "Unreadable relay payload: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(channel = msg.get_channel_name(), "Malformed relay event: {}", e);
            None
        }
    }
}

#[async_trait]
impl Relay for RedisRelay {
    async fn publish(&self, event: &ThreadEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(Self::channel_name(event.thread_id), payload)
            .await?;

        debug!(thread_id = %event.thread_id, receivers, "Published relay event");
        Ok(())
    }

    async fn subscribe(&self, thread_id: ThreadId) -> Result<EventStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(thread_id)).await?;
        debug!(thread_id = %thread_id, "Subscribed to relay channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| futures::future::ready(decode(msg)));
        Ok(Box::pin(stream))
    }
}
