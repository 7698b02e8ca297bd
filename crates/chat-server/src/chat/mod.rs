//! Chat Service Layer
//!
//! Single authority for thread identity and message ingestion. Every
//! message is persisted before it is published on the relay; relay
//! failures are logged and never reach the sender.

pub mod notifications;

pub use notifications::NotificationAggregator;

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ChatError, Result};
use crate::models::{Message, PropertyId, Thread, ThreadEvent, ThreadId, ThreadView};
use crate::properties::PropertyDirectory;
use crate::relay::Relay;
use crate::store::ChatStore;

/// Longest accepted message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

pub struct ChatService {
    store: Arc<ChatStore>,
    directory: Arc<dyn PropertyDirectory>,
    relay: Arc<dyn Relay>,
    notifications: NotificationAggregator,
}

impl ChatService {
    pub fn new(
        store: Arc<ChatStore>,
        directory: Arc<dyn PropertyDirectory>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            notifications: NotificationAggregator::new(store.clone()),
            store,
            directory,
            relay,
        }
    }

    pub fn notifications(&self) -> &NotificationAggregator {
        &self.notifications
    }

    /// Thread between `requesting_user` and the property's owner, created on first use
    pub async fn get_or_create_thread(
        &self,
        property_id: PropertyId,
        requesting_user: &str,
    ) -> Result<Thread> {
        let owner_id = self.directory.resolve_owner(property_id).await?;
        if owner_id == requesting_user {
            return Err(ChatError::InvalidOperation(
                "cannot open a thread on your own property".into(),
            ));
        }

        let (thread, _created) = self
            .store
            .get_or_create_thread(property_id, &owner_id, requesting_user)
            .await?;
        Ok(thread)
    }

    /// Open-or-get plus the full history
    pub async fn open_thread(
        &self,
        property_id: PropertyId,
        requesting_user: &str,
    ) -> Result<ThreadView> {
        let thread = self.get_or_create_thread(property_id, requesting_user).await?;
        let messages = self.store.list_messages(thread.thread_id).await?;
        Ok(ThreadView {
            thread_id: thread.thread_id,
            property_id: thread.property_id,
            owner_id: thread.owner_id,
            participants: thread.participants,
            messages,
        })
    }

    /// Load a thread the user takes part in.
    pub async fn participant_thread(&self, thread_id: ThreadId, user_id: &str) -> Result<Thread> {
        let thread = self.load_thread(thread_id).await?;
        if !thread.is_participant(user_id) {
            return Err(ChatError::Forbidden(format!(
                "not a participant of thread {thread_id}"
            )));
        }
        Ok(thread)
    }

    async fn load_thread(&self, thread_id: ThreadId) -> Result<Thread> {
        self.store
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("thread {thread_id}")))
    }

    /// Persist a message, then publish it for live delivery.
    pub async fn send_message(
        &self,
        thread_id: ThreadId,
        sender: &str,
        text: &str,
    ) -> Result<Message> {
        let thread = self.load_thread(thread_id).await?;

        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".into()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "message longer than {MAX_MESSAGE_CHARS} characters"
            )));
        }
        if !thread.is_participant(sender) {
            return Err(ChatError::Forbidden(format!(
                "not a participant of thread {thread_id}"
            )));
        }

        let message = self.store.append_message(thread_id, sender, text).await?;
        info!(thread_id = %thread_id, seq = message.seq, sender = %sender, "Stored message");

        let event = ThreadEvent {
            thread_id,
            message: message.clone(),
        };
        if let Err(e) = self.relay.publish(&event).await {
            warn!(thread_id = %thread_id, seq = message.seq, "Relay publish failed: {}", e);
        }

        Ok(message)
    }

    pub async fn list_messages(&self, thread_id: ThreadId, user_id: &str) -> Result<Vec<Message>> {
        self.participant_thread(thread_id, user_id).await?;
        self.store.list_messages(thread_id).await
    }

    /// Mark everything the other participant sent as read. Idempotent.
    pub async fn mark_thread_read(&self, thread_id: ThreadId, user_id: &str) -> Result<u64> {
        self.participant_thread(thread_id, user_id).await?;
        let changed = self.store.mark_read(thread_id, user_id).await?;
        if changed > 0 {
            info!(thread_id = %thread_id, reader = %user_id, changed, "Marked messages read");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{NewProperty, SqlitePropertyDirectory};
    use crate::relay::LocalRelay;
    use futures::StreamExt;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        directory: Arc<SqlitePropertyDirectory>,
        relay: Arc<LocalRelay>,
        chat: ChatService,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = crate::store::connect(&dir.path().join("chat.sqlite"))
            .await
            .unwrap();
        let directory = Arc::new(SqlitePropertyDirectory::new(pool.clone()).await.unwrap());
        let store = Arc::new(ChatStore::new(pool).await.unwrap());
        let relay = Arc::new(LocalRelay::default());
        let chat = ChatService::new(store, directory.clone(), relay.clone());
        Fixture {
            _dir: dir,
            directory,
            relay,
            chat,
        }
    }

    async fn listing(fx: &Fixture, owner: &str) -> PropertyId {
        fx.directory
            .register(
                owner,
                NewProperty {
                    title: "Two-bed flat".into(),
                    category: "apartments".into(),
                    location: "Harbour".into(),
                    description: String::new(),
                },
            )
            .await
            .unwrap()
            .property_id
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;

        let first = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();
        let second = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();
        assert_eq!(first.thread_id, second.thread_id);
        assert_eq!(first.owner_id, "o@x.io");
    }

    #[tokio::test]
    async fn test_owner_cannot_open_own_property() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        assert!(matches!(
            fx.chat.get_or_create_thread(property, "o@x.io").await,
            Err(ChatError::InvalidOperation(_))
        ));
        assert!(matches!(
            fx.chat.get_or_create_thread(PropertyId::new(), "b@x.io").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_validates_before_storing() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        let thread = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();

        assert!(matches!(
            fx.chat.send_message(thread.thread_id, "b@x.io", "  \n\t").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.chat.send_message(thread.thread_id, "z@x.io", "hello").await,
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            fx.chat.send_message(ThreadId::new(), "b@x.io", "hello").await,
            Err(ChatError::NotFound(_))
        ));
        let too_long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(fx
            .chat
            .send_message(thread.thread_id, "b@x.io", &too_long)
            .await
            .is_err());

        let messages = fx.chat.list_messages(thread.thread_id, "o@x.io").await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_publishes_after_persisting() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        let thread = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();
        let mut live = fx.relay.subscribe(thread.thread_id).await.unwrap();

        let sent = fx
            .chat
            .send_message(thread.thread_id, "b@x.io", "Hi")
            .await
            .unwrap();
        let event = live.next().await.unwrap();
        assert_eq!(event.message, sent);

        let messages = fx.chat.list_messages(thread.thread_id, "b@x.io").await.unwrap();
        assert_eq!(messages.last(), Some(&sent));
        assert!(!sent.read);
    }

    #[tokio::test]
    async fn test_mark_read_requires_participant() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        let thread = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();
        fx.chat
            .send_message(thread.thread_id, "b@x.io", "Hi")
            .await
            .unwrap();

        assert!(matches!(
            fx.chat.mark_thread_read(thread.thread_id, "z@x.io").await,
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            fx.chat.mark_thread_read(ThreadId::new(), "o@x.io").await,
            Err(ChatError::NotFound(_))
        ));

        assert_eq!(fx.chat.mark_thread_read(thread.thread_id, "o@x.io").await.unwrap(), 1);
        assert_eq!(fx.chat.mark_thread_read(thread.thread_id, "o@x.io").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_property_deletion_cascades() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        let thread = fx.chat.get_or_create_thread(property, "b@x.io").await.unwrap();

        fx.directory.delete(property, "o@x.io").await.unwrap();
        assert!(matches!(
            fx.chat.list_messages(thread.thread_id, "b@x.io").await,
            Err(ChatError::NotFound(_))
        ));
    }

    /// Deletes the property right after answering who owns it.
    struct DeletingDirectory {
        inner: Arc<SqlitePropertyDirectory>,
    }

    #[async_trait::async_trait]
    impl PropertyDirectory for DeletingDirectory {
        async fn resolve_owner(&self, property_id: PropertyId) -> Result<String> {
            let owner = self.inner.resolve_owner(property_id).await?;
            self.inner.delete(property_id, &owner).await?;
            Ok(owner)
        }
    }

    #[tokio::test]
    async fn test_property_deleted_during_open_leaves_no_thread() {
        let fx = fixture().await;
        let property = listing(&fx, "o@x.io").await;
        let racing = ChatService::new(
            fx.chat.store.clone(),
            Arc::new(DeletingDirectory {
                inner: fx.directory.clone(),
            }),
            fx.relay.clone(),
        );

        assert!(matches!(
            racing.get_or_create_thread(property, "b@x.io").await,
            Err(ChatError::NotFound(_))
        ));
        assert!(fx.directory.get(property).await.unwrap().is_none());
        assert!(racing.notifications().inbox("b@x.io").await.unwrap().is_empty());
        assert!(fx.chat.notifications().inbox("o@x.io").await.unwrap().is_empty());
    }
}
