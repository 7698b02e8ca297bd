//! Notification Aggregator
//!
//! A message is unread for a user when `read == false` and the user did
//! not send it. Both the inbox and the unread summary use that rule.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{InboxEntry, UnreadNotifications, UnreadSummary};
use crate::store::ChatStore;

pub struct NotificationAggregator {
    store: Arc<ChatStore>,
}

impl NotificationAggregator {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    /// Threads with unread messages for `user_id`, in thread creation order
    pub async fn unread_summary(&self, user_id: &str) -> Result<Vec<UnreadSummary>> {
        self.store.unread_summary(user_id).await
    }

    /// All threads of `user_id`, most recent activity first
    pub async fn inbox(&self, user_id: &str) -> Result<Vec<InboxEntry>> {
        self.store.inbox(user_id).await
    }

    pub async fn unread_notifications(&self, user_id: &str) -> Result<UnreadNotifications> {
        let threads = self.unread_summary(user_id).await?;
        Ok(UnreadNotifications {
            total_unread: threads.iter().map(|s| s.unread_count).sum(),
            threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyId;
    use crate::properties::{NewProperty, SqlitePropertyDirectory};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        directory: SqlitePropertyDirectory,
        store: Arc<ChatStore>,
        aggregator: NotificationAggregator,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = crate::store::connect(&dir.path().join("chat.sqlite"))
            .await
            .unwrap();
        let directory = SqlitePropertyDirectory::new(pool.clone()).await.unwrap();
        let store = Arc::new(ChatStore::new(pool).await.unwrap());
        let aggregator = NotificationAggregator::new(store.clone());
        Fixture {
            _dir: dir,
            directory,
            store,
            aggregator,
        }
    }

    impl Fixture {
        async fn property(&self, owner: &str) -> PropertyId {
            self.directory
                .register(
                    owner,
                    NewProperty {
                        title: "Canal-side loft".into(),
                        category: String::new(),
                        location: String::new(),
                        description: String::new(),
                    },
                )
                .await
                .unwrap()
                .property_id
        }
    }

    #[tokio::test]
    async fn test_summary_counts_only_incoming_unread() {
        let fx = fixture().await;
        let (store, aggregator) = (&fx.store, &fx.aggregator);
        let (first, _) = store
            .get_or_create_thread(fx.property("o@x.io").await, "o@x.io", "b1@x.io")
            .await
            .unwrap();
        let (second, _) = store
            .get_or_create_thread(fx.property("o@x.io").await, "o@x.io", "b2@x.io")
            .await
            .unwrap();
        let (unrelated, _) = store
            .get_or_create_thread(fx.property("p@x.io").await, "p@x.io", "b1@x.io")
            .await
            .unwrap();

        store.append_message(first.thread_id, "b1@x.io", "a").await.unwrap();
        store.append_message(first.thread_id, "b1@x.io", "b").await.unwrap();
        store.append_message(first.thread_id, "o@x.io", "c").await.unwrap();
        store.append_message(second.thread_id, "o@x.io", "d").await.unwrap();
        store.append_message(unrelated.thread_id, "b1@x.io", "e").await.unwrap();

        let summary = aggregator.unread_summary("o@x.io").await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].thread_id, first.thread_id);
        assert_eq!(summary[0].unread_count, 2);

        let buyer_two = aggregator.unread_summary("b2@x.io").await.unwrap();
        assert_eq!(buyer_two.len(), 1);
        assert_eq!(buyer_two[0].thread_id, second.thread_id);

        let owner_p = aggregator.unread_notifications("p@x.io").await.unwrap();
        assert_eq!(owner_p.total_unread, 1);
        assert_eq!(owner_p.threads[0].thread_id, unrelated.thread_id);

        let owner_o = aggregator.unread_notifications("o@x.io").await.unwrap();
        assert_eq!(owner_o.total_unread, 2);
        assert_eq!(owner_o.threads, summary);

        let nobody = aggregator.unread_notifications("nobody@x.io").await.unwrap();
        assert_eq!(nobody.total_unread, 0);
        assert!(nobody.threads.is_empty());
    }

    #[tokio::test]
    async fn test_summary_order_is_creation_order() {
        let fx = fixture().await;
        let (store, aggregator) = (&fx.store, &fx.aggregator);
        let mut ids = Vec::new();
        for buyer in ["b1@x.io", "b2@x.io", "b3@x.io"] {
            let (thread, _) = store
                .get_or_create_thread(fx.property("o@x.io").await, "o@x.io", buyer)
                .await
                .unwrap();
            ids.push((thread.thread_id, buyer));
        }
        // newest activity on the oldest thread must not reorder the summary
        for (thread_id, buyer) in ids.iter().rev() {
            store.append_message(*thread_id, buyer, "hi").await.unwrap();
        }

        let summary = aggregator.unread_summary("o@x.io").await.unwrap();
        let order: Vec<_> = summary.iter().map(|s| s.thread_id).collect();
        assert_eq!(order, ids.iter().map(|(id, _)| *id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_inbox_is_newest_activity_first() {
        let fx = fixture().await;
        let (store, aggregator) = (&fx.store, &fx.aggregator);
        let (older, _) = store
            .get_or_create_thread(fx.property("o@x.io").await, "o@x.io", "b1@x.io")
            .await
            .unwrap();
        let (newer, _) = store
            .get_or_create_thread(fx.property("o@x.io").await, "o@x.io", "b2@x.io")
            .await
            .unwrap();
        store.append_message(newer.thread_id, "b2@x.io", "first").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.append_message(older.thread_id, "b1@x.io", "second").await.unwrap();

        let inbox = aggregator.inbox("o@x.io").await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].thread_id, older.thread_id);
        assert_eq!(inbox[0].counterpart, "b1@x.io");
        assert_eq!(inbox[0].last_message.as_ref().unwrap().text, "second");
        assert_eq!(inbox[0].unread_count, 1);
        assert_eq!(inbox[1].thread_id, newer.thread_id);
    }
}
