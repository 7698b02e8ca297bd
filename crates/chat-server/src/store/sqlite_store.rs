//! Thread and message persistence
//!
//! A thread is unique per (property, sorted participant pair); the
//! constraint lives in the schema so racing creators converge on one row.
//! Threads reference the property directory's `properties` table, so a
//! deleted property takes its threads and their messages with it, and a
//! thread can never be created for a property that is already gone.
//! Message sequence numbers and timestamps are assigned inside the append
//! statement from the thread's current tail, which keeps them ordered even
//! when process clocks disagree.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::models::{
    from_micros, participant_pair, to_micros, InboxEntry, Message, PropertyId, Thread, ThreadId,
    UnreadSummary,
};

const THREAD_COLUMNS: &str = r#"
    t.id, t.property_id, t.owner_id, t.participant_a, t.participant_b, t.created_at,
    m.seq AS last_seq, m.sender AS last_sender, m.text AS last_text,
    m.sent_at AS last_sent_at, m.is_read AS last_is_read
"#;

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: String,
    property_id: String,
    owner_id: String,
    participant_a: String,
    participant_b: String,
    created_at: i64,
    last_seq: Option<i64>,
    last_sender: Option<String>,
    last_text: Option<String>,
    last_sent_at: Option<i64>,
    last_is_read: Option<bool>,
}

impl ThreadRow {
    fn last_message(&self) -> Option<Message> {
        match (
            self.last_seq,
            &self.last_sender,
            &self.last_text,
            self.last_sent_at,
        ) {
            (Some(seq), Some(sender), Some(text), Some(sent_at)) => Some(Message {
                seq,
                sender: sender.clone(),
                text: text.clone(),
                timestamp: from_micros(sent_at),
                read: self.last_is_read.unwrap_or(false),
            }),
            _ => None,
        }
    }
}

impl TryFrom<ThreadRow> for Thread {
    type Error = ChatError;

    fn try_from(row: ThreadRow) -> Result<Self> {
        let last_message = row.last_message();
        Ok(Thread {
            thread_id: ThreadId::parse(&row.id)
                .map_err(|_| ChatError::Internal(format!("corrupt thread id {}", row.id)))?,
            property_id: PropertyId::parse(&row.property_id).map_err(|_| {
                ChatError::Internal(format!("corrupt property id {}", row.property_id))
            })?,
            owner_id: row.owner_id,
            participants: [row.participant_a, row.participant_b],
            created_at: from_micros(row.created_at),
            last_message,
        })
    }
}

type MessageRow = (i64, String, String, i64, bool);

fn message_from_row((seq, sender, text, sent_at, read): MessageRow) -> Message {
    Message {
        seq,
        sender,
        text,
        timestamp: from_micros(sent_at),
        read,
    }
}

/// Durable store for chat threads
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_db().await?;
        Ok(store)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                property_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_message_seq INTEGER,
                last_activity INTEGER NOT NULL,
                UNIQUE(property_id, participant_a, participant_b),
                FOREIGN KEY (property_id) REFERENCES properties(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_participant_a ON threads(participant_a)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_participant_b ON threads(participant_b)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                thread_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (thread_id, seq),
                FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Return the thread for `(property_id, {buyer, owner})`, creating it if absent.
    ///
    /// The boolean is true when this call created the row. A caller that
    /// loses the insert race gets the winner's thread. `NotFound` when the
    /// property no longer exists.
    pub async fn get_or_create_thread(
        &self,
        property_id: PropertyId,
        owner_id: &str,
        buyer_id: &str,
    ) -> Result<(Thread, bool)> {
        let [a, b] = participant_pair(owner_id, buyer_id);
        let now = to_micros(Utc::now());

        let inserted = sqlx::query(
            r#"
            INSERT INTO threads
                (id, property_id, owner_id, participant_a, participant_b, created_at, last_activity)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(property_id, participant_a, participant_b) DO NOTHING
            "#,
        )
        .bind(ThreadId::new().to_string())
        .bind(property_id.to_string())
        .bind(owner_id)
        .bind(&a)
        .bind(&b)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                ChatError::NotFound(format!("property {property_id}"))
            }
            other => ChatError::Store(other),
        })?
        .rows_affected()
            == 1;

        let row: Option<ThreadRow> = sqlx::query_as(&format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM threads t
            LEFT JOIN messages m ON m.thread_id = t.id AND m.seq = t.last_message_seq
            WHERE t.property_id = ? AND t.participant_a = ? AND t.participant_b = ?
            "#
        ))
        .bind(property_id.to_string())
        .bind(&a)
        .bind(&b)
        .fetch_optional(&self.pool)
        .await?;

        // deleted between the insert and this read
        let row = row.ok_or_else(|| ChatError::NotFound(format!("property {property_id}")))?;
        let thread = Thread::try_from(row)?;
        if inserted {
            info!(thread_id = %thread.thread_id, property_id = %property_id, "Created thread");
        } else {
            debug!(thread_id = %thread.thread_id, "Reusing existing thread");
        }
        Ok((thread, inserted))
    }

    pub async fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>> {
        let row: Option<ThreadRow> = sqlx::query_as(&format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM threads t
            LEFT JOIN messages m ON m.thread_id = t.id AND m.seq = t.last_message_seq
            WHERE t.id = ?
            "#
        ))
        .bind(thread_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Thread::try_from).transpose()
    }

    /// Append a message and move the thread's `last_message` in one transaction.
    ///
    /// `seq` is the previous tail plus one; the timestamp is never earlier
    /// than the previous tail's.
    pub async fn append_message(
        &self,
        thread_id: ThreadId,
        sender: &str,
        text: &str,
    ) -> Result<Message> {
        let id = thread_id.to_string();
        let now = to_micros(Utc::now());

        let mut tx = self.pool.begin().await?;

        let (seq, sent_at): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO messages (thread_id, seq, sender, text, sent_at, is_read)
            SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, MAX(?, COALESCE(MAX(sent_at), 0)), 0
            FROM messages WHERE thread_id = ?
            RETURNING seq, sent_at
            "#,
        )
        .bind(&id)
        .bind(sender)
        .bind(text)
        .bind(now)
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE threads SET last_message_seq = ?, last_activity = ? WHERE id = ?",
        )
        .bind(seq)
        .bind(sent_at)
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await?;
            return Err(ChatError::NotFound(format!("thread {thread_id}")));
        }

        tx.commit().await?;

        Ok(Message {
            seq,
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: from_micros(sent_at),
            read: false,
        })
    }

    /// Full history in append order
    pub async fn list_messages(&self, thread_id: ThreadId) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT seq, sender, text, sent_at, is_read FROM messages WHERE thread_id = ? ORDER BY seq",
        )
        .bind(thread_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(message_from_row).collect())
    }

    /// Mark every unread message not sent by `reader` as read. Returns how many changed.
    pub async fn mark_read(&self, thread_id: ThreadId, reader: &str) -> Result<u64> {
        let changed = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE thread_id = ? AND sender != ? AND is_read = 0",
        )
        .bind(thread_id.to_string())
        .bind(reader)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(changed)
    }

    /// Threads of `user_id` holding messages the user has not read, in creation order
    pub async fn unread_summary(&self, user_id: &str) -> Result<Vec<UnreadSummary>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT t.id, t.property_id, COUNT(m.seq) AS unread_count
            FROM threads t
            JOIN messages m
                ON m.thread_id = t.id AND m.is_read = 0 AND m.sender != ?
            WHERE t.participant_a = ? OR t.participant_b = ?
            GROUP BY t.rowid, t.id, t.property_id
            ORDER BY t.rowid
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(thread_id, property_id, unread_count)| {
                Ok(UnreadSummary {
                    thread_id: ThreadId::parse(&thread_id)?,
                    property_id: PropertyId::parse(&property_id)?,
                    unread_count,
                })
            })
            .collect()
    }

    /// Every thread of `user_id`, newest activity first
    pub async fn inbox(&self, user_id: &str) -> Result<Vec<InboxEntry>> {
        let rows: Vec<ThreadRow> = sqlx::query_as(&format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM threads t
            LEFT JOIN messages m ON m.thread_id = t.id AND m.seq = t.last_message_seq
            WHERE t.participant_a = ? OR t.participant_b = ?
            ORDER BY t.last_activity DESC, t.rowid DESC
            "#
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT m.thread_id, COUNT(*)
            FROM messages m
            JOIN threads t ON t.id = m.thread_id
            WHERE (t.participant_a = ? OR t.participant_b = ?)
              AND m.is_read = 0 AND m.sender != ?
            GROUP BY m.thread_id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let counts: std::collections::HashMap<String, i64> = counts.into_iter().collect();

        rows.into_iter()
            .map(|row| {
                let unread_count = counts.get(&row.id).copied().unwrap_or(0);
                let thread = Thread::try_from(row)?;
                Ok(InboxEntry {
                    thread_id: thread.thread_id,
                    property_id: thread.property_id,
                    counterpart: thread.counterpart(user_id).unwrap_or_default().to_string(),
                    last_message: thread.last_message,
                    unread_count,
                })
            })
            .collect()
    }
}
