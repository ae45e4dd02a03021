//! Persistent SQLite log of conversation turns.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::relay::turn::{ConversationTurn, Role};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// The blocking task running the query panicked or was cancelled.
    Task(String),
    /// A stored row could not be turned back into a turn.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Task(e) => write!(f, "database task failed: {e}"),
            Self::Corrupt(e) => write!(f, "corrupt row: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id TEXT NOT NULL,
        user_id TEXT,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_chat_time ON conversations(chat_id, timestamp);
"#;

/// Append-only conversation store.
///
/// Cloning is cheap and shares the underlying connection. Every query runs on
/// tokio's blocking pool; appends are single-row inserts, so concurrent
/// callers only contend on the connection lock.
#[derive(Clone)]
pub struct ConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConversationStore {
    /// Open (or create) the database file. Does not touch the schema; call
    /// [`ensure_schema`](Self::ensure_schema) before appending.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        info!("Opened conversation database at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create the table and index if absent. Safe to call on every start.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = lock(&self.conn);
        conn.execute_batch(SCHEMA)?;
        info!("Table \"conversations\" ready");
        Ok(())
    }

    /// Append one turn.
    pub async fn append(&self, turn: ConversationTurn) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations (chat_id, user_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    turn.chat_id,
                    turn.user_id,
                    turn.role.as_str(),
                    turn.content,
                    format_timestamp(&turn.timestamp),
                ],
            )?;
            debug!(chat_id = %turn.chat_id, role = turn.role.as_str(), "Appended turn");
            Ok(())
        })
        .await
    }

    /// The most recent `limit` turns of a chat, oldest first.
    pub async fn recent(&self, chat_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, role, content, timestamp FROM conversations
                 WHERE chat_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut turns = Vec::new();
            for row in rows {
                let (chat_id, user_id, role, content, timestamp) = row?;
                let role = Role::parse(&role).ok_or_else(|| StoreError::Corrupt(format!("unknown role '{role}'")))?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{timestamp}': {e}")))?
                    .with_timezone(&Utc);
                turns.push(ConversationTurn {
                    chat_id,
                    user_id,
                    role,
                    content,
                    timestamp,
                });
            }
            turns.reverse();
            Ok(turns)
        })
        .await
    }

    /// Number of stored turns for a chat.
    pub async fn count(&self, chat_id: &str) -> Result<usize, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&lock(&conn)))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Every write is a single statement, so a poisoned lock still guards a consistent connection.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
