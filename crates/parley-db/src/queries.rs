use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use parley_types::models::Message;

use crate::error::MAX_CONTENT_CHARS;
use crate::models::{MessageRow, UserRow};
use crate::{AppendError, Database, StoreError, ValidationError};

impl Database {
    // -- Users --

    /// Fails with `UsernameTaken` when the name is already registered,
    /// including when a concurrent registration won the insert.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                    StoreError::UsernameTaken(username.to_string())
                }
                other => StoreError::Sqlite(other),
            })?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Messages --

    /// Validate and persist a message. The timestamp defaults to the moment
    /// the row is written, taken while holding the connection lock so that
    /// timestamps follow insertion order.
    pub fn append_message(
        &self,
        content: &str,
        sender: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Message, AppendError> {
        let (content, sender) = validate_message(content, sender)?;
        let id = Uuid::new_v4();

        let message = self.with_conn(|conn| {
            let message = Message {
                id,
                content: content.to_string(),
                sender: sender.to_string(),
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            conn.execute(
                "INSERT INTO messages (id, content, sender, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    message.id.to_string(),
                    message.content,
                    message.sender,
                    encode_timestamp(&message.timestamp),
                ],
            )?;
            Ok(message)
        })?;

        Ok(message)
    }

    /// Up to `limit` of the newest messages, oldest first.
    pub fn recent_messages(&self, limit: u32) -> Result<Vec<Message>, StoreError> {
        let mut rows = self.with_conn(|conn| query_recent_messages(conn, limit))?;
        rows.reverse();
        rows.into_iter().map(Message::try_from).collect()
    }

    pub fn count_messages(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

/// Trim `content` and check both fields. Returns the values to store.
pub fn validate_message<'a>(content: &'a str, sender: &'a str) -> Result<(&'a str, &'a str), ValidationError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong { len });
    }

    let sender = sender.trim();
    if sender.is_empty() {
        return Err(ValidationError::EmptySender);
    }

    Ok((content, sender))
}

// Fixed-width RFC 3339 so that text ordering matches chronological ordering.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id.parse::<Uuid>().map_err(|e| StoreError::Corrupt {
            id: row.id.clone(),
            field: "id",
            reason: e.to_string(),
        })?;
        let timestamp = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                id: row.id.clone(),
                field: "created_at",
                reason: e.to_string(),
            })?;

        Ok(Message {
            id,
            content: row.content,
            sender: row.sender,
            timestamp,
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_recent_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, content, sender, created_at
         FROM messages
         ORDER BY created_at DESC, seq DESC
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map([limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                content: row.get(1)?,
                sender: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
