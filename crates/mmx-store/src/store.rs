// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use mmx_model::{Message, Role, ToolCall};

use crate::Result;

/// Name given to a session before its first user message retitles it.
pub const DEFAULT_SESSION_NAME: &str = "New Session";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("corrupt stored message {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// One row of the `sessions` relation.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the `messages` relation.  The autoincrement `id` is the
/// message's sequence number: dense and strictly increasing per session.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub message: Message,
}

/// Durable append-only transcript store, exclusive to the engine process.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 id         TEXT PRIMARY KEY,
                 name       TEXT NOT NULL,
                 model      TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id                INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_id        TEXT NOT NULL
                                   REFERENCES sessions(id) ON DELETE CASCADE,
                 role              TEXT NOT NULL,
                 content           TEXT NOT NULL,
                 reasoning         TEXT,
                 reasoning_details TEXT,
                 tool_calls        TEXT,
                 tool_call_id      TEXT,
                 name              TEXT,
                 created_at        TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_messages_session
                 ON messages(session_id, id);",
        )?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    pub fn create_session(&self, model: &str) -> Result<SessionRecord> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_SESSION_NAME.to_string(),
            model: model.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.conn.lock().execute(
            "INSERT INTO sessions (id, name, model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.name,
                record.model,
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        debug!(session = %record.id, "created session");
        Ok(record)
    }

    pub fn get_session(&self, id: &str) -> Result<SessionRecord> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, name, model, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()?
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// Most recently updated sessions first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, model, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_session)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Foreign-key cascade removes the session's messages with it.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Append one message and return its sequence number.
    ///
    /// Touches `sessions.updated_at`.  The first user message of a session
    /// still carrying the synthetic default name retitles it, checked by
    /// name, so the rename happens exactly once.
    pub fn append(&self, session_id: &str, message: &Message) -> Result<i64> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        let tool_calls_json = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls).expect("tool calls serialize"))
        };
        let details_json = message
            .reasoning_details
            .as_ref()
            .map(|d| d.to_string());

        conn.execute(
            "INSERT INTO messages
                 (session_id, role, content, reasoning, reasoning_details,
                  tool_calls, tool_call_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session_id,
                role_str(message.role),
                message.content,
                message.reasoning,
                details_json,
                tool_calls_json,
                message.tool_call_id,
                message.name,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();

        let touched = conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        if touched == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }

        if message.role == Role::User {
            conn.execute(
                "UPDATE sessions SET name = ?1 WHERE id = ?2 AND name = ?3",
                params![derive_title(&message.content), session_id, DEFAULT_SESSION_NAME],
            )?;
        }

        Ok(id)
    }

    /// Full transcript in sequence order.
    pub fn messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, reasoning, reasoning_details,
                    tool_calls, tool_call_id, name, created_at
             FROM messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_stored)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

/// Session display name from its first user message: newlines collapse to
/// spaces, then the first 50 characters.
pub fn derive_title(text: &str) -> String {
    let collapsed: String = text.replace(['\n', '\r'], " ");
    collapsed.chars().take(50).collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        model: row.get(2)?,
        created_at: parse_dt(&row.get::<_, String>(3)?),
        updated_at: parse_dt(&row.get::<_, String>(4)?),
    })
}

type StoredRow = std::result::Result<StoredMessage, StoreError>;

fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    let id: i64 = row.get(0)?;
    let role_text: String = row.get(2)?;
    let tool_calls_json: Option<String> = row.get(6)?;
    let details_json: Option<String> = row.get(5)?;

    let build = || -> StoredRow {
        let role = role_from_str(&role_text).ok_or_else(|| StoreError::Corrupt {
            id,
            reason: format!("unknown role '{role_text}'"),
        })?;
        let tool_calls: Vec<ToolCall> = match &tool_calls_json {
            Some(json) => serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("bad tool_calls json: {e}"),
            })?,
            None => Vec::new(),
        };
        let reasoning_details = match &details_json {
            Some(json) => Some(serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("bad reasoning_details json: {e}"),
            })?),
            None => None,
        };
        Ok(StoredMessage {
            id,
            session_id: row.get(1)?,
            created_at: parse_dt(&row.get::<_, String>(9)?),
            message: Message {
                role,
                content: row.get(3)?,
                reasoning: row.get(4)?,
                reasoning_details,
                tool_calls,
                tool_call_id: row.get(7)?,
                name: row.get(8)?,
                preview: None,
            },
        })
    };
    Ok(build())
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HistoryStore {
        HistoryStore::open_in_memory().unwrap()
    }

    #[test]
    fn new_session_has_default_name_and_uuid() {
        let s = store();
        let a = s.create_session("m2").unwrap();
        let b = s.create_session("m2").unwrap();
        assert_eq!(a.name, DEFAULT_SESSION_NAME);
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        let mut last = 0;
        for i in 0..5 {
            let id = s
                .append(&session.id, &Message::user(format!("msg {i}")))
                .unwrap();
            assert!(id > last, "ids must increase: {id} after {last}");
            last = id;
        }
    }

    #[test]
    fn messages_read_back_in_order() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        s.append(&session.id, &Message::user("one")).unwrap();
        s.append(&session.id, &Message::assistant("two")).unwrap();
        s.append(&session.id, &Message::tool_result("c1", "bash", "three"))
            .unwrap();
        let msgs = s.messages(&session.id).unwrap();
        let contents: Vec<&str> = msgs.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(msgs[2].message.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msgs[2].message.name.as_deref(), Some("bash"));
    }

    #[test]
    fn assistant_tool_calls_round_trip_by_id_name_arguments() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        let mut m = Message::assistant("");
        m.tool_calls = vec![
            ToolCall {
                id: "c1".into(),
                name: "glob".into(),
                arguments: r#"{"pattern":"*.rs"}"#.into(),
            },
            ToolCall {
                id: "c2".into(),
                name: "grep".into(),
                arguments: r#"{"pattern":"fn"}"#.into(),
            },
        ];
        m.reasoning = Some("thinking".into());
        m.reasoning_details = Some(serde_json::json!([{"text": "t"}]));
        s.append(&session.id, &m).unwrap();

        let back = &s.messages(&session.id).unwrap()[0].message;
        assert_eq!(back.tool_calls, m.tool_calls);
        assert_eq!(back.reasoning.as_deref(), Some("thinking"));
        assert_eq!(back.reasoning_details, m.reasoning_details);
    }

    #[test]
    fn first_user_message_renames_session_once() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        s.append(&session.id, &Message::user("fix the parser\nplease"))
            .unwrap();
        let renamed = s.get_session(&session.id).unwrap();
        assert_eq!(renamed.name, "fix the parser please");

        s.append(&session.id, &Message::user("second message"))
            .unwrap();
        let again = s.get_session(&session.id).unwrap();
        assert_eq!(again.name, "fix the parser please", "rename happens once");
    }

    #[test]
    fn title_is_capped_at_fifty_chars() {
        let long = "x".repeat(80);
        assert_eq!(derive_title(&long).chars().count(), 50);
        assert_eq!(derive_title("a\nb\r\nc"), "a b  c");
    }

    #[test]
    fn append_touches_updated_at() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.append(&session.id, &Message::user("hi")).unwrap();
        let after = s.get_session(&session.id).unwrap();
        assert!(after.updated_at > session.updated_at);
    }

    #[test]
    fn delete_session_cascades_to_messages() {
        let s = store();
        let session = s.create_session("m2").unwrap();
        s.append(&session.id, &Message::user("hi")).unwrap();
        s.delete_session(&session.id).unwrap();
        assert!(matches!(
            s.get_session(&session.id),
            Err(StoreError::SessionNotFound(_))
        ));
        assert!(s.messages(&session.id).unwrap().is_empty());
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let s = store();
        // foreign_keys=ON rejects the insert outright
        assert!(s.append("ghost", &Message::user("hi")).is_err());
    }

    #[test]
    fn list_sessions_orders_by_recency() {
        let s = store();
        let a = s.create_session("m2").unwrap();
        let b = s.create_session("m2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.append(&a.id, &Message::user("bump")).unwrap();
        let listed = s.list_sessions().unwrap();
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[test]
    fn reopen_preserves_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let session_id = {
            let s = HistoryStore::open(&path).unwrap();
            let session = s.create_session("m2").unwrap();
            s.append(&session.id, &Message::user("persisted")).unwrap();
            session.id
        };
        let s = HistoryStore::open(&path).unwrap();
        let msgs = s.messages(&session_id).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message.content, "persisted");
    }
}
