use std::path::Path;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

use crate::state::NotificationRecord;

/// Local notification inbox. Conversation ids are stored as plain references; nothing
/// here depends on the conversation map.
pub struct NotificationStore {
    conn: Connection,
}

impl NotificationStore {
    pub fn open(data_dir: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| format!("create {data_dir}"))?;
        let path = Path::new(data_dir).join("notifications.sqlite3");
        let conn = Connection::open(&path)
            .with_context(|| format!("open notification db {}", path.display()))?;
        Self::init(conn).context("create notifications table")
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY,
                notification_type TEXT NOT NULL,
                conversation_id INTEGER,
                read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(Self { conn })
    }

    /// Insert or refresh a record. A record already marked read stays read.
    pub fn upsert(&self, record: &NotificationRecord) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO notifications (id, notification_type, conversation_id, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                notification_type = excluded.notification_type,
                conversation_id = excluded.conversation_id,
                read = MAX(read, excluded.read),
                created_at = excluded.created_at",
            params![
                record.id as i64,
                record.notification_type,
                record.conversation_id.map(|id| id as i64),
                record.read,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    /// Returns whether a record with this id existed.
    pub fn mark_read(&self, id: u64) -> Result<bool, rusqlite::Error> {
        let n = self
            .conn
            .execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id as i64])?;
        Ok(n > 0)
    }

    pub fn unread_count(&self) -> Result<u32, rusqlite::Error> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE read = 0",
            [],
            |row| row.get(0),
        )
    }

    pub fn get(&self, id: u64) -> Result<Option<NotificationRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT id, notification_type, conversation_id, read, created_at
                 FROM notifications WHERE id = ?1",
                [id as i64],
                row_to_record,
            )
            .optional()
    }

    /// Newest first.
    pub fn list(&self, limit: u32) -> Result<Vec<NotificationRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, notification_type, conversation_id, read, created_at
             FROM notifications ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>();
        records
    }

    pub fn clear(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch("DELETE FROM notifications;")
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    Ok(NotificationRecord {
        id: row.get::<_, i64>(0)? as u64,
        notification_type: row.get(1)?,
        conversation_id: row.get::<_, Option<i64>>(2)?.map(|id| id as u64),
        read: row.get(3)?,
        created_at: row.get(4)?,
    })
}
