//! Message store - SQLite persistence for users, messages, groups and reminders
//!
//! Every write is an upsert or insert-if-absent so duplicate webhook deliveries
//! and overlapping syncs are harmless.

use crate::error::{Error, Result};
use crate::groupme::InboundMessage;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filters for reading group history
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub group_id: String,
    pub after: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` rows
    pub limit: Option<usize>,
}

/// One line of group history joined with the sender's name
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub text: String,
}

/// Per-user message count for the scoreboard
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCount {
    pub name: String,
    pub count: i64,
}

/// A reminder about to be inserted
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub id: String,
    pub created: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    pub group_id: String,
    pub user_id: String,
    pub message: String,
    pub command_message_id: Option<String>,
}

/// A stored reminder joined with the requester's display name
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub created: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    pub group_id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub command_message_id: Option<String>,
    pub sent: bool,
}

/// SQLite-backed store shared by the webhook, commands and periodic jobs
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// In-memory store, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Users, memberships, messages --

    /// Insert a user or refresh their name/avatar
    pub fn upsert_user(&self, id: &str, name: &str, avatar_url: Option<&str>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user (id, name, avatar_url) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                avatar_url = excluded.avatar_url",
            params![id, name, avatar_url],
        )?;
        Ok(())
    }

    /// Record that a user belongs to a group (set semantics)
    pub fn upsert_membership(&self, user_id: &str, group_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO membership (user_id, group_id) VALUES (?1, ?2)
             ON CONFLICT(user_id, group_id) DO NOTHING",
            params![user_id, group_id],
        )?;
        Ok(())
    }

    /// Insert a message unless its id is already stored. Returns true if inserted.
    pub fn insert_message_if_absent(&self, msg: &InboundMessage) -> Result<bool> {
        let attachments = serde_json::to_string(&msg.attachments)?;
        let changed = self.conn().execute(
            "INSERT INTO chat_message (id, group_id, sender_id, text, attachments, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                msg.id,
                msg.group_id,
                msg.user_id,
                msg.text(),
                attachments,
                to_db_time(&msg.timestamp()),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Persist sender, membership and message for one inbound message
    pub fn record_message(&self, msg: &InboundMessage) -> Result<bool> {
        self.upsert_user(&msg.user_id, &msg.name, msg.avatar_url.as_deref())?;
        self.upsert_membership(&msg.user_id, &msg.group_id)?;
        self.insert_message_if_absent(msg)
    }

    /// Group history in chronological order
    pub fn query_messages_by_group(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRow>> {
        let after = filter.after.as_ref().map(to_db_time);
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, name, text FROM (
                SELECT chat_message.timestamp AS timestamp,
                       COALESCE(user.name, chat_message.sender_id) AS name,
                       chat_message.text AS text
                FROM chat_message
                LEFT JOIN user ON chat_message.sender_id = user.id
                WHERE chat_message.group_id = ?1
                  AND (?2 IS NULL OR chat_message.timestamp >= ?2)
                ORDER BY chat_message.timestamp DESC
                LIMIT ?3
             ) ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![filter.group_id, after, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (timestamp, name, text) = row?;
            history.push(HistoryRow {
                timestamp: from_db_time(&timestamp)?,
                name,
                text: text.unwrap_or_default(),
            });
        }
        Ok(history)
    }

    /// Message counts per sender in a group, highest first
    pub fn query_message_counts_by_group(&self, group_id: &str) -> Result<Vec<MessageCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user.name, COUNT(chat_message.id) AS count
             FROM chat_message
             JOIN user ON chat_message.sender_id = user.id
             WHERE chat_message.group_id = ?1
             GROUP BY user.id
             ORDER BY count DESC, user.name ASC",
        )?;

        let counts = stmt
            .query_map([group_id], |row| {
                Ok(MessageCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// Total stored messages across all groups
    pub fn total_messages(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM chat_message", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- Groups --

    /// Register the bot identity used to post into a group
    pub fn upsert_group(&self, group_id: &str, bot_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO group_chat (id, bot_id) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET bot_id = excluded.bot_id",
            params![group_id, bot_id],
        )?;
        Ok(())
    }

    pub fn bot_id_for_group(&self, group_id: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT bot_id FROM group_chat WHERE id = ?1 LIMIT 1",
                [group_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))
    }

    /// All registered group ids
    pub fn groups(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM group_chat ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // -- Reminders --

    pub fn insert_reminder(&self, reminder: &NewReminder) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reminder (id, created, eta, group_id, user_id, message, command_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reminder.id,
                to_db_time(&reminder.created),
                to_db_time(&reminder.eta),
                reminder.group_id,
                reminder.user_id,
                reminder.message,
                reminder.command_message_id,
            ],
        )?;
        Ok(())
    }

    /// Unsent reminders with `eta <= now`, oldest first, capped at `limit`
    pub fn query_pending_reminders_due_by(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>> {
        self.query_reminders(
            "WHERE reminder.sent = 0 AND reminder.eta <= ?1 ORDER BY reminder.eta ASC LIMIT ?2",
            params![to_db_time(&now), limit as i64],
        )
    }

    /// Every unsent reminder, soonest first
    pub fn list_pending_reminders(&self) -> Result<Vec<Reminder>> {
        self.query_reminders(
            "WHERE reminder.sent = 0 ORDER BY reminder.eta ASC",
            params![],
        )
    }

    #[cfg(test)]
    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>> {
        let mut found = self.query_reminders("WHERE reminder.id = ?1", params![id])?;
        Ok(found.pop())
    }

    /// Flip a single reminder to sent. Returns false if it was already sent.
    pub fn mark_reminder_sent(&self, id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE reminder SET sent = 1 WHERE id = ?1 AND sent = 0",
            [id],
        )?;
        Ok(changed == 1)
    }

    fn query_reminders(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT reminder.id, reminder.created, reminder.eta, reminder.group_id,
                    reminder.user_id, COALESCE(user.name, reminder.user_id),
                    reminder.message, reminder.command_message_id, reminder.sent
             FROM reminder
             LEFT JOIN user ON reminder.user_id = user.id
             {}",
            clause
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)? != 0,
            ))
        })?;

        let mut reminders = Vec::new();
        for row in rows {
            let (id, created, eta, group_id, user_id, user_name, message, command_message_id, sent) =
                row?;
            reminders.push(Reminder {
                id,
                created: from_db_time(&created)?,
                eta: from_db_time(&eta)?,
                group_id,
                user_id,
                user_name,
                message,
                command_message_id,
                sent,
            });
        }
        Ok(reminders)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            avatar_url  TEXT
        );

        CREATE TABLE IF NOT EXISTS group_chat (
            id      TEXT PRIMARY KEY,
            bot_id  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS membership (
            user_id   TEXT NOT NULL,
            group_id  TEXT NOT NULL,
            PRIMARY KEY (user_id, group_id)
        );

        CREATE TABLE IF NOT EXISTS chat_message (
            id           TEXT PRIMARY KEY,
            group_id     TEXT NOT NULL,
            sender_id    TEXT NOT NULL,
            text         TEXT,
            attachments  TEXT NOT NULL DEFAULT '[]',
            timestamp    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_message_group
            ON chat_message(group_id, timestamp);

        CREATE TABLE IF NOT EXISTS reminder (
            id                  TEXT PRIMARY KEY,
            created             TEXT NOT NULL,
            eta                 TEXT NOT NULL,
            group_id            TEXT NOT NULL,
            user_id             TEXT NOT NULL,
            message             TEXT NOT NULL,
            command_message_id  TEXT,
            sent                INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_reminder_due
            ON reminder(sent, eta);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

/// Format a timestamp the way it is stored (`YYYY-MM-DD HH:MM:SS`, UTC)
pub fn to_db_time(ts: &DateTime<Utc>) -> String {
    ts.format(DB_TIME_FORMAT).to_string()
}

pub fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DB_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Parse(format!("timestamp '{}': {}", raw, e)))
}
