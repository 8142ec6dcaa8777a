//! Users eligible for scheduled grants.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::Database;

use super::types::SchedulerError;

/// One user as seen by the grant jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    /// Active subscription plan (`premium`, `vip`), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    pub level: i64,
    /// Plan-specific daily vote multiplier; the configured default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_multiplier: Option<i64>,
}

impl Recipient {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            plan: None,
            level: 0,
            vote_multiplier: None,
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_level(mut self, level: i64) -> Self {
        self.level = level;
        self
    }

    pub fn with_vote_multiplier(mut self, multiplier: i64) -> Self {
        self.vote_multiplier = Some(multiplier);
        self
    }
}

/// Source of grant recipients, paged in a stable order.
pub trait GrantRecipients: Send + Sync {
    /// Active (not banned) users ordered by id, starting after `offset` rows.
    fn page(&self, offset: usize, limit: usize) -> Result<Vec<Recipient>, SchedulerError>;
}

/// Recipients read from the `users` table.
pub struct SqliteRecipients {
    db: Database,
}

impl SqliteRecipients {
    pub fn new(db: Database) -> Result<Self, SchedulerError> {
        Self::initialize_schema(&db.lock())?;
        Ok(Self { db })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SchedulerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                plan TEXT,
                level INTEGER NOT NULL DEFAULT 0,
                vote_multiplier INTEGER,
                is_banned INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert or update a user row.
    pub fn upsert(&self, recipient: &Recipient, banned: bool) -> Result<(), SchedulerError> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO users (id, plan, level, vote_multiplier, is_banned, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 plan = excluded.plan,
                 level = excluded.level,
                 vote_multiplier = excluded.vote_multiplier,
                 is_banned = excluded.is_banned",
            params![
                recipient.user_id,
                recipient.plan,
                recipient.level,
                recipient.vote_multiplier,
                banned,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl GrantRecipients for SqliteRecipients {
    fn page(&self, offset: usize, limit: usize) -> Result<Vec<Recipient>, SchedulerError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, plan, level, vote_multiplier FROM users
             WHERE is_banned = 0 ORDER BY id ASC LIMIT ? OFFSET ?",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(Recipient {
                user_id: row.get(0)?,
                plan: row.get(1)?,
                level: row.get(2)?,
                vote_multiplier: row.get(3)?,
            })
        })?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }
}
