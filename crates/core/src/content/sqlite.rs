//! SQLite-backed content store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db::{parse_timestamp, Database};
use crate::fetcher::{FetchedChapter, NovelIndex};
use crate::metrics::CHAPTERS_SAVED_TOTAL;

use super::{Chapter, ContentError, ContentStore, Novel};

const NOVEL_COLUMNS: &str =
    "id, proposal_id, title, slug, author, description, source_link, created_at, updated_at";

pub(crate) fn initialize_schema(conn: &Connection) -> Result<(), ContentError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS novels (
            id TEXT PRIMARY KEY,
            proposal_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            author TEXT,
            description TEXT,
            source_link TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chapters (
            id TEXT PRIMARY KEY,
            novel_id TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (novel_id, number)
        );
        "#,
    )?;
    Ok(())
}

/// SQLite-backed store for novels and chapters.
pub struct SqliteContentStore {
    db: Database,
}

impl SqliteContentStore {
    pub fn new(db: Database) -> Result<Self, ContentError> {
        initialize_schema(&db.lock())?;
        Ok(Self { db })
    }

    pub fn in_memory() -> Result<Self, ContentError> {
        Self::new(Database::in_memory()?)
    }

    fn row_to_novel(row: &rusqlite::Row) -> rusqlite::Result<Novel> {
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(Novel {
            id: row.get(0)?,
            proposal_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            author: row.get(4)?,
            description: row.get(5)?,
            source_link: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_chapter(row: &rusqlite::Row) -> rusqlite::Result<Chapter> {
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(Chapter {
            id: row.get(0)?,
            novel_id: row.get(1)?,
            number: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

impl ContentStore for SqliteContentStore {
    fn ensure_novel(
        &self,
        proposal_id: &str,
        source_link: &str,
        index: &NovelIndex,
    ) -> Result<Novel, ContentError> {
        let conn = self.db.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO novels ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                NOVEL_COLUMNS
            ),
            params![
                uuid::Uuid::new_v4().to_string(),
                proposal_id,
                index.title,
                index.slug,
                index.author,
                index.description,
                source_link,
                now,
                now,
            ],
        )?;

        Ok(conn.query_row(
            &format!("SELECT {} FROM novels WHERE proposal_id = ?", NOVEL_COLUMNS),
            params![proposal_id],
            Self::row_to_novel,
        )?)
    }

    fn get_novel(&self, id: &str) -> Result<Option<Novel>, ContentError> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM novels WHERE id = ?", NOVEL_COLUMNS),
                params![id],
                Self::row_to_novel,
            )
            .optional()?)
    }

    fn save_chapter(&self, novel_id: &str, chapter: &FetchedChapter) -> Result<(), ContentError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM novels WHERE id = ?", params![novel_id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(ContentError::NovelNotFound(novel_id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO chapters (id, novel_id, number, title, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(novel_id, number) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                novel_id,
                chapter.number,
                chapter.title,
                chapter.content,
                now,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE novels SET updated_at = ? WHERE id = ?",
            params![now, novel_id],
        )?;
        tx.commit()?;

        CHAPTERS_SAVED_TOTAL.inc();
        Ok(())
    }

    fn chapter_count(&self, novel_id: &str) -> Result<i64, ContentError> {
        let conn = self.db.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE novel_id = ?",
            params![novel_id],
            |row| row.get(0),
        )?)
    }

    fn chapters(&self, novel_id: &str) -> Result<Vec<Chapter>, ContentError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, novel_id, number, title, content, created_at, updated_at
             FROM chapters WHERE novel_id = ? ORDER BY number ASC",
        )?;
        let rows = stmt.query_map(params![novel_id], Self::row_to_chapter)?;

        let mut chapters = Vec::new();
        for row in rows {
            chapters.push(row?);
        }
        Ok(chapters)
    }
}
