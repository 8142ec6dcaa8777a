//! SQLite-backed import run store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db::{parse_column, parse_optional_timestamp, parse_timestamp, where_clause, Database};

use super::{
    ImportRun, ImportRunCookie, ImportRunError, ImportRunFilter, ImportRunStatus, ImportRunStore,
    NewImportRun, RunResult,
};

const RUN_COLUMNS: &str = "id, proposal_id, novel_id, importer, status, error, progress_current, \
     progress_total, checkpoint, cloudflare_blocked, started_at, finished_at, created_at, updated_at";

/// SQLite-backed import run store.
pub struct SqliteImportRunStore {
    db: Database,
}

impl SqliteImportRunStore {
    pub fn new(db: Database) -> Result<Self, ImportRunError> {
        Self::initialize_schema(&db.lock())?;
        Ok(Self { db })
    }

    pub fn in_memory() -> Result<Self, ImportRunError> {
        Self::new(Database::in_memory()?)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ImportRunError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS import_runs (
                id TEXT PRIMARY KEY,
                proposal_id TEXT NOT NULL,
                novel_id TEXT,
                importer TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                progress_current INTEGER NOT NULL DEFAULT 0,
                progress_total INTEGER NOT NULL DEFAULT 0,
                checkpoint TEXT,
                cloudflare_blocked INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_import_runs_started_at ON import_runs(started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_import_runs_proposal ON import_runs(proposal_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_import_runs_open_proposal ON import_runs(proposal_id)
                WHERE status IN ('running', 'pause_requested', 'paused');

            CREATE TABLE IF NOT EXISTS import_run_cookies (
                run_id TEXT PRIMARY KEY REFERENCES import_runs(id) ON DELETE CASCADE,
                cookie_header TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<ImportRun> {
        let status: String = row.get(4)?;
        let checkpoint: Option<String> = row.get(8)?;
        let started_at: String = row.get(10)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        Ok(ImportRun {
            id: row.get(0)?,
            proposal_id: row.get(1)?,
            novel_id: row.get(2)?,
            importer: row.get(3)?,
            status: parse_column(4, &status)?,
            error: row.get(5)?,
            progress_current: row.get(6)?,
            progress_total: row.get(7)?,
            checkpoint: checkpoint.and_then(|json| serde_json::from_str(&json).ok()),
            cloudflare_blocked: row.get(9)?,
            started_at: parse_timestamp(&started_at),
            finished_at: parse_optional_timestamp(row.get(11)?),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_cookie(row: &rusqlite::Row) -> rusqlite::Result<ImportRunCookie> {
        let created_at: String = row.get(2)?;
        let updated_at: String = row.get(3)?;
        Ok(ImportRunCookie {
            run_id: row.get(0)?,
            cookie_header: row.get(1)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn build_where_clause(filter: &ImportRunFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(ref proposal_id) = filter.proposal_id {
            conditions.push("proposal_id = ?");
            params.push(Box::new(proposal_id.clone()));
        }

        (where_clause(&conditions), params)
    }
}

fn load_run(conn: &Connection, id: &str) -> Result<Option<ImportRun>, ImportRunError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM import_runs WHERE id = ?", RUN_COLUMNS),
            params![id],
            SqliteImportRunStore::row_to_run,
        )
        .optional()?)
}

fn require_transition(run: &ImportRun, next: ImportRunStatus) -> Result<(), ImportRunError> {
    if run.status == next || run.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ImportRunError::InvalidTransition {
            run_id: run.id.clone(),
            from: run.status,
            to: next,
        })
    }
}

impl ImportRunStore for SqliteImportRunStore {
    fn create(&self, request: NewImportRun) -> Result<ImportRun, ImportRunError> {
        let conn = self.db.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let checkpoint = request.checkpoint.as_ref().map(|c| c.to_string());

        let inserted = conn.execute(
            &format!(
                "INSERT INTO import_runs ({}) VALUES (?, ?, NULL, ?, ?, NULL, ?, ?, ?, 0, ?, NULL, ?, ?)",
                RUN_COLUMNS
            ),
            params![
                id,
                request.proposal_id,
                request.importer,
                ImportRunStatus::Running.as_str(),
                request.progress_current,
                request.progress_total,
                checkpoint,
                now.to_rfc3339(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(ImportRunError::OpenRunExists(request.proposal_id));
            }
            other => {
                other?;
            }
        }

        Ok(ImportRun {
            id,
            proposal_id: request.proposal_id,
            novel_id: None,
            importer: request.importer,
            status: ImportRunStatus::Running,
            error: None,
            progress_current: request.progress_current,
            progress_total: request.progress_total,
            checkpoint: request.checkpoint,
            cloudflare_blocked: false,
            started_at: now,
            finished_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<ImportRun>, ImportRunError> {
        let conn = self.db.lock();
        load_run(&conn, id)
    }

    fn list(&self, filter: &ImportRunFilter) -> Result<Vec<ImportRun>, ImportRunError> {
        let conn = self.db.lock();
        let (where_clause, params) = Self::build_where_clause(filter);
        let limit = if filter.limit < 1 { 50 } else { filter.limit.min(200) };

        let sql = format!(
            "SELECT {} FROM import_runs {} ORDER BY started_at DESC, rowid DESC LIMIT ?",
            RUN_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(limit));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    fn set_status(&self, id: &str, status: ImportRunStatus) -> Result<ImportRun, ImportRunError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let run = load_run(&tx, id)?.ok_or_else(|| ImportRunError::NotFound(id.to_string()))?;
        require_transition(&run, status)?;

        tx.execute(
            "UPDATE import_runs SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        let run = load_run(&tx, id)?.ok_or_else(|| ImportRunError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(run)
    }

    fn update_progress(
        &self,
        id: &str,
        current: i64,
        total: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<(), ImportRunError> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE import_runs SET progress_current = ?, progress_total = ?, checkpoint = ?, updated_at = ? WHERE id = ?",
            params![
                current,
                total,
                checkpoint.to_string(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if updated == 0 {
            return Err(ImportRunError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_novel_id(&self, id: &str, novel_id: &str) -> Result<(), ImportRunError> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE import_runs SET novel_id = ?, updated_at = ? WHERE id = ?",
            params![novel_id, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(ImportRunError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_result(&self, id: &str, result: &RunResult) -> Result<ImportRun, ImportRunError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let run = load_run(&tx, id)?.ok_or_else(|| ImportRunError::NotFound(id.to_string()))?;
        require_transition(&run, result.status)?;

        let now = Utc::now().to_rfc3339();
        let finished_at = result.status.is_terminal().then(|| now.clone());

        tx.execute(
            "UPDATE import_runs
             SET status = ?,
                 novel_id = COALESCE(?, novel_id),
                 error = ?,
                 finished_at = COALESCE(?, finished_at),
                 cloudflare_blocked = COALESCE(?, cloudflare_blocked),
                 updated_at = ?
             WHERE id = ?",
            params![
                result.status.as_str(),
                result.novel_id,
                result.error,
                finished_at,
                result.cloudflare_blocked,
                now,
                id,
            ],
        )?;
        let run = load_run(&tx, id)?.ok_or_else(|| ImportRunError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(run)
    }

    fn find_open_for_proposal(
        &self,
        proposal_id: &str,
    ) -> Result<Option<ImportRun>, ImportRunError> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_runs
                     WHERE proposal_id = ? AND status IN ('running', 'pause_requested', 'paused')
                     ORDER BY started_at DESC, rowid DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![proposal_id],
                Self::row_to_run,
            )
            .optional()?)
    }

    fn list_unfinished(&self) -> Result<Vec<ImportRun>, ImportRunError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_runs
             WHERE status IN ('running', 'pause_requested')
             ORDER BY started_at ASC, rowid ASC",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    fn get_cookie(&self, run_id: &str) -> Result<Option<ImportRunCookie>, ImportRunError> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                "SELECT run_id, cookie_header, created_at, updated_at FROM import_run_cookies WHERE run_id = ?",
                params![run_id],
                Self::row_to_cookie,
            )
            .optional()?)
    }

    fn upsert_cookie(
        &self,
        run_id: &str,
        cookie_header: &str,
    ) -> Result<ImportRunCookie, ImportRunError> {
        let conn = self.db.lock();
        if load_run(&conn, run_id)?.is_none() {
            return Err(ImportRunError::NotFound(run_id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO import_run_cookies (run_id, cookie_header, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(run_id) DO UPDATE SET cookie_header = excluded.cookie_header, updated_at = excluded.updated_at",
            params![run_id, cookie_header, now, now],
        )?;

        Ok(conn.query_row(
            "SELECT run_id, cookie_header, created_at, updated_at FROM import_run_cookies WHERE run_id = ?",
            params![run_id],
            Self::row_to_cookie,
        )?)
    }

    fn delete_cookie(&self, run_id: &str) -> Result<bool, ImportRunError> {
        let conn = self.db.lock();
        let deleted = conn.execute(
            "DELETE FROM import_run_cookies WHERE run_id = ?",
            params![run_id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteImportRunStore {
        SqliteImportRunStore::in_memory().unwrap()
    }

    fn new_run(proposal_id: &str) -> NewImportRun {
        NewImportRun {
            proposal_id: proposal_id.to_string(),
            importer: "json_feed".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();

        assert_eq!(run.status, ImportRunStatus::Running);
        assert!(run.checkpoint.is_none());

        let fetched = store.get(&run.id).unwrap().unwrap();
        assert_eq!(fetched.proposal_id, "p-1");
        assert_eq!(fetched.importer, "json_feed");
        assert!(!fetched.cloudflare_blocked);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_round_trips_exactly() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();
        let checkpoint = json!({"novel_id": "n-1", "slug": "sword-saint", "next_index": 4, "total_chapters": 10});

        store.update_progress(&run.id, 4, 10, &checkpoint).unwrap();

        let fetched = store.get(&run.id).unwrap().unwrap();
        assert_eq!(fetched.checkpoint, Some(checkpoint));
        assert_eq!(fetched.progress_current, 4);
        assert_eq!(fetched.progress_total, 10);
    }

    #[test]
    fn test_pause_cycle() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();

        store
            .set_status(&run.id, ImportRunStatus::PauseRequested)
            .unwrap();
        store.set_status(&run.id, ImportRunStatus::Paused).unwrap();
        let resumed = store.set_status(&run.id, ImportRunStatus::Running).unwrap();
        assert_eq!(resumed.status, ImportRunStatus::Running);
    }

    #[test]
    fn test_terminal_runs_do_not_move() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();
        store.set_result(&run.id, &RunResult::cancelled()).unwrap();

        let err = store
            .set_status(&run.id, ImportRunStatus::Running)
            .unwrap_err();
        assert!(matches!(err, ImportRunError::InvalidTransition { .. }));
    }

    #[test]
    fn test_set_result_keeps_novel_id_and_stamps_finish() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();
        store.set_novel_id(&run.id, "n-1").unwrap();

        let failed = store
            .set_result(&run.id, &RunResult::failed("blocked by cloudflare", true))
            .unwrap();

        assert_eq!(failed.status, ImportRunStatus::Failed);
        assert_eq!(failed.novel_id.as_deref(), Some("n-1"));
        assert_eq!(failed.error.as_deref(), Some("blocked by cloudflare"));
        assert!(failed.cloudflare_blocked);
        assert!(failed.finished_at.is_some());
    }

    #[test]
    fn test_list_newest_first_with_status_filter() {
        let store = create_test_store();
        let first = store.create(new_run("p-1")).unwrap();
        let second = store.create(new_run("p-2")).unwrap();
        store
            .set_result(&first.id, &RunResult::failed("boom", false))
            .unwrap();

        let all = store.list(&ImportRunFilter::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);

        let failed = store
            .list(&ImportRunFilter::new().with_status(ImportRunStatus::Failed))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, first.id);

        let limited = store.list(&ImportRunFilter::new().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_find_open_for_proposal() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();
        assert_eq!(
            store.find_open_for_proposal("p-1").unwrap().unwrap().id,
            run.id
        );

        store
            .set_result(&run.id, &RunResult::succeeded("n-1"))
            .unwrap();
        assert!(store.find_open_for_proposal("p-1").unwrap().is_none());
    }

    #[test]
    fn test_one_open_run_per_proposal() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();

        let err = store.create(new_run("p-1")).unwrap_err();
        assert!(matches!(err, ImportRunError::OpenRunExists(ref p) if p == "p-1"));

        store
            .set_status(&run.id, ImportRunStatus::PauseRequested)
            .unwrap();
        store.set_status(&run.id, ImportRunStatus::Paused).unwrap();
        assert!(store.create(new_run("p-1")).is_err());

        store.set_status(&run.id, ImportRunStatus::Running).unwrap();
        store
            .set_result(&run.id, &RunResult::failed("blocked by cloudflare", true))
            .unwrap();
        let retry = store.create(new_run("p-1")).unwrap();
        assert_eq!(
            store.find_open_for_proposal("p-1").unwrap().unwrap().id,
            retry.id
        );
    }

    #[test]
    fn test_list_unfinished_skips_paused_and_terminal() {
        let store = create_test_store();
        let running = store.create(new_run("p-1")).unwrap();
        let pausing = store.create(new_run("p-2")).unwrap();
        store
            .set_status(&pausing.id, ImportRunStatus::PauseRequested)
            .unwrap();
        let paused = store.create(new_run("p-3")).unwrap();
        store
            .set_status(&paused.id, ImportRunStatus::PauseRequested)
            .unwrap();
        store.set_status(&paused.id, ImportRunStatus::Paused).unwrap();
        let done = store.create(new_run("p-4")).unwrap();
        store.set_result(&done.id, &RunResult::cancelled()).unwrap();

        let ids: Vec<String> = store
            .list_unfinished()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![running.id, pausing.id]);
    }

    #[test]
    fn test_cookie_lifecycle() {
        let store = create_test_store();
        let run = store.create(new_run("p-1")).unwrap();
        assert!(store.get_cookie(&run.id).unwrap().is_none());

        store.upsert_cookie(&run.id, "cf_clearance=abc").unwrap();
        let updated = store.upsert_cookie(&run.id, "cf_clearance=def").unwrap();
        assert_eq!(updated.cookie_header, "cf_clearance=def");

        assert!(store.delete_cookie(&run.id).unwrap());
        assert!(!store.delete_cookie(&run.id).unwrap());

        let err = store.upsert_cookie("missing", "x=y").unwrap_err();
        assert!(matches!(err, ImportRunError::NotFound(_)));
    }
}
