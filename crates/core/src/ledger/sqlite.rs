//! SQLite-backed ledger implementation.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::db::{parse_column, parse_optional_timestamp, parse_timestamp, where_clause, Database};
use crate::metrics::{LEDGER_GRANTED_TOTAL, LEDGER_SPENT_TOTAL, LEDGER_SPEND_REJECTED};

use super::{
    GrantOutcome, GrantRun, GrantRunOutcome, GrantRunStatus, LedgerError, LedgerStore, TicketRef,
    TicketTransaction, TicketType, TransactionFilter, Wallet,
};

const TRANSACTION_COLUMNS: &str =
    "id, user_id, ticket_type, delta, reason, ref_type, ref_id, idempotency_key, created_at";

const GRANT_RUN_COLUMNS: &str =
    "id, kind, period, status, users_processed, total_granted, started_at, completed_at, error";

/// SQLite-backed ticket ledger.
pub struct SqliteLedger {
    db: Database,
}

impl SqliteLedger {
    /// Create a ledger on an open database, creating tables if needed.
    pub fn new(db: Database) -> Result<Self, LedgerError> {
        initialize_schema(&db.lock())?;
        Ok(Self { db })
    }

    /// Open a ledger on a database file.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        Self::new(Database::open(path)?)
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self, LedgerError> {
        Self::new(Database::in_memory()?)
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn row_to_grant_run(row: &rusqlite::Row) -> rusqlite::Result<GrantRun> {
        let status: String = row.get(3)?;
        let started_at: String = row.get(6)?;
        Ok(GrantRun {
            id: row.get(0)?,
            kind: row.get(1)?,
            period: row.get(2)?,
            status: GrantRunStatus::parse(&status),
            users_processed: row.get(4)?,
            total_granted: row.get(5)?,
            started_at: parse_timestamp(&started_at),
            completed_at: parse_optional_timestamp(row.get(7)?),
            error: row.get(8)?,
        })
    }

    fn build_where_clause(filter: &TransactionFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }
        if let Some(ticket_type) = filter.ticket_type {
            conditions.push("ticket_type = ?");
            params.push(Box::new(ticket_type.as_str()));
        }
        if let Some(ref reason) = filter.reason {
            conditions.push("reason = ?");
            params.push(Box::new(reason.clone()));
        }

        (where_clause(&conditions), params)
    }
}

// ============================================================================
// Shared transaction-level helpers
// ============================================================================

pub(crate) fn initialize_schema(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ticket_transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            ticket_type TEXT NOT NULL,
            delta INTEGER NOT NULL,
            reason TEXT NOT NULL,
            ref_type TEXT,
            ref_id TEXT,
            idempotency_key TEXT UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ticket_tx_user_type ON ticket_transactions(user_id, ticket_type);
        CREATE INDEX IF NOT EXISTS idx_ticket_tx_created_at ON ticket_transactions(created_at);

        CREATE TABLE IF NOT EXISTS ticket_balances (
            user_id TEXT NOT NULL,
            ticket_type TEXT NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, ticket_type)
        );

        CREATE TABLE IF NOT EXISTS grant_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            period TEXT NOT NULL,
            status TEXT NOT NULL,
            users_processed INTEGER NOT NULL DEFAULT 0,
            total_granted INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_grant_runs_kind ON grant_runs(kind, started_at);
        "#,
    )?;
    Ok(())
}

pub(crate) fn read_balance(
    conn: &Connection,
    user_id: &str,
    ticket_type: TicketType,
) -> Result<i64, LedgerError> {
    let balance = conn
        .query_row(
            "SELECT balance FROM ticket_balances WHERE user_id = ? AND ticket_type = ?",
            params![user_id, ticket_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

fn key_exists(conn: &Connection, key: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM ticket_transactions WHERE idempotency_key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert a transaction and move the cached balance by the same delta.
///
/// Must run inside an open transaction; the caller commits.
pub(crate) fn append_transaction(
    conn: &Connection,
    user_id: &str,
    ticket_type: TicketType,
    delta: i64,
    reason: &str,
    reference: Option<TicketRef>,
    idempotency_key: Option<&str>,
) -> Result<TicketTransaction, LedgerError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    // Empty keys behave like no key, so they never collide with each other.
    let key = idempotency_key.filter(|k| !k.is_empty()).map(String::from);
    let (ref_type, ref_id) = match &reference {
        Some(r) => (Some(r.ref_type.clone()), r.ref_id.clone()),
        None => (None, None),
    };

    conn.execute(
        &format!(
            "INSERT INTO ticket_transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRANSACTION_COLUMNS
        ),
        params![
            id,
            user_id,
            ticket_type.as_str(),
            delta,
            reason,
            ref_type,
            ref_id,
            key,
            now.to_rfc3339(),
        ],
    )?;

    conn.execute(
        "INSERT INTO ticket_balances (user_id, ticket_type, balance, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(user_id, ticket_type) DO UPDATE SET balance = balance + excluded.balance, updated_at = excluded.updated_at",
        params![user_id, ticket_type.as_str(), delta, now.to_rfc3339()],
    )?;

    Ok(TicketTransaction {
        id,
        user_id: user_id.to_string(),
        ticket_type,
        delta,
        reason: reason.to_string(),
        reference,
        idempotency_key: key,
        created_at: now,
    })
}

/// Debit inside an open transaction, refusing to go below zero.
pub(crate) fn spend_within(
    conn: &Connection,
    user_id: &str,
    ticket_type: TicketType,
    amount: i64,
    reason: &str,
    reference: Option<TicketRef>,
) -> Result<TicketTransaction, LedgerError> {
    if amount < 1 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let have = read_balance(conn, user_id, ticket_type)?;
    if have < amount {
        LEDGER_SPEND_REJECTED
            .with_label_values(&[ticket_type.as_str()])
            .inc();
        return Err(LedgerError::InsufficientBalance { have, need: amount });
    }

    let tx = append_transaction(conn, user_id, ticket_type, -amount, reason, reference, None)?;
    LEDGER_SPENT_TOTAL
        .with_label_values(&[ticket_type.as_str()])
        .inc_by(amount as u64);
    Ok(tx)
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<TicketTransaction> {
    let ticket_type: String = row.get(2)?;
    let ref_type: Option<String> = row.get(5)?;
    let ref_id: Option<String> = row.get(6)?;
    let created_at: String = row.get(8)?;

    Ok(TicketTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        ticket_type: parse_column(2, &ticket_type)?,
        delta: row.get(3)?,
        reason: row.get(4)?,
        reference: ref_type.map(|ref_type| TicketRef { ref_type, ref_id }),
        idempotency_key: row.get(7)?,
        created_at: parse_timestamp(&created_at),
    })
}

impl LedgerStore for SqliteLedger {
    fn balance(&self, user_id: &str, ticket_type: TicketType) -> Result<i64, LedgerError> {
        let conn = self.db.lock();
        read_balance(&conn, user_id, ticket_type)
    }

    fn wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        let conn = self.db.lock();
        let mut wallet = Wallet {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        for ticket_type in TicketType::ALL {
            wallet.set(ticket_type, read_balance(&conn, user_id, ticket_type)?);
        }
        Ok(wallet)
    }

    fn spend(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        amount: i64,
        reason: &str,
        reference: Option<TicketRef>,
    ) -> Result<TicketTransaction, LedgerError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entry = spend_within(&tx, user_id, ticket_type, amount, reason, reference)?;
        tx.commit()?;

        debug!(user_id, ticket_type = %ticket_type, amount, reason, "Tickets spent");
        Ok(entry)
    }

    fn grant(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        amount: i64,
        reason: &str,
        reference: Option<TicketRef>,
        idempotency_key: Option<&str>,
    ) -> Result<GrantOutcome, LedgerError> {
        if amount < 1 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(key) = idempotency_key.filter(|k| !k.is_empty()) {
            if key_exists(&tx, key)? {
                return Ok(GrantOutcome::AlreadyApplied);
            }
        }

        let entry = append_transaction(
            &tx,
            user_id,
            ticket_type,
            amount,
            reason,
            reference,
            idempotency_key,
        )?;
        tx.commit()?;

        LEDGER_GRANTED_TOTAL
            .with_label_values(&[ticket_type.as_str(), reason])
            .inc_by(amount as u64);
        Ok(GrantOutcome::Granted(entry))
    }

    fn set_absolute(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        new_balance: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<GrantOutcome, LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(new_balance));
        }

        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if key_exists(&tx, idempotency_key)? {
            return Ok(GrantOutcome::AlreadyApplied);
        }

        let current = read_balance(&tx, user_id, ticket_type)?;
        let delta = new_balance - current;
        // A zero delta is still written so the key marks the period as handled.
        let entry = append_transaction(
            &tx,
            user_id,
            ticket_type,
            delta,
            reason,
            Some(TicketRef::kind(reason)),
            Some(idempotency_key),
        )?;
        tx.commit()?;

        if delta > 0 {
            LEDGER_GRANTED_TOTAL
                .with_label_values(&[ticket_type.as_str(), reason])
                .inc_by(delta as u64);
        }
        Ok(GrantOutcome::Granted(entry))
    }

    fn has_idempotency_key(&self, key: &str) -> Result<bool, LedgerError> {
        let conn = self.db.lock();
        key_exists(&conn, key)
    }

    fn transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TicketTransaction>, LedgerError> {
        let conn = self.db.lock();
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM ticket_transactions {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), row_to_transaction)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn count_transactions(&self, filter: &TransactionFilter) -> Result<i64, LedgerError> {
        let conn = self.db.lock();
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM ticket_transactions {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn sum_deltas(&self, user_id: &str, ticket_type: TicketType) -> Result<i64, LedgerError> {
        let conn = self.db.lock();
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM ticket_transactions WHERE user_id = ? AND ticket_type = ?",
            params![user_id, ticket_type.as_str()],
            |row| row.get(0),
        )?)
    }

    fn begin_grant_run(&self, kind: &str, period: &str) -> Result<GrantRun, LedgerError> {
        let conn = self.db.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO grant_runs (kind, period, status, started_at) VALUES (?, ?, ?, ?)",
            params![kind, period, GrantRunStatus::Running.as_str(), now.to_rfc3339()],
        )?;

        Ok(GrantRun {
            id: conn.last_insert_rowid(),
            kind: kind.to_string(),
            period: period.to_string(),
            status: GrantRunStatus::Running,
            users_processed: 0,
            total_granted: 0,
            started_at: now,
            completed_at: None,
            error: None,
        })
    }

    fn finish_grant_run(
        &self,
        id: i64,
        outcome: &GrantRunOutcome,
    ) -> Result<GrantRun, LedgerError> {
        let conn = self.db.lock();
        let status = if outcome.error.is_some() {
            GrantRunStatus::Failed
        } else {
            GrantRunStatus::Completed
        };

        let updated = conn.execute(
            "UPDATE grant_runs SET status = ?, users_processed = ?, total_granted = ?, completed_at = ?, error = ? WHERE id = ?",
            params![
                status.as_str(),
                outcome.users_processed,
                outcome.total_granted,
                Utc::now().to_rfc3339(),
                outcome.error,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(LedgerError::GrantRunNotFound(id));
        }

        Ok(conn.query_row(
            &format!("SELECT {} FROM grant_runs WHERE id = ?", GRANT_RUN_COLUMNS),
            params![id],
            Self::row_to_grant_run,
        )?)
    }

    fn last_grant_run(&self, kind: &str) -> Result<Option<GrantRun>, LedgerError> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM grant_runs WHERE kind = ? ORDER BY id DESC LIMIT 1",
                    GRANT_RUN_COLUMNS
                ),
                params![kind],
                Self::row_to_grant_run,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::reason;

    fn create_test_ledger() -> SqliteLedger {
        SqliteLedger::in_memory().unwrap()
    }

    fn fund(ledger: &SqliteLedger, user: &str, ticket_type: TicketType, amount: i64) {
        ledger
            .grant(user, ticket_type, amount, reason::ADMIN_ADJUSTMENT, None, None)
            .unwrap();
    }

    #[test]
    fn test_balance_defaults_to_zero() {
        let ledger = create_test_ledger();
        assert_eq!(ledger.balance("nobody", TicketType::DailyVote).unwrap(), 0);
    }

    #[test]
    fn test_grant_then_spend() {
        let ledger = create_test_ledger();
        fund(&ledger, "alice", TicketType::TranslationTicket, 5);

        let tx = ledger
            .spend(
                "alice",
                TicketType::TranslationTicket,
                3,
                reason::TRANSLATION_VOTE,
                Some(TicketRef::new("translation_vote_target", "t-1")),
            )
            .unwrap();

        assert_eq!(tx.delta, -3);
        assert_eq!(
            ledger.balance("alice", TicketType::TranslationTicket).unwrap(),
            2
        );
    }

    #[test]
    fn test_spend_rejects_overdraft() {
        let ledger = create_test_ledger();
        fund(&ledger, "bob", TicketType::DailyVote, 1);

        let err = ledger
            .spend("bob", TicketType::DailyVote, 2, reason::VOTE_CAST, None)
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { have: 1, need: 2 }
        ));
        assert_eq!(err.to_string(), "insufficient balance: have 1, need 2");
        assert_eq!(ledger.balance("bob", TicketType::DailyVote).unwrap(), 1);
        assert_eq!(
            ledger
                .count_transactions(&TransactionFilter::new().with_user("bob"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_spend_rejects_non_positive_amount() {
        let ledger = create_test_ledger();
        let err = ledger
            .spend("bob", TicketType::DailyVote, 0, reason::VOTE_CAST, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }

    #[test]
    fn test_idempotent_grant_credits_once() {
        let ledger = create_test_ledger();
        let key = "weekly_sub:2026-10-14:carol:novel_request";

        let first = ledger
            .grant("carol", TicketType::NovelRequest, 2, reason::SUBSCRIPTION_GRANT, None, Some(key))
            .unwrap();
        let second = ledger
            .grant("carol", TicketType::NovelRequest, 2, reason::SUBSCRIPTION_GRANT, None, Some(key))
            .unwrap();

        assert!(first.is_granted());
        assert_eq!(second, GrantOutcome::AlreadyApplied);
        assert_eq!(ledger.balance("carol", TicketType::NovelRequest).unwrap(), 2);
        assert!(ledger.has_idempotency_key(key).unwrap());
    }

    #[test]
    fn test_empty_idempotency_key_is_ignored() {
        let ledger = create_test_ledger();
        ledger
            .grant("dave", TicketType::NovelRequest, 1, reason::LEVEL_REWARD, None, Some(""))
            .unwrap();
        ledger
            .grant("dave", TicketType::NovelRequest, 1, reason::LEVEL_REWARD, None, Some(""))
            .unwrap();

        assert_eq!(ledger.balance("dave", TicketType::NovelRequest).unwrap(), 2);
    }

    #[test]
    fn test_set_absolute_tops_up_and_trims() {
        let ledger = create_test_ledger();

        ledger
            .set_absolute("erin", TicketType::DailyVote, 3, reason::DAILY_GRANT, "daily_vote:2026-10-15:erin")
            .unwrap();
        assert_eq!(ledger.balance("erin", TicketType::DailyVote).unwrap(), 3);

        ledger
            .spend("erin", TicketType::DailyVote, 1, reason::VOTE_CAST, None)
            .unwrap();

        let outcome = ledger
            .set_absolute("erin", TicketType::DailyVote, 1, reason::DAILY_GRANT, "daily_vote:2026-10-16:erin")
            .unwrap();
        assert_eq!(outcome.delta(), -1);
        assert_eq!(ledger.balance("erin", TicketType::DailyVote).unwrap(), 1);

        let again = ledger
            .set_absolute("erin", TicketType::DailyVote, 1, reason::DAILY_GRANT, "daily_vote:2026-10-16:erin")
            .unwrap();
        assert_eq!(again, GrantOutcome::AlreadyApplied);
    }

    #[test]
    fn test_cached_balance_matches_sum_of_deltas() {
        let ledger = create_test_ledger();
        fund(&ledger, "frank", TicketType::TranslationTicket, 10);
        for amount in [1, 4, 2] {
            ledger
                .spend("frank", TicketType::TranslationTicket, amount, reason::TRANSLATION_VOTE, None)
                .unwrap();
        }
        let _ = ledger.spend("frank", TicketType::TranslationTicket, 9, reason::TRANSLATION_VOTE, None);

        assert_eq!(
            ledger.balance("frank", TicketType::TranslationTicket).unwrap(),
            ledger.sum_deltas("frank", TicketType::TranslationTicket).unwrap()
        );
    }

    #[test]
    fn test_wallet_reports_every_type() {
        let ledger = create_test_ledger();
        fund(&ledger, "gina", TicketType::DailyVote, 1);
        fund(&ledger, "gina", TicketType::TranslationTicket, 7);

        let wallet = ledger.wallet("gina").unwrap();
        assert_eq!(wallet.daily_vote, 1);
        assert_eq!(wallet.novel_request, 0);
        assert_eq!(wallet.translation_ticket, 7);
    }

    #[test]
    fn test_transactions_filter_and_order() {
        let ledger = create_test_ledger();
        fund(&ledger, "hank", TicketType::DailyVote, 2);
        fund(&ledger, "hank", TicketType::NovelRequest, 1);
        ledger
            .spend("hank", TicketType::DailyVote, 1, reason::VOTE_CAST, None)
            .unwrap();

        let all = ledger
            .transactions(&TransactionFilter::new().with_user("hank"))
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].delta, -1);

        let votes = ledger
            .transactions(
                &TransactionFilter::new()
                    .with_user("hank")
                    .with_ticket_type(TicketType::DailyVote),
            )
            .unwrap();
        assert_eq!(votes.len(), 2);

        let page = ledger
            .transactions(&TransactionFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_grant_run_log() {
        let ledger = create_test_ledger();
        assert!(ledger.last_grant_run("daily_votes").unwrap().is_none());

        let run = ledger.begin_grant_run("daily_votes", "2026-10-16").unwrap();
        assert_eq!(run.status, GrantRunStatus::Running);

        let finished = ledger
            .finish_grant_run(
                run.id,
                &GrantRunOutcome {
                    users_processed: 3,
                    total_granted: 3,
                    error: None,
                },
            )
            .unwrap();
        assert_eq!(finished.status, GrantRunStatus::Completed);
        assert!(finished.completed_at.is_some());

        let last = ledger.last_grant_run("daily_votes").unwrap().unwrap();
        assert_eq!(last.id, run.id);
        assert_eq!(last.users_processed, 3);
    }

    #[test]
    fn test_finish_unknown_grant_run() {
        let ledger = create_test_ledger();
        let err = ledger
            .finish_grant_run(42, &GrantRunOutcome::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::GrantRunNotFound(42)));
    }

    #[test]
    fn test_file_based_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        {
            let ledger = SqliteLedger::open(&db_path).unwrap();
            fund(&ledger, "ivy", TicketType::NovelRequest, 3);
        }

        let ledger = SqliteLedger::open(&db_path).unwrap();
        assert_eq!(ledger.balance("ivy", TicketType::NovelRequest).unwrap(), 3);
    }
}
