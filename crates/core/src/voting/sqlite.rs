//! SQLite-backed voting store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::db::{parse_column, parse_timestamp, Database};
use crate::ledger::{self, reason, TicketRef, TicketType};
use crate::metrics::{VOTES_CAST_TOTAL, VOTE_TICKETS_TOTAL, WINNERS_SELECTED_TOTAL};

use super::{
    NewProposal, Proposal, ProposalStatus, ProposalVote, TargetRef, TargetSelector, TargetStatus,
    TargetSummary, TranslationVote, VoteTarget, VotingError, VotingStore, WinnerSelected,
};

const PROPOSAL_COLUMNS: &str =
    "id, user_id, title, original_link, status, vote_score, novel_id, created_at, updated_at";

const TARGET_COLUMNS: &str =
    "id, novel_id, proposal_id, status, tickets_invested, created_at, updated_at";

/// Reference type recorded on translation-vote ledger entries.
const TRANSLATION_TARGET_REF: &str = "translation_vote_target";

/// Reference type recorded on daily-poll ledger entries.
const PROPOSAL_VOTE_REF: &str = "proposal_vote";

/// SQLite-backed store for proposals, vote targets, and votes.
///
/// Shares its [`Database`] with the ledger so a vote and its debit commit together.
pub struct SqliteVotingStore {
    db: Database,
}

impl SqliteVotingStore {
    pub fn new(db: Database) -> Result<Self, VotingError> {
        {
            let conn = db.lock();
            ledger::initialize_schema(&conn)?;
            crate::content::initialize_schema(&conn)
                .map_err(|e| VotingError::Database(e.to_string()))?;
            Self::initialize_schema(&conn)?;
        }
        Ok(Self { db })
    }

    pub fn in_memory() -> Result<Self, VotingError> {
        Self::new(Database::in_memory()?)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), VotingError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                original_link TEXT NOT NULL,
                status TEXT NOT NULL,
                vote_score INTEGER NOT NULL DEFAULT 0,
                novel_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status, vote_score DESC);

            CREATE TABLE IF NOT EXISTS proposal_votes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                proposal_id TEXT NOT NULL REFERENCES proposals(id),
                ticket_type TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_proposal_votes_proposal ON proposal_votes(proposal_id);

            CREATE TABLE IF NOT EXISTS vote_targets (
                id TEXT PRIMARY KEY,
                novel_id TEXT UNIQUE,
                proposal_id TEXT UNIQUE,
                status TEXT NOT NULL DEFAULT 'voting',
                tickets_invested INTEGER NOT NULL DEFAULT 0 CHECK (tickets_invested >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((novel_id IS NULL) <> (proposal_id IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_vote_targets_status ON vote_targets(status, tickets_invested DESC);

            CREATE TABLE IF NOT EXISTS translation_votes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                target_id TEXT NOT NULL REFERENCES vote_targets(id),
                amount INTEGER NOT NULL CHECK (amount > 0),
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_translation_votes_target ON translation_votes(target_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_proposal(row: &rusqlite::Row) -> rusqlite::Result<Proposal> {
        let status: String = row.get(4)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;

        Ok(Proposal {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            original_link: row.get(3)?,
            status: parse_column(4, &status)?,
            vote_score: row.get(5)?,
            novel_id: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<VoteTarget> {
        let novel_id: Option<String> = row.get(1)?;
        let proposal_id: Option<String> = row.get(2)?;
        let status: String = row.get(3)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        let target = match (novel_id, proposal_id) {
            (Some(novel_id), _) => TargetRef::Novel(novel_id),
            (None, Some(proposal_id)) => TargetRef::Proposal(proposal_id),
            (None, None) => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Null,
                    "vote target has neither novel nor proposal".into(),
                ))
            }
        };

        Ok(VoteTarget {
            id: row.get(0)?,
            target,
            status: parse_column(3, &status)?,
            tickets_invested: row.get(4)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<TargetSummary> {
        let status: String = row.get(1)?;
        let updated_at: String = row.get(6)?;
        Ok(TargetSummary {
            target_id: row.get(0)?,
            status: parse_column(1, &status)?,
            score: row.get(2)?,
            novel_id: row.get(3)?,
            proposal_id: row.get(4)?,
            title: row.get(5)?,
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn query_summaries(
        &self,
        filter: &str,
        order: &str,
        limit: i64,
    ) -> Result<Vec<TargetSummary>, VotingError> {
        let conn = self.db.lock();
        let sql = format!(
            r#"
            SELECT t.id, t.status, t.tickets_invested, t.novel_id, t.proposal_id,
                   COALESCE(p.title, n.title, 'Untitled'), t.updated_at
            FROM vote_targets t
            LEFT JOIN proposals p ON p.id = t.proposal_id
            LEFT JOIN novels n ON n.id = t.novel_id
            {}
            ORDER BY {}
            LIMIT ?
            "#,
            filter, order
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], Self::row_to_summary)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

// ============================================================================
// Connection-level helpers (usable inside a transaction)
// ============================================================================

fn validate_id(field: &'static str, value: &str) -> Result<(), VotingError> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| VotingError::InvalidId {
            field,
            value: value.to_string(),
        })
}

fn load_proposal(conn: &Connection, id: &str) -> Result<Option<Proposal>, VotingError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM proposals WHERE id = ?", PROPOSAL_COLUMNS),
            params![id],
            SqliteVotingStore::row_to_proposal,
        )
        .optional()?)
}

fn load_target(conn: &Connection, id: &str) -> Result<Option<VoteTarget>, VotingError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM vote_targets WHERE id = ?", TARGET_COLUMNS),
            params![id],
            SqliteVotingStore::row_to_target,
        )
        .optional()?)
}

fn load_top_target(conn: &Connection) -> Result<Option<VoteTarget>, VotingError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM vote_targets WHERE status = 'voting'
                 ORDER BY tickets_invested DESC, created_at ASC, rowid ASC LIMIT 1",
                TARGET_COLUMNS
            ),
            [],
            SqliteVotingStore::row_to_target,
        )
        .optional()?)
}

fn ensure_target_in(conn: &Connection, target: &TargetRef) -> Result<VoteTarget, VotingError> {
    let (column, id) = match target {
        TargetRef::Novel(id) => ("novel_id", id),
        TargetRef::Proposal(id) => ("proposal_id", id),
    };

    let now = Utc::now().to_rfc3339();
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO vote_targets (id, {}, status, tickets_invested, created_at, updated_at)
             VALUES (?, ?, 'voting', 0, ?, ?)",
            column
        ),
        params![uuid::Uuid::new_v4().to_string(), id, now, now],
    )?;

    Ok(conn.query_row(
        &format!("SELECT {} FROM vote_targets WHERE {} = ?", TARGET_COLUMNS, column),
        params![id],
        SqliteVotingStore::row_to_target,
    )?)
}

fn update_target_status(
    conn: &Connection,
    id: &str,
    status: TargetStatus,
) -> Result<(), VotingError> {
    conn.execute(
        "UPDATE vote_targets SET status = ?, updated_at = ? WHERE id = ?",
        params![status.as_str(), Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

/// Resolve what a translation vote points at, creating the target lazily.
fn resolve_selector(
    conn: &Connection,
    user_id: &str,
    selector: &TargetSelector,
) -> Result<VoteTarget, VotingError> {
    match selector {
        TargetSelector::Target(id) => {
            validate_id("target_id", id)?;
            let target =
                load_target(conn, id)?.ok_or_else(|| VotingError::TargetNotFound(id.clone()))?;
            if let TargetRef::Proposal(proposal_id) = &target.target {
                if let Some(proposal) = load_proposal(conn, proposal_id)? {
                    if proposal.user_id == user_id {
                        return Err(VotingError::CannotVoteOwnProposal);
                    }
                }
            }
            Ok(target)
        }
        TargetSelector::Novel(id) => {
            validate_id("novel_id", id)?;
            ensure_target_in(conn, &TargetRef::Novel(id.clone()))
        }
        TargetSelector::Proposal(id) => {
            validate_id("proposal_id", id)?;
            let proposal =
                load_proposal(conn, id)?.ok_or_else(|| VotingError::ProposalNotFound(id.clone()))?;
            if proposal.user_id == user_id {
                return Err(VotingError::CannotVoteOwnProposal);
            }
            // A released proposal is voted on through its novel.
            match proposal.novel_id {
                Some(novel_id) => ensure_target_in(conn, &TargetRef::Novel(novel_id)),
                None => ensure_target_in(conn, &TargetRef::Proposal(proposal.id)),
            }
        }
    }
}

impl VotingStore for SqliteVotingStore {
    fn create_proposal(&self, request: NewProposal) -> Result<Proposal, VotingError> {
        let conn = self.db.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            &format!(
                "INSERT INTO proposals ({}) VALUES (?, ?, ?, ?, ?, 0, NULL, ?, ?)",
                PROPOSAL_COLUMNS
            ),
            params![
                id,
                request.user_id,
                request.title,
                request.original_link,
                request.status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Proposal {
            id,
            user_id: request.user_id,
            title: request.title,
            original_link: request.original_link,
            status: request.status,
            vote_score: 0,
            novel_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, VotingError> {
        let conn = self.db.lock();
        load_proposal(&conn, id)
    }

    fn find_proposal_by_short_id(&self, short_id: &str) -> Result<Option<Proposal>, VotingError> {
        if short_id.len() != 8 || !short_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VotingError::InvalidId {
                field: "proposal_id",
                value: short_id.to_string(),
            });
        }

        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM proposals WHERE substr(id, 1, 8) = ? ORDER BY created_at ASC LIMIT 1",
                    PROPOSAL_COLUMNS
                ),
                params![short_id.to_ascii_lowercase()],
                Self::row_to_proposal,
            )
            .optional()?)
    }

    fn set_proposal_status(&self, id: &str, status: ProposalStatus) -> Result<(), VotingError> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE proposals SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(VotingError::ProposalNotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_proposal_novel_id(&self, id: &str, novel_id: &str) -> Result<(), VotingError> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE proposals SET novel_id = ?, updated_at = ? WHERE id = ?",
            params![novel_id, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(VotingError::ProposalNotFound(id.to_string()));
        }
        Ok(())
    }

    fn proposal_leaderboard(&self, limit: i64) -> Result<Vec<Proposal>, VotingError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proposals WHERE status = 'voting'
             ORDER BY vote_score DESC, created_at ASC, rowid ASC LIMIT ?",
            PROPOSAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit.clamp(1, 100)], Self::row_to_proposal)?;

        let mut proposals = Vec::new();
        for row in rows {
            proposals.push(row?);
        }
        Ok(proposals)
    }

    fn cast_proposal_vote(
        &self,
        user_id: &str,
        proposal_id: &str,
        ticket_type: TicketType,
        amount: i64,
    ) -> Result<ProposalVote, VotingError> {
        if amount < 1 {
            return Err(VotingError::InvalidAmount(amount));
        }
        validate_id("proposal_id", proposal_id)?;

        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let proposal = load_proposal(&tx, proposal_id)?
            .ok_or_else(|| VotingError::ProposalNotFound(proposal_id.to_string()))?;
        if proposal.status != ProposalStatus::Voting {
            return Err(VotingError::ProposalNotInVotingStatus {
                proposal_id: proposal.id,
                status: proposal.status,
            });
        }
        if proposal.user_id == user_id {
            return Err(VotingError::CannotVoteOwnProposal);
        }

        let vote = ProposalVote {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            proposal_id: proposal.id.clone(),
            ticket_type,
            amount,
            created_at: Utc::now(),
        };

        ledger::spend_within(
            &tx,
            user_id,
            ticket_type,
            amount,
            reason::VOTE_CAST,
            Some(TicketRef::new(PROPOSAL_VOTE_REF, &vote.id)),
        )?;

        tx.execute(
            "INSERT INTO proposal_votes (id, user_id, proposal_id, ticket_type, amount, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                vote.id,
                vote.user_id,
                vote.proposal_id,
                ticket_type.as_str(),
                amount,
                vote.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE proposals SET vote_score = vote_score + ?, updated_at = ? WHERE id = ?",
            params![amount, vote.created_at.to_rfc3339(), vote.proposal_id],
        )?;

        tx.commit()?;

        VOTES_CAST_TOTAL.with_label_values(&["proposal"]).inc();
        VOTE_TICKETS_TOTAL
            .with_label_values(&["proposal"])
            .inc_by(amount as u64);
        debug!(user_id, proposal_id, amount, "Proposal vote cast");
        Ok(vote)
    }

    fn select_proposal_winner(&self, force: bool) -> Result<Option<Proposal>, VotingError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let top = tx
            .query_row(
                &format!(
                    "SELECT {} FROM proposals WHERE status = 'voting'
                     ORDER BY vote_score DESC, created_at ASC, rowid ASC LIMIT 1",
                    PROPOSAL_COLUMNS
                ),
                [],
                Self::row_to_proposal,
            )
            .optional()?;

        let Some(mut winner) = top else {
            info!("No proposals in voting");
            return Ok(None);
        };
        if !force && winner.vote_score < 1 {
            info!("No proposals with votes to process");
            return Ok(None);
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE proposals SET status = ?, updated_at = ? WHERE id = ?",
            params![ProposalStatus::Accepted.as_str(), now.to_rfc3339(), winner.id],
        )?;
        tx.commit()?;

        winner.status = ProposalStatus::Accepted;
        winner.updated_at = now;

        WINNERS_SELECTED_TOTAL.with_label_values(&["proposal"]).inc();
        info!(
            proposal_id = %winner.id,
            vote_score = winner.vote_score,
            forced = force,
            "Voting winner selected"
        );
        Ok(Some(winner))
    }

    fn ensure_target(&self, target: &TargetRef) -> Result<VoteTarget, VotingError> {
        let conn = self.db.lock();
        ensure_target_in(&conn, target)
    }

    fn get_target(&self, id: &str) -> Result<Option<VoteTarget>, VotingError> {
        let conn = self.db.lock();
        load_target(&conn, id)
    }

    fn cast_translation_vote(
        &self,
        user_id: &str,
        selector: &TargetSelector,
        amount: i64,
    ) -> Result<TranslationVote, VotingError> {
        if amount < 1 {
            return Err(VotingError::InvalidAmount(amount));
        }

        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target = resolve_selector(&tx, user_id, selector)?;
        if target.status != TargetStatus::Voting {
            return Err(VotingError::TargetNotInVotingStatus {
                target_id: target.id,
                status: target.status,
            });
        }

        ledger::spend_within(
            &tx,
            user_id,
            TicketType::TranslationTicket,
            amount,
            reason::TRANSLATION_VOTE,
            Some(TicketRef::new(TRANSLATION_TARGET_REF, &target.id)),
        )?;

        let vote = TranslationVote {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            target_id: target.id.clone(),
            amount,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO translation_votes (id, user_id, target_id, amount, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                vote.id,
                vote.user_id,
                vote.target_id,
                amount,
                vote.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE vote_targets SET tickets_invested = tickets_invested + ?, updated_at = ? WHERE id = ?",
            params![amount, vote.created_at.to_rfc3339(), target.id],
        )?;

        tx.commit()?;

        VOTES_CAST_TOTAL.with_label_values(&["translation"]).inc();
        VOTE_TICKETS_TOTAL
            .with_label_values(&["translation"])
            .inc_by(amount as u64);
        debug!(user_id, target_id = %vote.target_id, amount, "Translation vote cast");
        Ok(vote)
    }

    fn top_target(&self) -> Result<Option<VoteTarget>, VotingError> {
        let conn = self.db.lock();
        load_top_target(&conn)
    }

    fn select_translation_winner(
        &self,
        force: bool,
    ) -> Result<Option<WinnerSelected>, VotingError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(top) = load_top_target(&tx)? else {
            info!("No translation targets to process");
            return Ok(None);
        };
        if !force && top.tickets_invested < 1 {
            info!("No translation targets with tickets to process");
            return Ok(None);
        }

        let next = top.winning_status();
        update_target_status(&tx, &top.id, next)?;
        let target = load_target(&tx, &top.id)?
            .ok_or_else(|| VotingError::TargetNotFound(top.id.clone()))?;
        tx.commit()?;

        WINNERS_SELECTED_TOTAL
            .with_label_values(&["translation"])
            .inc();
        info!(
            target_id = %target.id,
            next_status = %next,
            tickets = target.tickets_invested,
            forced = force,
            "Translation vote winner selected"
        );

        Ok(Some(WinnerSelected {
            target,
            previous_status: top.status,
            forced: force,
        }))
    }

    fn set_target_status(
        &self,
        id: &str,
        status: TargetStatus,
        force_override: bool,
    ) -> Result<VoteTarget, VotingError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            load_target(&tx, id)?.ok_or_else(|| VotingError::TargetNotFound(id.to_string()))?;
        if !force_override && current.status != status && !current.status.can_transition_to(status)
        {
            return Err(VotingError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        update_target_status(&tx, id, status)?;
        let target =
            load_target(&tx, id)?.ok_or_else(|| VotingError::TargetNotFound(id.to_string()))?;
        tx.commit()?;

        info!(
            target_id = id,
            from = %current.status,
            to = %status,
            force_override,
            "Translation target status changed"
        );
        Ok(target)
    }

    fn bind_proposal_to_novel(
        &self,
        proposal_id: &str,
        novel_id: &str,
    ) -> Result<Option<VoteTarget>, VotingError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target_id: Option<String> = tx
            .query_row(
                "SELECT id FROM vote_targets WHERE proposal_id = ?",
                params![proposal_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(target_id) = target_id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE vote_targets
             SET novel_id = ?,
                 proposal_id = NULL,
                 status = CASE WHEN status = 'waiting_release' THEN 'translating' ELSE status END,
                 updated_at = ?
             WHERE id = ?",
            params![novel_id, Utc::now().to_rfc3339(), target_id],
        )?;
        let target = load_target(&tx, &target_id)?;
        tx.commit()?;

        if let Some(ref target) = target {
            info!(
                proposal_id,
                novel_id,
                target_id = %target.id,
                status = %target.status,
                "Translation target bound to released novel"
            );
        }
        Ok(target)
    }

    fn list_targets_for_ops(&self, limit: i64) -> Result<Vec<TargetSummary>, VotingError> {
        let limit = if limit < 1 { 100 } else { limit.min(500) };
        self.query_summaries("", "t.updated_at DESC, t.rowid DESC", limit)
    }

    fn translation_leaderboard(&self, limit: i64) -> Result<Vec<TargetSummary>, VotingError> {
        let limit = if limit < 1 { 20 } else { limit.min(50) };
        self.query_summaries(
            "WHERE t.status = 'voting'",
            "t.tickets_invested DESC, t.created_at ASC, t.rowid ASC",
            limit,
        )
    }

    fn recompute_invested(&self, target_id: &str) -> Result<i64, VotingError> {
        let conn = self.db.lock();
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM translation_votes WHERE target_id = ?",
            params![target_id],
            |row| row.get(0),
        )?)
    }
}
