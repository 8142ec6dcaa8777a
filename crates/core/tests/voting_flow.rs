//! Voting and ledger integration tests.
//!
//! Votes debit the ledger in the same transaction that records them, so a
//! failed vote must leave balances, vote rows and scores untouched.

use tempfile::TempDir;

use novels_core::{
    ledger::{reason, LedgerError, TransactionFilter},
    testing::fixtures,
    voting::{ProposalStatus, TargetRef, TargetSelector, TargetStatus},
    Database, LedgerStore, SqliteLedger, SqliteVotingStore, TicketType, VotingError, VotingStore,
};

struct TestHarness {
    db: Database,
    ledger: SqliteLedger,
    voting: SqliteVotingStore,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open(&temp_dir.path().join("test.db")).expect("Failed to open db");
        Self {
            ledger: SqliteLedger::new(db.clone()).expect("ledger"),
            voting: SqliteVotingStore::new(db.clone()).expect("voting store"),
            db,
            _temp_dir: temp_dir,
        }
    }

    fn fund(&self, user: &str, ticket_type: TicketType, amount: i64) {
        self.ledger
            .grant(user, ticket_type, amount, reason::ADMIN_ADJUSTMENT, None, None)
            .expect("Failed to fund user");
    }

    fn proposal(&self, author: &str, title: &str) -> String {
        self.voting
            .create_proposal(fixtures::proposal(
                author,
                title,
                &format!("https://books.example.com/{}", title),
            ))
            .expect("Failed to create proposal")
            .id
    }
}

fn novel_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[test]
fn test_daily_votes_cannot_overdraw() {
    let h = TestHarness::new();
    let proposal = h.proposal("author", "first");
    h.fund("voter", TicketType::DailyVote, 3);

    h.voting
        .cast_proposal_vote("voter", &proposal, TicketType::DailyVote, 2)
        .unwrap();
    let err = h
        .voting
        .cast_proposal_vote("voter", &proposal, TicketType::DailyVote, 2)
        .unwrap_err();

    assert!(matches!(
        err,
        VotingError::Ledger(LedgerError::InsufficientBalance { have: 1, need: 2 })
    ));
    assert!(err.is_conflict());
    assert_eq!(h.ledger.balance("voter", TicketType::DailyVote).unwrap(), 1);
    assert_eq!(
        h.voting.get_proposal(&proposal).unwrap().unwrap().vote_score,
        2
    );
    let spends = h
        .ledger
        .count_transactions(
            &TransactionFilter::new()
                .with_user("voter")
                .with_reason(reason::VOTE_CAST),
        )
        .unwrap();
    assert_eq!(spends, 1);
}

#[test]
fn test_cannot_vote_for_own_proposal() {
    let h = TestHarness::new();
    let proposal = h.proposal("author", "mine");
    h.fund("author", TicketType::TranslationTicket, 5);

    let err = h
        .voting
        .cast_translation_vote("author", &TargetSelector::Proposal(proposal), 1)
        .unwrap_err();
    assert!(matches!(err, VotingError::CannotVoteOwnProposal));
    assert_eq!(
        h.ledger.balance("author", TicketType::TranslationTicket).unwrap(),
        5
    );
}

#[test]
fn test_translation_vote_is_atomic_with_invested_update() {
    let h = TestHarness::new();
    let novel = novel_id();
    h.fund("voter", TicketType::TranslationTicket, 10);
    let target = h.voting.ensure_target(&TargetRef::Novel(novel.clone())).unwrap();

    h.voting
        .cast_translation_vote("voter", &TargetSelector::Target(target.id.clone()), 3)
        .unwrap();

    h.db.lock()
        .execute_batch(
            "CREATE TRIGGER fail_invested BEFORE UPDATE OF tickets_invested ON vote_targets
             BEGIN SELECT RAISE(ABORT, 'simulated'); END;",
        )
        .unwrap();

    let err = h
        .voting
        .cast_translation_vote("voter", &TargetSelector::Novel(novel), 4)
        .unwrap_err();
    assert!(matches!(err, VotingError::Database(ref m) if m.contains("simulated")));

    assert_eq!(
        h.ledger.balance("voter", TicketType::TranslationTicket).unwrap(),
        7
    );
    assert_eq!(
        h.ledger.sum_deltas("voter", TicketType::TranslationTicket).unwrap(),
        7
    );
    let stored = h.voting.get_target(&target.id).unwrap().unwrap();
    assert_eq!(stored.tickets_invested, 3);
    assert_eq!(h.voting.recompute_invested(&target.id).unwrap(), 3);
}

#[test]
fn test_invested_matches_recomputed_sum() {
    let h = TestHarness::new();
    let novel = novel_id();
    let proposal = h.proposal("author", "candidate");
    for user in ["a", "b", "c"] {
        h.fund(user, TicketType::TranslationTicket, 20);
    }

    let amounts = [("a", 3), ("b", 5), ("c", 1), ("a", 7), ("b", 2)];
    for (user, amount) in amounts {
        h.voting
            .cast_translation_vote(user, &TargetSelector::Novel(novel.clone()), amount)
            .unwrap();
        h.voting
            .cast_translation_vote(user, &TargetSelector::Proposal(proposal.clone()), 1)
            .unwrap();
    }
    // Rejected votes leave no trace.
    assert!(h
        .voting
        .cast_translation_vote("c", &TargetSelector::Novel(novel.clone()), 100)
        .is_err());

    for target in [TargetRef::Novel(novel), TargetRef::Proposal(proposal)] {
        let target = h.voting.ensure_target(&target).unwrap();
        assert_eq!(
            target.tickets_invested,
            h.voting.recompute_invested(&target.id).unwrap()
        );
    }
    for user in ["a", "b", "c"] {
        assert_eq!(
            h.ledger.balance(user, TicketType::TranslationTicket).unwrap(),
            h.ledger.sum_deltas(user, TicketType::TranslationTicket).unwrap()
        );
    }
}

#[test]
fn test_translation_winner_tie_breaks_on_age() {
    let h = TestHarness::new();
    let older = h.voting.ensure_target(&TargetRef::Novel(novel_id())).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let newer = h.voting.ensure_target(&TargetRef::Novel(novel_id())).unwrap();
    h.fund("voter", TicketType::TranslationTicket, 10);

    h.voting
        .cast_translation_vote("voter", &TargetSelector::Target(newer.id.clone()), 4)
        .unwrap();
    h.voting
        .cast_translation_vote("voter", &TargetSelector::Target(older.id.clone()), 4)
        .unwrap();

    let winner = h.voting.select_translation_winner(false).unwrap().unwrap();
    assert_eq!(winner.target.id, older.id);
    assert_eq!(winner.previous_status, TargetStatus::Voting);
    assert_eq!(winner.target.status, TargetStatus::Translating);

    // The newer target is next in line.
    let next = h.voting.select_translation_winner(false).unwrap().unwrap();
    assert_eq!(next.target.id, newer.id);
    assert!(h.voting.select_translation_winner(false).unwrap().is_none());
}

#[test]
fn test_winner_floor_and_force() {
    let h = TestHarness::new();
    let proposal = h.proposal("author", "quiet");
    let target = h
        .voting
        .ensure_target(&TargetRef::Proposal(proposal.clone()))
        .unwrap();

    assert!(h.voting.select_translation_winner(false).unwrap().is_none());
    let forced = h.voting.select_translation_winner(true).unwrap().unwrap();
    assert!(forced.forced);
    assert_eq!(forced.target.id, target.id);
    assert_eq!(forced.target.status, TargetStatus::WaitingRelease);

    // Proposal-backed winners keep id and score when rebound to their novel.
    let novel = novel_id();
    let rebound = h
        .voting
        .bind_proposal_to_novel(&proposal, &novel)
        .unwrap()
        .unwrap();
    assert_eq!(rebound.id, target.id);
    assert_eq!(rebound.target, TargetRef::Novel(novel));
    assert_eq!(rebound.status, TargetStatus::Translating);
}

#[test]
fn test_votes_rejected_after_target_leaves_voting() {
    let h = TestHarness::new();
    let target = h.voting.ensure_target(&TargetRef::Novel(novel_id())).unwrap();
    h.fund("voter", TicketType::TranslationTicket, 5);
    h.voting
        .set_target_status(&target.id, TargetStatus::Cancelled, false)
        .unwrap();

    let err = h
        .voting
        .cast_translation_vote("voter", &TargetSelector::Target(target.id.clone()), 1)
        .unwrap_err();
    assert!(matches!(err, VotingError::TargetNotInVotingStatus { .. }));

    // Only the administrative override can reopen voting.
    assert!(h
        .voting
        .set_target_status(&target.id, TargetStatus::Voting, false)
        .is_err());
    let reopened = h
        .voting
        .set_target_status(&target.id, TargetStatus::Voting, true)
        .unwrap();
    assert_eq!(reopened.status, TargetStatus::Voting);
}

#[test]
fn test_proposal_winner_becomes_accepted() {
    let h = TestHarness::new();
    let low = h.proposal("author", "low");
    let high = h.proposal("author", "high");
    h.fund("voter", TicketType::DailyVote, 3);
    h.voting
        .cast_proposal_vote("voter", &low, TicketType::DailyVote, 1)
        .unwrap();
    h.voting
        .cast_proposal_vote("voter", &high, TicketType::DailyVote, 2)
        .unwrap();

    let winner = h.voting.select_proposal_winner(false).unwrap().unwrap();
    assert_eq!(winner.id, high);
    assert_eq!(winner.status, ProposalStatus::Accepted);

    let err = h
        .voting
        .cast_proposal_vote("voter", &high, TicketType::DailyVote, 1)
        .unwrap_err();
    assert!(matches!(err, VotingError::ProposalNotInVotingStatus { .. }));
}
